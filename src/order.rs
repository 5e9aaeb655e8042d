use crate::models::chat::Message;
use std::collections::HashSet;

/// Vertical gap rendered after each pinned message, in pixels.
pub const PINNED_GAP_PX: f64 = 6.0;

/// Pinned-first display order: a stable partition of `timeline`.
pub fn display_order(timeline: &[Message]) -> Vec<&Message> {
    let (mut pinned, unpinned): (Vec<&Message>, Vec<&Message>) = timeline
        .iter()
        .partition(|msg| msg.pinned);
    pinned.extend(unpinned);
    pinned
}

/// Ids of currently pinned messages, derived from the timeline.
pub fn pin_set(timeline: &[Message]) -> HashSet<&str> {
    timeline
        .iter()
        .filter(|msg| msg.pinned)
        .map(|msg| msg.id.as_str())
        .collect()
}

/// Total header space taken by pinned messages given their rendered heights.
pub fn pinned_rendered_height(heights: impl IntoIterator<Item = f64>) -> f64 {
    heights
        .into_iter()
        .map(|h| h + PINNED_GAP_PX)
        .sum()
}

/// Scroll offset that shows the newest content below the pinned header.
pub fn scroll_target(
    container_height: f64,
    container_scroll_height: f64,
    pinned_rendered_height: f64
) -> f64 {
    container_scroll_height - container_height + pinned_rendered_height
}
