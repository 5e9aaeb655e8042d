use crate::error::StoreError;
use crate::models::chat::{ Message, MessageId, MessagePatch, MessageRecord };
use crate::models::presence::TypingSignal;
use crate::store::RemoteStore;
use futures::StreamExt;
use log::{ debug, info, warn };
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Snapshot notifications forwarded into the session's event loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteEvent {
    Messages(Vec<MessageRecord>),
    Typing(Vec<TypingSignal>),
}

/// Persisted partition of the timeline plus optimistic pin hints.
///
/// `authoritative` is whatever the last snapshot said. `local_hint` holds
/// pin flips not yet confirmed; every snapshot discards all of them.
#[derive(Debug, Default)]
pub struct RemotePartition {
    authoritative: Vec<Message>,
    local_hint: HashMap<MessageId, bool>,
    typing: Vec<TypingSignal>,
}

impl RemotePartition {
    pub fn replace(&mut self, snapshot: Vec<MessageRecord>) {
        if !self.local_hint.is_empty() {
            debug!("Discarding {} optimistic pin hint(s) on snapshot", self.local_hint.len());
        }
        self.local_hint.clear();
        self.authoritative = snapshot.into_iter().map(Message::from_record).collect();
    }

    pub fn replace_typing(&mut self, signals: Vec<TypingSignal>) {
        self.typing = signals;
    }

    pub fn contains(&self, id: &str) -> bool {
        self.authoritative.iter().any(|msg| msg.id == id)
    }

    /// Text of the persisted copy, if the snapshot holds one.
    pub fn text(&self, id: &str) -> Option<&str> {
        self.authoritative
            .iter()
            .find(|msg| msg.id == id)
            .map(|msg| msg.text.as_str())
    }

    /// Records an optimistic pin flip. Returns false for unknown ids.
    pub fn hint_pinned(&mut self, id: &str, value: bool) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.local_hint.insert(id.to_string(), value);
        true
    }

    /// Effective pin flag: the hint if present, else the snapshot's value.
    pub fn pinned(&self, id: &str) -> Option<bool> {
        if let Some(hint) = self.local_hint.get(id) {
            return Some(*hint);
        }
        self.authoritative
            .iter()
            .find(|msg| msg.id == id)
            .map(|msg| msg.pinned)
    }

    /// Persisted messages with hints applied, in snapshot order.
    pub fn messages(&self) -> Vec<Message> {
        self.authoritative
            .iter()
            .map(|msg| {
                let mut msg = msg.clone();
                if let Some(hint) = self.local_hint.get(&msg.id) {
                    msg.pinned = *hint;
                }
                msg
            })
            .collect()
    }

    pub fn typing(&self) -> &[TypingSignal] {
        &self.typing
    }
}

/// Keeps the two live subscriptions of a session running and forwards
/// their snapshots. Writes issued here are fire-and-forget.
pub struct RemoteTimelineSubscriber {
    store: Arc<dyn RemoteStore>,
    session_id: String,
    tasks: Vec<JoinHandle<()>>,
}

impl RemoteTimelineSubscriber {
    pub fn new(store: Arc<dyn RemoteStore>, session_id: &str) -> Self {
        Self {
            store,
            session_id: session_id.to_string(),
            tasks: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_active(&self) -> bool {
        self.tasks.iter().any(|task| !task.is_finished())
    }

    /// Subscribes to messages and typing signals. Any previous subscription
    /// is cancelled first, so this also serves as restart.
    pub async fn start<E>(&mut self, events: mpsc::UnboundedSender<E>) -> Result<(), StoreError>
        where E: From<RemoteEvent> + Send + 'static
    {
        self.cancel();

        let mut messages = self.store.subscribe_messages(&self.session_id).await?;
        let mut typing = self.store.subscribe_typing(&self.session_id).await?;
        info!("Subscribed to session {}", self.session_id);

        let message_events = events.clone();
        let session = self.session_id.clone();
        self.tasks.push(
            tokio::spawn(async move {
                while let Some(snapshot) = messages.next().await {
                    if message_events.send(RemoteEvent::Messages(snapshot).into()).is_err() {
                        break;
                    }
                }
                debug!("Message subscription for {} ended", session);
            })
        );

        let session = self.session_id.clone();
        self.tasks.push(
            tokio::spawn(async move {
                while let Some(snapshot) = typing.next().await {
                    if events.send(RemoteEvent::Typing(snapshot).into()).is_err() {
                        break;
                    }
                }
                debug!("Typing subscription for {} ended", session);
            })
        );

        Ok(())
    }

    pub fn cancel(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    pub fn write_pinned(&self, message_id: &str, value: bool) {
        let store = Arc::clone(&self.store);
        let session = self.session_id.clone();
        let id = message_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = store.merge_message(&session, &id, &MessagePatch::pinned(value)).await {
                warn!("Pin write for message {} failed: {}", id, e);
            }
        });
    }

    pub fn persist(&self, record: MessageRecord) {
        let store = Arc::clone(&self.store);
        let session = self.session_id.clone();
        tokio::spawn(async move {
            if let Err(e) = store.put_message(&session, &record).await {
                warn!("Persisting message {} failed: {}", record.id, e);
            }
        });
    }
}

impl Drop for RemoteTimelineSubscriber {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::{ MessageKind, Origin, Role };
    use crate::store::memory::MemoryStore;
    use std::time::Duration;

    fn record(id: &str, pinned: bool) -> MessageRecord {
        MessageRecord {
            id: id.to_string(),
            text: id.to_string(),
            role: Role::System,
            kind: MessageKind::Message,
            pinned,
            timestamp: 1,
        }
    }

    #[test]
    fn hint_overrides_until_next_snapshot() {
        let mut partition = RemotePartition::default();
        partition.replace(vec![record("a", false)]);

        assert!(partition.hint_pinned("a", true));
        assert_eq!(partition.pinned("a"), Some(true));
        assert!(partition.messages()[0].pinned);

        partition.replace(vec![record("a", false)]);
        assert_eq!(partition.pinned("a"), Some(false));
        assert!(!partition.messages()[0].pinned);
    }

    #[test]
    fn hints_for_unknown_ids_are_refused() {
        let mut partition = RemotePartition::default();
        assert!(!partition.hint_pinned("ghost", true));
        assert_eq!(partition.pinned("ghost"), None);
    }

    #[test]
    fn snapshot_messages_are_marked_persisted() {
        let mut partition = RemotePartition::default();
        partition.replace(vec![record("a", true)]);
        assert_eq!(partition.messages()[0].origin, Origin::Persisted);
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<RemoteEvent>) -> Vec<RemoteEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn message_snapshots(events: &[RemoteEvent]) -> usize {
        events
            .iter()
            .filter(|event| matches!(event, RemoteEvent::Messages(_)))
            .count()
    }

    #[tokio::test]
    async fn restart_replaces_the_previous_subscription() {
        let store = Arc::new(MemoryStore::new());
        let mut subscriber = RemoteTimelineSubscriber::new(store.clone(), "s");
        let (tx, mut rx) = mpsc::unbounded_channel::<RemoteEvent>();

        subscriber.start(tx.clone()).await.unwrap();
        subscriber.start(tx.clone()).await.unwrap();
        assert_eq!(subscriber.tasks.len(), 2);
        assert!(subscriber.is_active());

        tokio::time::sleep(Duration::from_millis(20)).await;
        drain(&mut rx);

        store.put_message("s", &record("a", false)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let events = drain(&mut rx);
        assert_eq!(message_snapshots(&events), 1);
        assert_eq!(events[0], RemoteEvent::Messages(vec![record("a", false)]));
    }

    #[tokio::test]
    async fn cancel_stops_delivery() {
        let store = Arc::new(MemoryStore::new());
        let mut subscriber = RemoteTimelineSubscriber::new(store.clone(), "s");
        let (tx, mut rx) = mpsc::unbounded_channel::<RemoteEvent>();

        subscriber.start(tx).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(message_snapshots(&drain(&mut rx)), 1);

        subscriber.cancel();
        assert!(!subscriber.is_active());

        store.put_message("s", &record("a", false)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(drain(&mut rx).is_empty());
    }
}
