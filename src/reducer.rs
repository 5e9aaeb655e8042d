//! Folds transport output into proposals against the local timeline.
//!
//! A chunk is appended in place when the newest local message is a
//! system/code message; otherwise it starts a new message. Two separate
//! code responses with nothing in between are therefore merged unless
//! `seal_on_final` is enabled, in which case `final` closes the current
//! target and the next chunk starts a new message.

use crate::models::chat::{ Message, MessageId, MessageKind, Role };
use crate::models::websocket::InboundFrame;
use crate::session::WaitingState;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    Chunk {
        output: String,
        declared: Option<String>,
    },
    Final,
}

impl From<InboundFrame> for StreamEvent {
    fn from(frame: InboundFrame) -> Self {
        match frame {
            InboundFrame::Stream { output, mime } => StreamEvent::Chunk { output, declared: mime },
            InboundFrame::Final => StreamEvent::Final,
        }
    }
}

/// A change the session controller may apply to the timeline it owns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimelineProposal {
    Append {
        id: MessageId,
        text: String,
    },
    Insert(Message),
    /// A streamed response finished; `id` is its last target, if any.
    Completed {
        id: Option<MessageId>,
    },
    Waiting(WaitingState),
}

#[derive(Debug, Default)]
pub struct StreamingReducer {
    seal_on_final: bool,
    sealed: Option<MessageId>,
}

impl StreamingReducer {
    pub fn new(seal_on_final: bool) -> Self {
        Self { seal_on_final, sealed: None }
    }

    /// `last` is the newest message of the local timeline.
    pub fn reduce(
        &mut self,
        last: Option<&Message>,
        event: StreamEvent,
        now: i64
    ) -> Vec<TimelineProposal> {
        match event {
            StreamEvent::Chunk { output, declared } => {
                let kind = declared
                    .as_deref()
                    .map(MessageKind::parse)
                    .unwrap_or(MessageKind::Code);

                let target = last.filter(|msg| {
                    kind == MessageKind::Code &&
                        msg.is_stream_target() &&
                        self.sealed.as_deref() != Some(msg.id.as_str())
                });

                let change = match target {
                    Some(msg) =>
                        TimelineProposal::Append {
                            id: msg.id.clone(),
                            text: output,
                        },
                    None => TimelineProposal::Insert(Message::new(Role::System, kind, output, now)),
                };
                vec![change, TimelineProposal::Waiting(WaitingState::RunningCode)]
            }
            StreamEvent::Final => {
                let id = last.filter(|msg| msg.is_stream_target()).map(|msg| msg.id.clone());
                if self.seal_on_final {
                    self.sealed = id.clone();
                }
                vec![TimelineProposal::Completed { id }, TimelineProposal::Waiting(WaitingState::Idle)]
            }
        }
    }

    pub fn reset(&mut self) {
        self.sealed = None;
    }
}
