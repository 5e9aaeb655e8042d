use async_trait::async_trait;
use crate::error::StoreError;
use crate::models::chat::{ MessagePatch, MessageRecord };
use crate::models::presence::{ PresenceRecord, TypingSignal };
use crate::store::{ RemoteStore, SnapshotStream };
use std::collections::{ BTreeMap, HashMap };
use std::sync::Mutex;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

struct SessionChannels {
    messages: watch::Sender<Vec<MessageRecord>>,
    typing: watch::Sender<BTreeMap<String, TypingSignal>>,
}

impl SessionChannels {
    fn new() -> Self {
        Self {
            messages: watch::channel(Vec::new()).0,
            typing: watch::channel(BTreeMap::new()).0,
        }
    }
}

/// Process-local store with the same snapshot semantics as the Redis one.
#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<String, SessionChannels>>,
    presence: Mutex<HashMap<String, PresenceRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_session<R>(&self, session_id: &str, f: impl FnOnce(&SessionChannels) -> R) -> R {
        let mut sessions = self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let channels = sessions.entry(session_id.to_string()).or_insert_with(SessionChannels::new);
        f(channels)
    }

    pub fn messages(&self, session_id: &str) -> Vec<MessageRecord> {
        self.with_session(session_id, |channels| channels.messages.borrow().clone())
    }

    pub fn typing(&self, session_id: &str) -> Vec<TypingSignal> {
        self.with_session(session_id, |channels| channels.typing.borrow().values().cloned().collect())
    }

    pub fn presence(&self, uid: &str) -> Option<PresenceRecord> {
        self.presence
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(uid)
            .cloned()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn subscribe_messages(
        &self,
        session_id: &str
    ) -> Result<SnapshotStream<MessageRecord>, StoreError> {
        let rx = self.with_session(session_id, |channels| channels.messages.subscribe());
        Ok(Box::pin(WatchStream::new(rx)))
    }

    async fn subscribe_typing(
        &self,
        session_id: &str
    ) -> Result<SnapshotStream<TypingSignal>, StoreError> {
        use futures::StreamExt;

        let rx = self.with_session(session_id, |channels| channels.typing.subscribe());
        let stream = WatchStream::new(rx).map(|signals| signals.into_values().collect::<Vec<_>>());
        Ok(Box::pin(stream))
    }

    async fn put_message(&self, session_id: &str, record: &MessageRecord) -> Result<(), StoreError> {
        self.with_session(session_id, |channels| {
            channels.messages.send_modify(|records| {
                match records.iter_mut().find(|r| r.id == record.id) {
                    Some(existing) => *existing = record.clone(),
                    None => records.push(record.clone()),
                }
                records.sort_by_key(|r| r.timestamp);
            });
        });
        Ok(())
    }

    async fn merge_message(
        &self,
        session_id: &str,
        message_id: &str,
        patch: &MessagePatch
    ) -> Result<(), StoreError> {
        self.with_session(session_id, |channels| {
            let mut found = false;
            channels.messages.send_if_modified(|records| {
                if let Some(record) = records.iter_mut().find(|r| r.id == message_id) {
                    patch.apply(record);
                    found = true;
                }
                found
            });
            if found {
                Ok(())
            } else {
                Err(StoreError::MessageNotFound {
                    session_id: session_id.to_string(),
                    message_id: message_id.to_string(),
                })
            }
        })
    }

    async fn put_typing(&self, session_id: &str, signal: &TypingSignal) -> Result<(), StoreError> {
        self.with_session(session_id, |channels| {
            channels.typing.send_modify(|signals| {
                signals.insert(signal.subject_id.clone(), signal.clone());
            });
        });
        Ok(())
    }

    async fn clear_typing(&self, session_id: &str, subject_id: &str) -> Result<(), StoreError> {
        self.with_session(session_id, |channels| {
            channels.typing.send_if_modified(|signals| signals.remove(subject_id).is_some());
        });
        Ok(())
    }

    async fn put_presence(&self, record: &PresenceRecord) -> Result<(), StoreError> {
        let mut presence = self.presence.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut merged = record.clone();
        if merged.display_name.is_none() {
            merged.display_name = presence.get(&record.uid).and_then(|p| p.display_name.clone());
        }
        presence.insert(record.uid.clone(), merged);
        Ok(())
    }
}
