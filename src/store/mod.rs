pub mod memory;
pub mod redis;

use async_trait::async_trait;
use futures::Stream;
use log::info;
use std::pin::Pin;
use std::sync::Arc;
use crate::config::SessionConfig;
use crate::error::StoreError;
use crate::models::chat::{ MessagePatch, MessageRecord };
use crate::models::presence::{ PresenceRecord, TypingSignal };

/// Full-snapshot-on-change stream: every item is the complete current
/// collection, never a diff. Dropping the stream cancels the subscription.
pub type SnapshotStream<T> = Pin<Box<dyn Stream<Item = Vec<T>> + Send>>;

/// Replicated document store holding persisted messages and presence.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Messages of a session ordered by timestamp.
    async fn subscribe_messages(
        &self,
        session_id: &str
    ) -> Result<SnapshotStream<MessageRecord>, StoreError>;

    async fn subscribe_typing(
        &self,
        session_id: &str
    ) -> Result<SnapshotStream<TypingSignal>, StoreError>;

    /// Creates or replaces a message under its own id.
    async fn put_message(&self, session_id: &str, record: &MessageRecord) -> Result<(), StoreError>;

    /// Partial-field merge into an existing message, last writer wins.
    async fn merge_message(
        &self,
        session_id: &str,
        message_id: &str,
        patch: &MessagePatch
    ) -> Result<(), StoreError>;

    async fn put_typing(&self, session_id: &str, signal: &TypingSignal) -> Result<(), StoreError>;

    async fn clear_typing(&self, session_id: &str, subject_id: &str) -> Result<(), StoreError>;

    /// Merges an online/offline record; a missing display name keeps the stored one.
    async fn put_presence(&self, record: &PresenceRecord) -> Result<(), StoreError>;
}

pub fn create_store(config: &SessionConfig) -> Result<Arc<dyn RemoteStore>, StoreError> {
    match config.store_type.to_lowercase().as_str() {
        "redis" => {
            let store = redis::RedisStore::new(&config.store_host, &config.store_prefix)?;
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(memory::MemoryStore::new())),
        _ => Err(StoreError::UnsupportedStore(config.store_type.clone())),
    }
}

pub fn initialize_store(config: &SessionConfig) -> Result<Arc<dyn RemoteStore>, StoreError> {
    info!("Session timeline will be stored in: {} at {}", config.store_type, config.store_host);
    create_store(config)
}
