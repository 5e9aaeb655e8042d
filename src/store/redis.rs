use async_trait::async_trait;
use crate::error::StoreError;
use crate::models::chat::{ MessagePatch, MessageRecord };
use crate::models::presence::{ PresenceRecord, TypingSignal };
use crate::store::{ RemoteStore, SnapshotStream };
use futures::future::BoxFuture;
use futures::{ Stream, StreamExt };
use log::{ debug, error, warn };
use redis::{ AsyncCommands, Client };
use redis::aio::MultiplexedConnection;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const SNAPSHOT_BUFFER: usize = 16;

/// Redis layout per session:
/// - `<prefix><session>:messages` hash of id -> record JSON
/// - `<prefix><session>:order` sorted set of ids scored by timestamp
/// - `<prefix><session>:typing` hash of subject id -> signal JSON
/// - `<prefix><session>:messages:changed` / `:typing:changed` pub/sub channels
pub struct RedisStore {
    client: Client,
    key_prefix: String,
}

impl RedisStore {
    pub fn new(host: &str, key_prefix: &str) -> Result<Self, StoreError> {
        Ok(Self {
            client: Client::open(host)?,
            key_prefix: key_prefix.to_string(),
        })
    }

    async fn get_connection(&self) -> Result<MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    fn key(&self, session_id: &str, suffix: &str) -> String {
        format!("{}{}:{}", self.key_prefix, session_id, suffix)
    }

    fn presence_key(&self) -> String {
        format!("{}presence", self.key_prefix)
    }

    /// Loads a snapshot once, then again after every notification on
    /// `channel`, until the consumer drops the stream.
    async fn watch_channel<T, L>(
        &self,
        channel: String,
        loader: L
    ) -> Result<SnapshotStream<T>, StoreError>
        where
            T: Send + 'static,
            L: Fn(MultiplexedConnection) -> BoxFuture<'static, Result<Vec<T>, StoreError>> +
                Send +
                'static
    {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&channel).await?;
        let conn = self.get_connection().await?;
        let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);

        tokio::spawn(
            forward_snapshots(channel, pubsub.into_on_message(), move || loader(conn.clone()), tx)
        );

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Sends a fresh snapshot now and after every notification. Ends when the
/// notifications stop or the receiving side is dropped, whichever is first.
async fn forward_snapshots<T, N, L>(
    channel: String,
    notifications: N,
    load: L,
    tx: mpsc::Sender<Vec<T>>
)
    where N: Stream, L: Fn() -> BoxFuture<'static, Result<Vec<T>, StoreError>>
{
    tokio::pin!(notifications);
    loop {
        match load().await {
            Ok(snapshot) => {
                if tx.send(snapshot).await.is_err() {
                    debug!("Snapshot consumer for {} dropped", channel);
                    break;
                }
            }
            Err(e) => {
                error!("Failed to load snapshot for {}: {}", channel, e);
            }
        }
        tokio::select! {
            _ = tx.closed() => {
                debug!("Snapshot consumer for {} dropped", channel);
                break;
            }
            next = notifications.next() => {
                if next.is_none() {
                    warn!("Change channel {} closed", channel);
                    break;
                }
            }
        }
    }
}

async fn load_messages(
    mut conn: MultiplexedConnection,
    order_key: String,
    messages_key: String
) -> Result<Vec<MessageRecord>, StoreError> {
    let ids: Vec<String> = conn.zrange(&order_key, 0, -1).await?;
    let raw: HashMap<String, String> = conn.hgetall(&messages_key).await?;
    let mut records = Vec::with_capacity(ids.len());

    for id in &ids {
        match raw.get(id) {
            Some(json) => {
                match serde_json::from_str::<MessageRecord>(json) {
                    Ok(record) => records.push(record),
                    Err(e) => error!("Error parsing message {}: {}", id, e),
                }
            }
            None => debug!("Ordered id {} has no message body", id),
        }
    }

    Ok(records)
}

async fn load_typing(
    mut conn: MultiplexedConnection,
    typing_key: String
) -> Result<Vec<TypingSignal>, StoreError> {
    let raw: HashMap<String, String> = conn.hgetall(&typing_key).await?;
    let mut signals: Vec<TypingSignal> = raw
        .into_iter()
        .filter_map(|(subject, json)| {
            match serde_json::from_str(&json) {
                Ok(signal) => Some(signal),
                Err(e) => {
                    error!("Error parsing typing signal for {}: {}", subject, e);
                    None
                }
            }
        })
        .collect();
    signals.sort_by(|a, b| a.subject_id.cmp(&b.subject_id));
    Ok(signals)
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn subscribe_messages(
        &self,
        session_id: &str
    ) -> Result<SnapshotStream<MessageRecord>, StoreError> {
        let order_key = self.key(session_id, "order");
        let messages_key = self.key(session_id, "messages");
        self.watch_channel(self.key(session_id, "messages:changed"), move |conn| {
            Box::pin(load_messages(conn, order_key.clone(), messages_key.clone()))
        }).await
    }

    async fn subscribe_typing(
        &self,
        session_id: &str
    ) -> Result<SnapshotStream<TypingSignal>, StoreError> {
        let typing_key = self.key(session_id, "typing");
        self.watch_channel(self.key(session_id, "typing:changed"), move |conn| {
            Box::pin(load_typing(conn, typing_key.clone()))
        }).await
    }

    async fn put_message(&self, session_id: &str, record: &MessageRecord) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        let json = serde_json::to_string(record)?;

        redis
            ::pipe()
            .atomic()
            .hset(self.key(session_id, "messages"), &record.id, json)
            .ignore()
            .zadd(self.key(session_id, "order"), &record.id, record.timestamp)
            .ignore()
            .publish(self.key(session_id, "messages:changed"), &record.id)
            .ignore()
            .query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn merge_message(
        &self,
        session_id: &str,
        message_id: &str,
        patch: &MessagePatch
    ) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        let messages_key = self.key(session_id, "messages");

        let current: Option<String> = conn.hget(&messages_key, message_id).await?;
        let mut record: MessageRecord = match current {
            Some(json) => serde_json::from_str(&json)?,
            None => {
                return Err(StoreError::MessageNotFound {
                    session_id: session_id.to_string(),
                    message_id: message_id.to_string(),
                });
            }
        };
        patch.apply(&mut record);

        redis
            ::pipe()
            .hset(&messages_key, message_id, serde_json::to_string(&record)?)
            .ignore()
            .publish(self.key(session_id, "messages:changed"), message_id)
            .ignore()
            .query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn put_typing(&self, session_id: &str, signal: &TypingSignal) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        redis
            ::pipe()
            .hset(self.key(session_id, "typing"), &signal.subject_id, serde_json::to_string(signal)?)
            .ignore()
            .publish(self.key(session_id, "typing:changed"), &signal.subject_id)
            .ignore()
            .query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn clear_typing(&self, session_id: &str, subject_id: &str) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        redis
            ::pipe()
            .hdel(self.key(session_id, "typing"), subject_id)
            .ignore()
            .publish(self.key(session_id, "typing:changed"), subject_id)
            .ignore()
            .query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn put_presence(&self, record: &PresenceRecord) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        let key = self.presence_key();

        let mut merged = record.clone();
        if merged.display_name.is_none() {
            let existing: Option<String> = conn.hget(&key, &record.uid).await?;
            if let Some(json) = existing {
                match serde_json::from_str::<PresenceRecord>(&json) {
                    Ok(previous) => merged.display_name = previous.display_name,
                    Err(e) => warn!("Overwriting unreadable presence for {}: {}", record.uid, e),
                }
            }
        }

        let _: () = conn.hset(&key, &record.uid, serde_json::to_string(&merged)?).await?;
        Ok(())
    }
}
