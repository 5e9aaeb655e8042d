use crate::models::chat::now_millis;
use crate::models::presence::{ PresenceRecord, TypingSignal };
use crate::store::RemoteStore;
use log::{ debug, warn };
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Periodically marks the local subject as typing in a session.
///
/// Writes are best-effort: failures are logged at debug level and the
/// heartbeat keeps running.
pub struct TypingHeartbeat {
    store: Arc<dyn RemoteStore>,
    session_id: String,
    subject_id: String,
    task: Option<JoinHandle<()>>,
}

impl TypingHeartbeat {
    /// Writes one signal immediately, then one per `interval`.
    pub fn start(
        store: Arc<dyn RemoteStore>,
        session_id: &str,
        subject_id: &str,
        display_name: Option<String>,
        interval: Duration
    ) -> Self {
        Self::start_after(None, store, session_id, subject_id, display_name, interval)
    }

    /// Like `start`, but the first write waits until `previous` has finished,
    /// so a pending clear from an earlier heartbeat cannot erase it.
    pub fn start_after(
        previous: Option<JoinHandle<()>>,
        store: Arc<dyn RemoteStore>,
        session_id: &str,
        subject_id: &str,
        display_name: Option<String>,
        interval: Duration
    ) -> Self {
        let task_store = Arc::clone(&store);
        let task_session = session_id.to_string();
        let task_subject = subject_id.to_string();

        let task = tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let signal = TypingSignal {
                    subject_id: task_subject.clone(),
                    display_name: display_name.clone(),
                    ts: now_millis(),
                };
                if let Err(e) = task_store.put_typing(&task_session, &signal).await {
                    debug!("Typing heartbeat write failed: {}", e);
                }
            }
        });

        Self {
            store,
            session_id: session_id.to_string(),
            subject_id: subject_id.to_string(),
            task: Some(task),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Cancels the timer and, when `clear` is set, removes the signal.
    pub async fn stop(mut self, clear: bool) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if clear {
            if let Err(e) = self.store.clear_typing(&self.session_id, &self.subject_id).await {
                debug!("Clearing typing signal failed: {}", e);
            }
        }
    }
}

impl Drop for TypingHeartbeat {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Records the local subject as online or offline. Never fails the caller.
pub async fn announce_presence(
    store: &dyn RemoteStore,
    subject_id: &str,
    display_name: Option<&str>,
    online: bool
) {
    let record = PresenceRecord {
        uid: subject_id.to_string(),
        display_name: display_name.map(str::to_string),
        last_seen: now_millis(),
        online,
    };
    if let Err(e) = store.put_presence(&record).await {
        warn!("Presence update for {} failed: {}", subject_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[tokio::test(start_paused = true)]
    async fn heartbeat_writes_then_clears_on_stop() {
        let store = Arc::new(MemoryStore::new());
        let heartbeat = TypingHeartbeat::start(
            store.clone(),
            "chat",
            "u1",
            Some("Ada".into()),
            Duration::from_millis(3000)
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        let first = store.typing("chat");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].label(), "Ada");
        assert!(heartbeat.is_running());

        heartbeat.stop(true).await;
        assert!(store.typing("chat").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_without_clear_leaves_the_last_signal() {
        let store = Arc::new(MemoryStore::new());
        let heartbeat = TypingHeartbeat::start(
            store.clone(),
            "chat",
            "u1",
            None,
            Duration::from_millis(3000)
        );

        tokio::time::sleep(Duration::from_millis(6100)).await;
        heartbeat.stop(false).await;

        let signals = store.typing("chat");
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].label(), "u1");
    }

    #[tokio::test]
    async fn restarted_heartbeat_survives_the_previous_clear() {
        let store = Arc::new(MemoryStore::new());
        let first = TypingHeartbeat::start(
            store.clone(),
            "chat",
            "u1",
            None,
            Duration::from_millis(3000)
        );
        tokio::time::sleep(Duration::from_millis(10)).await;

        let stopping = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            first.stop(true).await;
        });
        let second = TypingHeartbeat::start_after(
            Some(stopping),
            store.clone(),
            "chat",
            "u1",
            None,
            Duration::from_millis(3000)
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.typing("chat").len(), 1);
        assert!(second.is_running());
    }

    #[tokio::test]
    async fn presence_announcement_is_recorded() {
        let store = MemoryStore::new();
        announce_presence(&store, "u1", Some("Ada"), true).await;
        let record = store.presence("u1").unwrap();
        assert!(record.online);
        assert_eq!(record.display_name.as_deref(), Some("Ada"));
    }
}
