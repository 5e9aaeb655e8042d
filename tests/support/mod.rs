#![allow(dead_code)]

use neocoder_sync::config::SessionConfig;
use neocoder_sync::models::websocket::OutboundFrame;
use neocoder_sync::session::TimelineView;
use neocoder_sync::transport::{ ConnectionState, Transport };
use std::sync::{ Arc, Mutex };
use std::time::Duration;
use tokio::sync::watch;

/// Transport double that keeps every frame sent while `Open`.
pub struct RecordingTransport {
    frames: Mutex<Vec<OutboundFrame>>,
    state: Mutex<ConnectionState>,
}

impl RecordingTransport {
    pub fn with_state(state: ConnectionState) -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(Vec::new()),
            state: Mutex::new(state),
        })
    }

    pub fn open() -> Arc<Self> {
        Self::with_state(ConnectionState::Open)
    }

    pub fn frames(&self) -> Vec<OutboundFrame> {
        self.frames.lock().unwrap().clone()
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }
}

impl Transport for RecordingTransport {
    fn send(&self, frame: OutboundFrame) {
        if self.state() == ConnectionState::Open {
            self.frames.lock().unwrap().push(frame);
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    fn close(&self) {
        self.set_state(ConnectionState::Closed);
    }
}

pub fn test_config() -> SessionConfig {
    SessionConfig {
        session_id: "test-chat".to_string(),
        subject_id: "me".to_string(),
        model: "gpt-4".to_string(),
        credential: "sk-test".to_string(),
        greeting: Vec::new(),
        persist_local: false,
        store_type: "memory".to_string(),
        ..SessionConfig::default()
    }
}

/// Waits until the published view satisfies `pred`, failing after two seconds.
pub async fn wait_for<F>(views: &mut watch::Receiver<TimelineView>, pred: F) -> TimelineView
    where F: Fn(&TimelineView) -> bool
{
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            {
                let view = views.borrow_and_update();
                if pred(&view) {
                    return view.clone();
                }
            }
            views.changed().await.expect("controller dropped its view sender");
        }
    }).await;
    waited.expect("timed out waiting for view")
}
