use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid transport endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    #[error("unsupported endpoint scheme '{0}', expected ws or wss")]
    UnsupportedScheme(String),

    #[error("websocket connect failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("transport is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("store record JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message '{message_id}' not found in session '{session_id}'")]
    MessageNotFound {
        session_id: String,
        message_id: String,
    },

    #[error("unsupported store type: {0}")]
    UnsupportedStore(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("input is empty")]
    Empty,
}
