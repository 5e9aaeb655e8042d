use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use serde::{ Deserialize, Serialize };
use std::fmt;
use uuid::Uuid;

pub type MessageId = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    System,
}

/// Content type of a message. The wire form is an open string: anything
/// under `image/` is carried as `Binary`, unknown values pass through.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    Message,
    MessageRaw,
    Code,
    Binary {
        mime: String,
    },
    Other(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderHint {
    Text,
    Code,
    InlineImage,
    Unknown,
}

impl MessageKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "message" => MessageKind::Message,
            "message_raw" => MessageKind::MessageRaw,
            "code" => MessageKind::Code,
            mime if mime.starts_with("image/") => MessageKind::Binary { mime: mime.to_string() },
            other => MessageKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::Message => "message",
            MessageKind::MessageRaw => "message_raw",
            MessageKind::Code => "code",
            MessageKind::Binary { mime } => mime,
            MessageKind::Other(raw) => raw,
        }
    }

    pub fn render_hint(&self) -> RenderHint {
        match self {
            MessageKind::Message | MessageKind::MessageRaw => RenderHint::Text,
            MessageKind::Code => RenderHint::Code,
            MessageKind::Binary { .. } => RenderHint::InlineImage,
            MessageKind::Other(_) => RenderHint::Unknown,
        }
    }
}

impl From<String> for MessageKind {
    fn from(raw: String) -> Self {
        MessageKind::parse(&raw)
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the displayed copy of a message came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Origin {
    #[default]
    Local,
    Persisted,
}

/// Persisted shape of a message, as written to and read from the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub text: String,
    pub role: Role,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub pinned: bool,
    pub timestamp: i64,
}

/// Partial-field merge applied to a single stored message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl MessagePatch {
    pub fn pinned(value: bool) -> Self {
        Self { pinned: Some(value), ..Self::default() }
    }

    pub fn apply(&self, record: &mut MessageRecord) {
        if let Some(pinned) = self.pinned {
            record.pinned = pinned;
        }
        if let Some(text) = &self.text {
            record.text = text.clone();
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub text: String,
    pub role: Role,
    pub kind: MessageKind,
    pub pinned: bool,
    pub timestamp: i64,
    pub origin: Origin,
}

impl Message {
    pub fn new(role: Role, kind: MessageKind, text: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            role,
            kind,
            pinned: false,
            timestamp,
            origin: Origin::Local,
        }
    }

    pub fn user(text: impl Into<String>, timestamp: i64) -> Self {
        Self::new(Role::User, MessageKind::Message, text, timestamp)
    }

    pub fn notice(text: impl Into<String>, timestamp: i64) -> Self {
        Self::new(Role::System, MessageKind::Message, text, timestamp)
    }

    pub fn from_record(record: MessageRecord) -> Self {
        Self {
            id: record.id,
            text: record.text,
            role: record.role,
            kind: record.kind,
            pinned: record.pinned,
            timestamp: record.timestamp,
            origin: Origin::Persisted,
        }
    }

    pub fn to_record(&self) -> MessageRecord {
        MessageRecord {
            id: self.id.clone(),
            text: self.text.clone(),
            role: self.role,
            kind: self.kind.clone(),
            pinned: self.pinned,
            timestamp: self.timestamp,
        }
    }

    /// True for the message a streamed chunk may be appended to.
    pub fn is_stream_target(&self) -> bool {
        self.role == Role::System && self.kind == MessageKind::Code
    }

    pub fn offers_retry(&self) -> bool {
        self.role == Role::System && self.kind != MessageKind::Code
    }

    /// `data:` URI for inline images; `None` for every other kind.
    pub fn data_uri(&self) -> Option<String> {
        match &self.kind {
            MessageKind::Binary { mime } => Some(format!("data:{};base64,{}", mime, self.text)),
            _ => None,
        }
    }

    /// Decoded payload size of an inline image, if the text is valid base64.
    pub fn binary_len(&self) -> Option<usize> {
        match &self.kind {
            MessageKind::Binary { .. } =>
                BASE64.decode(self.text.trim())
                    .ok()
                    .map(|bytes| bytes.len()),
            _ => None,
        }
    }
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
