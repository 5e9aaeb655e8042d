use crate::cli::Args;
use crate::command::CommandSet;
use std::time::Duration;
use uuid::Uuid;

pub struct ModelOption {
    pub display_name: &'static str,
    pub name: &'static str,
}

pub const MODELS: &[ModelOption] = &[
    ModelOption { display_name: "GPT-3.5", name: "gpt-3.5-turbo" },
    ModelOption { display_name: "GPT-4", name: "gpt-4" },
];

pub const DEFAULT_GREETING: &[&str] = &[
    "Hello! Ask me to do something.",
    "Type 'reset' to restart the kernel.",
];

/// Engine-facing settings for one chat session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub session_id: String,
    pub subject_id: String,
    pub display_name: Option<String>,
    pub model: String,
    pub credential: String,
    pub commands: CommandSet,
    pub greeting: Vec<String>,
    pub heartbeat_interval: Duration,
    pub typing_stale_after: Duration,
    pub seal_on_final: bool,
    pub persist_local: bool,
    pub ws_endpoint: String,
    pub store_type: String,
    pub store_host: String,
    pub store_prefix: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: "default-chat".to_string(),
            subject_id: Uuid::new_v4().to_string(),
            display_name: None,
            model: MODELS[0].name.to_string(),
            credential: String::new(),
            commands: CommandSet::default(),
            greeting: DEFAULT_GREETING.iter()
                .map(|line| line.to_string())
                .collect(),
            heartbeat_interval: Duration::from_millis(3000),
            typing_stale_after: Duration::from_millis(10_000),
            seal_on_final: false,
            persist_local: true,
            ws_endpoint: "ws://127.0.0.1:3001/ws".to_string(),
            store_type: "redis".to_string(),
            store_host: "redis://127.0.0.1:6379".to_string(),
            store_prefix: "chats:".to_string(),
        }
    }
}

impl From<&Args> for SessionConfig {
    fn from(args: &Args) -> Self {
        let defaults = SessionConfig::default();
        Self {
            session_id: args.session_id.clone(),
            subject_id: args.subject_id.clone().unwrap_or(defaults.subject_id),
            display_name: args.display_name.clone().filter(|name| !name.trim().is_empty()),
            model: args.model.clone(),
            credential: args.credential.clone(),
            heartbeat_interval: Duration::from_millis(args.heartbeat_ms.max(1)),
            typing_stale_after: Duration::from_millis(args.typing_stale_ms),
            seal_on_final: args.seal_on_final,
            persist_local: args.persist_local,
            ws_endpoint: args.ws_endpoint.clone(),
            store_type: args.store_type.clone(),
            store_host: args.store_host.clone(),
            store_prefix: args.store_prefix.clone(),
            ..defaults
        }
    }
}

pub fn model_display_name(name: &str) -> &str {
    MODELS.iter()
        .find(|m| m.name == name)
        .map(|m| m.display_name)
        .unwrap_or(name)
}
