use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Transport Args ---
    /// WebSocket endpoint of the execution backend (e.g., ws://127.0.0.1:3001/ws)
    #[arg(long, env = "WS_ENDPOINT", default_value = "ws://127.0.0.1:3001/ws")]
    pub ws_endpoint: String,

    // --- Store Args ---
    /// Shared timeline store type (redis, memory)
    #[arg(long, env = "STORE_TYPE", default_value = "redis")]
    pub store_type: String,

    /// Shared timeline store host endpoint (e.g., redis://127.0.0.1:6379)
    #[arg(long, env = "STORE_HOST", default_value = "redis://127.0.0.1:6379")]
    pub store_host: String,

    /// Prefix for store keys.
    #[arg(long, env = "STORE_PREFIX", default_value = "chats:")]
    pub store_prefix: String,

    // --- Session Args ---
    /// Chat session to join.
    #[arg(long, env = "SESSION_ID", default_value = "default-chat")]
    pub session_id: String,

    /// Identity of the local user for typing and presence records. Random when unset.
    #[arg(long, env = "SUBJECT_ID")]
    pub subject_id: Option<String>,

    /// Name shown to other participants while typing.
    #[arg(long, env = "DISPLAY_NAME")]
    pub display_name: Option<String>,

    /// Model name passed through to the backend (gpt-3.5-turbo, gpt-4)
    #[arg(long, env = "MODEL", default_value = "gpt-3.5-turbo")]
    pub model: String,

    /// Credential passed through to the backend with every run.
    #[arg(long, env = "OPENAI_KEY", default_value = "", hide_env_values = true)]
    pub credential: String,

    // --- Timing Args ---
    /// Typing heartbeat interval in milliseconds.
    #[arg(long, env = "HEARTBEAT_MS", default_value = "3000")]
    pub heartbeat_ms: u64,

    /// Typing signals older than this many milliseconds are ignored.
    #[arg(long, env = "TYPING_STALE_MS", default_value = "10000")]
    pub typing_stale_ms: u64,

    // --- Behaviour Args ---
    /// Treat a `final` frame as the end of a code message, so the next chunk starts a new one.
    #[arg(long, env = "SEAL_ON_FINAL", default_value = "false")]
    pub seal_on_final: bool,

    /// Write locally created messages to the shared store under their local id.
    #[arg(long, env = "PERSIST_LOCAL", default_value = "true", action = clap::ArgAction::Set)]
    pub persist_local: bool,

    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}
