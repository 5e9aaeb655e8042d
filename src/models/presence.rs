use serde::{ Serialize, Deserialize };

/// One active typer in a session. Producers refresh `ts` on a heartbeat.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingSignal {
    pub subject_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub ts: i64,
}

impl TypingSignal {
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.subject_id)
    }

    pub fn is_stale(&self, now: i64, stale_after_ms: i64) -> bool {
        now - self.ts > stale_after_ms
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub uid: String,
    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,
    pub last_seen: i64,
    pub online: bool,
}
