use serde::{Deserialize, Serialize};

/// Server-side lifecycle of the most recent generation for a conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    #[default]
    Idle,
    Generating,
    Completed,
    Failed,
}

impl GenerationStatus {
    /// A generation that ended cleanly needs no recovery handling.
    pub fn is_clean(&self) -> bool {
        matches!(self, GenerationStatus::Idle | GenerationStatus::Completed)
    }
}

/// What the loader learned about an interrupted generation. Present only when
/// the last known server-side generation did not reach a terminal state
/// cleanly.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct GenerationRecoveryInfo {
    pub status: GenerationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
