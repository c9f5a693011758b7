//! Engine event stream.
//!
//! Every observable transition is pushed over an unbounded channel handed out
//! at construction. Sends are best-effort: a dropped receiver never blocks or
//! fails the engine.

use conversation_core::GenerationRecoveryInfo;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use generation_client::GenerationError;

/// Structured error retained in engine state and surfaced to the UI.
///
/// Service-reported errors keep their code, message and details verbatim;
/// everything else (transport, decoding) collapses to `transport_error`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl From<&GenerationError> for ErrorInfo {
    fn from(error: &GenerationError) -> Self {
        match error {
            GenerationError::Api {
                code,
                message,
                details,
            } => Self {
                code: code.clone(),
                message: message.clone(),
                details: details.clone(),
            },
            other => Self {
                code: "transport_error".to_string(),
                message: other.to_string(),
                details: None,
            },
        }
    }
}

/// Why a stream stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Completed,
    Cancelled,
    Failed,
}

/// Notifications emitted by the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A generation began streaming into `message_id` on `branch_id`.
    StreamStarted { branch_id: Uuid, message_id: Uuid },

    /// New content arrived. `accumulated` is the full draft so far; deltas
    /// only ever extend it.
    ContentDelta {
        branch_id: Uuid,
        message_id: Uuid,
        delta: String,
        accumulated: String,
    },

    /// The stream reached a terminal state.
    StreamFinished {
        branch_id: Uuid,
        message_id: Uuid,
        reason: FinishReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        consumed_units: Option<u64>,
    },

    /// The first successful save assigned this conversation its id.
    ConversationCreated { conversation_id: Uuid },

    /// A generation attempt failed; the same info lands in engine state.
    Error(ErrorInfo),

    /// A loaded conversation carried evidence of an interrupted generation.
    RecoveryDetected(GenerationRecoveryInfo),
}
