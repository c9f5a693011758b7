//! Persistence seam.
//!
//! The engine talks to storage through [`ConversationStore`] and never cares
//! whether the other side is a local file tree or a remote service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use conversation_core::{ConversationMetadata, GenerationStatus, Message};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("conversation {0} not found")]
    NotFound(Uuid),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend rejected the call because the session expired.
    #[error("session expired")]
    AuthExpired,

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// A fetched conversation.
///
/// `messages` is the flat history of the branch that was active when the
/// conversation was last saved; the full branch forest, when one was
/// persisted, rides inside `metadata`. The generation fields describe how the
/// last generation ended, letting a fresh session pick up after a crash.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub messages: Vec<Message>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ConversationMetadata>,

    #[serde(default)]
    pub generation_status: GenerationStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_error: Option<String>,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// First save of a conversation that has no id yet. Returns the id the
    /// backend issued.
    async fn create(
        &self,
        mode: &str,
        messages: &[Message],
        metadata: &ConversationMetadata,
        grouping_id: Option<&str>,
    ) -> Result<Uuid, StoreError>;

    /// Replace the stored messages and metadata of an existing conversation.
    async fn update(
        &self,
        id: Uuid,
        messages: &[Message],
        metadata: &ConversationMetadata,
    ) -> Result<(), StoreError>;

    async fn fetch_by_id(&self, id: Uuid) -> Result<ConversationRecord, StoreError>;
}
