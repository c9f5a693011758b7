//! File-backed conversation store: one pretty-printed JSON document per
//! conversation under a base directory, keyed by conversation id.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use uuid::Uuid;

use conversation_core::{ConversationMetadata, GenerationStatus, Message};

use crate::store::{ConversationRecord, ConversationStore, StoreError};

/// On-disk document. Carries creation bookkeeping the store trait does not
/// expose; updates preserve it.
#[derive(Serialize, Deserialize)]
struct StoredConversation {
    id: Uuid,
    mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    grouping_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<ConversationMetadata>,
    #[serde(default)]
    generation_status: GenerationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pending_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    generation_error: Option<String>,
}

pub struct FileConversationStore {
    base_dir: PathBuf,
}

impl FileConversationStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    fn get_path(&self, id: Uuid) -> PathBuf {
        self.base_dir.join(format!("{}.json", id))
    }

    async fn read_document(&self, id: Uuid) -> Result<StoredConversation, StoreError> {
        let path = self.get_path(id);
        if !path.exists() {
            tracing::debug!(
                conversation_id = %id,
                path = %path.display(),
                "FileStore: document does not exist"
            );
            return Err(StoreError::NotFound(id));
        }
        let content = fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn write_document(&self, document: &StoredConversation) -> Result<(), StoreError> {
        if !self.base_dir.exists() {
            fs::create_dir_all(&self.base_dir).await?;
        }
        let path = self.get_path(document.id);
        let content = serde_json::to_string_pretty(document)?;
        fs::write(&path, content).await?;
        tracing::debug!(
            conversation_id = %document.id,
            path = %path.display(),
            message_count = document.messages.len(),
            "FileStore: document written"
        );
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    async fn create(
        &self,
        mode: &str,
        messages: &[Message],
        metadata: &ConversationMetadata,
        grouping_id: Option<&str>,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let document = StoredConversation {
            id,
            mode: mode.to_string(),
            grouping_id: grouping_id.map(str::to_string),
            created_at: now,
            updated_at: now,
            messages: messages.to_vec(),
            metadata: Some(metadata.clone()),
            generation_status: GenerationStatus::Completed,
            pending_content: None,
            generation_error: None,
        };
        self.write_document(&document).await?;

        tracing::info!(
            conversation_id = %id,
            mode = %mode,
            "FileStore: conversation created"
        );
        Ok(id)
    }

    async fn update(
        &self,
        id: Uuid,
        messages: &[Message],
        metadata: &ConversationMetadata,
    ) -> Result<(), StoreError> {
        let mut document = self.read_document(id).await?;
        document.messages = messages.to_vec();
        document.metadata = Some(metadata.clone());
        // A full save means the conversation is quiescent again, so any
        // stale interrupted-generation evidence is cleared with it.
        document.generation_status = GenerationStatus::Completed;
        document.pending_content = None;
        document.generation_error = None;
        document.updated_at = Utc::now();
        self.write_document(&document).await?;

        tracing::debug!(
            conversation_id = %id,
            message_count = messages.len(),
            "FileStore: conversation updated"
        );
        Ok(())
    }

    async fn fetch_by_id(&self, id: Uuid) -> Result<ConversationRecord, StoreError> {
        let document = self.read_document(id).await?;

        tracing::info!(
            conversation_id = %id,
            message_count = document.messages.len(),
            generation_status = ?document.generation_status,
            "FileStore: conversation loaded"
        );
        Ok(ConversationRecord {
            messages: document.messages,
            metadata: document.metadata,
            generation_status: document.generation_status,
            pending_content: document.pending_content,
            generation_error: document.generation_error,
        })
    }
}
