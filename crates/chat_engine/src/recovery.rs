//! Restoring fetched conversations, including ones a crash cut short.

use serde_json::Map;
use uuid::Uuid;

use conversation_core::{BranchState, GenerationRecoveryInfo, GenerationStatus, Message};

use crate::engine::EngineState;
use crate::store::ConversationRecord;

/// Install a fetched record as the live state. Returns recovery info when
/// the stored generation status shows the last run never finished cleanly.
pub(crate) fn apply_record(
    state: &mut EngineState,
    conversation_id: Uuid,
    record: ConversationRecord,
) -> Option<GenerationRecoveryInfo> {
    let ConversationRecord {
        messages,
        metadata,
        generation_status,
        pending_content,
        generation_error,
    } = record;

    let mut mode_state = Map::new();
    let mut stored_forest = None;
    if let Some(mut meta) = metadata {
        stored_forest = meta.take_forest();
        mode_state = meta.mode_state;
    }
    let mut forest = match stored_forest {
        Some(forest) => forest,
        None => {
            // Histories saved before branching existed come back as a flat
            // list; they become the single main branch.
            tracing::debug!(
                conversation_id = %conversation_id,
                message_count = messages.len(),
                "Recovery: no stored forest, synthesizing main branch"
            );
            BranchState::from_flat_messages(messages)
        }
    };

    let recovery = match generation_status {
        GenerationStatus::Generating => {
            if let Some(content) = pending_content.clone() {
                // The partial draft of the interrupted run becomes a regular
                // message, flagged so the UI can label it.
                let mut partial = Message::assistant(content);
                partial.metadata_mut().mark_interrupted();
                forest.append_message(partial);
            }
            tracing::info!(
                conversation_id = %conversation_id,
                "Recovery: conversation was cut off mid-generation"
            );
            Some(GenerationRecoveryInfo {
                status: GenerationStatus::Generating,
                pending_content,
                error: None,
            })
        }
        GenerationStatus::Failed => {
            tracing::info!(
                conversation_id = %conversation_id,
                error = ?generation_error,
                "Recovery: last generation failed"
            );
            Some(GenerationRecoveryInfo {
                status: GenerationStatus::Failed,
                pending_content: None,
                error: generation_error,
            })
        }
        GenerationStatus::Idle | GenerationStatus::Completed => None,
    };

    state.forest = forest;
    state.conversation_id = Some(conversation_id);
    state.mode_state = mode_state;
    state.error = None;
    state.is_loading = false;
    state.recovery = recovery.clone();
    state.active_stream = None;
    recovery
}
