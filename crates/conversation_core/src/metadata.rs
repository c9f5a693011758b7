use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::forest::BranchState;

/// The auxiliary state bundle persisted alongside a conversation's messages.
///
/// Mode-specific keys (unlock level, guided-dialogue phase, quiz attempt
/// counters, ...) are flattened at the top level and pass through the engine
/// untouched. The engine itself contributes the serialized branch forest and
/// the active branch pointer; conversations persisted before branching
/// existed carry neither, and the loader synthesizes a single-branch forest
/// from the flat message list instead.
///
/// Invariant when written: `branch_state.current_branch_id` equals
/// `last_active_branch_id`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ConversationMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode_options: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_state: Option<BranchState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active_branch_id: Option<Uuid>,
    #[serde(flatten)]
    pub mode_state: Map<String, Value>,
}

impl ConversationMetadata {
    /// Snapshot for persistence: auxiliary state plus the current forest.
    pub fn snapshot(
        mode_state: Map<String, Value>,
        mode_options: Option<Value>,
        forest: &BranchState,
    ) -> Self {
        Self {
            mode_options,
            branch_state: Some(forest.clone()),
            last_active_branch_id: Some(forest.current_branch_id),
            mode_state,
        }
    }

    /// The persisted forest, restored verbatim onto the recorded active
    /// branch pointer. `None` when no usable forest was persisted.
    pub fn take_forest(&mut self) -> Option<BranchState> {
        let mut forest = self.branch_state.take()?;
        if let Some(last_active) = self.last_active_branch_id {
            if forest.branch(last_active).is_some() {
                forest.current_branch_id = last_active;
            }
        }
        if !forest.is_consistent() {
            tracing::warn!(
                branch_count = forest.branches.len(),
                "ConversationMetadata: persisted forest is inconsistent, discarding"
            );
            return None;
        }
        Some(forest)
    }
}
