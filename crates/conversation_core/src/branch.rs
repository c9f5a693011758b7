use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One branch record in the conversation forest.
///
/// Records are append-only: a branch is never renamed, re-parented or deleted
/// after creation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Branch {
    pub id: Uuid,
    pub name: String,
    /// Absent only on the root branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_branch_id: Option<Uuid>,
    /// Index into the parent's message list at fork time. Absent on the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fork_point_index: Option<usize>,
    pub created_at: DateTime<Utc>,
}

impl Branch {
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            parent_branch_id: None,
            fork_point_index: None,
            created_at: Utc::now(),
        }
    }

    pub fn forked(
        name: impl Into<String>,
        parent_branch_id: Uuid,
        fork_point_index: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            parent_branch_id: Some(parent_branch_id),
            fork_point_index: Some(fork_point_index),
            created_at: Utc::now(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_branch_id.is_none()
    }
}
