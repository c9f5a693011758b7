//! The branch forest: a flat arena of branch records, an id-keyed message map
//! and the active-branch pointer.
//!
//! Branches copy their history up to the fork point, so every branch owns a
//! complete, independently mutable message list. Messages shared with an
//! ancestor keep their ids across branches; id-addressed mutators therefore
//! always take the branch id as well.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::branch::Branch;
use crate::message::Message;

/// Name of the single root branch.
pub const ROOT_BRANCH_NAME: &str = "main";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BranchState {
    /// Creation order.
    pub branches: Vec<Branch>,
    pub current_branch_id: Uuid,
    pub messages_by_branch: HashMap<Uuid, Vec<Message>>,
}

impl Default for BranchState {
    fn default() -> Self {
        Self::new()
    }
}

impl BranchState {
    /// Fresh forest: one empty root branch, active.
    pub fn new() -> Self {
        Self::from_flat_messages(Vec::new())
    }

    /// Wrap an existing flat message list in a single root branch. Used when
    /// rehydrating conversations persisted before branching existed.
    pub fn from_flat_messages(messages: Vec<Message>) -> Self {
        let root = Branch::root(ROOT_BRANCH_NAME);
        let current_branch_id = root.id;
        let mut messages_by_branch = HashMap::new();
        messages_by_branch.insert(root.id, messages);
        Self {
            branches: vec![root],
            current_branch_id,
            messages_by_branch,
        }
    }

    pub fn branch(&self, id: Uuid) -> Option<&Branch> {
        self.branches.iter().find(|b| b.id == id)
    }

    pub fn active_branch(&self) -> Option<&Branch> {
        self.branch(self.current_branch_id)
    }

    /// Messages of the active branch.
    pub fn active_messages(&self) -> &[Message] {
        self.messages_by_branch
            .get(&self.current_branch_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn messages_of(&self, branch_id: Uuid) -> Option<&[Message]> {
        self.messages_by_branch
            .get(&branch_id)
            .map(Vec::as_slice)
    }

    /// Append to the active branch. Always succeeds.
    pub fn append_message(&mut self, message: Message) -> Uuid {
        let id = message.id;
        self.messages_by_branch
            .entry(self.current_branch_id)
            .or_default()
            .push(message);
        tracing::trace!(
            branch_id = %self.current_branch_id,
            message_id = %id,
            "BranchState: message appended"
        );
        id
    }

    /// True iff `index` addresses an existing message in the active branch.
    pub fn can_fork(&self, index: usize) -> bool {
        index < self.active_messages().len()
    }

    /// Fork the active branch at `index`: the new branch receives the active
    /// branch's messages `[0..=index]` and becomes active. Out-of-range
    /// indexes are ignored.
    pub fn fork_from_message(&mut self, index: usize) -> Option<Uuid> {
        if !self.can_fork(index) {
            tracing::debug!(
                branch_id = %self.current_branch_id,
                index = index,
                message_count = self.active_messages().len(),
                "BranchState: fork index out of range, ignoring"
            );
            return None;
        }

        let parent_id = self.current_branch_id;
        let prefix: Vec<Message> = self.active_messages()[..=index].to_vec();
        let branch = Branch::forked(self.next_branch_name(), parent_id, index);
        let branch_id = branch.id;

        tracing::info!(
            branch_id = %branch_id,
            parent_branch_id = %parent_id,
            fork_point_index = index,
            name = %branch.name,
            "BranchState: branch forked"
        );

        self.messages_by_branch.insert(branch_id, prefix);
        self.branches.push(branch);
        self.current_branch_id = branch_id;
        Some(branch_id)
    }

    fn next_branch_name(&self) -> String {
        format!("Branch {}", self.branches.len() + 1)
    }

    /// Make `id` the active branch. Unknown ids are ignored.
    pub fn switch_branch(&mut self, id: Uuid) -> bool {
        if self.branch(id).is_none() {
            tracing::debug!(
                branch_id = %id,
                "BranchState: switch to unknown branch, ignoring"
            );
            return false;
        }
        tracing::debug!(
            from = %self.current_branch_id,
            to = %id,
            "BranchState: active branch switched"
        );
        self.current_branch_id = id;
        true
    }

    /// Drop all messages after `index` in the active branch.
    pub fn truncate_active(&mut self, index: usize) {
        if let Some(messages) = self.messages_by_branch.get_mut(&self.current_branch_id) {
            if index + 1 < messages.len() {
                let dropped = messages.len() - (index + 1);
                messages.truncate(index + 1);
                tracing::debug!(
                    branch_id = %self.current_branch_id,
                    index = index,
                    dropped = dropped,
                    "BranchState: active branch truncated"
                );
            }
        }
    }

    /// Mutable access to one message of one branch. Copies of the message on
    /// other branches are untouched.
    pub fn message_mut(&mut self, branch_id: Uuid, message_id: Uuid) -> Option<&mut Message> {
        self.messages_by_branch
            .get_mut(&branch_id)?
            .iter_mut()
            .find(|m| m.id == message_id)
    }

    /// Remove one message from one branch.
    pub fn remove_message(&mut self, branch_id: Uuid, message_id: Uuid) -> Option<Message> {
        let messages = self.messages_by_branch.get_mut(&branch_id)?;
        let index = messages.iter().position(|m| m.id == message_id)?;
        tracing::debug!(
            branch_id = %branch_id,
            message_id = %message_id,
            "BranchState: message removed"
        );
        Some(messages.remove(index))
    }

    /// Replace a branch's entire message list. Used by regeneration rollback.
    pub fn replace_messages(&mut self, branch_id: Uuid, messages: Vec<Message>) -> bool {
        if self.branch(branch_id).is_none() {
            return false;
        }
        self.messages_by_branch.insert(branch_id, messages);
        true
    }

    /// Structural sanity of a deserialized forest: the active pointer and
    /// every message-map key must refer to a branch record.
    pub fn is_consistent(&self) -> bool {
        self.branch(self.current_branch_id).is_some()
            && self
                .messages_by_branch
                .keys()
                .all(|id| self.branch(*id).is_some())
    }
}
