use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Author of a conversation turn.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Opaque per-message annotations: quiz payloads, code panels, unlock
/// progress, phase markers. The generation service sends these as streaming
/// fragments and they are merged additively, one shallow key at a time, with
/// later writers winning. The engine itself only ever contributes the
/// `consumed_units` and `interrupted` keys.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(transparent)]
pub struct MessageMetadata {
    pub entries: Map<String, Value>,
}

impl MessageMetadata {
    /// Shallow merge: every key of `fragment` overwrites the same key here.
    pub fn merge(&mut self, fragment: &Map<String, Value>) {
        for (key, value) in fragment {
            self.entries.insert(key.clone(), value.clone());
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn set_consumed_units(&mut self, units: u64) {
        self.entries
            .insert("consumed_units".to_string(), Value::from(units));
    }

    pub fn consumed_units(&self) -> Option<u64> {
        self.entries.get("consumed_units").and_then(Value::as_u64)
    }

    /// Marks a partial message recovered from an interrupted generation.
    pub fn mark_interrupted(&mut self) {
        self.entries
            .insert("interrupted".to_string(), Value::Bool(true));
    }

    pub fn is_interrupted(&self) -> bool {
        self.entries
            .get("interrupted")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// One conversation turn.
///
/// `content` is mutable while a generation streams into it and frozen once
/// the stream reaches a terminal state.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Empty assistant turn for an in-flight generation to write into.
    pub fn placeholder() -> Self {
        Self::new(Role::Assistant, String::new())
    }

    /// Metadata map, created on first use.
    pub fn metadata_mut(&mut self) -> &mut MessageMetadata {
        self.metadata.get_or_insert_with(MessageMetadata::default)
    }
}
