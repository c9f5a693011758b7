use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Payload of one streamed frame. Every field is optional; a frame may carry
/// any combination of a content fragment (to append, never a replacement), a
/// metadata fragment (to shallow-merge into the draft message) and the total
/// resource-consumed count the service reports once near the end.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct StreamFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_units: Option<u64>,
}

impl StreamFrame {
    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.metadata.is_none() && self.consumed_units.is_none()
    }
}

/// One decoded event of the logical stream.
#[derive(Clone, Debug, PartialEq)]
pub enum FrameEvent {
    Data(StreamFrame),
    /// The explicit end-of-stream marker frame.
    Done,
}
