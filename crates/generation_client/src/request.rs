use conversation_core::{Message, Role};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of a generation call: the active branch up to and including the
/// newest user turn, plus mode routing and the mode-specific
/// sub-configuration the engine carries opaquely.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct GenerationRequest {
    pub mode: String,
    pub messages: Vec<WireMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

impl GenerationRequest {
    pub fn new(mode: impl Into<String>, messages: &[Message], options: Option<Value>) -> Self {
        Self {
            mode: mode.into(),
            messages: messages.iter().map(WireMessage::from).collect(),
            options,
        }
    }
}

/// Role and content only; ids, timestamps and annotations stay client-side.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}
