//! Conversation state engine for streaming chat surfaces.
//!
//! [`ChatEngine`] owns one conversation: a forest of message branches, a
//! streaming generation pipeline that applies response fragments in order,
//! debounced persistence, and recovery of conversations an earlier session
//! left mid-generation. Hosts drive it through the synchronous facade and
//! observe it through [`EngineEvent`]s and [`ChatEngine::snapshot`].

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod file_store;
mod ingest;
mod persist;
pub mod reauth;
mod recovery;
pub mod store;

pub use config::EngineConfig;
pub use engine::{ChatEngine, EngineSnapshot};
pub use error::{EngineError, Result};
pub use events::{EngineEvent, ErrorInfo, FinishReason};
pub use file_store::FileConversationStore;
pub use reauth::{NoopReauth, ReauthHandler};
pub use store::{ConversationRecord, ConversationStore, StoreError};

pub use conversation_core::{
    Branch, BranchState, ConversationMetadata, GenerationRecoveryInfo, GenerationStatus, Message,
    MessageMetadata, Role,
};
pub use generation_client::{ChunkStream, GenerationBackend, GenerationRequest};
