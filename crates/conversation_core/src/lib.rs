//! Data model for the conversation state engine: messages, the branch forest,
//! the persisted conversation metadata bundle and generation recovery info.
//!
//! Pure data plus serde. No I/O, no async; the engine crates build on top.

pub mod branch;
pub mod forest;
pub mod message;
pub mod metadata;
pub mod recovery;

pub use branch::Branch;
pub use forest::{BranchState, ROOT_BRANCH_NAME};
pub use message::{Message, MessageMetadata, Role};
pub use metadata::ConversationMetadata;
pub use recovery::{GenerationRecoveryInfo, GenerationStatus};
