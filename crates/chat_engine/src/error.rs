//! Engine error types.

use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum EngineError {
    /// A generation is already streaming into this conversation.
    #[error("a generation is already in flight")]
    Busy,

    /// The engine has been shut down and accepts no further operations.
    #[error("engine has been shut down")]
    Terminated,

    /// The backend session expired; re-authentication was handed off.
    #[error("session expired")]
    AuthExpired,

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
