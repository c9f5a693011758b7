//! Wire protocol for the generation service: request shapes, the streamed
//! frame format with its line-buffered decoder, and the backend seam plus its
//! HTTP implementation.

pub mod backend;
pub mod client;
pub mod decoder;
pub mod error;
pub mod frame;
pub mod request;

pub use backend::{ChunkStream, GenerationBackend};
pub use client::HttpGenerationClient;
pub use decoder::{FrameDecoder, DONE_PAYLOAD, FRAME_MARKER};
pub use error::{GenerationError, Result};
pub use frame::{FrameEvent, StreamFrame};
pub use request::{GenerationRequest, WireMessage};
