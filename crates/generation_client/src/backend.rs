use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use crate::error::Result;
use crate::request::GenerationRequest;

/// Raw byte chunks of a streaming generation response, exactly as the
/// transport delivered them. Framing is the decoder's job, not the
/// backend's.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// The generation service seam: HTTP in production, scripted fakes in tests.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Open a streaming generation call.
    async fn start_generation(&self, request: &GenerationRequest) -> Result<ChunkStream>;
}
