//! Re-authentication handoff.

use async_trait::async_trait;

/// External re-authentication flow.
///
/// Session expiry is never surfaced as an in-conversation error. The engine
/// cleans up whatever it was doing, notifies this handler, and lets the host
/// run its sign-in flow.
#[async_trait]
pub trait ReauthHandler: Send + Sync {
    async fn session_expired(&self);
}

/// Default handler for hosts without a sign-in flow: log and drop.
pub struct NoopReauth;

#[async_trait]
impl ReauthHandler for NoopReauth {
    async fn session_expired(&self) {
        tracing::warn!("session expired and no re-authentication handler is installed");
    }
}
