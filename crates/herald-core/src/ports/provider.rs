//! Provider port - the transport that actually sends a rendered message.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Envelope, RenderedTemplate};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider rejected the message: {0}")]
    Rejected(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

/// Provider hands a rendered message to the outside world.
///
/// A provider is called at most once per successful commit-to-send; it
/// never sees an envelope the deliverer has not already marked SENT.
/// Metrics sinks are given at construction time.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn deliver(
        &self,
        envelope: &Envelope,
        rendered: &RenderedTemplate,
    ) -> Result<(), ProviderError>;

    /// Used in logs.
    fn name(&self) -> &str;
}
