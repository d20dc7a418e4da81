//! LoggingProvider - development provider that writes messages to the log.

use async_trait::async_trait;
use tracing::info;

use crate::domain::{Envelope, RenderedTemplate};
use crate::ports::{Provider, ProviderError};

#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingProvider;

impl LoggingProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Provider for LoggingProvider {
    async fn deliver(
        &self,
        envelope: &Envelope,
        rendered: &RenderedTemplate,
    ) -> Result<(), ProviderError> {
        info!(
            envelope_id = %envelope.id,
            from = %rendered.from_address,
            to = %envelope.to_address,
            to_name = %envelope.to_name,
            subject = %rendered.subject,
            "--- EMAIL ---\n{}\n--- END EMAIL ---",
            rendered.content
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "LoggingProvider"
    }
}
