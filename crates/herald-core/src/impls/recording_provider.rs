//! RecordingProvider - keeps every delivered message in memory.
//!
//! Used by tests and by anything that wants to inspect what would have been
//! sent. It can be switched into a failing mode to exercise the FAILED path.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::domain::{Envelope, EnvelopeId, RenderedTemplate};
use crate::ports::{Provider, ProviderError};

/// One captured delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub to_address: String,
    pub subject: String,
    pub content: String,
}

#[derive(Default)]
struct Recorded {
    messages: HashMap<EnvelopeId, SentMessage>,
    calls: usize,
    fail_with: Option<String>,
}

#[derive(Clone, Default)]
pub struct RecordingProvider {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        // The recorded data stays meaningful even if a holder panicked.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every following `deliver` fail with `reason` (or succeed again
    /// with `None`).
    pub fn fail_with(&self, reason: Option<&str>) {
        self.lock().fail_with = reason.map(str::to_string);
    }

    pub fn message_for(&self, id: EnvelopeId) -> Option<SentMessage> {
        self.lock().messages.get(&id).cloned()
    }

    pub fn messages(&self) -> Vec<SentMessage> {
        self.lock().messages.values().cloned().collect()
    }

    /// Number of `deliver` calls, failed ones included.
    pub fn calls(&self) -> usize {
        self.lock().calls
    }
}

#[async_trait]
impl Provider for RecordingProvider {
    async fn deliver(
        &self,
        envelope: &Envelope,
        rendered: &RenderedTemplate,
    ) -> Result<(), ProviderError> {
        let mut recorded = self.lock();
        recorded.calls += 1;
        if let Some(reason) = &recorded.fail_with {
            return Err(ProviderError::Rejected(reason.clone()));
        }
        recorded.messages.insert(
            envelope.id,
            SentMessage {
                to_address: envelope.to_address.clone(),
                subject: rendered.subject.clone(),
                content: rendered.content.clone(),
            },
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "RecordingProvider"
    }
}
