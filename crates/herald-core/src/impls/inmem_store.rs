//! InMemoryStore - development/test store.
//!
//! # 実装詳細
//! - one `RwLock` around both maps, never held across an await
//! - a status write checks the current status under the write lock
//! - the ready-to-send scan runs in its own task and feeds a channel of
//!   capacity 1, so it only walks as far as the consumer has read; dropping
//!   the stream ends the scan

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tokio_stream::wrappers::ReceiverStream;

use crate::domain::{Envelope, EnvelopeId, EnvelopeStatus, Template, TemplateId, TenantId};
use crate::ports::{EnvelopeStore, EnvelopeStream, StoreError};

#[derive(Default)]
struct StoreState {
    envelopes: HashMap<EnvelopeId, Envelope>,
    /// Insertion order, so scans are stable across calls.
    order: Vec<EnvelopeId>,
    templates: HashMap<(TemplateId, TenantId), Template>,
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all envelopes in insertion order.
    pub async fn envelopes(&self) -> Vec<Envelope> {
        let state = self.state.read().await;
        state
            .order
            .iter()
            .filter_map(|id| state.envelopes.get(id).cloned())
            .collect()
    }

    pub async fn status_of(&self, id: EnvelopeId) -> Option<EnvelopeStatus> {
        self.state.read().await.envelopes.get(&id).map(|e| e.status)
    }

    pub async fn templates(&self) -> Vec<Template> {
        self.state.read().await.templates.values().cloned().collect()
    }
}

#[async_trait]
impl EnvelopeStore for InMemoryStore {
    async fn insert_envelope(&self, envelope: Envelope) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.envelopes.contains_key(&envelope.id) {
            return Err(StoreError::Duplicate(envelope.id));
        }
        state.order.push(envelope.id);
        state.envelopes.insert(envelope.id, envelope);
        Ok(())
    }

    async fn get_envelope_by_id(&self, id: EnvelopeId) -> Result<Option<Envelope>, StoreError> {
        Ok(self.state.read().await.envelopes.get(&id).cloned())
    }

    async fn update_envelope_status(
        &self,
        id: EnvelopeId,
        status: EnvelopeStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let envelope = state.envelopes.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if !envelope.status.accepts_write(status) {
            return Err(StoreError::InvalidTransition {
                id,
                from: envelope.status,
                to: status,
            });
        }
        envelope.status = status;
        Ok(())
    }

    async fn get_envelopes_ready_to_send(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<EnvelopeStream, StoreError> {
        let ids = self.state.read().await.order.clone();
        let state = Arc::clone(&self.state);
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            for id in ids {
                // Re-read per item: a status written after the scan started
                // must be honoured.
                let candidate = {
                    let state = state.read().await;
                    state
                        .envelopes
                        .get(&id)
                        .filter(|e| e.is_ready_to_send(as_of))
                        .cloned()
                };
                let Some(envelope) = candidate else {
                    continue;
                };
                if tx.send(Ok(envelope)).await.is_err() {
                    // consumer dropped the stream
                    return;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn get_template_exact(
        &self,
        template_id: &TemplateId,
        tenant_id: &TenantId,
    ) -> Result<Option<Template>, StoreError> {
        let key = (template_id.clone(), tenant_id.clone());
        Ok(self.state.read().await.templates.get(&key).cloned())
    }

    /// Inserting an existing `(template_id, tenant_id)` replaces it.
    async fn insert_template(&self, template: Template) -> Result<(), StoreError> {
        let key = (template.template_id.clone(), template.tenant_id.clone());
        self.state.write().await.templates.insert(key, template);
        Ok(())
    }
}
