//! EnvelopeStore port - the source of truth for envelopes and templates.
//!
//! # 設計原則
//! - Strongly consistent per key: a status written here is what the next
//!   read sees. The deliverer's duplicate/state guards depend on it.
//! - Status writes are checked against `EnvelopeStatus::accepts_write` in
//!   the same atomic step as the write, so two writers racing on one
//!   envelope cannot both win (SENT never moves back to DELIVERING).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use thiserror::Error;

use crate::domain::{Envelope, EnvelopeId, EnvelopeStatus, Template, TemplateId, TenantId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("envelope {0} not found")]
    NotFound(EnvelopeId),

    #[error("duplicate envelope {0}")]
    Duplicate(EnvelopeId),

    #[error("envelope {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: EnvelopeId,
        from: EnvelopeStatus,
        to: EnvelopeStatus,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Lazy, finite, non-restartable scan of ready envelopes.
///
/// Dropping the stream must stop the underlying scan.
pub type EnvelopeStream = BoxStream<'static, Result<Envelope, StoreError>>;

#[async_trait]
pub trait EnvelopeStore: Send + Sync {
    async fn insert_envelope(&self, envelope: Envelope) -> Result<(), StoreError>;

    async fn get_envelope_by_id(&self, id: EnvelopeId) -> Result<Option<Envelope>, StoreError>;

    /// Fails with `StoreError::NotFound` when no envelope has this id, and
    /// with `StoreError::InvalidTransition` (leaving the status as it was)
    /// when the current status does not accept `status`.
    async fn update_envelope_status(
        &self,
        id: EnvelopeId,
        status: EnvelopeStatus,
    ) -> Result<(), StoreError>;

    /// Envelopes whose status is dispatch-eligible (UNSENT or FAILED) and
    /// whose `scheduled_for <= as_of`. No ordering is promised.
    async fn get_envelopes_ready_to_send(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<EnvelopeStream, StoreError>;

    /// Exact `(template_id, tenant_id)` lookup, no fallback.
    async fn get_template_exact(
        &self,
        template_id: &TemplateId,
        tenant_id: &TenantId,
    ) -> Result<Option<Template>, StoreError>;

    async fn insert_template(&self, template: Template) -> Result<(), StoreError>;

    /// Tenant template first, then the base tenant.
    async fn get_template_by_id(
        &self,
        template_id: &TemplateId,
        tenant_id: &TenantId,
    ) -> Result<Option<Template>, StoreError> {
        if let Some(template) = self.get_template_exact(template_id, tenant_id).await? {
            return Ok(Some(template));
        }
        if tenant_id.is_base() {
            return Ok(None);
        }
        self.get_template_exact(template_id, &TenantId::base()).await
    }
}
