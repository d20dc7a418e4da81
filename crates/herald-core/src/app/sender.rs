//! Sender - envelope を作成して UNSENT で保存する
//!
//! Validation happens here, synchronously: a bad address or a non-UTC send
//! time never reaches the store.

use chrono::{DateTime, FixedOffset, Utc};
use lettre::message::Mailbox;
use std::sync::Arc;
use tracing::debug;

use crate::domain::{
    Envelope, EnvelopeId, EnvelopeStatus, Metric, TemplateId, TemplateVariables, TenantId,
    Variables, VariablesError,
};
use crate::ports::{Clock, EnvelopeStore, IdGenerator, MetricsSink, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("invalid recipient address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("send time {0} is not in UTC")]
    NotUtc(DateTime<FixedOffset>),

    #[error(transparent)]
    Variables(#[from] VariablesError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One message to schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct SendRequest {
    pub to_address: String,
    pub to_name: String,
    pub to_internal_id: String,
    pub template_id: TemplateId,
    pub variables: Variables,
    /// `None` means now.
    pub send_at: Option<DateTime<FixedOffset>>,
    /// Generated when absent.
    pub message_group_id: Option<String>,
    pub reference_id: Option<String>,
    /// Base tenant when absent.
    pub tenant_id: Option<TenantId>,
}

impl SendRequest {
    pub fn new(to_address: impl Into<String>, template_id: impl Into<TemplateId>) -> Self {
        Self {
            to_address: to_address.into(),
            to_name: String::new(),
            to_internal_id: String::new(),
            template_id: template_id.into(),
            variables: Variables::new(),
            send_at: None,
            message_group_id: None,
            reference_id: None,
            tenant_id: None,
        }
    }

    /// Template id and variables both come from `variables`.
    pub fn typed<V: TemplateVariables>(
        to_address: impl Into<String>,
        variables: &V,
    ) -> Result<Self, VariablesError> {
        let mut request = Self::new(to_address, V::template_id());
        request.variables = variables.to_variables()?;
        Ok(request)
    }

    pub fn variable(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn send_at(mut self, at: DateTime<FixedOffset>) -> Self {
        self.send_at = Some(at);
        self
    }

    pub fn tenant(mut self, tenant_id: impl Into<TenantId>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn group(mut self, message_group_id: impl Into<String>) -> Self {
        self.message_group_id = Some(message_group_id.into());
        self
    }

    pub fn reference(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    pub fn internal_id(mut self, to_internal_id: impl Into<String>) -> Self {
        self.to_internal_id = to_internal_id.into();
        self
    }
}

pub struct Sender {
    app_id: String,
    store: Arc<dyn EnvelopeStore>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
}

impl Sender {
    pub fn new(
        app_id: impl Into<String>,
        store: Arc<dyn EnvelopeStore>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            store,
            ids,
            clock,
            metrics,
        }
    }

    /// Validate `request` and store it as an UNSENT envelope.
    pub async fn send(&self, request: SendRequest) -> Result<EnvelopeId, SendError> {
        let mailbox: Mailbox =
            request
                .to_address
                .trim()
                .parse()
                .map_err(|e: lettre::address::AddressError| SendError::InvalidAddress {
                    address: request.to_address.clone(),
                    reason: e.to_string(),
                })?;

        let scheduled_for = match request.send_at {
            None => self.clock.now(),
            Some(at) if at.offset().local_minus_utc() == 0 => at.with_timezone(&Utc),
            Some(at) => return Err(SendError::NotUtc(at)),
        };

        let to_name = if request.to_name.is_empty() {
            mailbox.name.unwrap_or_default()
        } else {
            request.to_name
        };

        let envelope = Envelope {
            id: self.ids.envelope_id(),
            app_id: self.app_id.clone(),
            tenant_id: request.tenant_id.unwrap_or_default(),
            to_address: mailbox.email.to_string(),
            to_name,
            to_internal_id: request.to_internal_id,
            scheduled_for,
            message_group_id: request
                .message_group_id
                .filter(|g| !g.is_empty())
                .unwrap_or_else(|| self.ids.message_group_id()),
            reference_id: request.reference_id,
            template_id: request.template_id,
            variables: request.variables,
            status: EnvelopeStatus::Unsent,
        };
        let id = envelope.id;
        let metric = Metric::for_envelope(&envelope, true);

        self.store.insert_envelope(envelope).await?;
        self.metrics.send_event(&metric);
        debug!(envelope_id = %id, %scheduled_for, "envelope stored");
        Ok(id)
    }

    /// `send` for a typed variables struct; `None` sends now.
    pub async fn send_typed<V: TemplateVariables>(
        &self,
        to_address: impl Into<String>,
        variables: &V,
        send_at: Option<DateTime<FixedOffset>>,
    ) -> Result<EnvelopeId, SendError> {
        let mut request = SendRequest::typed(to_address, variables)?;
        request.send_at = send_at;
        self.send(request).await
    }
}
