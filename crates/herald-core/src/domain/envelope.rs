//! Envelope - one scheduled, addressed, templated message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ids::EnvelopeId;
use super::status::EnvelopeStatus;
use super::tenant::{TemplateId, TenantId};

/// Per-recipient template variables.
///
/// A sorted map, so two envelopes with the same variables compare and
/// serialize identically regardless of insertion order.
pub type Variables = BTreeMap<String, serde_json::Value>;

/// A unit of scheduled outbound communication.
///
/// The same shape is persisted in the store and published on the queue.
/// The queued copy is only a reference: its `status` is whatever it was at
/// dispatch time, and consumers must re-read the persisted envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: EnvelopeId,

    #[serde(rename = "app")]
    pub app_id: String,

    #[serde(rename = "tenant", default)]
    pub tenant_id: TenantId,

    #[serde(rename = "to")]
    pub to_address: String,

    #[serde(rename = "toName", default, skip_serializing_if = "String::is_empty")]
    pub to_name: String,

    #[serde(rename = "toInternal", default, skip_serializing_if = "String::is_empty")]
    pub to_internal_id: String,

    #[serde(rename = "scheduledFor")]
    pub scheduled_for: DateTime<Utc>,

    #[serde(rename = "group")]
    pub message_group_id: String,

    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,

    #[serde(rename = "tid")]
    pub template_id: TemplateId,

    #[serde(default)]
    pub variables: Variables,

    #[serde(default)]
    pub status: EnvelopeStatus,
}

impl Envelope {
    /// Is this envelope due for dispatch as of `now`?
    pub fn is_ready_to_send(&self, now: DateTime<Utc>) -> bool {
        self.status.is_dispatch_eligible() && self.scheduled_for <= now
    }

    pub fn with_status(mut self, status: EnvelopeStatus) -> Self {
        self.status = status;
        self
    }
}
