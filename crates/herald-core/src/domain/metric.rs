//! Metric - one send/deliver observation.

use serde::{Deserialize, Serialize};

use super::envelope::Envelope;
use super::tenant::{TemplateId, TenantId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    pub app_name: String,
    pub template_id: TemplateId,
    pub tenant_id: TenantId,
    pub success: bool,
}

impl Metric {
    pub fn for_envelope(envelope: &Envelope, success: bool) -> Self {
        Self {
            app_name: envelope.app_id.clone(),
            template_id: envelope.template_id.clone(),
            tenant_id: envelope.tenant_id.clone(),
            success,
        }
    }
}
