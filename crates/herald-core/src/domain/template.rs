//! Template - tenant-scoped subject/body source for rendering.

use serde::{Deserialize, Serialize};

use super::tenant::{TemplateId, TenantId};

/// Rendering source for a `(template_id, tenant_id)` pair.
///
/// Every template id needs a base-tenant entry; tenant entries override it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "id")]
    pub template_id: TemplateId,

    #[serde(rename = "tenant", default)]
    pub tenant_id: TenantId,

    pub content: String,

    pub subject: String,

    #[serde(rename = "from")]
    pub from_address: String,

    #[serde(rename = "fromName", default)]
    pub from_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Template {
    pub fn new(
        template_id: impl Into<TemplateId>,
        tenant_id: TenantId,
        subject: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            template_id: template_id.into(),
            tenant_id,
            content: content.into(),
            subject: subject.into(),
            from_address: String::new(),
            from_name: String::new(),
            name: None,
            description: None,
        }
    }

    pub fn with_from(mut self, address: impl Into<String>, name: impl Into<String>) -> Self {
        self.from_address = address.into();
        self.from_name = name.into();
        self
    }
}

/// The output of filling a template with one envelope's variables.
///
/// The stored `Template` stays untouched; providers only ever see this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTemplate {
    pub subject: String,
    pub content: String,
    pub from_address: String,
    pub from_name: String,
}
