//! Tenant and template identifiers.
//!
//! Both are caller-chosen strings (not generated), so they are plain
//! newtypes rather than `Id<T>`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the fallback tenant every template must exist for.
pub const BASE_TENANT: &str = "base";

/// Namespace for template overrides.
///
/// An empty tenant is treated as the base tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.is_empty() {
            Self::base()
        } else {
            Self(value)
        }
    }

    pub fn base() -> Self {
        Self(BASE_TENANT.to_string())
    }

    pub fn is_base(&self) -> bool {
        self.0 == BASE_TENANT
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::base()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Key of a template, shared by all of its tenant variants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(String);

impl TemplateId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TemplateId {
    fn from(value: String) -> Self {
        TemplateId::new(value)
    }
}

impl From<&str> for TemplateId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
