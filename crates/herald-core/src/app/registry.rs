//! TemplateRegistry - アプリが使う template の登録簿
//!
//! # 設計原則
//! - グローバル状態は持たない。App の構築側が所有し、AppBuilder に渡す
//! - 登録時に base tenant の template がなければ bootstrap 内容で作成する
//! - 既に store にある base template は上書きしない（運用中の編集を優先）

use std::collections::BTreeMap;
use tracing::info;

use crate::domain::{Template, TemplateId, TenantId};
use crate::ports::{EnvelopeStore, StoreError};

/// Everything needed to make a template id usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredTemplate {
    pub template_id: TemplateId,
    pub from_address: String,
    pub from_name: String,
    /// Subject used to create the base template when the store has none.
    pub bootstrap_subject: String,
    /// Body used to create the base template when the store has none.
    pub bootstrap_body: String,
}

impl RegisteredTemplate {
    pub fn new(
        template_id: impl Into<TemplateId>,
        bootstrap_subject: impl Into<String>,
        bootstrap_body: impl Into<String>,
    ) -> Self {
        Self {
            template_id: template_id.into(),
            from_address: String::new(),
            from_name: String::new(),
            bootstrap_subject: bootstrap_subject.into(),
            bootstrap_body: bootstrap_body.into(),
        }
    }

    pub fn with_from(mut self, address: impl Into<String>, name: impl Into<String>) -> Self {
        self.from_address = address.into();
        self.from_name = name.into();
        self
    }

    fn base_template(&self) -> Template {
        Template::new(
            self.template_id.clone(),
            TenantId::base(),
            self.bootstrap_subject.clone(),
            self.bootstrap_body.clone(),
        )
        .with_from(self.from_address.clone(), self.from_name.clone())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("template {0} is already registered")]
    AlreadyRegistered(TemplateId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Default)]
pub struct TemplateRegistry {
    /// template id → (UI group, definition)
    entries: BTreeMap<TemplateId, (String, RegisteredTemplate)>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `template` under `group`, creating its base template in
    /// `store` when missing.
    pub async fn register(
        &mut self,
        store: &dyn EnvelopeStore,
        group: impl Into<String>,
        template: RegisteredTemplate,
    ) -> Result<(), RegistryError> {
        if self.entries.contains_key(&template.template_id) {
            return Err(RegistryError::AlreadyRegistered(template.template_id));
        }

        let base = TenantId::base();
        if store
            .get_template_exact(&template.template_id, &base)
            .await?
            .is_none()
        {
            store.insert_template(template.base_template()).await?;
            info!(template_id = %template.template_id, "bootstrapped base template");
        }

        self.entries
            .insert(template.template_id.clone(), (group.into(), template));
        Ok(())
    }

    pub fn get(&self, template_id: &TemplateId) -> Option<&RegisteredTemplate> {
        self.entries.get(template_id).map(|(_, t)| t)
    }

    pub fn contains(&self, template_id: &str) -> bool {
        self.entries.contains_key(&TemplateId::new(template_id))
    }

    /// Registered ids of one UI group, sorted.
    pub fn in_group(&self, group: &str) -> Vec<&TemplateId> {
        self.entries
            .iter()
            .filter(|(_, (g, _))| g == group)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
