//! Template rendering.
//!
//! Subject and body are Tera templates (`{{ name }}`, `{% if %}`,
//! `{% for %}`, filters such as `upper`/`date`/`default`). The body is
//! HTML-escaped, the subject is not.
//!
//! A render failure means the registered template is broken, not that the
//! world is temporarily unavailable. Callers classify it as a content error.

use std::fmt;
use tera::{Context, Tera};
use thiserror::Error;

use crate::domain::{ErrorKind, RenderedTemplate, Template, Variables};

// The suffix decides Tera's autoescaping.
const CONTENT_NAME: &str = "content.html";
const SUBJECT_NAME: &str = "subject.txt";

/// Which part of the template failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateField {
    Content,
    Subject,
}

impl fmt::Display for TemplateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateField::Content => f.write_str("content"),
            TemplateField::Subject => f.write_str("subject"),
        }
    }
}

#[derive(Debug, Error)]
#[error("failed to render template {template_id} ({field}): {detail}")]
pub struct RenderError {
    pub template_id: String,
    pub field: TemplateField,
    detail: String,
    #[source]
    source: tera::Error,
}

impl RenderError {
    fn new(template: &Template, field: TemplateField, source: tera::Error) -> Self {
        Self {
            template_id: template.template_id.to_string(),
            field,
            detail: error_chain(&source),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Content
    }
}

/// Tera keeps the useful part ("Variable `x` not found") in the source chain.
fn error_chain(err: &tera::Error) -> String {
    let mut detail = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        detail.push_str(": ");
        detail.push_str(&inner.to_string());
        source = inner.source();
    }
    detail
}

/// Fills templates with per-recipient variables.
#[derive(Debug, Clone, Default)]
pub struct TemplateRenderer;

impl TemplateRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Renders content and subject. The stored template is not modified.
    pub fn fill(
        &self,
        template: &Template,
        variables: &Variables,
    ) -> Result<RenderedTemplate, RenderError> {
        let mut context = Context::new();
        for (name, value) in variables {
            context.insert(name.as_str(), value);
        }

        let content = render_one(template, TemplateField::Content, &context)?;
        let subject = render_one(template, TemplateField::Subject, &context)?;

        Ok(RenderedTemplate {
            subject,
            content,
            from_address: template.from_address.clone(),
            from_name: template.from_name.clone(),
        })
    }
}

fn render_one(
    template: &Template,
    field: TemplateField,
    context: &Context,
) -> Result<String, RenderError> {
    let (name, source) = match field {
        TemplateField::Content => (CONTENT_NAME, template.content.as_str()),
        TemplateField::Subject => (SUBJECT_NAME, template.subject.as_str()),
    };

    let mut tera = Tera::default();
    tera.add_raw_template(name, source)
        .map_err(|e| RenderError::new(template, field, e))?;
    tera.render(name, context)
        .map_err(|e| RenderError::new(template, field, e))
}
