//! TemplateVariables - template ごとの型付き変数
//!
//! # 学習ポイント
//! - Associated Constants (`const TEMPLATE_ID`)
//! - serde で任意の struct を `Variables` に変換する

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use super::envelope::Variables;
use super::tenant::TemplateId;

#[derive(Debug, Error)]
pub enum VariablesError {
    #[error("template variables must serialize to a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("could not serialize template variables: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Binds a variables struct to the template that renders it.
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize)]
/// struct ForgotPassword {
///     link: String,
/// }
///
/// impl TemplateVariables for ForgotPassword {
///     const TEMPLATE_ID: &'static str = "auth.forgot-password";
/// }
/// ```
///
/// Serialized field names (after any `#[serde(rename)]`) are the names the
/// template sees.
pub trait TemplateVariables: Serialize {
    const TEMPLATE_ID: &'static str;

    fn template_id() -> TemplateId {
        TemplateId::new(Self::TEMPLATE_ID)
    }

    fn to_variables(&self) -> Result<Variables, VariablesError> {
        match serde_json::to_value(self)? {
            Value::Object(fields) => Ok(fields.into_iter().collect()),
            other => Err(VariablesError::NotAnObject(kind_of(&other))),
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
