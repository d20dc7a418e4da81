//! Domain model (ids, envelope, status, template, variables, metric, errors).

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod metric;
pub mod status;
pub mod template;
pub mod tenant;
pub mod variables;

pub use self::envelope::{Envelope, Variables};
pub use self::errors::ErrorKind;
pub use self::ids::{EnvelopeId, MessageHandle};
pub use self::metric::Metric;
pub use self::status::EnvelopeStatus;
pub use self::template::{RenderedTemplate, Template};
pub use self::tenant::{BASE_TENANT, TemplateId, TenantId};
pub use self::variables::{TemplateVariables, VariablesError};
