//! Metrics sinks that need no backend.

use tracing::info;

use crate::domain::Metric;
use crate::ports::MetricsSink;

/// Writes every metric as a structured log line.
#[derive(Debug, Clone)]
pub struct LoggingMetrics {
    namespace: String,
}

impl LoggingMetrics {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }
}

impl MetricsSink for LoggingMetrics {
    fn send_event(&self, metric: &Metric) {
        info!(
            namespace = %self.namespace,
            app = %metric.app_name,
            template_id = %metric.template_id,
            tenant_id = %metric.tenant_id,
            "send event"
        );
    }

    fn deliver_event(&self, metric: &Metric) {
        info!(
            namespace = %self.namespace,
            app = %metric.app_name,
            template_id = %metric.template_id,
            tenant_id = %metric.tenant_id,
            status = if metric.success { "success" } else { "failure" },
            "deliver event"
        );
    }
}

/// Drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn send_event(&self, _metric: &Metric) {}

    fn deliver_event(&self, _metric: &Metric) {}
}
