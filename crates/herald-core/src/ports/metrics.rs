//! MetricsSink port - send/deliver counters.
//!
//! Metrics are best effort: a sink never fails the operation it observes,
//! so the methods return nothing.

use crate::domain::Metric;

pub trait MetricsSink: Send + Sync {
    /// An envelope was accepted for sending.
    fn send_event(&self, metric: &Metric);

    /// A provider attempted a delivery.
    fn deliver_event(&self, metric: &Metric);
}
