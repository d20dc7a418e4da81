//! テスト用の共通部品
//!
//! Fixtures, a `tracing` layer that records emitted events, and wrappers
//! around the in-memory impls that inject store/queue faults.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::HashSet;
use std::fmt::{self, Write as _};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use ulid::Ulid;

use crate::domain::{
    Envelope, EnvelopeId, EnvelopeStatus, MessageHandle, Metric, Template, TemplateId, TenantId,
    Variables,
};
use crate::impls::{InMemoryDeliveryQueue, InMemoryStore};
use crate::ports::{
    DeliveryQueue, EnvelopeStore, EnvelopeStream, MetricsSink, QueueError, StoreError,
};

pub const TEMPLATE: &str = "welcome";

/// An UNSENT base-tenant envelope for `welcome`, scheduled at `scheduled_for`.
pub fn envelope_at(scheduled_for: DateTime<Utc>) -> Envelope {
    let mut variables = Variables::new();
    variables.insert("name".to_string(), serde_json::json!("Blahaj"));
    Envelope {
        id: EnvelopeId::from(Ulid::new()),
        app_id: "test-app".to_string(),
        tenant_id: TenantId::base(),
        to_address: "shark@example.com".to_string(),
        to_name: "Blahaj".to_string(),
        to_internal_id: String::new(),
        scheduled_for,
        message_group_id: "test-group".to_string(),
        reference_id: None,
        template_id: TemplateId::new(TEMPLATE),
        variables,
        status: EnvelopeStatus::Unsent,
    }
}

pub fn tenant_template(template_id: &str, tenant: &str, subject: &str) -> Template {
    Template::new(template_id, TenantId::new(tenant), subject, format!("{subject} body"))
        .with_from("noreply@example.com", "Herald")
}

// ---------------------------------------------------------------------------
// log capture

#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    /// Message followed by ` key=value` for every other field.
    pub text: String,
}

/// Records every event seen while installed.
#[derive(Clone, Default)]
pub struct LogCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl LogCapture {
    /// Install as the thread-local default subscriber until the guard drops.
    ///
    /// Works with `#[tokio::test]`'s current-thread runtime: spawned tasks
    /// run on the same thread.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn at(&self, level: Level) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.level == level)
            .map(|e| e.text)
            .collect()
    }

    pub fn count(&self, level: Level) -> usize {
        self.at(level).len()
    }
}

#[derive(Default)]
struct FieldText(String);

impl Visit for FieldText {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.0, "{value:?}");
        } else {
            let _ = write!(self.0, " {}={value:?}", field.name());
        }
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut text = FieldText::default();
        event.record(&mut text);
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CapturedEvent {
                level: *event.metadata().level(),
                text: text.0,
            });
    }
}

// ---------------------------------------------------------------------------
// metrics

/// Keeps every metric it is given.
#[derive(Default)]
pub struct RecordingMetrics {
    sent: Mutex<Vec<Metric>>,
    delivered: Mutex<Vec<Metric>>,
}

impl RecordingMetrics {
    pub fn sent(&self) -> Vec<Metric> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn delivered(&self) -> Vec<Metric> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MetricsSink for RecordingMetrics {
    fn send_event(&self, metric: &Metric) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(metric.clone());
    }

    fn deliver_event(&self, metric: &Metric) {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(metric.clone());
    }
}

// ---------------------------------------------------------------------------
// fault injection

#[derive(Default)]
struct StoreFaults {
    /// Status writes to these target statuses fail.
    fail_writes_to: HashSet<EnvelopeStatus>,
    /// Status writes for these envelopes fail.
    fail_writes_for: HashSet<EnvelopeId>,
    fail_scan: bool,
    /// The ready stream yields an error after this many envelopes.
    break_scan_after: Option<usize>,
    read_delay: Option<Duration>,
}

/// InMemoryStore with switchable failures.
#[derive(Clone, Default)]
pub struct FlakyStore {
    pub inner: InMemoryStore,
    faults: Arc<Mutex<StoreFaults>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, StoreFaults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_writes_to(&self, status: EnvelopeStatus) {
        self.faults().fail_writes_to.insert(status);
    }

    pub fn fail_writes_for(&self, id: EnvelopeId) {
        self.faults().fail_writes_for.insert(id);
    }

    pub fn fail_scan(&self) {
        self.faults().fail_scan = true;
    }

    pub fn break_scan_after(&self, n: usize) {
        self.faults().break_scan_after = Some(n);
    }

    /// Envelope and template reads take their snapshot, then wait `by`
    /// before returning it.
    pub fn delay_reads(&self, by: Duration) {
        self.faults().read_delay = Some(by);
    }

    async fn read_latency(&self) {
        let delay = self.faults().read_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl EnvelopeStore for FlakyStore {
    async fn insert_envelope(&self, envelope: Envelope) -> Result<(), StoreError> {
        self.inner.insert_envelope(envelope).await
    }

    async fn get_envelope_by_id(&self, id: EnvelopeId) -> Result<Option<Envelope>, StoreError> {
        let snapshot = self.inner.get_envelope_by_id(id).await;
        self.read_latency().await;
        snapshot
    }

    async fn update_envelope_status(
        &self,
        id: EnvelopeId,
        status: EnvelopeStatus,
    ) -> Result<(), StoreError> {
        let failing = {
            let faults = self.faults();
            faults.fail_writes_to.contains(&status) || faults.fail_writes_for.contains(&id)
        };
        if failing {
            return Err(StoreError::Unavailable(format!("write of {status} refused")));
        }
        self.inner.update_envelope_status(id, status).await
    }

    async fn get_envelopes_ready_to_send(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<EnvelopeStream, StoreError> {
        let (fail_scan, break_after) = {
            let faults = self.faults();
            (faults.fail_scan, faults.break_scan_after)
        };
        if fail_scan {
            return Err(StoreError::Unavailable("scan refused".to_string()));
        }
        let stream = self.inner.get_envelopes_ready_to_send(as_of).await?;
        match break_after {
            None => Ok(stream),
            Some(n) => Ok(stream
                .take(n)
                .chain(futures::stream::once(async {
                    Err(StoreError::Unavailable("scan interrupted".to_string()))
                }))
                .boxed()),
        }
    }

    async fn get_template_exact(
        &self,
        template_id: &TemplateId,
        tenant_id: &TenantId,
    ) -> Result<Option<Template>, StoreError> {
        let snapshot = self.inner.get_template_exact(template_id, tenant_id).await;
        self.read_latency().await;
        snapshot
    }

    async fn insert_template(&self, template: Template) -> Result<(), StoreError> {
        self.inner.insert_template(template).await
    }
}

/// InMemoryDeliveryQueue whose dispatch can be refused per envelope.
#[derive(Clone, Default)]
pub struct FlakyQueue {
    pub inner: InMemoryDeliveryQueue,
    refuse: Arc<Mutex<HashSet<EnvelopeId>>>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl FlakyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse(&self, id: EnvelopeId) {
        self.refuse
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
    }

    pub fn delay_dispatch(&self, by: Duration) {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = Some(by);
    }
}

#[async_trait]
impl DeliveryQueue for FlakyQueue {
    async fn dispatch(
        &self,
        envelope: &Envelope,
        destination: &str,
    ) -> Result<MessageHandle, QueueError> {
        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let refused = self
            .refuse
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&envelope.id);
        if refused {
            return Err(QueueError::OperationFailed("publish refused".to_string()));
        }
        self.inner.dispatch(envelope, destination).await
    }
}
