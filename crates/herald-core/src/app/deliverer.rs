//! Deliverer - 受信した envelope 参照を 1 通だけ配送する
//!
//! # フロー
//! 1. scheduling guard (too far in the future → NotReady)
//! 2. 永続化された envelope を再取得（なければ drop）
//! 3. SENT なら duplicate として何もしない
//! 4. DELIVERING / FAILED 以外なら何もしない
//! 5. template 解決（tenant → base）
//! 6. render
//! 7. SENT を先に書き込む（commit-to-send）
//! 8. provider 呼び出し。失敗したら FAILED を記録し、再配送はしない
//!
//! 1 通あたりの時間は item_timeout で区切る（全ステップ合計の締め切り）。
//! 締め切りを過ぎた provider 呼び出しは provider の失敗として扱う。
//!
//! # エラー方針
//! `Err` は「キューに再配送してほしい」場合だけ。処理済みと判断できる結果は
//! 論理的に失敗でも `Ok(DeliveryOutcome)` で返し、必ずログを残す。

use chrono::{DateTime, TimeDelta, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::domain::{
    Envelope, EnvelopeId, EnvelopeStatus, ErrorKind, Metric, TemplateId, TenantId,
};
use crate::impls::NoopMetrics;
use crate::ports::{Clock, EnvelopeStore, MetricsSink, Provider, StoreError};
use crate::render::{RenderError, TemplateRenderer};

pub const DEFAULT_ITEM_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SCHEDULE_TOLERANCE: Duration = Duration::from_secs(30);

/// How a delivery attempt ended, when no redelivery is wanted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Rendered, committed as SENT and accepted by the provider.
    Sent,
    /// The envelope no longer exists in the store.
    Dropped,
    /// Already SENT; nothing was done.
    Duplicate,
    /// Persisted status is not in flight (e.g. still UNSENT).
    NotInFlight(EnvelopeStatus),
    /// The provider refused the message; the envelope is now FAILED and
    /// waits for the next dispatch sweep.
    ProviderFailed,
}

/// A delivery attempt that should be retried by redelivering the message.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("envelope {id} is scheduled for {scheduled_for}, too early to deliver")]
    NotReady {
        id: EnvelopeId,
        scheduled_for: DateTime<Utc>,
    },

    #[error("store failure while delivering {id}: {source}")]
    Store {
        id: EnvelopeId,
        #[source]
        source: StoreError,
    },

    #[error("template {template_id} not found for tenant {tenant_id} or base")]
    TemplateNotFound {
        template_id: TemplateId,
        tenant_id: TenantId,
    },

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("could not mark {id} as SENT: {source}")]
    Commit {
        id: EnvelopeId,
        #[source]
        source: StoreError,
    },

    #[error("{operation} for {id} timed out after {after:?}")]
    Timeout {
        id: EnvelopeId,
        operation: &'static str,
        after: Duration,
    },
}

impl DeliveryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeliveryError::NotReady { .. } => ErrorKind::NotReady,
            DeliveryError::Render(e) => e.kind(),
            DeliveryError::Store { .. }
            | DeliveryError::TemplateNotFound { .. }
            | DeliveryError::Commit { .. }
            | DeliveryError::Timeout { .. } => ErrorKind::Transient,
        }
    }
}

/// Deliverer は 1 envelope 参照ごとの配送を担当
///
/// The queued envelope is only a reference; every decision is made on the
/// copy re-read from the store.
pub struct Deliverer {
    store: Arc<dyn EnvelopeStore>,
    provider: Arc<dyn Provider>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
    renderer: TemplateRenderer,
    item_timeout: Duration,
    schedule_tolerance: TimeDelta,
}

impl Deliverer {
    pub fn new(
        store: Arc<dyn EnvelopeStore>,
        provider: Arc<dyn Provider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            provider,
            clock,
            metrics: Arc::new(NoopMetrics),
            renderer: TemplateRenderer,
            item_timeout: DEFAULT_ITEM_TIMEOUT,
            schedule_tolerance: tolerance(DEFAULT_SCHEDULE_TOLERANCE),
        }
    }

    /// Budget for one whole attempt: lookups, commit and the provider call
    /// together.
    pub fn with_item_timeout(mut self, item_timeout: Duration) -> Self {
        self.item_timeout = item_timeout;
        self
    }

    pub fn with_schedule_tolerance(mut self, schedule_tolerance: Duration) -> Self {
        self.schedule_tolerance = tolerance(schedule_tolerance);
        self
    }

    /// Receives one `deliver_event` per provider call.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn deliver(&self, envelope_ref: &Envelope) -> Result<DeliveryOutcome, DeliveryError> {
        let id = envelope_ref.id;
        let deadline = Instant::now().checked_add(self.item_timeout);

        let latest_allowed = self.clock.now().checked_add_signed(self.schedule_tolerance);
        if latest_allowed.is_some_and(|latest| envelope_ref.scheduled_for > latest) {
            debug!(envelope_id = %id, scheduled_for = %envelope_ref.scheduled_for, "not ready yet");
            return Err(DeliveryError::NotReady {
                id,
                scheduled_for: envelope_ref.scheduled_for,
            });
        }

        let envelope = match self
            .bounded(deadline, id, "envelope lookup", self.store.get_envelope_by_id(id))
            .await?
        {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                error!(envelope_id = %id, "envelope not found in store, dropping message");
                return Ok(DeliveryOutcome::Dropped);
            }
            Err(source) => return Err(DeliveryError::Store { id, source }),
        };

        if envelope.status == EnvelopeStatus::Sent {
            warn!(envelope_id = %id, "envelope already sent, ignoring duplicate");
            return Ok(DeliveryOutcome::Duplicate);
        }
        if !envelope.status.is_delivery_eligible() {
            warn!(
                envelope_id = %id,
                status = %envelope.status,
                "envelope is not in flight, leaving it to the dispatcher"
            );
            return Ok(DeliveryOutcome::NotInFlight(envelope.status));
        }

        let template = match self
            .bounded(
                deadline,
                id,
                "template lookup",
                self.store
                    .get_template_by_id(&envelope.template_id, &envelope.tenant_id),
            )
            .await?
        {
            Ok(Some(template)) => template,
            Ok(None) => {
                return Err(DeliveryError::TemplateNotFound {
                    template_id: envelope.template_id.clone(),
                    tenant_id: envelope.tenant_id.clone(),
                });
            }
            Err(source) => return Err(DeliveryError::Store { id, source }),
        };

        let rendered = self
            .renderer
            .fill(&template, &envelope.variables)
            .inspect_err(|e| {
                error!(envelope_id = %id, kind = %e.kind(), error = %e, "template content problem");
            })?;

        // From here on a retry must never reach the provider twice.
        let committed = self
            .bounded(
                deadline,
                id,
                "commit",
                self.store.update_envelope_status(id, EnvelopeStatus::Sent),
            )
            .await?;
        match committed {
            Ok(()) => {}
            // Another delivery (or a sweep) moved the envelope after our read.
            Err(StoreError::InvalidTransition { from, .. }) => {
                warn!(
                    envelope_id = %id,
                    status = %from,
                    "envelope changed before commit, not sending"
                );
                return Ok(if from == EnvelopeStatus::Sent {
                    DeliveryOutcome::Duplicate
                } else {
                    DeliveryOutcome::NotInFlight(from)
                });
            }
            Err(source) => return Err(DeliveryError::Commit { id, source }),
        }

        let provider = self.provider.name();
        let delivered = match within(deadline, self.provider.deliver(&envelope, &rendered)).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(format!("timed out after {:?}", self.item_timeout)),
        };
        self.metrics
            .deliver_event(&Metric::for_envelope(&envelope, delivered.is_ok()));

        if let Err(reason) = delivered {
            error!(envelope_id = %id, provider, error = %reason, "provider failed to deliver");
            self.record_failure(id).await;
            return Ok(DeliveryOutcome::ProviderFailed);
        }

        info!(envelope_id = %id, provider, to = %envelope.to_address, "message sent");
        Ok(DeliveryOutcome::Sent)
    }

    /// Retract the commit-to-send claim after a provider refusal.
    ///
    /// Runs on its own `item_timeout`: the attempt's deadline may already be
    /// spent by a slow provider.
    async fn record_failure(&self, id: EnvelopeId) {
        let written = tokio::time::timeout(
            self.item_timeout,
            self.store.update_envelope_status(id, EnvelopeStatus::Failed),
        )
        .await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(envelope_id = %id, error = %e, "could not record FAILED status"),
            Err(_) => error!(
                envelope_id = %id,
                after = ?self.item_timeout,
                "recording FAILED status timed out"
            ),
        }
    }

    async fn bounded<F: Future>(
        &self,
        deadline: Option<Instant>,
        id: EnvelopeId,
        operation: &'static str,
        fut: F,
    ) -> Result<F::Output, DeliveryError> {
        within(deadline, fut)
            .await
            .map_err(|_| DeliveryError::Timeout {
                id,
                operation,
                after: self.item_timeout,
            })
    }
}

/// `None` is a deadline too far away to represent.
async fn within<F: Future>(
    deadline: Option<Instant>,
    fut: F,
) -> Result<F::Output, tokio::time::error::Elapsed> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut).await,
        None => Ok(fut.await),
    }
}

fn tolerance(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}
