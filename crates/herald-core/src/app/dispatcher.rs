//! Dispatcher - 送信時刻を過ぎた envelope をキューへ流す
//!
//! # フロー
//! 1. EnvelopeStore::get_envelopes_ready_to_send(now) で候補を取得
//! 2. 1 件ごとに deadline を確認（超えていたら Ok で打ち切り）
//! 3. DeliveryQueue::dispatch() で publish
//! 4. 成功したら DELIVERING に更新
//!
//! Publish and status update are two separate calls. A crash in between
//! leaves an UNSENT envelope with a message already on the queue; the
//! deliverer's state guard absorbs it and the next sweep publishes again.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::domain::{Envelope, EnvelopeStatus};
use crate::ports::{Clock, DeliveryQueue, EnvelopeStore, StoreError};

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Published and marked DELIVERING.
    pub dispatched: usize,
    pub publish_failures: usize,
    /// Published, but the DELIVERING write failed or was rejected.
    pub update_failures: usize,
    /// The sweep stopped early because its deadline passed.
    pub deadline_exceeded: bool,
}

pub struct Dispatcher {
    store: Arc<dyn EnvelopeStore>,
    queue: Arc<dyn DeliveryQueue>,
    clock: Arc<dyn Clock>,
    destination: String,
}

enum Step {
    Continue,
    OutOfTime,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn EnvelopeStore>,
        queue: Arc<dyn DeliveryQueue>,
        clock: Arc<dyn Clock>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            store,
            queue,
            clock,
            destination: destination.into(),
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Publish every envelope ready as of `now`, stopping cleanly at
    /// `deadline`.
    ///
    /// Only a failure to start the scan is an error. Everything after that
    /// is counted in the report and logged.
    pub async fn run_sweep(
        &self,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, StoreError> {
        let mut report = SweepReport::default();

        let Some(remaining) = self.remaining(deadline) else {
            report.deadline_exceeded = true;
            warn!(%deadline, "sweep deadline passed before the scan started");
            return Ok(report);
        };
        let mut ready = match tokio::time::timeout(
            remaining,
            self.store.get_envelopes_ready_to_send(now),
        )
        .await
        {
            Ok(stream) => stream?,
            Err(_) => {
                report.deadline_exceeded = true;
                warn!(%deadline, "sweep deadline passed while starting the scan");
                return Ok(report);
            }
        };

        loop {
            let Some(remaining) = self.remaining(deadline) else {
                report.deadline_exceeded = true;
                break;
            };
            let envelope = match tokio::time::timeout(remaining, ready.next()).await {
                Err(_) => {
                    report.deadline_exceeded = true;
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    error!(error = %e, "ready-to-send scan failed mid-sweep");
                    break;
                }
                Ok(Some(Ok(envelope))) => envelope,
            };

            if let Step::OutOfTime = self.dispatch_one(&envelope, deadline, &mut report).await {
                report.deadline_exceeded = true;
                break;
            }
        }
        // Dropping the stream stops the scan.
        drop(ready);

        if report.deadline_exceeded {
            warn!(%deadline, "sweep deadline reached, remaining envelopes wait for the next sweep");
        }
        info!(
            destination = %self.destination,
            dispatched = report.dispatched,
            publish_failures = report.publish_failures,
            update_failures = report.update_failures,
            deadline_exceeded = report.deadline_exceeded,
            "dispatch sweep finished"
        );
        Ok(report)
    }

    async fn dispatch_one(
        &self,
        envelope: &Envelope,
        deadline: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Step {
        let id = envelope.id;

        let Some(remaining) = self.remaining(deadline) else {
            return Step::OutOfTime;
        };
        match tokio::time::timeout(remaining, self.queue.dispatch(envelope, &self.destination))
            .await
        {
            Err(_) => return Step::OutOfTime,
            Ok(Err(e)) => {
                report.publish_failures += 1;
                error!(envelope_id = %id, destination = %self.destination, error = %e, "publish failed");
                return Step::Continue;
            }
            Ok(Ok(handle)) => {
                debug!(envelope_id = %id, %handle, "published");
            }
        }

        let Some(remaining) = self.remaining(deadline) else {
            report.update_failures += 1;
            error!(envelope_id = %id, "published but no time left to mark DELIVERING");
            return Step::OutOfTime;
        };
        match tokio::time::timeout(
            remaining,
            self.store
                .update_envelope_status(id, EnvelopeStatus::Delivering),
        )
        .await
        {
            Err(_) => {
                report.update_failures += 1;
                error!(envelope_id = %id, "marking DELIVERING timed out at the sweep deadline");
                Step::OutOfTime
            }
            // A consumer already delivered the published message.
            Ok(Err(StoreError::InvalidTransition { from, .. })) => {
                report.update_failures += 1;
                warn!(
                    envelope_id = %id,
                    status = %from,
                    "envelope moved on before it could be marked DELIVERING"
                );
                Step::Continue
            }
            Ok(Err(e)) => {
                report.update_failures += 1;
                error!(envelope_id = %id, error = %e, "published but could not mark DELIVERING");
                Step::Continue
            }
            Ok(Ok(())) => {
                report.dispatched += 1;
                Step::Continue
            }
        }
    }

    /// Time left before `deadline`, `None` once it has passed.
    fn remaining(&self, deadline: DateTime<Utc>) -> Option<Duration> {
        (deadline - self.clock.now())
            .to_std()
            .ok()
            .filter(|left| !left.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::deliverer::{Deliverer, DeliveryOutcome};
    use crate::domain::{MessageHandle, Template, TenantId};
    use crate::impls::{InMemoryDeliveryQueue, InMemoryStore, RecordingProvider};
    use crate::ports::{FixedClock, QueueError, SystemClock};
    use crate::test_support::{FlakyQueue, FlakyStore, LogCapture, TEMPLATE, envelope_at};
    use async_trait::async_trait;
    use chrono::TimeDelta;
    use tracing::Level;

    /// A queue whose consumer delivers the message before `dispatch` returns.
    struct EagerConsumerQueue {
        inner: InMemoryDeliveryQueue,
        deliverer: Deliverer,
    }

    #[async_trait]
    impl DeliveryQueue for EagerConsumerQueue {
        async fn dispatch(
            &self,
            envelope: &Envelope,
            destination: &str,
        ) -> Result<MessageHandle, QueueError> {
            let handle = self.inner.dispatch(envelope, destination).await?;
            let outcome = self.deliverer.deliver(envelope).await;
            assert!(matches!(outcome, Ok(DeliveryOutcome::Sent)), "{outcome:?}");
            Ok(handle)
        }
    }

    const DEST: &str = "email_queue";

    fn dispatcher(
        store: Arc<dyn EnvelopeStore>,
        queue: Arc<dyn DeliveryQueue>,
        clock: Arc<dyn Clock>,
    ) -> Dispatcher {
        Dispatcher::new(store, queue, clock, DEST)
    }

    #[tokio::test]
    async fn sweep_publishes_ready_envelope_and_marks_it_delivering() {
        let store = InMemoryStore::new();
        let queue = InMemoryDeliveryQueue::new();
        let clock = FixedClock::new(Utc::now());
        let now = clock.now();
        let envelope = envelope_at(now - TimeDelta::minutes(1));
        store.insert_envelope(envelope.clone()).await.unwrap();

        let report = dispatcher(Arc::new(store.clone()), Arc::new(queue.clone()), Arc::new(clock))
            .run_sweep(now + TimeDelta::seconds(55), now)
            .await
            .unwrap();

        assert_eq!(report.dispatched, 1);
        assert!(!report.deadline_exceeded);
        let pending = queue.pending(DEST).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, envelope.id);
        assert_eq!(store.status_of(envelope.id).await, Some(EnvelopeStatus::Delivering));
    }

    #[tokio::test]
    async fn future_and_in_flight_envelopes_are_skipped() {
        let store = InMemoryStore::new();
        let queue = InMemoryDeliveryQueue::new();
        let clock = FixedClock::new(Utc::now());
        let now = clock.now();
        let later = envelope_at(now + TimeDelta::minutes(5));
        let in_flight = envelope_at(now).with_status(EnvelopeStatus::Delivering);
        let sent = envelope_at(now).with_status(EnvelopeStatus::Sent);
        for e in [&later, &in_flight, &sent] {
            store.insert_envelope(e.clone()).await.unwrap();
        }

        let report = dispatcher(Arc::new(store.clone()), Arc::new(queue.clone()), Arc::new(clock))
            .run_sweep(now + TimeDelta::seconds(55), now)
            .await
            .unwrap();

        assert_eq!(report, SweepReport::default());
        assert!(queue.pending(DEST).unwrap().is_empty());
        assert_eq!(store.status_of(later.id).await, Some(EnvelopeStatus::Unsent));
    }

    #[tokio::test]
    async fn failed_envelopes_are_dispatched_again() {
        let store = InMemoryStore::new();
        let queue = InMemoryDeliveryQueue::new();
        let clock = FixedClock::new(Utc::now());
        let now = clock.now();
        let failed = envelope_at(now - TimeDelta::minutes(3)).with_status(EnvelopeStatus::Failed);
        store.insert_envelope(failed.clone()).await.unwrap();

        let report = dispatcher(Arc::new(store.clone()), Arc::new(queue.clone()), Arc::new(clock))
            .run_sweep(now + TimeDelta::seconds(55), now)
            .await
            .unwrap();

        assert_eq!(report.dispatched, 1);
        assert_eq!(store.status_of(failed.id).await, Some(EnvelopeStatus::Delivering));
    }

    #[tokio::test]
    async fn publish_failure_is_counted_and_sweep_continues() {
        let logs = LogCapture::default();
        let _guard = logs.install();
        let store = InMemoryStore::new();
        let queue = FlakyQueue::new();
        let clock = FixedClock::new(Utc::now());
        let now = clock.now();
        let refused = envelope_at(now);
        let fine = envelope_at(now);
        store.insert_envelope(refused.clone()).await.unwrap();
        store.insert_envelope(fine.clone()).await.unwrap();
        queue.refuse(refused.id);

        let report = dispatcher(Arc::new(store.clone()), Arc::new(queue.clone()), Arc::new(clock))
            .run_sweep(now + TimeDelta::seconds(55), now)
            .await
            .unwrap();

        assert_eq!(report.dispatched, 1);
        assert_eq!(report.publish_failures, 1);
        assert_eq!(store.status_of(refused.id).await, Some(EnvelopeStatus::Unsent));
        assert_eq!(store.status_of(fine.id).await, Some(EnvelopeStatus::Delivering));
        assert_eq!(logs.count(Level::ERROR), 1);
        assert_eq!(logs.count(Level::INFO), 1);
    }

    #[tokio::test]
    async fn update_failure_is_counted_and_message_stays_published() {
        let store = FlakyStore::new();
        let queue = InMemoryDeliveryQueue::new();
        let clock = FixedClock::new(Utc::now());
        let now = clock.now();
        let envelope = envelope_at(now);
        store.insert_envelope(envelope.clone()).await.unwrap();
        store.fail_writes_for(envelope.id);

        let report = dispatcher(Arc::new(store.clone()), Arc::new(queue.clone()), Arc::new(clock))
            .run_sweep(now + TimeDelta::seconds(55), now)
            .await
            .unwrap();

        assert_eq!(report.dispatched, 0);
        assert_eq!(report.update_failures, 1);
        assert_eq!(queue.pending(DEST).unwrap().len(), 1);
        assert_eq!(store.inner.status_of(envelope.id).await, Some(EnvelopeStatus::Unsent));
    }

    #[tokio::test]
    async fn scan_failure_is_the_only_error() {
        let store = FlakyStore::new();
        store.fail_scan();
        let clock = FixedClock::new(Utc::now());
        let now = clock.now();

        let result = dispatcher(
            Arc::new(store),
            Arc::new(InMemoryDeliveryQueue::new()),
            Arc::new(clock),
        )
        .run_sweep(now + TimeDelta::seconds(55), now)
        .await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn mid_scan_failure_keeps_partial_progress() {
        let logs = LogCapture::default();
        let _guard = logs.install();
        let store = FlakyStore::new();
        let queue = InMemoryDeliveryQueue::new();
        let clock = FixedClock::new(Utc::now());
        let now = clock.now();
        for _ in 0..3 {
            store.insert_envelope(envelope_at(now)).await.unwrap();
        }
        store.break_scan_after(2);

        let report = dispatcher(Arc::new(store.clone()), Arc::new(queue.clone()), Arc::new(clock))
            .run_sweep(now + TimeDelta::seconds(55), now)
            .await
            .unwrap();

        assert_eq!(report.dispatched, 2);
        assert_eq!(queue.pending(DEST).unwrap().len(), 2);
        assert_eq!(logs.count(Level::ERROR), 1);
    }

    #[tokio::test]
    async fn expired_deadline_dispatches_nothing() {
        let store = InMemoryStore::new();
        let queue = InMemoryDeliveryQueue::new();
        let clock = FixedClock::new(Utc::now());
        let now = clock.now();
        store.insert_envelope(envelope_at(now)).await.unwrap();

        let report = dispatcher(Arc::new(store.clone()), Arc::new(queue.clone()), Arc::new(clock))
            .run_sweep(now - TimeDelta::seconds(1), now)
            .await
            .unwrap();

        assert!(report.deadline_exceeded);
        assert_eq!(report.dispatched, 0);
        assert!(queue.pending(DEST).unwrap().is_empty());
    }

    #[tokio::test]
    async fn deadline_stops_a_slow_sweep_early() {
        let store = InMemoryStore::new();
        let queue = FlakyQueue::new();
        queue.delay_dispatch(Duration::from_millis(100));
        let now = Utc::now();
        for _ in 0..10 {
            store.insert_envelope(envelope_at(now)).await.unwrap();
        }

        let report = dispatcher(
            Arc::new(store.clone()),
            Arc::new(queue.clone()),
            Arc::new(SystemClock),
        )
        .run_sweep(now + TimeDelta::milliseconds(250), now)
        .await
        .unwrap();

        assert!(report.deadline_exceeded);
        assert!(report.dispatched < 10, "{report:?}");
        let delivering = store
            .envelopes()
            .await
            .into_iter()
            .filter(|e| e.status == EnvelopeStatus::Delivering)
            .count();
        assert_eq!(delivering, report.dispatched);
    }

    #[tokio::test]
    async fn sent_status_survives_a_late_delivering_write() {
        let logs = LogCapture::default();
        let _guard = logs.install();
        let store = InMemoryStore::new();
        let provider = RecordingProvider::new();
        let clock = FixedClock::new(Utc::now());
        let now = clock.now();
        store
            .insert_template(Template::new(TEMPLATE, TenantId::base(), "Hi", "Hello"))
            .await
            .unwrap();
        let failed = envelope_at(now - TimeDelta::minutes(1)).with_status(EnvelopeStatus::Failed);
        store.insert_envelope(failed.clone()).await.unwrap();
        let deliverer = Deliverer::new(
            Arc::new(store.clone()),
            Arc::new(provider.clone()),
            Arc::new(clock.clone()),
        );
        let queue = EagerConsumerQueue {
            inner: InMemoryDeliveryQueue::new(),
            deliverer,
        };

        let report = dispatcher(Arc::new(store.clone()), Arc::new(queue), Arc::new(clock.clone()))
            .run_sweep(now + TimeDelta::seconds(55), now)
            .await
            .unwrap();

        assert_eq!(report.dispatched, 0);
        assert_eq!(report.update_failures, 1);
        assert_eq!(logs.count(Level::WARN), 1);
        assert_eq!(store.status_of(failed.id).await, Some(EnvelopeStatus::Sent));

        // the redundant copy still on the queue must not send again
        let again = Deliverer::new(
            Arc::new(store.clone()),
            Arc::new(provider.clone()),
            Arc::new(clock),
        )
        .deliver(&failed)
        .await
        .unwrap();
        assert_eq!(again, DeliveryOutcome::Duplicate);
        assert_eq!(provider.calls(), 1);
    }
}
