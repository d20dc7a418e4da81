//! BatchConsumer - キューから受け取ったメッセージをまとめて配送
//!
//! # フロー
//! 1. QueueConsumer::receive() で最大 batch_size 件を取得
//! 2. Deliverer::deliver() を並行実行（順序保証なし）
//! 3. Ok → ack / Err → release（再配送）
//! 4. max_receives 回受け取っても失敗するものは諦めて ack（dead letter）

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::domain::ErrorKind;
use crate::ports::{QueueConsumer, QueueError, QueuedMessage};

use super::deliverer::{Deliverer, DeliveryError, DeliveryOutcome};

/// What one `run_once` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub received: usize,
    /// Acked after an `Ok` outcome.
    pub handled: usize,
    /// Released for redelivery.
    pub released: usize,
    /// Acked after failing on the last allowed receive.
    pub given_up: usize,
}

pub struct BatchConsumer {
    queue: Arc<dyn QueueConsumer>,
    deliverer: Arc<Deliverer>,
    destination: String,
    batch_size: usize,
    max_receives: u32,
    receive_wait: Duration,
}

impl BatchConsumer {
    pub fn new(
        queue: Arc<dyn QueueConsumer>,
        deliverer: Arc<Deliverer>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            deliverer,
            destination: destination.into(),
            batch_size: 10,
            max_receives: 5,
            receive_wait: Duration::from_secs(1),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_receives(mut self, max_receives: u32) -> Self {
        self.max_receives = max_receives.max(1);
        self
    }

    pub fn with_receive_wait(mut self, receive_wait: Duration) -> Self {
        self.receive_wait = receive_wait;
        self
    }

    pub fn receive_wait(&self) -> Duration {
        self.receive_wait
    }

    /// Receive one batch and settle every message in it.
    pub async fn run_once(&self) -> Result<BatchReport, QueueError> {
        let messages = self
            .queue
            .receive(&self.destination, self.batch_size, self.receive_wait)
            .await?;
        let mut report = BatchReport {
            received: messages.len(),
            ..BatchReport::default()
        };
        if messages.is_empty() {
            return Ok(report);
        }

        let results = join_all(messages.iter().map(|m| self.deliverer.deliver(&m.envelope))).await;

        for (message, result) in messages.iter().zip(results) {
            match result {
                Ok(outcome) => {
                    report.handled += 1;
                    self.settle_handled(message, outcome).await;
                }
                Err(e) if self.should_give_up(message, &e) => {
                    report.given_up += 1;
                    error!(
                        envelope_id = %message.envelope.id,
                        receive_count = message.receive_count,
                        kind = %e.kind(),
                        error = %e,
                        "giving up on message after repeated failures"
                    );
                    self.ack(message).await;
                }
                Err(e) => {
                    report.released += 1;
                    warn!(
                        envelope_id = %message.envelope.id,
                        receive_count = message.receive_count,
                        kind = %e.kind(),
                        error = %e,
                        "delivery will be retried"
                    );
                    if let Err(release_err) = self.queue.release(message.handle).await {
                        error!(handle = %message.handle, error = %release_err, "release failed");
                    }
                }
            }
        }
        Ok(report)
    }

    async fn settle_handled(&self, message: &QueuedMessage, outcome: DeliveryOutcome) {
        debug!(envelope_id = %message.envelope.id, ?outcome, "message settled");
        self.ack(message).await;
    }

    /// Not-ready messages never count towards the limit: they were published
    /// early, not broken.
    fn should_give_up(&self, message: &QueuedMessage, e: &DeliveryError) -> bool {
        e.kind() != ErrorKind::NotReady && message.receive_count >= self.max_receives
    }

    async fn ack(&self, message: &QueuedMessage) {
        if let Err(e) = self.queue.ack(message.handle).await {
            error!(handle = %message.handle, error = %e, "ack failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EnvelopeStatus, Template, TenantId};
    use crate::impls::{InMemoryDeliveryQueue, InMemoryStore, RecordingProvider};
    use crate::ports::{DeliveryQueue, EnvelopeStore, FixedClock};
    use crate::test_support::{TEMPLATE, envelope_at};
    use chrono::{TimeDelta, Utc};

    const DEST: &str = "email_queue";

    struct Fixture {
        store: InMemoryStore,
        queue: InMemoryDeliveryQueue,
        provider: RecordingProvider,
        consumer: BatchConsumer,
    }

    fn fixture(max_receives: u32) -> Fixture {
        let store = InMemoryStore::new();
        let queue = InMemoryDeliveryQueue::new();
        let provider = RecordingProvider::new();
        let deliverer = Deliverer::new(
            Arc::new(store.clone()),
            Arc::new(provider.clone()),
            Arc::new(FixedClock::new(Utc::now())),
        );
        let consumer = BatchConsumer::new(Arc::new(queue.clone()), Arc::new(deliverer), DEST)
            .with_batch_size(10)
            .with_max_receives(max_receives)
            .with_receive_wait(Duration::from_millis(50));
        Fixture {
            store,
            queue,
            provider,
            consumer,
        }
    }

    async fn base_template(store: &InMemoryStore) {
        store
            .insert_template(Template::new(TEMPLATE, TenantId::base(), "Hi", "Hello {{ name }}"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delivers_and_acks_a_batch() {
        let f = fixture(5);
        base_template(&f.store).await;
        for _ in 0..3 {
            let e = envelope_at(Utc::now()).with_status(EnvelopeStatus::Delivering);
            f.store.insert_envelope(e.clone()).await.unwrap();
            f.queue.dispatch(&e, DEST).await.unwrap();
        }

        let report = f.consumer.run_once().await.unwrap();

        assert_eq!(report.received, 3);
        assert_eq!(report.handled, 3);
        assert_eq!(f.provider.calls(), 3);
        assert_eq!(f.queue.in_flight().unwrap(), 0);
        assert!(f.queue.pending(DEST).unwrap().is_empty());
        assert!(f.provider.messages().iter().all(|m| m.content == "Hello Blahaj"));
    }

    #[tokio::test]
    async fn empty_queue_is_an_empty_report() {
        let f = fixture(5);
        assert_eq!(f.consumer.run_once().await.unwrap(), BatchReport::default());
    }

    #[tokio::test]
    async fn retryable_failure_is_released() {
        let f = fixture(5);
        // no template registered yet
        let e = envelope_at(Utc::now()).with_status(EnvelopeStatus::Delivering);
        f.store.insert_envelope(e.clone()).await.unwrap();
        f.queue.dispatch(&e, DEST).await.unwrap();

        let first = f.consumer.run_once().await.unwrap();
        assert_eq!(first.released, 1);
        assert_eq!(f.queue.pending(DEST).unwrap().len(), 1);

        base_template(&f.store).await;
        let second = f.consumer.run_once().await.unwrap();
        assert_eq!(second.handled, 1);
        assert_eq!(f.store.status_of(e.id).await, Some(EnvelopeStatus::Sent));
    }

    #[tokio::test]
    async fn gives_up_after_max_receives() {
        let f = fixture(2);
        let e = envelope_at(Utc::now()).with_status(EnvelopeStatus::Delivering);
        f.store.insert_envelope(e.clone()).await.unwrap();
        f.queue.dispatch(&e, DEST).await.unwrap();

        assert_eq!(f.consumer.run_once().await.unwrap().released, 1);
        assert_eq!(f.consumer.run_once().await.unwrap().given_up, 1);
        assert!(f.queue.pending(DEST).unwrap().is_empty());
        assert_eq!(f.queue.in_flight().unwrap(), 0);
        assert_eq!(f.store.status_of(e.id).await, Some(EnvelopeStatus::Delivering));
    }

    #[tokio::test]
    async fn not_ready_is_never_given_up() {
        let f = fixture(1);
        base_template(&f.store).await;
        let e = envelope_at(Utc::now() + TimeDelta::minutes(10))
            .with_status(EnvelopeStatus::Delivering);
        f.store.insert_envelope(e.clone()).await.unwrap();
        f.queue.dispatch(&e, DEST).await.unwrap();

        for _ in 0..3 {
            let report = f.consumer.run_once().await.unwrap();
            assert_eq!(report.released, 1);
            assert_eq!(report.given_up, 0);
        }
        assert_eq!(f.provider.calls(), 0);
    }

    #[tokio::test]
    async fn definitive_outcomes_are_acked() {
        let f = fixture(5);
        base_template(&f.store).await;
        let sent = envelope_at(Utc::now()).with_status(EnvelopeStatus::Sent);
        let ghost = envelope_at(Utc::now()).with_status(EnvelopeStatus::Delivering);
        f.store.insert_envelope(sent.clone()).await.unwrap();
        f.queue.dispatch(&sent, DEST).await.unwrap();
        f.queue.dispatch(&ghost, DEST).await.unwrap();

        let report = f.consumer.run_once().await.unwrap();

        assert_eq!(report.handled, 2);
        assert_eq!(f.queue.in_flight().unwrap(), 0);
        assert_eq!(f.provider.calls(), 0);
    }
}
