//! DeliveryQueue port - handoff from the dispatcher to the deliverer.
//!
//! The publish side is all the dispatcher needs. The consume side is what
//! a batch consumer (or a local live runtime) uses to drive the deliverer.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::domain::{Envelope, MessageHandle};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue operation failed: {0}")]
    OperationFailed(String),

    #[error("failed to encode/decode queued envelope: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("unknown message handle {0}")]
    UnknownHandle(MessageHandle),
}

/// Publish-only handoff.
///
/// # 設計原則
/// - at-least-once: the same envelope may be published more than once
/// - the published copy is a reference; consumers re-read the store
#[async_trait]
pub trait DeliveryQueue: Send + Sync {
    async fn dispatch(
        &self,
        envelope: &Envelope,
        destination: &str,
    ) -> Result<MessageHandle, QueueError>;
}

/// One received copy of a dispatched envelope.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub handle: MessageHandle,

    /// How many times this copy has been handed out, including this one.
    pub receive_count: u32,

    pub envelope: Envelope,
}

/// Consume side of the queue.
///
/// Received messages are invisible to other receivers until they are either
/// acked (gone for good) or released (visible again).
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    /// Waits up to `wait` for at least one message, returns at most `max`.
    async fn receive(
        &self,
        destination: &str,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<QueuedMessage>, QueueError>;

    async fn ack(&self, handle: MessageHandle) -> Result<(), QueueError>;

    /// Makes the message visible again for redelivery.
    async fn release(&self, handle: MessageHandle) -> Result<(), QueueError>;
}
