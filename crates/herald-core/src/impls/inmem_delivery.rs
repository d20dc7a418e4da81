//! InMemoryDeliveryQueue - 開発用の配送キュー
//!
//! # 学習ポイント
//! - Mutex + Condvar による blocking receive
//! - spawn_blocking で async context から blocking wait を呼ぶ
//! - destination ごとにキューを管理
//!
//! Envelopes are stored as JSON, the same bytes a broker would carry, so the
//! consumer works on a decoded copy rather than on shared state.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use ulid::Ulid;

use crate::domain::{Envelope, MessageHandle};
use crate::ports::{DeliveryQueue, QueueConsumer, QueueError, QueuedMessage};

struct StoredMessage {
    destination: String,
    payload: Vec<u8>,
    receive_count: u32,
    in_flight: bool,
}

#[derive(Default)]
struct QueueState {
    /// Visible handles per destination.
    ready: HashMap<String, VecDeque<MessageHandle>>,
    /// Every message not yet acked, visible or in flight.
    messages: HashMap<MessageHandle, StoredMessage>,
}

/// InMemoryDeliveryQueue は開発用の配送キュー
///
/// Received messages stay stored (in flight) until acked; a release puts
/// them back at the end of their destination queue.
#[derive(Clone, Default)]
pub struct InMemoryDeliveryQueue {
    state: Arc<Mutex<QueueState>>,
    /// notified on dispatch and release
    condvar: Arc<Condvar>,
}

fn lock(state: &Mutex<QueueState>) -> Result<MutexGuard<'_, QueueState>, QueueError> {
    state
        .lock()
        .map_err(|_| QueueError::OperationFailed("queue lock poisoned".to_string()))
}

impl InMemoryDeliveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Envelopes currently visible on `destination`, front first.
    pub fn pending(&self, destination: &str) -> Result<Vec<Envelope>, QueueError> {
        let state = lock(&self.state)?;
        let Some(ready) = state.ready.get(destination) else {
            return Ok(Vec::new());
        };
        ready
            .iter()
            .filter_map(|handle| state.messages.get(handle))
            .map(|m| serde_json::from_slice(&m.payload).map_err(QueueError::from))
            .collect()
    }

    /// Received but neither acked nor released.
    pub fn in_flight(&self) -> Result<usize, QueueError> {
        Ok(lock(&self.state)?
            .messages
            .values()
            .filter(|m| m.in_flight)
            .count())
    }
}

#[async_trait]
impl DeliveryQueue for InMemoryDeliveryQueue {
    async fn dispatch(
        &self,
        envelope: &Envelope,
        destination: &str,
    ) -> Result<MessageHandle, QueueError> {
        let payload = serde_json::to_vec(envelope)?;
        let handle = MessageHandle::from(Ulid::new());

        let mut state = lock(&self.state)?;
        state.messages.insert(
            handle,
            StoredMessage {
                destination: destination.to_string(),
                payload,
                receive_count: 0,
                in_flight: false,
            },
        );
        state
            .ready
            .entry(destination.to_string())
            .or_default()
            .push_back(handle);
        drop(state);

        self.condvar.notify_all();
        Ok(handle)
    }
}

#[async_trait]
impl QueueConsumer for InMemoryDeliveryQueue {
    async fn receive(
        &self,
        destination: &str,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<QueuedMessage>, QueueError> {
        let state = Arc::clone(&self.state);
        let condvar = Arc::clone(&self.condvar);
        let destination = destination.to_string();

        let raw = tokio::task::spawn_blocking(move || {
            let start = Instant::now();
            let mut guard = lock(&state)?;
            loop {
                let available = guard.ready.get(&destination).map_or(0, VecDeque::len);
                if available > 0 || max == 0 {
                    break;
                }
                let elapsed = start.elapsed();
                if elapsed >= wait {
                    return Ok(Vec::new());
                }
                let (next, _timeout) = condvar
                    .wait_timeout(guard, wait - elapsed)
                    .map_err(|_| QueueError::OperationFailed("queue lock poisoned".to_string()))?;
                guard = next;
            }

            let QueueState { ready, messages } = &mut *guard;
            let mut taken = Vec::new();
            if let Some(queue) = ready.get_mut(&destination) {
                while taken.len() < max {
                    let Some(handle) = queue.pop_front() else {
                        break;
                    };
                    if let Some(message) = messages.get_mut(&handle) {
                        message.in_flight = true;
                        message.receive_count += 1;
                        taken.push((handle, message.receive_count, message.payload.clone()));
                    }
                }
            }
            Ok::<_, QueueError>(taken)
        })
        .await
        .map_err(|e| QueueError::OperationFailed(format!("receive failed: {e}")))??;

        raw.into_iter()
            .map(|(handle, receive_count, payload)| -> Result<QueuedMessage, QueueError> {
                Ok(QueuedMessage {
                    handle,
                    receive_count,
                    envelope: serde_json::from_slice(&payload)?,
                })
            })
            .collect()
    }

    async fn ack(&self, handle: MessageHandle) -> Result<(), QueueError> {
        let mut state = lock(&self.state)?;
        let in_flight = state.messages.get(&handle).is_some_and(|m| m.in_flight);
        if !in_flight {
            return Err(QueueError::UnknownHandle(handle));
        }
        state.messages.remove(&handle);
        Ok(())
    }

    async fn release(&self, handle: MessageHandle) -> Result<(), QueueError> {
        let mut state = lock(&self.state)?;
        let destination = match state.messages.get_mut(&handle) {
            Some(message) if message.in_flight => {
                message.in_flight = false;
                message.destination.clone()
            }
            _ => return Err(QueueError::UnknownHandle(handle)),
        };
        state.ready.entry(destination).or_default().push_back(handle);
        drop(state);

        self.condvar.notify_all();
        Ok(())
    }
}
