//! Ports - 抽象化レイヤー
//!
//! Hexagonal "ports": each trait is the narrow contract the core needs from
//! an external system (key-value store, broker, mail transport, metrics).
//!
//! # 設計原則
//! - The store is the source of truth for envelope status
//! - The queue carries envelope references, at-least-once
//! - The provider is called at most once per committed send

pub mod clock;
pub mod delivery_queue;
pub mod id_generator;
pub mod metrics;
pub mod provider;
pub mod store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::delivery_queue::{DeliveryQueue, QueueConsumer, QueueError, QueuedMessage};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::metrics::MetricsSink;
pub use self::provider::{Provider, ProviderError};
pub use self::store::{EnvelopeStore, EnvelopeStream, StoreError};
