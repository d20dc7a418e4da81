//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryStore**: envelope/template store
//! - **InMemoryDeliveryQueue**: publish + consume queue
//! - **LoggingProvider** / **RecordingProvider**: providers without a transport
//! - **LoggingMetrics** / **NoopMetrics**: metrics sinks
//!
//! Production adapters (a real key-value store, broker, mail transport) live
//! outside this crate and implement the same ports.

pub mod inmem_delivery;
pub mod inmem_store;
pub mod logging_metrics;
pub mod logging_provider;
pub mod recording_provider;

pub use self::inmem_delivery::InMemoryDeliveryQueue;
pub use self::inmem_store::InMemoryStore;
pub use self::logging_metrics::{LoggingMetrics, NoopMetrics};
pub use self::logging_provider::LoggingProvider;
pub use self::recording_provider::{RecordingProvider, SentMessage};
