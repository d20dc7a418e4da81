//! herald-core
//!
//! Scheduled, templated notification delivery with at-most-once sends.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, envelope, status, template, tenant, metric, errors）
//! - **ports**: 抽象化レイヤー（EnvelopeStore, DeliveryQueue, QueueConsumer, Provider, MetricsSink, Clock, IdGenerator）
//! - **render**: template の描画（Tera）
//! - **app**: アプリケーションロジック（sender, dispatcher, deliverer, consumer, registry, builder, live）
//! - **impls**: 実装（InMemoryStore, InMemoryDeliveryQueue など開発用）
//! - **config**: 実行時設定
//!
//! # Envelope の流れ
//! ```text
//! Sender ──► store (UNSENT)
//!              │ Dispatcher sweep
//!              ▼
//!            queue ──► BatchConsumer ──► Deliverer ──► store (SENT | FAILED)
//! ```

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod render;

#[cfg(test)]
pub(crate) mod test_support;

pub use self::config::{ConfigError, HeraldConfig};
