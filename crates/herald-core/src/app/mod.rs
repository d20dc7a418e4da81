//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせて配送パイプラインを実装します。
//!
//! # 主要コンポーネント
//! - **Sender**: envelope の作成（UNSENT で保存）
//! - **Dispatcher**: 送信時刻を過ぎた envelope をキューへ（→ DELIVERING）
//! - **Deliverer**: 1 通の配送（→ SENT / FAILED）
//! - **BatchConsumer**: キューから受け取って Deliverer に渡す
//! - **TemplateRegistry**: 使用する template の登録と bootstrap
//! - **AppBuilder**: ワイヤリングと起動時検証
//! - **LiveRuntime**: 開発用にすべてをプロセス内で動かす

pub mod builder;
pub mod consumer;
pub mod deliverer;
pub mod dispatcher;
pub mod live;
pub mod registry;
pub mod sender;

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::consumer::{BatchConsumer, BatchReport};
pub use self::deliverer::{Deliverer, DeliveryError, DeliveryOutcome};
pub use self::dispatcher::{Dispatcher, SweepReport};
pub use self::live::LiveRuntime;
pub use self::registry::{RegisteredTemplate, RegistryError, TemplateRegistry};
pub use self::sender::{SendError, SendRequest, Sender};
