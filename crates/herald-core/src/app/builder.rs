//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 開発体験の改善（明確なエラーメッセージ）

use chrono::TimeDelta;
use std::sync::Arc;
use tracing::info;

use crate::config::HeraldConfig;
use crate::impls::NoopMetrics;
use crate::ports::{
    Clock, DeliveryQueue, EnvelopeStore, IdGenerator, MetricsSink, Provider, QueueConsumer,
    StoreError, SystemClock, UlidGenerator,
};

use super::consumer::BatchConsumer;
use super::deliverer::Deliverer;
use super::dispatcher::{Dispatcher, SweepReport};
use super::live::LiveRuntime;
use super::registry::TemplateRegistry;
use super::sender::Sender;

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new("billing", store, queue, provider)
///     .config(HeraldConfig::from_env()?)
///     .templates(registry)
///     .expect_templates(&["welcome"])
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - expect_templates() で使う予定の template id を宣言
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
/// - 設定値の矛盾もここで弾く
pub struct AppBuilder {
    app_id: String,
    store: Arc<dyn EnvelopeStore>,
    publisher: Arc<dyn DeliveryQueue>,
    receiver: Arc<dyn QueueConsumer>,
    provider: Arc<dyn Provider>,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    metrics: Arc<dyn MetricsSink>,
    config: HeraldConfig,
    registry: TemplateRegistry,
    expected_templates: Option<Vec<String>>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing templates: {0:?}. These templates were expected but not registered.")]
    MissingTemplates(Vec<String>),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AppBuilder {
    /// Store, queue and provider have no sensible default and are required.
    pub fn new<Q>(
        app_id: impl Into<String>,
        store: Arc<dyn EnvelopeStore>,
        queue: Arc<Q>,
        provider: Arc<dyn Provider>,
    ) -> Self
    where
        Q: DeliveryQueue + QueueConsumer + 'static,
    {
        Self {
            app_id: app_id.into(),
            store,
            publisher: queue.clone(),
            receiver: queue,
            provider,
            clock: Arc::new(SystemClock),
            ids: None,
            metrics: Arc::new(NoopMetrics),
            config: HeraldConfig::default(),
            registry: TemplateRegistry::new(),
            expected_templates: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Defaults to a ULID generator on the builder's clock.
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(mut self, config: HeraldConfig) -> Self {
        self.config = config;
        self
    }

    pub fn templates(mut self, registry: TemplateRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// 期待される template id のリストを設定
    pub fn expect_templates(mut self, template_ids: &[&str]) -> Self {
        self.expected_templates = Some(template_ids.iter().map(|id| id.to_string()).collect());
        self
    }

    /// AppBuilder を構築して App を生成
    ///
    /// # 検証
    /// - expect_templates() の id が全て registry にあるか
    /// - batch_size / max_receives が 0 でないか
    /// - sweep_budget が sweep_interval を超えていないか
    pub fn build(self) -> Result<App, BuildError> {
        if let Some(expected) = &self.expected_templates {
            let missing: Vec<String> = expected
                .iter()
                .filter(|id| !self.registry.contains(id))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTemplates(missing));
            }
        }
        validate(&self.config)?;

        let config = self.config;
        let clock = self.clock;
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&self.store),
            self.publisher,
            Arc::clone(&clock),
            config.destination.clone(),
        ));
        let deliverer = Arc::new(
            Deliverer::new(Arc::clone(&self.store), self.provider, Arc::clone(&clock))
                .with_item_timeout(config.item_timeout)
                .with_schedule_tolerance(config.schedule_tolerance)
                .with_metrics(Arc::clone(&self.metrics)),
        );
        let consumer = Arc::new(
            BatchConsumer::new(self.receiver, Arc::clone(&deliverer), config.destination.clone())
                .with_batch_size(config.batch_size)
                .with_max_receives(config.max_receives)
                .with_receive_wait(config.receive_wait),
        );
        info!(
            app_id = %self.app_id,
            provider = deliverer.provider_name(),
            destination = %config.destination,
            templates = self.registry.len(),
            "app built"
        );
        let sender = Sender::new(
            self.app_id,
            self.store,
            ids,
            Arc::clone(&clock),
            self.metrics,
        );

        Ok(App {
            dispatcher,
            deliverer,
            consumer,
            sender,
            registry: self.registry,
            config,
            clock,
        })
    }
}

fn validate(config: &HeraldConfig) -> Result<(), BuildError> {
    if config.batch_size == 0 {
        return Err(BuildError::InvalidConfig("batch_size must be at least 1".into()));
    }
    if config.max_receives == 0 {
        return Err(BuildError::InvalidConfig("max_receives must be at least 1".into()));
    }
    if config.sweep_budget > config.sweep_interval {
        return Err(BuildError::InvalidConfig(format!(
            "sweep_budget {:?} exceeds sweep_interval {:?}",
            config.sweep_budget, config.sweep_interval
        )));
    }
    Ok(())
}

/// App は構築済みのパイプライン
///
/// Components share only the store and the queue.
pub struct App {
    pub dispatcher: Arc<Dispatcher>,
    pub deliverer: Arc<Deliverer>,
    pub consumer: Arc<BatchConsumer>,
    pub sender: Sender,
    pub registry: TemplateRegistry,
    pub config: HeraldConfig,
    clock: Arc<dyn Clock>,
}

impl App {
    /// One sweep as of now, with `sweep_budget` as its deadline.
    pub async fn sweep_once(&self) -> Result<SweepReport, StoreError> {
        let now = self.clock.now();
        let budget = TimeDelta::from_std(self.config.sweep_budget).unwrap_or(TimeDelta::MAX);
        let deadline = now.checked_add_signed(budget).unwrap_or(now);
        self.dispatcher.run_sweep(deadline, now).await
    }

    /// Run the dispatch and consume loops in the background.
    pub fn start_live(&self) -> LiveRuntime {
        LiveRuntime::start(
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.consumer),
            Arc::clone(&self.clock),
            &self.config,
        )
    }
}
