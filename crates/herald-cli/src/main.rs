//! herald live-mode demo
//!
//! Registers a demo template, schedules one message and runs the whole
//! pipeline in-process until the message is settled (or Ctrl-C).
//!
//! ```text
//! RUST_LOG=debug cargo run -p herald-cli
//! ```

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use herald_core::HeraldConfig;
use herald_core::app::{AppBuilder, RegisteredTemplate, TemplateRegistry};
use herald_core::domain::{EnvelopeId, EnvelopeStatus, TemplateVariables};
use herald_core::impls::{InMemoryDeliveryQueue, InMemoryStore, LoggingMetrics, LoggingProvider};
use herald_core::ports::MetricsSink;

/// Variables of the demo template.
#[derive(Serialize)]
struct Welcome {
    name: String,
    items: Vec<String>,
}

impl TemplateVariables for Welcome {
    const TEMPLATE_ID: &'static str = "demo.welcome";
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = HeraldConfig::from_env()?;
    info!(destination = %config.destination, "starting herald live mode");

    // (A) store / queue / provider を用意
    let store = Arc::new(InMemoryStore::new());
    let queue = Arc::new(InMemoryDeliveryQueue::new());
    let metrics: Arc<dyn MetricsSink> = Arc::new(LoggingMetrics::new("herald-demo"));
    let provider = Arc::new(LoggingProvider::new());

    // (B) template を登録（base template がなければ作られる）
    let mut registry = TemplateRegistry::new();
    registry
        .register(
            &*store,
            "Demo",
            RegisteredTemplate::new(
                Welcome::TEMPLATE_ID,
                "Welcome aboard, {{ name }}!",
                "<h1>Hello {{ name }}</h1>\n<ul>\n{% for item in items %}  <li>{{ item }}</li>\n{% endfor %}</ul>",
            )
            .with_from("demo@herald.local", "Herald Demo"),
        )
        .await?;

    let app = AppBuilder::new("herald-demo", store.clone(), queue, provider)
        .metrics(metrics)
        .config(config)
        .templates(registry)
        .expect_templates(&[Welcome::TEMPLATE_ID])
        .build()?;

    // (C) メッセージ投入
    let welcome = Welcome {
        name: "Blahaj".to_string(),
        items: ["a soft shark", "a blue shark", "a big shark"]
            .map(String::from)
            .to_vec(),
    };
    let id = app
        .sender
        .send_typed(
            "Blahaj <blahaj@example.com>",
            &welcome,
            Some(Utc::now().fixed_offset()),
        )
        .await?;
    info!(envelope_id = %id, "demo message scheduled");

    // (D) dispatcher / consumer を起動して、決着がつくまで待つ
    let runtime = app.start_live();
    runtime.nudge();

    let settled = tokio::select! {
        status = wait_until_settled(&store, id) => Some(status),
        _ = tokio::signal::ctrl_c() => None,
    };
    runtime.shutdown_and_join().await;

    match settled {
        Some(EnvelopeStatus::Sent) => info!(envelope_id = %id, "demo message sent"),
        Some(status) => warn!(envelope_id = %id, %status, "demo message did not go out"),
        None => info!("interrupted"),
    }
    Ok(())
}

/// Poll the store until the envelope is SENT or FAILED.
async fn wait_until_settled(store: &InMemoryStore, id: EnvelopeId) -> EnvelopeStatus {
    loop {
        if let Some(status @ (EnvelopeStatus::Sent | EnvelopeStatus::Failed)) =
            store.status_of(id).await
        {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
