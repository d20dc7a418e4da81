//! LiveRuntime - dispatcher と consumer をプロセス内で動かす（開発用）
//!
//! # 設計
//! - dispatch loop: sweep_interval ごと、または nudge() で即座に sweep
//! - consume loop: run_once() を繰り返す
//! - `watch` channel で shutdown を通知。実行中の sweep / batch は最後まで走る

use chrono::TimeDelta;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::HeraldConfig;
use crate::ports::Clock;

use super::consumer::BatchConsumer;
use super::dispatcher::Dispatcher;

/// Handle to the background loops.
/// - `shutdown_and_join()` で両方のループの終了を待てる
pub struct LiveRuntime {
    shutdown_tx: watch::Sender<bool>,
    nudge: Arc<Notify>,
    joins: Vec<JoinHandle<()>>,
}

impl LiveRuntime {
    pub fn start(
        dispatcher: Arc<Dispatcher>,
        consumer: Arc<BatchConsumer>,
        clock: Arc<dyn Clock>,
        config: &HeraldConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let nudge = Arc::new(Notify::new());

        let dispatch = tokio::spawn(dispatch_loop(
            dispatcher,
            clock,
            config.sweep_interval,
            config.sweep_budget,
            Arc::clone(&nudge),
            shutdown_rx.clone(),
        ));
        let consume = tokio::spawn(consume_loop(consumer, shutdown_rx));
        info!("live runtime started");

        Self {
            shutdown_tx,
            nudge,
            joins: vec![dispatch, consume],
        }
    }

    /// Run a sweep now instead of waiting for the next interval.
    pub fn nudge(&self) {
        self.nudge.notify_one();
    }

    /// Stop taking new work. In-flight sweeps and batches finish.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Dropping the runtime without this also stops the loops, without
    /// waiting for them.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                error!(error = %e, "live loop panicked");
            }
        }
        info!("live runtime stopped");
    }
}

async fn dispatch_loop(
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    budget: Duration,
    nudge: Arc<Notify>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let budget = TimeDelta::from_std(budget).unwrap_or(TimeDelta::MAX);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
            _ = nudge.notified() => debug!("sweep nudged"),
        }

        let now = clock.now();
        let deadline = now.checked_add_signed(budget).unwrap_or(now);
        if let Err(e) = dispatcher.run_sweep(deadline, now).await {
            error!(error = %e, "dispatch sweep could not start");
        }
    }
}

async fn consume_loop(consumer: Arc<BatchConsumer>, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        let report = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            report = consumer.run_once() => report,
        };

        match report {
            // Released messages are visible again at once; back off so they
            // are not hammered.
            Ok(report) if report.released > 0 => {
                tokio::select! {
                    _ = shutdown_rx.changed() => {}
                    _ = tokio::time::sleep(consumer.receive_wait()) => {}
                }
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "receive failed");
                tokio::select! {
                    _ = shutdown_rx.changed() => {}
                    _ = tokio::time::sleep(consumer.receive_wait()) => {}
                }
            }
        }
    }
}
