//! Strategy Module
//! Capability interface for strategies and the polling decision loop

pub mod context;
pub mod gateway;
pub mod nats_gateway;

pub use context::{OrderError, TradingContext};
pub use gateway::{GatewayError, OrderGateway, OrderRequest, OrderResponse};
pub use nats_gateway::NatsOrderGateway;

use crate::config::MIN_POLL_INTERVAL;
use crate::engine::ledger::LedgerSnapshot;
use crate::observability::metrics::Metrics;
use crate::shutdown::Shutdown;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Decision logic plugged into the runner. Strategies only see the
/// [`TradingContext`], never the gateway or ledger internals directly.
#[async_trait]
pub trait Strategy: Send {
    fn name(&self) -> &str;

    async fn on_start(&mut self, _ctx: &TradingContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_poll(&mut self, snapshot: &LedgerSnapshot, ctx: &TradingContext) -> anyhow::Result<()>;

    async fn on_stop(&mut self, _ctx: &TradingContext) {}
}

pub struct StrategyRunner {
    ctx: TradingContext,
    strategies: Vec<Box<dyn Strategy>>,
    poll_interval: Duration,
    report_every: u64,
    metrics: Option<Arc<Metrics>>,
}

impl StrategyRunner {
    pub fn new(ctx: TradingContext, poll_interval: Duration) -> Self {
        Self {
            ctx,
            strategies: Vec::new(),
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
            report_every: 300,
            metrics: None,
        }
    }

    pub fn with_strategy(mut self, strategy: Box<dyn Strategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Log a position report every `n` iterations (0 disables).
    pub fn with_report_every(mut self, n: u64) -> Self {
        self.report_every = n;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Poll until `shutdown` fires. An iteration in progress always completes.
    /// Returns the number of completed iterations.
    pub async fn run(mut self, mut shutdown: Shutdown) -> u64 {
        for strategy in self.strategies.iter_mut() {
            if let Err(e) = strategy.on_start(&self.ctx).await {
                tracing::error!(strategy = %strategy.name(), error = %e, "Strategy failed to start");
            }
        }

        tracing::info!(
            strategies = self.strategies.len(),
            interval_ms = self.poll_interval.as_millis() as u64,
            "Strategy loop started"
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut iterations: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {}
            }

            let snapshot = self.ctx.snapshot().await;
            for strategy in self.strategies.iter_mut() {
                if let Err(e) = strategy.on_poll(&snapshot, &self.ctx).await {
                    tracing::error!(strategy = %strategy.name(), error = %e, "Strategy iteration failed");
                }
            }

            iterations += 1;
            if let Some(ref metrics) = self.metrics {
                metrics.strategy_iterations_total.inc();
            }
            if self.report_every > 0 && iterations % self.report_every == 0 {
                report_positions(&snapshot);
            }
        }

        for strategy in self.strategies.iter_mut() {
            strategy.on_stop(&self.ctx).await;
        }
        tracing::info!(iterations = iterations, "Strategy loop stopped");
        iterations
    }
}

fn report_positions(snapshot: &LedgerSnapshot) {
    if snapshot.positions.is_empty() {
        tracing::info!(balance = %snapshot.balance, available = %snapshot.available, "No open positions");
        return;
    }
    for (symbol, position) in &snapshot.positions {
        tracing::info!(
            symbol = %symbol,
            direction = ?position.direction,
            volume = %position.volume,
            avg_price = %position.avg_price,
            "Open position"
        );
    }
    tracing::info!(
        balance = %snapshot.balance,
        frozen = %snapshot.frozen,
        available = %snapshot.available,
        "Account"
    );
}
