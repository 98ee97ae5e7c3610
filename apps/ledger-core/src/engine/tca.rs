//! Transaction Cost Analysis
//! Correlates fills with their orders to measure slippage and latency

use crate::engine::types::{Direction, OrderRecord, TradeRecord};
use crate::observability::metrics::Metrics;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const DEFAULT_ANALYSIS_INTERVAL: u64 = 5;

// =====================================================
// REPORT
// =====================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SummaryStats {
    pub count: usize,
    pub mean: Decimal,
    pub min: Decimal,
    pub max: Decimal,
    pub std_dev: Decimal,
}

impl SummaryStats {
    /// Population statistics; `None` for an empty sample or one whose sums
    /// leave the decimal range.
    pub fn from_samples(samples: &[Decimal]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let n = Decimal::from(samples.len());
        let mean = samples
            .iter()
            .try_fold(Decimal::ZERO, |acc, x| acc.checked_add(*x))?
            .checked_div(n)?;
        let min = samples.iter().copied().min()?;
        let max = samples.iter().copied().max()?;
        let variance = samples
            .iter()
            .try_fold(Decimal::ZERO, |acc, x| {
                let diff = x.checked_sub(mean)?;
                acc.checked_add(diff.checked_mul(diff)?)
            })?
            .checked_div(n)?;
        let std_dev = variance.sqrt().unwrap_or(Decimal::ZERO);

        Some(Self {
            count: samples.len(),
            mean,
            min,
            max,
            std_dev,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TcaSummary {
    pub trade_count: u64,
    pub matched_trades: usize,
    pub slippage: Option<SummaryStats>,
    pub slippage_pct: Option<SummaryStats>,
    pub latency_ms: Option<SummaryStats>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TcaReport {
    InsufficientData { trade_count: u64 },
    Summary(TcaSummary),
}

impl TcaReport {
    pub fn summary(&self) -> Option<&TcaSummary> {
        match self {
            TcaReport::Summary(s) => Some(s),
            TcaReport::InsufficientData { .. } => None,
        }
    }

    /// Human-readable report lines.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec!["=== Transaction Cost Analysis ===".to_string()];
        let summary = match self {
            TcaReport::InsufficientData { trade_count } => {
                lines.push(format!("Insufficient data for analysis ({} trades)", trade_count));
                return lines;
            }
            TcaReport::Summary(s) => s,
        };

        if let Some(s) = summary.slippage {
            lines.push(format!("Slippage ({} trades):", s.count));
            lines.push(format!("  mean: {:.8}", s.mean));
            lines.push(format!("  max: {:.8}", s.max));
            lines.push(format!("  min: {:.8}", s.min));
            lines.push(format!("  std: {:.8}", s.std_dev));
        }
        if let Some(s) = summary.slippage_pct {
            lines.push("Slippage percentage:".to_string());
            lines.push(format!("  mean: {:.6}%", s.mean));
            lines.push(format!("  max: {:.6}%", s.max));
            lines.push(format!("  min: {:.6}%", s.min));
        }
        match summary.latency_ms {
            Some(s) => {
                lines.push(format!("Latency ({} trades):", s.count));
                lines.push(format!("  mean: {:.2}ms", s.mean));
                lines.push(format!("  max: {:.2}ms", s.max));
                lines.push(format!("  min: {:.2}ms", s.min));
            }
            None => lines.push("No latency data".to_string()),
        }
        lines.push(format!("Total trades: {}", summary.trade_count));
        lines
    }
}

impl fmt::Display for TcaReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lines().join("\n"))
    }
}

// =====================================================
// ANALYZER
// =====================================================

#[derive(Debug, Default)]
struct TcaState {
    orders: Vec<OrderRecord>,
    /// First record per order id is the reference.
    order_index: HashMap<String, usize>,
    delivered: HashMap<String, Decimal>,
    trades: Vec<TradeRecord>,
    trade_count: u64,
    last_report: Option<TcaReport>,
}

pub struct TransactionCostAnalyzer {
    state: Mutex<TcaState>,
    analysis_interval: u64,
    metrics: Option<Arc<Metrics>>,
}

impl Default for TransactionCostAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_ANALYSIS_INTERVAL)
    }
}

impl TransactionCostAnalyzer {
    pub fn new(analysis_interval: u64) -> Self {
        Self {
            state: Mutex::new(TcaState::default()),
            analysis_interval: analysis_interval.max(1),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn record_order(
        &self,
        price: Decimal,
        direction: Direction,
        volume: Decimal,
        order_id: &str,
        timestamp: DateTime<Utc>,
    ) {
        let mut state = self.state.lock().await;
        Self::push_order(
            &mut state,
            OrderRecord {
                order_id: order_id.to_string(),
                price,
                direction,
                volume,
                timestamp,
            },
        );
        tracing::debug!(order_id = %order_id, price = %price, direction = %direction, "TCA order recorded");
    }

    /// Record a fill. Returns the report when this trade hits the analysis interval.
    pub async fn record_trade(
        &self,
        price: Decimal,
        direction: Direction,
        volume: Decimal,
        order_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Option<TcaReport> {
        let trade = TradeRecord {
            order_id: order_id.to_string(),
            price,
            direction,
            volume,
            timestamp,
        };

        let mut state = self.state.lock().await;

        if !state.order_index.contains_key(order_id) {
            tracing::info!(order_id = %order_id, "TCA synthesizing reference order for unmatched trade");
            Self::push_order(&mut state, OrderRecord::from(&trade));
            if let Some(ref metrics) = self.metrics {
                metrics.tca_synthetic_orders_total.inc();
            }
        }

        let delivered = {
            let total = state.delivered.entry(order_id.to_string()).or_insert(Decimal::ZERO);
            *total = total.saturating_add(volume);
            *total
        };
        let ordered = state.order_index.get(order_id).map(|&i| state.orders[i].volume);
        if let Some(ordered) = ordered {
            if delivered > ordered {
                tracing::warn!(
                    order_id = %order_id,
                    ordered = %ordered,
                    delivered = %delivered,
                    "Fills exceed order volume"
                );
                if let Some(ref metrics) = self.metrics {
                    metrics.tca_overfills_total.inc();
                }
            }
        }

        state.trades.push(trade);
        state.trade_count += 1;
        if let Some(ref metrics) = self.metrics {
            metrics.tca_trades_total.inc();
        }
        tracing::debug!(order_id = %order_id, price = %price, direction = %direction, "TCA trade recorded");

        if state.trade_count % self.analysis_interval == 0 {
            let report = self.analyze_locked(&mut state);
            return Some(report);
        }
        None
    }

    /// Compute the report over every matched trade since creation.
    pub async fn analyze(&self) -> TcaReport {
        let mut state = self.state.lock().await;
        self.analyze_locked(&mut state)
    }

    pub async fn last_report(&self) -> Option<TcaReport> {
        self.state.lock().await.last_report.clone()
    }

    pub async fn trade_count(&self) -> u64 {
        self.state.lock().await.trade_count
    }

    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }

    pub async fn has_order(&self, order_id: &str) -> bool {
        self.state.lock().await.order_index.contains_key(order_id)
    }

    fn push_order(state: &mut TcaState, order: OrderRecord) {
        let index = state.orders.len();
        state.order_index.entry(order.order_id.clone()).or_insert(index);
        state.orders.push(order);
    }

    fn analyze_locked(&self, state: &mut TcaState) -> TcaReport {
        if state.trades.is_empty() {
            let report = TcaReport::InsufficientData {
                trade_count: state.trade_count,
            };
            tracing::info!("{}", report);
            state.last_report = Some(report.clone());
            return report;
        }

        let mut slippage = Vec::with_capacity(state.trades.len());
        let mut slippage_pct = Vec::with_capacity(state.trades.len());
        let mut latency_ms = Vec::with_capacity(state.trades.len());

        for trade in &state.trades {
            let Some(order) = state.order_index.get(&trade.order_id).map(|&i| &state.orders[i]) else {
                continue;
            };

            let s = match trade.direction {
                Direction::Long => trade.price.checked_sub(order.price),
                Direction::Short => order.price.checked_sub(trade.price),
            };
            let Some(s) = s else {
                tracing::warn!(
                    order_id = %trade.order_id,
                    order_price = %order.price,
                    trade_price = %trade.price,
                    "Slippage out of decimal range, trade skipped"
                );
                continue;
            };
            slippage.push(s);

            if order.price > Decimal::ZERO {
                if let Some(pct) = s.checked_div(order.price).and_then(|r| r.checked_mul(dec!(100))) {
                    slippage_pct.push(pct);
                }
            }

            let delay = trade.timestamp - order.timestamp;
            latency_ms.push(Decimal::from(delay.num_milliseconds()));
        }

        let summary = TcaSummary {
            trade_count: state.trade_count,
            matched_trades: slippage.len(),
            slippage: SummaryStats::from_samples(&slippage),
            slippage_pct: SummaryStats::from_samples(&slippage_pct),
            latency_ms: SummaryStats::from_samples(&latency_ms),
            generated_at: Utc::now(),
        };

        self.export(&summary);
        let report = TcaReport::Summary(summary);
        for line in report.lines() {
            tracing::info!(target: "ledger_core::tca", "{}", line);
        }
        state.last_report = Some(report.clone());
        report
    }

    fn export(&self, summary: &TcaSummary) {
        let Some(ref metrics) = self.metrics else {
            return;
        };
        let series = [
            ("slippage", summary.slippage),
            ("slippage_pct", summary.slippage_pct),
            ("latency_ms", summary.latency_ms),
        ];
        for (metric, stats) in series {
            if let Some(stats) = stats {
                for (stat, value) in [
                    ("mean", stats.mean),
                    ("min", stats.min),
                    ("max", stats.max),
                    ("std", stats.std_dev),
                ] {
                    metrics
                        .tca_summary
                        .with_label_values(&[metric, stat])
                        .set(value.to_f64().unwrap_or_default());
                }
            }
        }
    }
}
