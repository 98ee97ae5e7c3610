//! Event Dispatcher
//! Routes exchange events to the ledger, order registry and TCA, in arrival order

use crate::engine::ledger::{Ledger, LedgerError};
use crate::engine::order_registry::OrderRegistry;
use crate::engine::tca::{TcaReport, TransactionCostAnalyzer};
use crate::engine::types::Direction;
use crate::events::{ExchangeEvent, OrderEvent, StatusEvent, TradeEvent, TradeRejection};
use crate::observability::metrics::Metrics;

use rust_decimal::Decimal;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Trade ids remembered for redelivery detection.
pub const DEFAULT_DEDUP_WINDOW: usize = 10_000;

/// What a single dispatch did.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    OrderRecorded,
    TradeApplied { report: Option<TcaReport> },
    DuplicateTrade,
    TradeRejected { reason: TradeRejection },
    StatusApplied { released: Option<Decimal> },
}

/// Most recent trade ids, oldest evicted first.
#[derive(Debug)]
struct TradeWindow {
    ids: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl TradeWindow {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ids: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// False when `trade_id` is already in the window.
    fn insert(&mut self, trade_id: &str) -> bool {
        if self.ids.contains(trade_id) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.ids.insert(trade_id.to_string());
        self.order.push_back(trade_id.to_string());
        true
    }
}

pub struct EventDispatcher {
    ledger: Arc<Ledger>,
    registry: Arc<OrderRegistry>,
    tca: Arc<TransactionCostAnalyzer>,
    seen_trades: Mutex<TradeWindow>,
    metrics: Option<Arc<Metrics>>,
}

impl EventDispatcher {
    pub fn new(
        ledger: Arc<Ledger>,
        registry: Arc<OrderRegistry>,
        tca: Arc<TransactionCostAnalyzer>,
    ) -> Self {
        Self {
            ledger,
            registry,
            tca,
            seen_trades: Mutex::new(TradeWindow::new(DEFAULT_DEDUP_WINDOW)),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Number of trade ids kept for duplicate detection.
    pub fn with_dedup_window(mut self, capacity: usize) -> Self {
        self.seen_trades = Mutex::new(TradeWindow::new(capacity));
        self
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn registry(&self) -> &Arc<OrderRegistry> {
        &self.registry
    }

    pub fn tca(&self) -> &Arc<TransactionCostAnalyzer> {
        &self.tca
    }

    /// Handle one event to completion before the caller delivers the next.
    pub async fn dispatch(&self, event: ExchangeEvent) -> DispatchOutcome {
        tracing::debug!(kind = event.kind(), order_id = %event.order_id(), "Dispatching event");
        match event {
            ExchangeEvent::Order(order) => self.on_order(order).await,
            ExchangeEvent::Trade(trade) => self.on_trade(trade).await,
            ExchangeEvent::Status(status) => self.on_status(status).await,
        }
    }

    async fn on_order(&self, order: OrderEvent) -> DispatchOutcome {
        self.tca
            .record_order(order.price, order.direction, order.volume, &order.order_id, order.timestamp)
            .await;
        DispatchOutcome::OrderRecorded
    }

    async fn on_trade(&self, trade: TradeEvent) -> DispatchOutcome {
        let notional = match trade.validate() {
            Ok(notional) => notional,
            Err(reason) => {
                tracing::error!(
                    trade_id = ?trade.trade_id,
                    order_id = %trade.order_id,
                    symbol = %trade.symbol,
                    price = %trade.price,
                    volume = %trade.volume,
                    reason = %reason,
                    "Rejecting trade event"
                );
                if let Some(ref metrics) = self.metrics {
                    metrics
                        .rejected_trades_total
                        .with_label_values(&["dispatcher", reason.as_str()])
                        .inc();
                }
                return DispatchOutcome::TradeRejected { reason };
            }
        };

        if let Some(ref trade_id) = trade.trade_id {
            let mut seen = self.seen_trades.lock().await;
            if !seen.insert(trade_id) {
                tracing::warn!(trade_id = %trade_id, order_id = %trade.order_id, "Duplicate trade event skipped");
                if let Some(ref metrics) = self.metrics {
                    metrics.duplicate_events_total.with_label_values(&["trade"]).inc();
                }
                return DispatchOutcome::DuplicateTrade;
            }
        }

        if let Err(e) = self.ledger.apply_trade(&trade).await {
            let reason = match e {
                LedgerError::InvalidTrade(reason) => reason,
                _ => TradeRejection::Overflow,
            };
            return DispatchOutcome::TradeRejected { reason };
        }

        let consumed = match trade.direction {
            Direction::Long => notional,
            Direction::Short => Decimal::ZERO,
        };
        self.registry.on_fill(&trade.order_id, consumed).await;

        let report = self
            .tca
            .record_trade(trade.price, trade.direction, trade.volume, &trade.order_id, trade.timestamp)
            .await;

        if let Some(owner) = self.registry.owner_of(&trade.order_id).await {
            tracing::info!(
                strategy = %owner,
                order_id = %trade.order_id,
                symbol = %trade.symbol,
                price = %trade.price,
                volume = %trade.volume,
                "Trade confirmed"
            );
        }

        DispatchOutcome::TradeApplied { report }
    }

    async fn on_status(&self, status: StatusEvent) -> DispatchOutcome {
        let released = self
            .registry
            .on_order_status(&status.order_id, status.status)
            .await;

        if let Some(amount) = released {
            tracing::info!(
                order_id = %status.order_id,
                status = %status.status,
                amount = %amount,
                "Releasing unused reservation"
            );
            self.ledger.unfreeze_funds(amount).await;
        }

        DispatchOutcome::StatusApplied { released }
    }
}
