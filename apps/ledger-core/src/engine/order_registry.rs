//! Order Registry
//! In-flight order ownership, active set and lifecycle tracking (in-memory only)

use crate::engine::types::OrderStatus;
use crate::observability::metrics::Metrics;

use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq)]
pub struct OrderEntry {
    pub strategy: String,
    pub status: OrderStatus,
    pub fills: u32,
    /// Funds frozen for this order that no fill has consumed yet.
    pub reserved: Decimal,
    /// Fill notional not covered by a reservation, netted by the next `reserve`.
    pub unreserved_fills: Decimal,
}

/// Upper bound on ids remembered from events that beat their registration.
pub const EARLY_ACTIVITY_CAPACITY: usize = 1024;

/// Fills and statuses received for an id the registry does not know yet.
/// The exchange may report on an order before `submit_order` has returned.
#[derive(Debug, Default, Clone)]
struct EarlyActivity {
    fills: u32,
    consumed: Decimal,
    status: Option<OrderStatus>,
}

#[derive(Debug, Default)]
struct RegistryState {
    orders: HashMap<String, OrderEntry>,
    by_strategy: HashMap<String, HashSet<String>>,
    active: HashSet<String>,
    early: HashMap<String, EarlyActivity>,
    early_order: VecDeque<String>,
}

impl RegistryState {
    fn early_entry(&mut self, order_id: &str) -> &mut EarlyActivity {
        if !self.early.contains_key(order_id) {
            if self.early_order.len() >= EARLY_ACTIVITY_CAPACITY {
                if let Some(evicted) = self.early_order.pop_front() {
                    self.early.remove(&evicted);
                }
            }
            self.early_order.push_back(order_id.to_string());
        }
        self.early.entry(order_id.to_string()).or_default()
    }

    fn take_early(&mut self, order_id: &str) -> Option<EarlyActivity> {
        let activity = self.early.remove(order_id)?;
        self.early_order.retain(|id| id != order_id);
        Some(activity)
    }
}

pub struct OrderRegistry {
    state: RwLock<RegistryState>,
    metrics: Option<Arc<Metrics>>,
}

impl Default for OrderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderRegistry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Track a freshly submitted order as owned by `strategy`. Fills and a
    /// terminal status that arrived before registration are applied here, so
    /// an order that already finished never enters the active set.
    pub async fn register_order(&self, order_id: &str, strategy: &str) {
        let mut state = self.state.write().await;

        if let Some(existing) = state.orders.get(order_id) {
            if existing.strategy != strategy {
                tracing::warn!(
                    order_id = %order_id,
                    owner = %existing.strategy,
                    claimed_by = %strategy,
                    "Order already registered to another strategy"
                );
            }
            return;
        }

        let early = state.take_early(order_id).unwrap_or_default();
        let status = match early.status {
            Some(status) => status,
            None if early.fills > 0 => OrderStatus::PartiallyFilled,
            None => OrderStatus::Submitted,
        };

        state.orders.insert(
            order_id.to_string(),
            OrderEntry {
                strategy: strategy.to_string(),
                status,
                fills: early.fills,
                reserved: Decimal::ZERO,
                unreserved_fills: early.consumed,
            },
        );
        state
            .by_strategy
            .entry(strategy.to_string())
            .or_default()
            .insert(order_id.to_string());

        if status.is_terminal() {
            tracing::info!(
                order_id = %order_id,
                strategy = %strategy,
                status = %status,
                fills = early.fills,
                "Order finished before registration"
            );
        } else {
            state.active.insert(order_id.to_string());
            tracing::debug!(order_id = %order_id, strategy = %strategy, "Order registered");
        }
        self.update_gauge(&state);
    }

    /// Remember the funds frozen on behalf of `order_id`, net of fills already
    /// seen. Returns the part the caller must release right away: all of it for
    /// an unknown order, the unconsumed rest for an order already terminal.
    pub async fn reserve(&self, order_id: &str, amount: Decimal) -> Option<Decimal> {
        let mut state = self.state.write().await;
        let Some(entry) = state.orders.get_mut(order_id) else {
            tracing::warn!(order_id = %order_id, amount = %amount, "Reservation for unregistered order");
            return Some(amount).filter(|a| !a.is_zero());
        };

        let consumed = std::mem::take(&mut entry.unreserved_fills);
        let outstanding = (amount - consumed).max(Decimal::ZERO);

        if entry.status.is_terminal() {
            tracing::info!(
                order_id = %order_id,
                status = %entry.status,
                released = %outstanding,
                "Reservation for finished order returned"
            );
            return Some(outstanding).filter(|a| !a.is_zero());
        }

        entry.reserved += outstanding;
        None
    }

    /// A fill arrived: advance to `PartiallyFilled` and consume up to
    /// `notional` of the reservation.
    pub async fn on_fill(&self, order_id: &str, notional: Decimal) {
        let mut state = self.state.write().await;
        match state.orders.get_mut(order_id) {
            Some(entry) => {
                entry.fills += 1;
                let covered = notional.min(entry.reserved);
                entry.reserved -= covered;
                entry.unreserved_fills += notional - covered;
                if entry.status == OrderStatus::Submitted {
                    entry.status = OrderStatus::PartiallyFilled;
                }
            }
            None => {
                let early = state.early_entry(order_id);
                early.fills += 1;
                early.consumed += notional;
            }
        }
    }

    /// Apply a status update. On a terminal status the order leaves the
    /// active set and the unconsumed reservation is returned for release.
    pub async fn on_order_status(&self, order_id: &str, status: OrderStatus) -> Option<Decimal> {
        if let Some(ref metrics) = self.metrics {
            metrics.order_status_total.with_label_values(&[&status.to_string()]).inc();
        }

        let mut state = self.state.write().await;

        let released = match state.orders.get_mut(order_id) {
            Some(entry) if entry.status.is_terminal() => {
                if entry.status != status {
                    tracing::warn!(
                        order_id = %order_id,
                        current = %entry.status,
                        received = %status,
                        "Ignoring status update for terminal order"
                    );
                }
                return None;
            }
            Some(entry) => {
                entry.status = status;
                if status.is_terminal() {
                    Some(std::mem::take(&mut entry.reserved))
                } else {
                    None
                }
            }
            None => {
                let early = state.early_entry(order_id);
                if !early.status.is_some_and(|s| s.is_terminal()) {
                    early.status = Some(status);
                }
                None
            }
        };

        if status.is_terminal() && state.active.remove(order_id) {
            tracing::info!(order_id = %order_id, status = %status, "Order no longer active");
            self.update_gauge(&state);
        }

        released.filter(|amount| !amount.is_zero())
    }

    pub async fn owner_of(&self, order_id: &str) -> Option<String> {
        self.state
            .read()
            .await
            .orders
            .get(order_id)
            .map(|e| e.strategy.clone())
    }

    pub async fn status_of(&self, order_id: &str) -> Option<OrderStatus> {
        self.state.read().await.orders.get(order_id).map(|e| e.status)
    }

    pub async fn entry(&self, order_id: &str) -> Option<OrderEntry> {
        self.state.read().await.orders.get(order_id).cloned()
    }

    pub async fn is_active(&self, order_id: &str) -> bool {
        self.state.read().await.active.contains(order_id)
    }

    pub async fn active_orders(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.read().await.active.iter().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn active_count(&self) -> usize {
        self.state.read().await.active.len()
    }

    pub async fn orders_for(&self, strategy: &str) -> Vec<String> {
        let state = self.state.read().await;
        let mut ids: Vec<String> = state
            .by_strategy
            .get(strategy)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    fn update_gauge(&self, state: &RegistryState) {
        if let Some(ref metrics) = self.metrics {
            metrics.active_orders.set(state.active.len() as i64);
        }
    }
}
