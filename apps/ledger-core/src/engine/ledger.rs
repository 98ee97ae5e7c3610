//! Account Ledger with Weighted Average Position Netting
//! Balance, frozen funds and positions, persisted after every mutation

use crate::engine::ledger_store::{LedgerStore, LoadOutcome};
use crate::engine::types::Direction;
use crate::events::{TradeEvent, TradeRejection};
use crate::observability::metrics::Metrics;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};

// =====================================================
// STATE
// =====================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub balance: Decimal,
    pub frozen: Decimal,
}

impl Account {
    pub fn new(balance: Decimal) -> Self {
        Self {
            balance,
            frozen: Decimal::ZERO,
        }
    }

    pub fn available(&self) -> Decimal {
        self.balance - self.frozen
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub volume: Decimal,
    pub direction: Option<Direction>,
    pub avg_price: Decimal,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = self.direction.map(|d| d.to_string()).unwrap_or_else(|| "NONE".into());
        write!(f, "{}/{}/{}", direction, self.volume, self.avg_price)
    }
}

/// Consistent point-in-time view of the whole ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerSnapshot {
    pub balance: Decimal,
    pub frozen: Decimal,
    pub available: Decimal,
    pub positions: HashMap<String, Position>,
    pub persistence_healthy: bool,
}

#[derive(Debug)]
struct LedgerState {
    account: Account,
    positions: HashMap<String, Position>,
}

// =====================================================
// ERRORS / POLICY
// =====================================================

#[derive(Debug, Error, PartialEq)]
pub enum LedgerError {
    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: Decimal, available: Decimal },

    #[error("insufficient position in {symbol}: requested {requested}, held long {held}")]
    InsufficientPosition {
        symbol: String,
        requested: Decimal,
        held: Decimal,
    },

    #[error("invalid amount: {0}")]
    InvalidAmount(Decimal),

    #[error("invalid order: {volume} @ {price}")]
    InvalidOrder { price: Decimal, volume: Decimal },

    #[error("trade rejected: {0}")]
    InvalidTrade(#[from] TradeRejection),
}

/// What a sell is allowed to do to inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellPolicy {
    /// Sells must be covered by an existing LONG position (spot semantics).
    RequireInventory,
    /// Sells may open or extend a SHORT position.
    AllowShort,
}

impl std::str::FromStr for SellPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "require_inventory" => Ok(SellPolicy::RequireInventory),
            "allow_short" => Ok(SellPolicy::AllowShort),
            other => Err(anyhow::anyhow!("unknown sell policy: {}", other)),
        }
    }
}

// =====================================================
// NOTIFICATIONS
// =====================================================

/// Structured change record published on the collaborator channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerNotification {
    FundsFrozen {
        amount: Decimal,
        frozen: Decimal,
        available: Decimal,
    },
    FundsReleased {
        amount: Decimal,
        frozen: Decimal,
        available: Decimal,
    },
    BalanceChanged {
        reason: String,
        old_balance: Decimal,
        new_balance: Decimal,
        change: Decimal,
        frozen: Decimal,
        available: Decimal,
    },
    PositionChanged {
        symbol: String,
        before: Option<Position>,
        after: Option<Position>,
    },
}

impl fmt::Display for LedgerNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerNotification::FundsFrozen { amount, frozen, available } => {
                write!(f, "Funds frozen: {} (frozen={}, available={})", amount, frozen, available)
            }
            LedgerNotification::FundsReleased { amount, frozen, available } => {
                write!(f, "Funds released: {} (frozen={}, available={})", amount, frozen, available)
            }
            LedgerNotification::BalanceChanged {
                reason,
                old_balance,
                new_balance,
                change,
                frozen,
                available,
            } => write!(
                f,
                "Balance update - {}: {} -> {} (change: {:+}), frozen={}, available={}",
                reason, old_balance, new_balance, change, frozen, available
            ),
            LedgerNotification::PositionChanged { symbol, before, after } => match (before, after) {
                (None, Some(new)) => write!(f, "Position opened - {}: {}", symbol, new),
                (Some(old), None) => write!(f, "Position closed - {}: was {}", symbol, old),
                (Some(old), Some(new)) => write!(f, "Position update - {}: {} -> {}", symbol, old, new),
                (None, None) => write!(f, "Position unchanged - {}", symbol),
            },
        }
    }
}

// =====================================================
// NETTING
// =====================================================

/// Net a fill into an existing position. Returns `Ok(None)` when the result
/// is flat.
///
/// - no position, or same direction: volume-weighted average price
/// - opposite direction, residual > 0: volume reduced, average unchanged
/// - opposite direction, residual < 0: flips, average reset to the fill price
///
/// Non-positive fills and averages that leave the decimal range are refused.
pub fn net_fill(
    existing: Option<&Position>,
    direction: Direction,
    price: Decimal,
    volume: Decimal,
) -> Result<Option<Position>, TradeRejection> {
    if volume <= Decimal::ZERO {
        return Err(TradeRejection::NonPositiveVolume);
    }
    if price <= Decimal::ZERO {
        return Err(TradeRejection::NonPositivePrice);
    }

    let (old_volume, old_direction, old_price) = match existing {
        Some(p) => (p.volume, p.direction, p.avg_price),
        None => (Decimal::ZERO, None, Decimal::ZERO),
    };

    // Rule 1: opening or increasing
    if old_direction.is_none() || old_direction == Some(direction) || old_volume.is_zero() {
        let new_volume = old_volume.checked_add(volume).ok_or(TradeRejection::Overflow)?;
        let new_avg = old_price
            .checked_mul(old_volume)
            .zip(price.checked_mul(volume))
            .and_then(|(held, filled)| held.checked_add(filled))
            .and_then(|cost| cost.checked_div(new_volume))
            .ok_or(TradeRejection::Overflow)?;
        return Ok(Some(Position {
            volume: new_volume,
            direction: Some(direction),
            avg_price: new_avg,
        }));
    }

    let residual = old_volume - volume;

    // Rule 2: reducing, still on the same side
    if residual > Decimal::ZERO {
        return Ok(Some(Position {
            volume: residual,
            direction: old_direction,
            avg_price: old_price,
        }));
    }

    // Rule 3: closing exactly
    if residual.is_zero() {
        return Ok(None);
    }

    // Rule 4: crossing zero
    Ok(Some(Position {
        volume: residual.abs(),
        direction: Some(direction),
        avg_price: price,
    }))
}

// =====================================================
// LEDGER
// =====================================================

pub struct Ledger {
    store: LedgerStore,
    state: RwLock<LedgerState>,
    persistence_healthy: AtomicBool,
    notifier: Option<broadcast::Sender<LedgerNotification>>,
    metrics: Option<Arc<Metrics>>,
}

impl Ledger {
    /// Load the ledger from `store`, or start from `starting_balance`.
    pub fn load(store: LedgerStore, starting_balance: Decimal) -> Self {
        let loaded = store.load(starting_balance);
        if loaded.outcome == LoadOutcome::Malformed {
            tracing::warn!(
                path = %store.path().display(),
                balance = %starting_balance,
                "Persisted ledger state could not be used, continuing with a fresh account"
            );
        }

        Self {
            store,
            state: RwLock::new(LedgerState {
                account: loaded.account,
                positions: loaded.positions,
            }),
            persistence_healthy: AtomicBool::new(true),
            notifier: None,
            metrics: None,
        }
    }

    pub fn with_notifier(mut self, notifier: broadcast::Sender<LedgerNotification>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    // =====================================================
    // FUNDS
    // =====================================================

    /// Reserve `amount` for a buy order. Fails without mutation when the
    /// available balance does not cover it.
    pub async fn freeze_funds(&self, amount: Decimal) -> Result<(), LedgerError> {
        if amount < Decimal::ZERO {
            self.count_freeze("invalid");
            return Err(LedgerError::InvalidAmount(amount));
        }

        let mut state = self.state.write().await;
        let available = state.account.available();
        if amount > available {
            self.count_freeze("insufficient");
            tracing::warn!(requested = %amount, available = %available, "Insufficient funds to freeze");
            return Err(LedgerError::InsufficientFunds {
                requested: amount,
                available,
            });
        }

        state.account.frozen += amount;
        self.count_freeze("ok");
        self.persist(&state);
        self.notify(LedgerNotification::FundsFrozen {
            amount,
            frozen: state.account.frozen,
            available: state.account.available(),
        });
        tracing::debug!(amount = %amount, frozen = %state.account.frozen, "Funds frozen");
        Ok(())
    }

    /// Release up to `amount` of frozen funds. Never fails.
    pub async fn unfreeze_funds(&self, amount: Decimal) {
        let mut state = self.state.write().await;
        self.release_locked(&mut state, amount);
        self.persist(&state);
    }

    fn release_locked(&self, state: &mut LedgerState, amount: Decimal) {
        if amount < Decimal::ZERO {
            tracing::warn!(amount = %amount, "Ignoring negative unfreeze");
            return;
        }
        let released = amount.min(state.account.frozen);
        state.account.frozen = (state.account.frozen - amount).max(Decimal::ZERO);
        self.notify(LedgerNotification::FundsReleased {
            amount: released,
            frozen: state.account.frozen,
            available: state.account.available(),
        });
    }

    // =====================================================
    // TRADES
    // =====================================================

    /// Apply a fill: move cash, net the position, persist. A fill that is
    /// non-positive or would overflow the balance or average is refused and
    /// leaves the ledger untouched.
    pub async fn apply_trade(&self, trade: &TradeEvent) -> Result<Option<Position>, LedgerError> {
        let notional = trade.validate().map_err(|reason| self.reject_trade(trade, reason))?;
        let mut state = self.state.write().await;

        let before = state.positions.get(&trade.symbol).cloned();
        let after = net_fill(before.as_ref(), trade.direction, trade.price, trade.volume)
            .map_err(|reason| self.reject_trade(trade, reason))?;
        let new_balance = match trade.direction {
            Direction::Long => state.account.balance.checked_sub(notional),
            Direction::Short => state.account.balance.checked_add(notional),
        }
        .ok_or_else(|| self.reject_trade(trade, TradeRejection::Overflow))?;

        tracing::info!(
            symbol = %trade.symbol,
            order_id = %trade.order_id,
            direction = %trade.direction,
            price = %trade.price,
            volume = %trade.volume,
            notional = %notional,
            "Applying trade"
        );

        let old_balance = state.account.balance;
        let reason = match trade.direction {
            Direction::Long => {
                self.release_locked(&mut state, notional);
                format!("buy {}", trade.symbol)
            }
            Direction::Short => {
                if let Some(held) = long_volume(state.positions.get(&trade.symbol)) {
                    if trade.volume > held {
                        tracing::warn!(
                            symbol = %trade.symbol,
                            held = %held,
                            sold = %trade.volume,
                            "Sell exceeds long inventory, position will flip short"
                        );
                    }
                }
                format!("sell {}", trade.symbol)
            }
        };
        state.account.balance = new_balance;

        if state.account.frozen > state.account.balance.max(Decimal::ZERO) {
            tracing::warn!(
                balance = %state.account.balance,
                frozen = %state.account.frozen,
                "Balance fell below reserved funds, clamping frozen"
            );
            state.account.frozen = state.account.balance.max(Decimal::ZERO);
        }
        if state.account.balance < Decimal::ZERO {
            tracing::warn!(balance = %state.account.balance, "Ledger balance is negative");
        }

        match &after {
            Some(position) => {
                state.positions.insert(trade.symbol.clone(), position.clone());
            }
            None => {
                state.positions.remove(&trade.symbol);
            }
        }

        self.persist(&state);

        self.notify(LedgerNotification::BalanceChanged {
            reason,
            old_balance,
            new_balance: state.account.balance,
            change: state.account.balance - old_balance,
            frozen: state.account.frozen,
            available: state.account.available(),
        });
        self.notify(LedgerNotification::PositionChanged {
            symbol: trade.symbol.clone(),
            before,
            after: after.clone(),
        });

        if let Some(ref metrics) = self.metrics {
            metrics
                .trades_applied_total
                .with_label_values(&[&trade.direction.to_string(), &trade.symbol])
                .inc();
        }

        tracing::info!(summary = %position_summary(&state.positions), "Positions");
        Ok(after)
    }

    fn reject_trade(&self, trade: &TradeEvent, reason: TradeRejection) -> LedgerError {
        tracing::error!(
            symbol = %trade.symbol,
            order_id = %trade.order_id,
            direction = %trade.direction,
            price = %trade.price,
            volume = %trade.volume,
            reason = %reason,
            "Trade rejected by ledger"
        );
        if let Some(ref metrics) = self.metrics {
            metrics
                .rejected_trades_total
                .with_label_values(&["ledger", reason.as_str()])
                .inc();
        }
        LedgerError::InvalidTrade(reason)
    }

    // =====================================================
    // READS
    // =====================================================

    pub async fn get_available_balance(&self) -> Decimal {
        self.state.read().await.account.available()
    }

    pub async fn account(&self) -> Account {
        self.state.read().await.account
    }

    /// Copy of all open positions.
    pub async fn get_all_positions(&self) -> HashMap<String, Position> {
        self.state.read().await.positions.clone()
    }

    pub async fn position(&self, symbol: &str) -> Option<Position> {
        self.state.read().await.positions.get(symbol).cloned()
    }

    pub async fn snapshot(&self) -> LedgerSnapshot {
        let state = self.state.read().await;
        LedgerSnapshot {
            balance: state.account.balance,
            frozen: state.account.frozen,
            available: state.account.available(),
            positions: state.positions.clone(),
            persistence_healthy: self.is_persistence_healthy(),
        }
    }

    pub async fn has_enough_balance(&self, amount: Decimal) -> bool {
        self.get_available_balance().await >= amount
    }

    /// True iff a LONG position in `symbol` covers `volume`.
    pub async fn has_position_to_sell(&self, symbol: &str, volume: Decimal) -> bool {
        let state = self.state.read().await;
        long_volume(state.positions.get(symbol)).is_some_and(|held| held >= volume)
    }

    /// Guarded sell precondition, evaluated against the caller's policy.
    pub async fn check_sell(&self, symbol: &str, volume: Decimal, policy: SellPolicy) -> Result<(), LedgerError> {
        if policy == SellPolicy::AllowShort || self.has_position_to_sell(symbol, volume).await {
            return Ok(());
        }
        let held = long_volume(self.state.read().await.positions.get(symbol)).unwrap_or(Decimal::ZERO);
        Err(LedgerError::InsufficientPosition {
            symbol: symbol.to_string(),
            requested: volume,
            held,
        })
    }

    pub fn is_persistence_healthy(&self) -> bool {
        self.persistence_healthy.load(Ordering::Relaxed)
    }

    pub fn store_path(&self) -> &std::path::Path {
        self.store.path()
    }

    /// Force a full-state write, e.g. on shutdown.
    pub async fn flush(&self) -> bool {
        let state = self.state.read().await;
        self.persist(&state);
        self.is_persistence_healthy()
    }

    // =====================================================
    // SIDE EFFECTS
    // =====================================================

    fn persist(&self, state: &LedgerState) {
        match self.store.save(&state.account, &state.positions) {
            Ok(()) => {
                if !self.persistence_healthy.swap(true, Ordering::Relaxed) {
                    tracing::info!(path = %self.store.path().display(), "Ledger persistence recovered");
                }
            }
            Err(e) => {
                self.persistence_healthy.store(false, Ordering::Relaxed);
                if let Some(ref metrics) = self.metrics {
                    metrics.persistence_failures_total.inc();
                }
                tracing::error!(
                    path = %self.store.path().display(),
                    error = %e,
                    "Failed to persist ledger state; in-memory state is authoritative but not durable"
                );
            }
        }

        if let Some(ref metrics) = self.metrics {
            metrics.balance.set(state.account.balance.to_f64().unwrap_or_default());
            metrics.frozen.set(state.account.frozen.to_f64().unwrap_or_default());
            metrics.available.set(state.account.available().to_f64().unwrap_or_default());
            metrics.open_positions.set(state.positions.len() as i64);
        }
    }

    fn notify(&self, notification: LedgerNotification) {
        tracing::info!(target: "ledger_core::notifications", "{}", notification);
        if let Some(ref tx) = self.notifier {
            // No receivers is fine
            let _ = tx.send(notification);
        }
    }

    fn count_freeze(&self, outcome: &str) {
        if let Some(ref metrics) = self.metrics {
            metrics.funds_freeze_total.with_label_values(&[outcome]).inc();
        }
    }
}

fn long_volume(position: Option<&Position>) -> Option<Decimal> {
    position
        .filter(|p| p.direction == Some(Direction::Long))
        .map(|p| p.volume)
}

fn position_summary(positions: &HashMap<String, Position>) -> String {
    if positions.is_empty() {
        return "no positions".to_string();
    }
    let mut entries: Vec<String> = positions
        .iter()
        .map(|(symbol, p)| format!("{}: {}", symbol, p))
        .collect();
    entries.sort();
    entries.join(", ")
}
