//! Shared trading types
//! Direction, order lifecycle status, and the immutable order/trade records

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// =====================================================
// DIRECTION
// =====================================================

/// Side of an order or fill. A buy opens/extends a LONG, a sell a SHORT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "LONG", alias = "long", alias = "buy", alias = "BUY")]
    Long,
    #[serde(rename = "SHORT", alias = "short", alias = "sell", alias = "SELL")]
    Short,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

// =====================================================
// ORDER STATUS
// =====================================================

/// Order lifecycle: `Submitted -> PartiallyFilled* -> Filled`, or one of the
/// other terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Submitted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// No further fills are expected once an order reaches a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Submitted => "submitted",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

// =====================================================
// RECORDS
// =====================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub price: Decimal,
    pub direction: Direction,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub order_id: String,
    pub price: Decimal,
    pub direction: Direction,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl From<&TradeRecord> for OrderRecord {
    /// Reference order for a fill that has no recorded order.
    fn from(trade: &TradeRecord) -> Self {
        OrderRecord {
            order_id: trade.order_id.clone(),
            price: trade.price,
            direction: trade.direction,
            volume: trade.volume,
            timestamp: trade.timestamp,
        }
    }
}
