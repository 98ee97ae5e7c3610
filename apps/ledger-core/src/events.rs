//! Exchange Events
//! Closed set of event payloads delivered by the exchange gateway

use crate::engine::types::{Direction, OrderStatus};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Order acknowledged by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: String,
    pub price: Decimal,
    pub direction: Direction,
    pub volume: Decimal,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// A single fill. Partial fills arrive as several events for one order id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    #[serde(default)]
    pub trade_id: Option<String>,
    pub symbol: String,
    pub order_id: String,
    pub price: Decimal,
    pub direction: Direction,
    pub volume: Decimal,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub order_id: String,
    pub status: OrderStatus,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Everything the dispatcher knows how to route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExchangeEvent {
    Order(OrderEvent),
    Trade(TradeEvent),
    Status(StatusEvent),
}

impl ExchangeEvent {
    pub fn order_id(&self) -> &str {
        match self {
            ExchangeEvent::Order(e) => &e.order_id,
            ExchangeEvent::Trade(e) => &e.order_id,
            ExchangeEvent::Status(e) => &e.order_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ExchangeEvent::Order(_) => "order",
            ExchangeEvent::Trade(_) => "trade",
            ExchangeEvent::Status(_) => "status",
        }
    }
}

/// Why a fill was refused before touching any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TradeRejection {
    #[error("volume must be positive")]
    NonPositiveVolume,

    #[error("price must be positive")]
    NonPositivePrice,

    #[error("amount exceeds the decimal range")]
    Overflow,
}

impl TradeRejection {
    /// Metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeRejection::NonPositiveVolume => "non_positive_volume",
            TradeRejection::NonPositivePrice => "non_positive_price",
            TradeRejection::Overflow => "overflow",
        }
    }
}

impl TradeEvent {
    /// `price * volume`, or `None` when the product overflows.
    pub fn notional(&self) -> Option<Decimal> {
        self.price.checked_mul(self.volume)
    }

    /// Check the fill is applicable and return its notional.
    pub fn validate(&self) -> Result<Decimal, TradeRejection> {
        if self.volume <= Decimal::ZERO {
            return Err(TradeRejection::NonPositiveVolume);
        }
        if self.price <= Decimal::ZERO {
            return Err(TradeRejection::NonPositivePrice);
        }
        self.notional().ok_or(TradeRejection::Overflow)
    }
}
