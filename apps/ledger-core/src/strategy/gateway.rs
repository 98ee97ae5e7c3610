//! Order Gateway
//! The narrow capability a strategy needs from the exchange side

use crate::engine::types::Direction;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    InvalidResponse(#[from] serde_json::Error),
}

/// Limit order request sent to the exchange gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    #[serde(default = "generate_client_order_id")]
    pub client_order_id: String,
    pub symbol: String,
    pub direction: Direction,
    pub price: Decimal,
    pub volume: Decimal,
    pub strategy: String,
}

fn generate_client_order_id() -> String {
    Uuid::new_v4().to_string()
}

impl OrderRequest {
    pub fn limit(strategy: &str, symbol: &str, direction: Direction, price: Decimal, volume: Decimal) -> Self {
        Self {
            client_order_id: generate_client_order_id(),
            symbol: symbol.to_string(),
            direction,
            price,
            volume,
            strategy: strategy.to_string(),
        }
    }

    /// Quote amount the order commits. `None` when the product overflows.
    pub fn notional(&self) -> Option<Decimal> {
        self.price.checked_mul(self.volume)
    }
}

/// Reply of the gateway's `orders.submit` / `orders.cancel` subjects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub success: bool,
    pub order_id: Option<String>,
    pub error: Option<String>,
}

#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Submit an order; returns the exchange order id.
    async fn submit_order(&self, request: &OrderRequest) -> Result<String, GatewayError>;

    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError>;

    fn log(&self, strategy: &str, message: &str) {
        tracing::info!(strategy = %strategy, "{}", message);
    }
}
