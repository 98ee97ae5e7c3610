//! Trading Context
//! Gates strategy orders through the ledger before they reach the gateway

use crate::engine::ledger::{Ledger, LedgerError, LedgerSnapshot, SellPolicy};
use crate::engine::order_registry::OrderRegistry;
use crate::engine::tca::TransactionCostAnalyzer;
use crate::engine::types::Direction;
use crate::strategy::gateway::{GatewayError, OrderGateway, OrderRequest};

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Everything a strategy may touch. Cheap to clone.
#[derive(Clone)]
pub struct TradingContext {
    ledger: Arc<Ledger>,
    registry: Arc<OrderRegistry>,
    tca: Arc<TransactionCostAnalyzer>,
    gateway: Arc<dyn OrderGateway>,
    sell_policy: SellPolicy,
}

impl TradingContext {
    pub fn new(
        ledger: Arc<Ledger>,
        registry: Arc<OrderRegistry>,
        tca: Arc<TransactionCostAnalyzer>,
        gateway: Arc<dyn OrderGateway>,
        sell_policy: SellPolicy,
    ) -> Self {
        Self {
            ledger,
            registry,
            tca,
            gateway,
            sell_policy,
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn registry(&self) -> &Arc<OrderRegistry> {
        &self.registry
    }

    pub async fn snapshot(&self) -> LedgerSnapshot {
        self.ledger.snapshot().await
    }

    /// Reserve the notional, then submit. The reservation is released if the
    /// gateway refuses the order, or if the exchange finished the order before
    /// the registry learned of it.
    pub async fn buy(
        &self,
        strategy: &str,
        symbol: &str,
        price: Decimal,
        volume: Decimal,
    ) -> Result<String, OrderError> {
        let request = OrderRequest::limit(strategy, symbol, Direction::Long, price, volume);
        let required = match request.notional() {
            Some(notional) if price > Decimal::ZERO && volume > Decimal::ZERO => notional,
            _ => {
                let e = LedgerError::InvalidOrder { price, volume };
                self.gateway.log(strategy, &format!("Buy of {} {} @ {} aborted: {}", volume, symbol, price, e));
                return Err(e.into());
            }
        };

        if let Err(e) = self.ledger.freeze_funds(required).await {
            self.gateway.log(
                strategy,
                &format!("Buy of {} {} @ {} aborted: {}", volume, symbol, price, e),
            );
            return Err(e.into());
        }

        let order_id = match self.gateway.submit_order(&request).await {
            Ok(id) => id,
            Err(e) => {
                self.ledger.unfreeze_funds(required).await;
                self.gateway.log(strategy, &format!("Buy submission failed: {}", e));
                return Err(e.into());
            }
        };

        self.track(strategy, &order_id, &request).await;
        if let Some(unused) = self.registry.reserve(&order_id, required).await {
            self.ledger.unfreeze_funds(unused).await;
        }

        let available = self.ledger.get_available_balance().await;
        self.gateway.log(
            strategy,
            &format!(
                "Buy order sent: {} @ {} x {}, id {}, available {}",
                symbol, price, volume, order_id, available
            ),
        );
        Ok(order_id)
    }

    /// Check the sell precondition under the configured policy, then submit.
    pub async fn sell(
        &self,
        strategy: &str,
        symbol: &str,
        price: Decimal,
        volume: Decimal,
    ) -> Result<String, OrderError> {
        if price <= Decimal::ZERO || volume <= Decimal::ZERO {
            let e = LedgerError::InvalidOrder { price, volume };
            self.gateway.log(strategy, &format!("Sell of {} {} @ {} aborted: {}", volume, symbol, price, e));
            return Err(e.into());
        }

        if let Err(e) = self.ledger.check_sell(symbol, volume, self.sell_policy).await {
            self.gateway.log(
                strategy,
                &format!("Sell of {} {} @ {} aborted: {}", volume, symbol, price, e),
            );
            return Err(e.into());
        }

        let request = OrderRequest::limit(strategy, symbol, Direction::Short, price, volume);
        let order_id = self.gateway.submit_order(&request).await?;
        self.track(strategy, &order_id, &request).await;

        self.gateway.log(
            strategy,
            &format!("Sell order sent: {} @ {} x {}, id {}", symbol, price, volume, order_id),
        );
        Ok(order_id)
    }

    pub async fn cancel(&self, strategy: &str, order_id: &str) -> Result<(), OrderError> {
        if !self.registry.is_active(order_id).await {
            self.gateway.log(strategy, &format!("Cancel skipped, {} is not active", order_id));
            return Ok(());
        }
        self.gateway.cancel_order(order_id).await?;
        self.gateway.log(strategy, &format!("Cancel requested for {}", order_id));
        Ok(())
    }

    async fn track(&self, strategy: &str, order_id: &str, request: &OrderRequest) {
        self.registry.register_order(order_id, strategy).await;
        self.tca
            .record_order(request.price, request.direction, request.volume, order_id, Utc::now())
            .await;
    }
}
