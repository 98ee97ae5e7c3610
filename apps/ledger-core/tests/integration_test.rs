//! Integration Tests
//! End-to-end event flow: wire JSON -> dispatcher -> ledger, registry and TCA

use ledger_core::engine::dispatcher::{DispatchOutcome, EventDispatcher};
use ledger_core::engine::ledger::{Ledger, SellPolicy};
use ledger_core::engine::ledger_store::LedgerStore;
use ledger_core::engine::order_registry::OrderRegistry;
use ledger_core::engine::tca::TransactionCostAnalyzer;
use ledger_core::engine::types::{Direction, OrderStatus};
use ledger_core::events::{ExchangeEvent, StatusEvent, TradeEvent, TradeRejection};
use ledger_core::observability::metrics::Metrics;
use ledger_core::strategy::{GatewayError, OrderGateway, OrderRequest, TradingContext};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::Path;
use std::sync::Arc;

type TestResult<T> = Result<T, anyhow::Error>;

fn dispatcher_at(path: &Path, metrics: Arc<Metrics>) -> EventDispatcher {
    let ledger = Arc::new(
        Ledger::load(LedgerStore::new(path), dec!(10000)).with_metrics(metrics.clone()),
    );
    let registry = Arc::new(OrderRegistry::new().with_metrics(metrics.clone()));
    let tca = Arc::new(TransactionCostAnalyzer::new(2).with_metrics(metrics.clone()));
    EventDispatcher::new(ledger, registry, tca).with_metrics(metrics)
}

fn buy_fill(trade_id: &str, order_id: &str, price: Decimal, volume: Decimal) -> ExchangeEvent {
    ExchangeEvent::Trade(TradeEvent {
        trade_id: Some(trade_id.to_string()),
        symbol: "BTC".to_string(),
        order_id: order_id.to_string(),
        price,
        direction: Direction::Long,
        volume,
        timestamp: Utc::now(),
    })
}

fn status(order_id: &str, status: OrderStatus) -> ExchangeEvent {
    ExchangeEvent::Status(StatusEvent {
        order_id: order_id.to_string(),
        status,
        timestamp: Utc::now(),
    })
}

/// Gateway whose exchange reports a fill and a final status for the order
/// before `submit_order` returns.
struct EagerExchange {
    dispatcher: Arc<EventDispatcher>,
    fill_volume: Decimal,
    final_status: OrderStatus,
}

#[async_trait]
impl OrderGateway for EagerExchange {
    async fn submit_order(&self, request: &OrderRequest) -> Result<String, GatewayError> {
        let order_id = "ex-1".to_string();
        self.dispatcher
            .dispatch(buy_fill("t1", &order_id, request.price, self.fill_volume))
            .await;
        self.dispatcher.dispatch(status(&order_id, self.final_status)).await;
        Ok(order_id)
    }

    async fn cancel_order(&self, _order_id: &str) -> Result<(), GatewayError> {
        Ok(())
    }
}

fn eager_context(dispatcher: Arc<EventDispatcher>, fill_volume: Decimal, final_status: OrderStatus) -> TradingContext {
    TradingContext::new(
        dispatcher.ledger().clone(),
        dispatcher.registry().clone(),
        dispatcher.tca().clone(),
        Arc::new(EagerExchange {
            dispatcher: dispatcher.clone(),
            fill_volume,
            final_status,
        }),
        SellPolicy::RequireInventory,
    )
}

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[tokio::test]
    async fn test_wire_events_flow_through_dispatcher() -> TestResult<()> {
        let dir = tempfile::tempdir()?;
        let metrics = Arc::new(Metrics::new("test")?);
        let dispatcher = dispatcher_at(&dir.path().join("state.json"), metrics.clone());

        let order: ExchangeEvent = serde_json::from_str(
            r#"{"type":"order","order_id":"o1","price":"100","direction":"BUY","volume":"1",
                "timestamp":"2024-01-01T12:00:00Z"}"#,
        )?;
        let trade: ExchangeEvent = serde_json::from_str(
            r#"{"type":"trade","trade_id":"t1","symbol":"ETH","order_id":"o1","price":"100.5",
                "direction":"LONG","volume":"1","timestamp":"2024-01-01T12:00:00.050Z"}"#,
        )?;

        assert_eq!(dispatcher.dispatch(order).await, DispatchOutcome::OrderRecorded);

        let outcome = dispatcher.dispatch(trade).await;
        assert_eq!(outcome, DispatchOutcome::TradeApplied { report: None });

        let ledger = dispatcher.ledger();
        assert_eq!(ledger.account().await.balance, dec!(9899.5));
        assert_eq!(ledger.position("ETH").await.unwrap().avg_price, dec!(100.5));

        let report = dispatcher.tca().analyze().await;
        let summary = report.summary().unwrap();
        assert_eq!(summary.slippage.unwrap().mean, dec!(0.5));
        assert_eq!(summary.latency_ms.unwrap().mean, dec!(50));

        assert_eq!(metrics.tca_trades_total.get(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_trade_is_applied_once() -> TestResult<()> {
        let dir = tempfile::tempdir()?;
        let metrics = Arc::new(Metrics::new("test")?);
        let dispatcher = dispatcher_at(&dir.path().join("state.json"), metrics.clone());

        let fill = buy_fill("t1", "o1", dec!(100), dec!(1));
        dispatcher.dispatch(fill.clone()).await;
        assert_eq!(dispatcher.dispatch(fill).await, DispatchOutcome::DuplicateTrade);

        assert_eq!(dispatcher.ledger().account().await.balance, dec!(9900));
        assert_eq!(dispatcher.ledger().position("BTC").await.unwrap().volume, dec!(1));
        assert_eq!(dispatcher.tca().trade_count().await, 1);
        assert_eq!(
            metrics.duplicate_events_total.with_label_values(&["trade"]).get(),
            1.0
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_after_partial_fill_releases_remaining_reservation() -> TestResult<()> {
        let dir = tempfile::tempdir()?;
        let metrics = Arc::new(Metrics::new("test")?);
        let dispatcher = dispatcher_at(&dir.path().join("state.json"), metrics.clone());
        let ledger = dispatcher.ledger().clone();
        let registry = dispatcher.registry().clone();

        // Strategy side: freeze 1000 for 0.02 BTC @ 50000
        ledger.freeze_funds(dec!(1000)).await?;
        registry.register_order("o1", "grid").await;
        registry.reserve("o1", dec!(1000)).await;

        // Half fills at a better price
        dispatcher.dispatch(buy_fill("t1", "o1", dec!(49000), dec!(0.01))).await;
        let account = ledger.account().await;
        assert_eq!(account.balance, dec!(9510));
        assert_eq!(account.frozen, dec!(510));

        let outcome = dispatcher
            .dispatch(ExchangeEvent::Status(StatusEvent {
                order_id: "o1".to_string(),
                status: OrderStatus::Cancelled,
                timestamp: Utc::now(),
            }))
            .await;

        assert_eq!(outcome, DispatchOutcome::StatusApplied { released: Some(dec!(510)) });
        assert_eq!(ledger.account().await.frozen, Decimal::ZERO);
        assert_eq!(ledger.get_available_balance().await, dec!(9510));
        assert!(!registry.is_active("o1").await);
        assert_eq!(metrics.active_orders.get(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_report_emitted_on_interval() -> TestResult<()> {
        let dir = tempfile::tempdir()?;
        let metrics = Arc::new(Metrics::new("test")?);
        let dispatcher = dispatcher_at(&dir.path().join("state.json"), metrics.clone());

        dispatcher.dispatch(buy_fill("t1", "o1", dec!(10), dec!(1))).await;
        let outcome = dispatcher.dispatch(buy_fill("t2", "o1", dec!(10), dec!(1))).await;

        match outcome {
            DispatchOutcome::TradeApplied { report: Some(report) } => {
                assert_eq!(report.summary().unwrap().trade_count, 2);
            }
            other => panic!("expected a report, got {:?}", other),
        }
        assert_eq!(metrics.tca_synthetic_orders_total.get(), 1);
        assert_eq!(metrics.tca_overfills_total.get(), 1);
        assert!(metrics.encode().contains("ledger_tca_summary"));
        Ok(())
    }

    #[tokio::test]
    async fn test_metrics_follow_ledger_state() -> TestResult<()> {
        let dir = tempfile::tempdir()?;
        let metrics = Arc::new(Metrics::new("test")?);
        let dispatcher = dispatcher_at(&dir.path().join("state.json"), metrics.clone());

        dispatcher.dispatch(buy_fill("t1", "o1", dec!(100), dec!(2))).await;

        assert_eq!(metrics.balance.get(), 9800.0);
        assert_eq!(metrics.open_positions.get(), 1);
        assert_eq!(
            metrics.trades_applied_total.with_label_values(&["LONG", "BTC"]).get(),
            1.0
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_trades_are_rejected_before_any_state_change() -> TestResult<()> {
        let dir = tempfile::tempdir()?;
        let metrics = Arc::new(Metrics::new("test")?);
        let dispatcher = dispatcher_at(&dir.path().join("state.json"), metrics.clone());

        let outcome = dispatcher.dispatch(buy_fill("t1", "o1", dec!(10), dec!(-2))).await;
        assert_eq!(
            outcome,
            DispatchOutcome::TradeRejected { reason: TradeRejection::NonPositiveVolume }
        );

        let outcome = dispatcher.dispatch(buy_fill("t2", "o1", Decimal::ZERO, dec!(1))).await;
        assert_eq!(
            outcome,
            DispatchOutcome::TradeRejected { reason: TradeRejection::NonPositivePrice }
        );

        let huge: Decimal = "79228162514264337593543950335".parse()?;
        let outcome = dispatcher.dispatch(buy_fill("t3", "o1", huge, dec!(2))).await;
        assert_eq!(outcome, DispatchOutcome::TradeRejected { reason: TradeRejection::Overflow });

        let ledger = dispatcher.ledger();
        assert_eq!(ledger.account().await.balance, dec!(10000));
        assert!(ledger.get_all_positions().await.is_empty());
        assert_eq!(dispatcher.tca().trade_count().await, 0);
        assert_eq!(
            metrics
                .rejected_trades_total
                .with_label_values(&["dispatcher", "non_positive_volume"])
                .get(),
            1.0
        );
        assert_eq!(
            metrics.rejected_trades_total.with_label_values(&["dispatcher", "overflow"]).get(),
            1.0
        );

        // A rejected id does not block a later valid delivery
        let outcome = dispatcher.dispatch(buy_fill("t1", "o1", dec!(10), dec!(2))).await;
        assert_eq!(outcome, DispatchOutcome::TradeApplied { report: None });
        assert_eq!(ledger.account().await.balance, dec!(9980));
        Ok(())
    }

    #[tokio::test]
    async fn test_dedup_window_evicts_oldest_trade_ids() -> TestResult<()> {
        let dir = tempfile::tempdir()?;
        let metrics = Arc::new(Metrics::new("test")?);
        let dispatcher =
            dispatcher_at(&dir.path().join("state.json"), metrics.clone()).with_dedup_window(2);

        for id in ["t1", "t2", "t3"] {
            dispatcher.dispatch(buy_fill(id, "o1", dec!(10), dec!(1))).await;
        }

        assert_eq!(
            dispatcher.dispatch(buy_fill("t3", "o1", dec!(10), dec!(1))).await,
            DispatchOutcome::DuplicateTrade
        );
        assert_eq!(
            dispatcher.dispatch(buy_fill("t2", "o1", dec!(10), dec!(1))).await,
            DispatchOutcome::DuplicateTrade
        );

        // t1 fell out of the window and is applied again
        assert!(matches!(
            dispatcher.dispatch(buy_fill("t1", "o1", dec!(10), dec!(1))).await,
            DispatchOutcome::TradeApplied { .. }
        ));
        assert_eq!(dispatcher.ledger().position("BTC").await.unwrap().volume, dec!(4));
        assert_eq!(
            metrics.duplicate_events_total.with_label_values(&["trade"]).get(),
            2.0
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_order_filled_before_submit_returns_is_not_left_active() -> TestResult<()> {
        let dir = tempfile::tempdir()?;
        let metrics = Arc::new(Metrics::new("test")?);
        let dispatcher = Arc::new(dispatcher_at(&dir.path().join("state.json"), metrics.clone()));
        let ctx = eager_context(dispatcher.clone(), dec!(1), OrderStatus::Filled);

        let order_id = ctx.buy("grid", "BTC", dec!(100), dec!(1)).await?;

        let registry = dispatcher.registry();
        assert!(!registry.is_active(&order_id).await);
        assert_eq!(registry.status_of(&order_id).await, Some(OrderStatus::Filled));
        assert_eq!(registry.owner_of(&order_id).await.as_deref(), Some("grid"));
        let entry = registry.entry(&order_id).await.unwrap();
        assert_eq!(entry.reserved, Decimal::ZERO);
        assert_eq!(entry.fills, 1);
        assert_eq!(metrics.active_orders.get(), 0);

        let account = dispatcher.ledger().account().await;
        assert_eq!(account.balance, dec!(9900));
        assert_eq!(account.frozen, Decimal::ZERO);
        Ok(())
    }

    #[tokio::test]
    async fn test_order_cancelled_before_submit_returns_releases_remainder() -> TestResult<()> {
        let dir = tempfile::tempdir()?;
        let metrics = Arc::new(Metrics::new("test")?);
        let dispatcher = Arc::new(dispatcher_at(&dir.path().join("state.json"), metrics.clone()));
        let ledger = dispatcher.ledger().clone();
        ledger.freeze_funds(dec!(300)).await?;

        let ctx = eager_context(dispatcher.clone(), dec!(1), OrderStatus::Cancelled);
        let order_id = ctx.buy("grid", "BTC", dec!(100), dec!(2)).await?;

        assert!(!dispatcher.registry().is_active(&order_id).await);
        assert_eq!(dispatcher.registry().status_of(&order_id).await, Some(OrderStatus::Cancelled));

        // Only the unrelated 300 stays frozen
        let account = ledger.account().await;
        assert_eq!(account.balance, dec!(9900));
        assert_eq!(account.frozen, dec!(300));
        Ok(())
    }
}
