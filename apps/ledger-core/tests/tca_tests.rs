//! Tests for transaction cost analysis
//! Slippage sign, percentage, latency and report cadence

use ledger_core::engine::tca::{SummaryStats, TcaReport, TransactionCostAnalyzer};
use ledger_core::engine::types::Direction;

use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_buy_slippage_and_latency() {
        let tca = TransactionCostAnalyzer::default();
        tca.record_order(dec!(100), Direction::Long, dec!(1), "o1", t0()).await;
        tca.record_trade(
            dec!(100.5),
            Direction::Long,
            dec!(1),
            "o1",
            t0() + Duration::milliseconds(50),
        )
        .await;

        let report = tca.analyze().await;
        let summary = report.summary().unwrap();

        assert_eq!(summary.matched_trades, 1);
        assert_eq!(summary.slippage.unwrap().mean, dec!(0.5));
        assert_eq!(summary.slippage_pct.unwrap().mean, dec!(0.5));
        assert_eq!(summary.latency_ms.unwrap().mean, dec!(50));
    }

    #[tokio::test]
    async fn test_unmatched_trade_gets_zero_slippage() {
        let tca = TransactionCostAnalyzer::default();
        tca.record_trade(dec!(42), Direction::Short, dec!(3), "never-seen", t0()).await;

        assert!(tca.has_order("never-seen").await);
        let report = tca.analyze().await;
        let summary = report.summary().unwrap();

        assert_eq!(summary.slippage.unwrap().mean, Decimal::ZERO);
        assert_eq!(summary.latency_ms.unwrap().mean, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_sell_below_order_price_is_unfavorable() {
        let tca = TransactionCostAnalyzer::default();
        tca.record_order(dec!(100), Direction::Short, dec!(1), "s1", t0()).await;
        tca.record_trade(dec!(99), Direction::Short, dec!(1), "s1", t0()).await;

        let report = tca.analyze().await;
        assert_eq!(report.summary().unwrap().slippage.unwrap().mean, dec!(1));
    }

    #[tokio::test]
    async fn test_first_order_record_is_reference() {
        let tca = TransactionCostAnalyzer::default();
        tca.record_order(dec!(100), Direction::Long, dec!(1), "o1", t0()).await;
        tca.record_order(dec!(90), Direction::Long, dec!(1), "o1", t0()).await;
        tca.record_trade(dec!(101), Direction::Long, dec!(1), "o1", t0()).await;

        let report = tca.analyze().await;
        assert_eq!(report.summary().unwrap().slippage.unwrap().mean, dec!(1));
        assert_eq!(tca.order_count().await, 2);
    }

    #[tokio::test]
    async fn test_zero_price_order_skips_percentage() {
        let tca = TransactionCostAnalyzer::default();
        tca.record_order(Decimal::ZERO, Direction::Long, dec!(1), "o1", t0()).await;
        tca.record_trade(dec!(1), Direction::Long, dec!(1), "o1", t0()).await;

        let report = tca.analyze().await;
        let summary = report.summary().unwrap();
        assert!(summary.slippage.is_some());
        assert!(summary.slippage_pct.is_none());
    }

    #[tokio::test]
    async fn test_out_of_range_samples_are_skipped() {
        let tca = TransactionCostAnalyzer::default();
        // Slippage itself overflows
        tca.record_order(Decimal::MIN, Direction::Long, dec!(1), "o1", t0()).await;
        tca.record_trade(Decimal::MAX, Direction::Long, dec!(1), "o1", t0()).await;
        // Slippage fits, its percentage does not
        tca.record_order(dec!(0.0000000000000000000000000001), Direction::Long, dec!(1), "o2", t0()).await;
        tca.record_trade(dec!(1000), Direction::Long, dec!(1), "o2", t0()).await;

        let report = tca.analyze().await;
        let summary = report.summary().unwrap();

        assert_eq!(summary.trade_count, 2);
        assert_eq!(summary.slippage.unwrap().count, 1);
        assert!(summary.slippage_pct.is_none());
        assert_eq!(summary.latency_ms.unwrap().count, 1);
    }

    #[test]
    fn test_statistics_outside_decimal_range_are_none() {
        assert!(SummaryStats::from_samples(&[Decimal::MAX, Decimal::MAX]).is_none());
    }

    #[tokio::test]
    async fn test_report_every_interval_trades() {
        let tca = TransactionCostAnalyzer::new(5);
        tca.record_order(dec!(10), Direction::Long, dec!(10), "o1", t0()).await;

        for _ in 0..4 {
            assert!(tca
                .record_trade(dec!(10), Direction::Long, dec!(1), "o1", t0())
                .await
                .is_none());
        }
        let report = tca
            .record_trade(dec!(10), Direction::Long, dec!(1), "o1", t0())
            .await
            .unwrap();

        assert_eq!(report.summary().unwrap().trade_count, 5);
        assert_eq!(tca.last_report().await, Some(report));
        assert_eq!(tca.trade_count().await, 5);
    }

    #[tokio::test]
    async fn test_empty_analyzer_reports_insufficient_data() {
        let tca = TransactionCostAnalyzer::default();

        let report = tca.analyze().await;
        assert_eq!(report, TcaReport::InsufficientData { trade_count: 0 });
        assert!(report.to_string().contains("Insufficient data"));
    }

    #[tokio::test]
    async fn test_overfill_is_still_recorded() {
        let tca = TransactionCostAnalyzer::default();
        tca.record_order(dec!(10), Direction::Long, dec!(1), "o1", t0()).await;
        tca.record_trade(dec!(10), Direction::Long, dec!(1), "o1", t0()).await;
        tca.record_trade(dec!(10), Direction::Long, dec!(1), "o1", t0()).await;

        assert_eq!(tca.trade_count().await, 2);
        assert_eq!(tca.analyze().await.summary().unwrap().matched_trades, 2);
    }

    #[test]
    fn test_population_statistics() {
        let stats = SummaryStats::from_samples(&[dec!(1), dec!(3)]).unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.mean, dec!(2));
        assert_eq!(stats.min, dec!(1));
        assert_eq!(stats.max, dec!(3));
        assert!((stats.std_dev - dec!(1)).abs() < dec!(0.000001));

        assert!(SummaryStats::from_samples(&[]).is_none());
    }

    #[tokio::test]
    async fn test_report_lines_mention_totals() {
        let tca = TransactionCostAnalyzer::default();
        tca.record_order(dec!(100), Direction::Long, dec!(1), "o1", t0()).await;
        tca.record_trade(dec!(100.5), Direction::Long, dec!(1), "o1", t0()).await;

        let lines = tca.analyze().await.lines();
        assert_eq!(lines.first().map(String::as_str), Some("=== Transaction Cost Analysis ==="));
        assert_eq!(lines.last().map(String::as_str), Some("Total trades: 1"));
    }
}
