//! Prometheus Metrics for the Ledger Service
//! Balance, positions, order lifecycle and execution quality

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};

/// Application metrics. Built once at startup and shared as `Arc<Metrics>`.
pub struct Metrics {
    registry: Registry,
    pub balance: Gauge,
    pub frozen: Gauge,
    pub available: Gauge,
    pub open_positions: IntGauge,
    pub trades_applied_total: CounterVec,
    pub rejected_trades_total: CounterVec,
    pub funds_freeze_total: CounterVec,
    pub persistence_failures_total: IntCounter,
    pub active_orders: IntGauge,
    pub order_status_total: CounterVec,
    pub tca_trades_total: IntCounter,
    pub tca_synthetic_orders_total: IntCounter,
    pub tca_overfills_total: IntCounter,
    pub tca_summary: GaugeVec,
    pub duplicate_events_total: CounterVec,
    pub nats_messages_received: CounterVec,
    pub nats_messages_published: CounterVec,
    pub retry_attempts_total: CounterVec,
    pub strategy_iterations_total: Counter,
}

impl Metrics {
    pub fn new(service_name: &str) -> anyhow::Result<Self> {
        let registry = Registry::new_custom(Some("ledger".to_string()), None)?;

        let balance = Gauge::with_opts(
            Opts::new("balance", "Account balance in quote currency").const_label("service", service_name),
        )?;

        let frozen = Gauge::with_opts(
            Opts::new("frozen", "Funds reserved for open buy orders").const_label("service", service_name),
        )?;

        let available = Gauge::with_opts(
            Opts::new("available", "Balance minus frozen funds").const_label("service", service_name),
        )?;

        let open_positions = IntGauge::new("open_positions", "Number of open positions")?;

        let trades_applied_total = CounterVec::new(
            Opts::new("trades_applied_total", "Fills applied to the ledger"),
            &["direction", "symbol"],
        )?;

        let rejected_trades_total = CounterVec::new(
            Opts::new("rejected_trades_total", "Fills refused before touching state"),
            &["source", "reason"], // dispatcher|ledger x non_positive_volume|non_positive_price|overflow
        )?;

        let funds_freeze_total = CounterVec::new(
            Opts::new("funds_freeze_total", "Freeze attempts by outcome"),
            &["outcome"], // ok, insufficient, invalid
        )?;

        let persistence_failures_total = IntCounter::new(
            "persistence_failures_total",
            "Ledger state writes that failed",
        )?;

        let active_orders = IntGauge::new("active_orders", "Orders not yet in a terminal state")?;

        let order_status_total = CounterVec::new(
            Opts::new("order_status_total", "Order status updates received"),
            &["status"],
        )?;

        let tca_trades_total = IntCounter::new("tca_trades_total", "Trades recorded by TCA")?;

        let tca_synthetic_orders_total = IntCounter::new(
            "tca_synthetic_orders_total",
            "Reference orders synthesized for unmatched trades",
        )?;

        let tca_overfills_total = IntCounter::new(
            "tca_overfills_total",
            "Fills that pushed delivered volume past the order volume",
        )?;

        let tca_summary = GaugeVec::new(
            Opts::new("tca_summary", "Latest TCA report values"),
            &["metric", "stat"], // slippage|slippage_pct|latency_ms x mean|min|max|std
        )?;

        let duplicate_events_total = CounterVec::new(
            Opts::new("duplicate_events_total", "Redelivered events that were skipped"),
            &["kind"],
        )?;

        let nats_messages_received = CounterVec::new(
            Opts::new("nats_messages_received_total", "NATS messages received"),
            &["subject"],
        )?;

        let nats_messages_published = CounterVec::new(
            Opts::new("nats_messages_published_total", "NATS messages published"),
            &["subject"],
        )?;

        let retry_attempts_total = CounterVec::new(
            Opts::new("retry_attempts_total", "Total retry attempts"),
            &["operation", "outcome"],
        )?;

        let strategy_iterations_total = Counter::new(
            "strategy_iterations_total",
            "Strategy loop iterations",
        )?;

        registry.register(Box::new(balance.clone()))?;
        registry.register(Box::new(frozen.clone()))?;
        registry.register(Box::new(available.clone()))?;
        registry.register(Box::new(open_positions.clone()))?;
        registry.register(Box::new(trades_applied_total.clone()))?;
        registry.register(Box::new(rejected_trades_total.clone()))?;
        registry.register(Box::new(funds_freeze_total.clone()))?;
        registry.register(Box::new(persistence_failures_total.clone()))?;
        registry.register(Box::new(active_orders.clone()))?;
        registry.register(Box::new(order_status_total.clone()))?;
        registry.register(Box::new(tca_trades_total.clone()))?;
        registry.register(Box::new(tca_synthetic_orders_total.clone()))?;
        registry.register(Box::new(tca_overfills_total.clone()))?;
        registry.register(Box::new(tca_summary.clone()))?;
        registry.register(Box::new(duplicate_events_total.clone()))?;
        registry.register(Box::new(nats_messages_received.clone()))?;
        registry.register(Box::new(nats_messages_published.clone()))?;
        registry.register(Box::new(retry_attempts_total.clone()))?;
        registry.register(Box::new(strategy_iterations_total.clone()))?;

        tracing::info!("Prometheus metrics initialized");

        Ok(Self {
            registry,
            balance,
            frozen,
            available,
            open_positions,
            trades_applied_total,
            rejected_trades_total,
            funds_freeze_total,
            persistence_failures_total,
            active_orders,
            order_status_total,
            tca_trades_total,
            tca_synthetic_orders_total,
            tca_overfills_total,
            tca_summary,
            duplicate_events_total,
            nats_messages_received,
            nats_messages_published,
            retry_attempts_total,
            strategy_iterations_total,
        })
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }
}
