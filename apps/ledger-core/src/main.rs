//! Ledger Core - Account Ledger & Execution Quality Service
//! Wires the ledger, order registry and TCA to NATS and the HTTP surface

use ledger_core::config::Config;
use ledger_core::engine::{EventDispatcher, Ledger, LedgerStore, OrderRegistry, TransactionCostAnalyzer};
use ledger_core::nats_handler::NatsSubscriber;
use ledger_core::observability::{
    self,
    health::{start_health_server, HealthState},
    metrics::Metrics,
};
use ledger_core::resilience::{with_retry_async, RetryConfig};
use ledger_core::shutdown;
use ledger_core::strategy::{NatsOrderGateway, StrategyRunner, TradingContext};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "ledger-core";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    observability::init_observability(SERVICE_NAME)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        state_path = %config.state_path.display(),
        "Starting Ledger Core..."
    );

    let metrics = Arc::new(Metrics::new(SERVICE_NAME)?);
    let (notify_tx, notify_rx) = broadcast::channel(1024);

    // Ledger state is restored before anything can trade against it
    let ledger = Arc::new(
        Ledger::load(LedgerStore::new(config.state_path.clone()), config.initial_balance)
            .with_notifier(notify_tx)
            .with_metrics(metrics.clone()),
    );
    let registry = Arc::new(OrderRegistry::new().with_metrics(metrics.clone()));
    let tca = Arc::new(
        TransactionCostAnalyzer::new(config.tca_analysis_interval).with_metrics(metrics.clone()),
    );
    let dispatcher = Arc::new(
        EventDispatcher::new(ledger.clone(), registry.clone(), tca.clone())
            .with_metrics(metrics.clone()),
    );

    let nats_connected = Arc::new(AtomicBool::new(false));
    let ready = Arc::new(AtomicBool::new(false));

    // Health/metrics server comes up first so probes see "initializing"
    let health_state = HealthState {
        ledger: ledger.clone(),
        registry: registry.clone(),
        tca: tca.clone(),
        metrics: metrics.clone(),
        nats_connected: nats_connected.clone(),
        ready: ready.clone(),
    };
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = start_health_server(metrics_port, health_state).await {
            error!(error = %e, "Health server failed");
        }
    });

    let nats_client = with_retry_async(
        "nats_connect",
        &RetryConfig::connect(),
        Some(metrics.as_ref()),
        || async { async_nats::connect(&config.nats_url).await },
    )
    .await?;
    nats_connected.store(true, Ordering::Relaxed);
    info!(url = %config.nats_url, "Connected to NATS");

    let (trigger, shutdown_token) = shutdown::channel();

    tokio::spawn(NatsSubscriber::publish_notifications(
        nats_client.clone(),
        notify_rx,
        metrics.clone(),
    ));

    let subscriber = NatsSubscriber::new(
        nats_client.clone(),
        config.events_subject.clone(),
        dispatcher,
        metrics.clone(),
    );
    let subscriber_token = trigger.subscribe();
    let subscriber_task = tokio::spawn(async move { subscriber.run(subscriber_token).await });

    let gateway = Arc::new(NatsOrderGateway::new(nats_client).with_metrics(metrics.clone()));
    let ctx = TradingContext::new(ledger.clone(), registry, tca, gateway, config.sell_policy);
    let runner = StrategyRunner::new(ctx, config.strategy_poll_interval)
        .with_report_every(config.position_report_every)
        .with_metrics(metrics.clone());
    let runner_task = tokio::spawn(runner.run(shutdown_token));

    ready.store(true, Ordering::Relaxed);
    info!("Ledger Core ready");

    tokio::signal::ctrl_c().await.ok();
    info!("Received shutdown signal");
    ready.store(false, Ordering::Relaxed);
    trigger.trigger();

    match tokio::time::timeout(config.shutdown_timeout, runner_task).await {
        Ok(Ok(iterations)) => info!(iterations = iterations, "Strategy loop joined"),
        Ok(Err(e)) => error!(error = %e, "Strategy loop panicked"),
        Err(_) => warn!(
            timeout_secs = config.shutdown_timeout.as_secs(),
            "Strategy loop did not stop in time"
        ),
    }

    match tokio::time::timeout(config.shutdown_timeout, subscriber_task).await {
        Ok(Ok(Err(e))) => error!(error = %e, "Subscriber error"),
        Ok(Err(e)) => error!(error = %e, "Subscriber panicked"),
        Err(_) => warn!("Subscriber did not stop in time"),
        Ok(Ok(Ok(()))) => {}
    }

    if !ledger.flush().await {
        error!(path = %ledger.store_path().display(), "Final ledger write failed");
    }

    observability::shutdown_observability();
    info!("Ledger Core stopped");
    Ok(())
}
