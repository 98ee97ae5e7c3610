//! Configuration Module
//! Loads settings from environment variables

use crate::engine::ledger::SellPolicy;
use crate::engine::tca::DEFAULT_ANALYSIS_INTERVAL;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Floor for the strategy poll interval; the ticker rejects a zero period.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct Config {
    pub state_path: PathBuf,
    pub initial_balance: Decimal,
    pub tca_analysis_interval: u64,
    pub nats_url: String,
    pub events_subject: String,
    pub metrics_port: u16,
    pub strategy_poll_interval: Duration,
    pub position_report_every: u64,
    pub sell_policy: SellPolicy,
    pub shutdown_timeout: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            state_path: env::var("LEDGER_STATE_PATH")
                .unwrap_or_else(|_| "custom_positions.json".to_string())
                .into(),
            initial_balance: match env::var("INITIAL_BALANCE") {
                Ok(raw) => raw
                    .parse()
                    .map_err(|e| anyhow::anyhow!("INITIAL_BALANCE {:?}: {}", raw, e))?,
                Err(_) => dec!(10000),
            },
            tca_analysis_interval: env::var("TCA_ANALYSIS_INTERVAL")
                .unwrap_or_else(|_| DEFAULT_ANALYSIS_INTERVAL.to_string())
                .parse()
                .unwrap_or(DEFAULT_ANALYSIS_INTERVAL),
            nats_url: env::var("NATS_URL")
                .unwrap_or_else(|_| "nats://localhost:4222".to_string()),
            events_subject: env::var("EVENTS_SUBJECT")
                .unwrap_or_else(|_| "exchange.events".to_string()),
            metrics_port: env::var("METRICS_PORT")
                .unwrap_or_else(|_| "9100".to_string())
                .parse()
                .unwrap_or(9100),
            strategy_poll_interval: poll_interval(env::var("STRATEGY_POLL_INTERVAL_MS").ok().as_deref()),
            position_report_every: env::var("POSITION_REPORT_EVERY")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .unwrap_or(300),
            sell_policy: env::var("SELL_POLICY")
                .unwrap_or_else(|_| "require_inventory".to_string())
                .parse()?,
            shutdown_timeout: Duration::from_secs(
                env::var("SHUTDOWN_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            ),
        })
    }
}

fn poll_interval(raw: Option<&str>) -> Duration {
    let millis = raw.and_then(|v| v.trim().parse().ok()).unwrap_or(500);
    Duration::from_millis(millis).max(MIN_POLL_INTERVAL)
}
