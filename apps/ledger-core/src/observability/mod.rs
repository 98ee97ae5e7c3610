//! Observability Module - Structured Logging, Tracing Export, Metrics
//! JSON logs always on; OTLP export only when a collector endpoint is configured

pub mod health;
pub mod metrics;
pub mod tracing_setup;

use opentelemetry::global;
use std::env;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber. Call once at process start.
pub fn init_observability(service_name: &str) -> anyhow::Result<()> {
    let otlp_endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok();

    let telemetry_layer = match otlp_endpoint.as_deref() {
        Some(endpoint) => {
            let tracer = tracing_setup::init_tracer(service_name, endpoint)?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ledger_core=debug"));

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_thread_names(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(telemetry_layer)
        .init();

    tracing::info!(
        service = service_name,
        otlp = otlp_endpoint.is_some(),
        "Observability stack initialized"
    );

    Ok(())
}

/// Flush pending spans before exit
pub fn shutdown_observability() {
    tracing::info!("Shutting down observability...");
    global::shutdown_tracer_provider();
}
