//! OpenTelemetry Tracing Configuration
//! OTLP span export for the ledger service

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use std::env;

/// Build a batch OTLP tracer pointed at `endpoint`
pub fn init_tracer(service_name: &str, endpoint: &str) -> anyhow::Result<sdktrace::Tracer> {
    let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

    // Sample 10% in production
    let sampler = if environment == "production" {
        sdktrace::Sampler::ParentBased(Box::new(sdktrace::Sampler::TraceIdRatioBased(0.1)))
    } else {
        sdktrace::Sampler::AlwaysOn
    };

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint);

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            sdktrace::Config::default()
                .with_sampler(sampler)
                .with_id_generator(sdktrace::RandomIdGenerator::default())
                .with_max_events_per_span(64)
                .with_max_attributes_per_span(32)
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", service_name.to_string()),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                    KeyValue::new("service.namespace", "ledger"),
                    KeyValue::new("deployment.environment", environment),
                ])),
        )
        .install_batch(runtime::Tokio)?;

    Ok(tracer)
}
