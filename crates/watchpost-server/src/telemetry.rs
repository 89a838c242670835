//! OpenTelemetry integration for distributed tracing.

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    runtime,
    trace::{RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};

use crate::config::TelemetrySettings;

/// OpenTelemetry tracer guard.
///
/// When dropped, flushes all pending spans and shuts down the tracer.
pub struct TelemetryGuard;

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        opentelemetry::global::shutdown_tracer_provider();
    }
}

/// Initialize OpenTelemetry tracing with an OTLP exporter.
///
/// Returns a guard that must be kept alive for the duration of the
/// program; dropping it flushes pending spans.
pub async fn init_telemetry(
    settings: &TelemetrySettings,
) -> Result<Option<TelemetryGuard>, Box<dyn std::error::Error>> {
    if !settings.enabled {
        tracing::info!("OpenTelemetry tracing disabled");
        return Ok(None);
    }

    tracing::info!(
        otlp_endpoint = settings.otlp_endpoint,
        "Initializing OpenTelemetry tracing"
    );

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&settings.otlp_endpoint)
        .build()?;

    let resource = Resource::new(vec![
        KeyValue::new("service.name", "watchpost"),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION").to_string()),
    ]);

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(resource),
        )
        .build();

    opentelemetry::global::set_tracer_provider(provider);

    tracing::info!("OpenTelemetry tracing initialized");
    Ok(Some(TelemetryGuard))
}
