//! Tracing and OpenTelemetry setup.
//!
//! With an OTLP endpoint, traces, metrics and logs are exported over gRPC
//! and also echoed to stderr. Without one, only a fmt layer is installed.

pub mod game;
pub mod metrics;

use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;

use crate::config::Config;
use crate::error::{Error, Result};

/// Service name reported when none is given.
pub const SERVICE_NAME: &str = "chessnet";

/// Configuration for telemetry initialization.
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint (e.g. "http://localhost:4317"), if any.
    pub endpoint: Option<String>,
    pub service_name: String,
    /// Filter directive used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl From<&Config> for TelemetryConfig {
    fn from(config: &Config) -> Self {
        Self {
            endpoint: config.otel_endpoint.clone(),
            service_name: SERVICE_NAME.to_string(),
            log_level: config.log_level.clone(),
        }
    }
}

/// Keeps the OTel providers alive; flushes and shuts them down on drop.
///
/// Hold it for the lifetime of the process.
#[derive(Default)]
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
    logger_provider: Option<SdkLoggerProvider>,
}

impl TelemetryGuard {
    /// Force-flush all telemetry pipelines.
    pub fn force_flush(&self) {
        if let Some(ref provider) = self.tracer_provider {
            let _ = provider.force_flush();
        }
        if let Some(ref provider) = self.meter_provider {
            let _ = provider.force_flush();
        }
        if let Some(ref provider) = self.logger_provider {
            let _ = provider.force_flush();
        }
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.logger_provider.take() {
            let _ = provider.shutdown();
        }
        if let Some(provider) = self.meter_provider.take() {
            let _ = provider.shutdown();
        }
        if let Some(provider) = self.tracer_provider.take() {
            let _ = provider.shutdown();
        }
    }
}

fn resource(service_name: String) -> Resource {
    Resource::builder()
        .with_service_name(service_name)
        .with_attribute(opentelemetry::KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
            env!("CARGO_PKG_VERSION"),
        ))
        .build()
}

fn exporter_error(signal: &str) -> impl FnOnce(opentelemetry_otlp::ExporterBuildError) -> Error {
    let signal = signal.to_string();
    move |e| Error::Other(format!("failed to create OTLP {signal} exporter: {e}"))
}

/// Build the three OTLP pipelines and register the meter provider globally.
fn otlp_providers(
    endpoint: &str,
    resource: Resource,
) -> Result<(SdkTracerProvider, SdkMeterProvider, SdkLoggerProvider)> {
    use opentelemetry_otlp::{LogExporter, MetricExporter, SpanExporter, WithExportConfig as _};

    let spans = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(exporter_error("span"))?;
    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(spans)
        .with_resource(resource.clone())
        .build();

    let metrics = MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(exporter_error("metric"))?;
    let meter_provider = SdkMeterProvider::builder()
        .with_periodic_exporter(metrics)
        .with_resource(resource.clone())
        .build();
    opentelemetry::global::set_meter_provider(meter_provider.clone());

    let logs = LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(exporter_error("log"))?;
    let logger_provider = SdkLoggerProvider::builder()
        .with_batch_exporter(logs)
        .with_resource(resource)
        .build();

    Ok((tracer_provider, meter_provider, logger_provider))
}

/// Install the global tracing subscriber (and OTel pipelines when an
/// endpoint is configured).
///
/// # Errors
///
/// Fails if an exporter cannot be built or a global subscriber is already
/// installed.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    use opentelemetry::trace::TracerProvider as _;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let init_error = |e: tracing_subscriber::util::TryInitError| {
        Error::Other(format!("failed to init tracing subscriber: {e}"))
    };

    let Some(endpoint) = config.endpoint else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(init_error)?;
        return Ok(TelemetryGuard::default());
    };

    let (tracer_provider, meter_provider, logger_provider) =
        otlp_providers(&endpoint, resource(config.service_name))?;

    let trace_layer =
        tracing_opentelemetry::layer().with_tracer(tracer_provider.tracer(SERVICE_NAME));
    let log_layer =
        opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(&logger_provider);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .with(trace_layer)
        .with(log_layer)
        .try_init()
        .map_err(init_error)?;

    Ok(TelemetryGuard {
        tracer_provider: Some(tracer_provider),
        meter_provider: Some(meter_provider),
        logger_provider: Some(logger_provider),
    })
}
