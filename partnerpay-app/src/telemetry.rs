//! Tracing subscriber and optional OpenTelemetry export.

use opentelemetry::global;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource, metrics::SdkMeterProvider, propagation::TraceContextPropagator,
    trace::SdkTracerProvider,
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, LogFormat};

const SERVICE_NAME: &str = "partnerpay";
const DEFAULT_FILTER: &str = "info,partnerpay_app=debug,partnerpay_hex=debug";

/// Providers that must be flushed before the process exits.
pub struct Telemetry {
    tracer_provider: Option<SdkTracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
}

impl Telemetry {
    pub fn shutdown(self) {
        if let Some(provider) = self.tracer_provider {
            if let Err(e) = provider.shutdown() {
                eprintln!("failed to flush traces: {e}");
            }
        }
        if let Some(provider) = self.meter_provider {
            if let Err(e) = provider.shutdown() {
                eprintln!("failed to flush metrics: {e}");
            }
        }
    }
}

fn init_providers(endpoint: &str) -> anyhow::Result<(SdkTracerProvider, SdkMeterProvider)> {
    global::set_text_map_propagator(TraceContextPropagator::new());
    let resource = Resource::builder().with_service_name(SERVICE_NAME).build();

    // Use gRPC exporter with batch processing (non-blocking)
    let span_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let tracer_provider = SdkTracerProvider::builder()
        .with_resource(resource.clone())
        .with_batch_exporter(span_exporter)
        .build();
    global::set_tracer_provider(tracer_provider.clone());

    // HTTP metrics recorded by the router's metrics layer go through the global meter provider.
    let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let meter_provider = SdkMeterProvider::builder()
        .with_resource(resource)
        .with_periodic_exporter(metric_exporter)
        .build();
    global::set_meter_provider(meter_provider.clone());

    Ok((tracer_provider, meter_provider))
}

/// Installs the global subscriber.
///
/// Logs go to stdout, pretty or JSON. When an OTLP endpoint is configured,
/// spans and HTTP metrics are exported to it as well.
pub fn init(config: &Config) -> anyhow::Result<Telemetry> {
    let providers = config
        .otlp_endpoint
        .as_deref()
        .map(init_providers)
        .transpose()?;

    let otel_layer = providers.as_ref().map(|(tracer_provider, _)| {
        tracing_opentelemetry::layer().with_tracer(tracer_provider.tracer(SERVICE_NAME))
    });
    let (pretty, json) = match config.log_format {
        LogFormat::Pretty => (Some(tracing_subscriber::fmt::layer()), None),
        LogFormat::Json => (None, Some(tracing_subscriber::fmt::layer().json())),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .with(pretty)
        .with(json)
        .with(otel_layer)
        .try_init()?;

    let (tracer_provider, meter_provider) = providers.unzip();
    Ok(Telemetry {
        tracer_provider,
        meter_provider,
    })
}
