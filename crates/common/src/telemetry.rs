use opentelemetry::trace::TracerProvider;
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    metrics::{PeriodicReader, SdkMeterProvider},
    propagation::TraceContextPropagator,
    trace::{Sampler, SdkTracer, SdkTracerProvider},
};
use opentelemetry_semantic_conventions::attribute::{SERVICE_NAME, SERVICE_VERSION};
use std::time::Duration;

/// How often accumulated metrics are pushed to the collector
pub const DEFAULT_EXPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Owns the OTLP tracer and meter providers and flushes them when dropped.
///
/// Building the guard registers the providers globally, so meters obtained
/// through `opentelemetry::global` start exporting. Spans only reach the
/// exporter once the guard is handed to [`crate::setup_logging`].
///
/// # Example
/// ```ignore
/// let telemetry = TelemetryGuard::init("gateway", "http://localhost:4317")?;
/// common::setup_logging(Environment::Production, Some(&telemetry));
/// // Flushed and shut down when `telemetry` is dropped
/// ```
pub struct TelemetryGuard {
    service_name: String,
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl TelemetryGuard {
    /// Connects both providers to the collector at `endpoint` (e.g. "http://localhost:4317").
    pub fn init(service_name: &str, endpoint: &str) -> anyhow::Result<Self> {
        Self::init_with_interval(service_name, endpoint, DEFAULT_EXPORT_INTERVAL)
    }

    pub fn init_with_interval(
        service_name: &str,
        endpoint: &str,
        export_interval: Duration,
    ) -> anyhow::Result<Self> {
        global::set_text_map_propagator(TraceContextPropagator::new());

        let resource = service_resource(service_name);
        let tracer_provider = tracer_provider(resource.clone(), endpoint)?;
        let meter_provider = meter_provider(resource, endpoint, export_interval)?;

        global::set_tracer_provider(tracer_provider.clone());
        global::set_meter_provider(meter_provider.clone());

        Ok(Self {
            service_name: service_name.to_string(),
            tracer_provider,
            meter_provider,
        })
    }

    /// Tracer for the `tracing` bridge layer
    pub fn tracer(&self) -> SdkTracer {
        self.tracer_provider.tracer(self.service_name.clone())
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Err(e) = self.tracer_provider.shutdown() {
            eprintln!("Failed to shutdown tracer provider: {:?}", e);
        }
        if let Err(e) = self.meter_provider.shutdown() {
            eprintln!("Failed to shutdown meter provider: {:?}", e);
        }
    }
}

fn service_resource(service_name: &str) -> Resource {
    Resource::builder()
        .with_attributes([
            KeyValue::new(SERVICE_NAME, service_name.to_string()),
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
        ])
        .build()
}

fn tracer_provider(resource: Resource, endpoint: &str) -> anyhow::Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_resource(resource)
        .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
        .with_batch_exporter(exporter)
        .build())
}

fn meter_provider(
    resource: Resource,
    endpoint: &str,
    interval: Duration,
) -> anyhow::Result<SdkMeterProvider> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(interval)
        .build();

    Ok(SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build())
}

/// Creates an info-level span and enters it.
#[macro_export]
macro_rules! span {
    ($name:literal) => {
        tracing::info_span!($name).entered()
    };
}
