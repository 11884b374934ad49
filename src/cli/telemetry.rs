use anyhow::Result;
use opentelemetry::{global, trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{propagation::TraceContextPropagator, trace::SdkTracerProvider, Resource};
use std::{env::var, sync::OnceLock, time::Duration};
use tracing::{debug, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
use ulid::Ulid;

const SERVICE_NAME: &str = env!("CARGO_PKG_NAME");
const OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// gRPC collectors are reached over TLS unless the endpoint names a scheme.
fn endpoint_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

fn resource() -> Resource {
    let instance_id = var("OTEL_SERVICE_INSTANCE_ID").unwrap_or_else(|_| Ulid::new().to_string());
    Resource::builder_empty()
        .with_attributes(vec![
            KeyValue::new("service.name", SERVICE_NAME),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new("service.instance.id", instance_id),
        ])
        .build()
}

fn tracer_provider(endpoint: &str) -> Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint_url(endpoint))
        .with_timeout(EXPORT_TIMEOUT)
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource())
        .build();

    let _ = TRACER_PROVIDER.set(provider.clone());
    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TraceContextPropagator::new());

    Ok(provider)
}

/// `RUST_LOG` wins over the verbosity flag; dependency chatter stays capped.
fn filter(verbosity_level: Option<Level>) -> Result<EnvFilter> {
    Ok(EnvFilter::builder()
        .with_default_directive(verbosity_level.unwrap_or(Level::ERROR).into())
        .from_env_lossy()
        .add_directive("hyper=error".parse()?)
        .add_directive("tokio=error".parse()?)
        .add_directive("sqlx=warn".parse()?)
        .add_directive("opentelemetry_sdk=warn".parse()?))
}

/// Install the global subscriber: pretty console output, plus span export when
/// `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
///
/// # Errors
///
/// Returns an error if the exporter cannot be built or a subscriber is already set.
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_target(false)
        .pretty();

    let otel_layer = match var(OTLP_ENDPOINT) {
        Ok(endpoint) => {
            let provider = tracer_provider(&endpoint)?;
            Some(tracing_opentelemetry::layer().with_tracer(provider.tracer(SERVICE_NAME)))
        }
        Err(_) => None,
    };

    let subscriber = Registry::default()
        .with(fmt_layer)
        .with(otel_layer)
        .with(filter(verbosity_level)?);
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

/// Flush pending spans. Does nothing when export was never enabled.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        debug!("flushing spans before exit");
        if let Err(err) = provider.shutdown() {
            debug!("tracer provider shutdown: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;

    #[test]
    fn endpoint_keeps_explicit_scheme() {
        assert_eq!(endpoint_url("http://localhost:4317"), "http://localhost:4317");
        assert_eq!(endpoint_url("http://localhost:4317/"), "http://localhost:4317");
    }

    #[test]
    fn endpoint_defaults_to_tls() {
        assert_eq!(endpoint_url(" collector:4317/ "), "https://collector:4317");
    }

    #[test]
    fn filter_follows_verbosity() {
        temp_env::with_var("RUST_LOG", None::<&str>, || {
            let debug = filter(Some(Level::DEBUG)).map(|f| f.max_level_hint());
            assert_eq!(debug.ok().flatten(), Some(LevelFilter::DEBUG));

            let quiet = filter(None).map(|f| f.max_level_hint());
            assert_eq!(quiet.ok().flatten(), Some(LevelFilter::WARN));
        });
    }

    #[test]
    fn shutdown_without_provider_is_a_noop() {
        shutdown_tracer();
    }
}
