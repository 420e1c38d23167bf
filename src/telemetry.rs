use opentelemetry::trace::TraceId;
use tracing_subscriber::{prelude::*, EnvFilter, Registry};

pub type InitError = Box<dyn std::error::Error + Send + Sync>;

/// Fetch an opentelemetry::trace::TraceId as hex through the full tracing stack
pub fn get_trace_id() -> Option<TraceId> {
    use opentelemetry::trace::TraceContextExt as _; // opentelemetry::Context -> opentelemetry::trace::Span
    use tracing_opentelemetry::OpenTelemetrySpanExt as _; // tracing::Span to opentelemetry::Context

    match tracing::Span::current()
        .context()
        .span()
        .span_context()
        .trace_id()
    {
        TraceId::INVALID => None,
        valid => Some(valid),
    }
}

#[cfg(feature = "telemetry")]
fn init_tracer() -> Result<opentelemetry_sdk::trace::Tracer, InitError> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{trace, Resource};

    let otlp_endpoint = std::env::var("OPENTELEMETRY_ENDPOINT_URL").map_err(|_| {
        "Need a otel tracing collector configured via OPENTELEMETRY_ENDPOINT_URL"
    })?;

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(otlp_endpoint),
        )
        .with_trace_config(trace::config().with_resource(Resource::new(vec![
            KeyValue::new("service.name", "pulp-operator"),
        ])))
        .install_batch(opentelemetry_sdk::runtime::Tokio)?;
    Ok(tracer)
}

/// Initialize tracing
pub fn init() -> Result<(), InitError> {
    // Setup tracing layers
    #[cfg(feature = "telemetry")]
    let telemetry = tracing_opentelemetry::layer().with_tracer(init_tracer()?);

    let logger = tracing_subscriber::fmt::layer().compact();
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    // Decide on layers
    #[cfg(feature = "telemetry")]
    let collector = Registry::default()
        .with(telemetry)
        .with(logger)
        .with(env_filter);
    #[cfg(not(feature = "telemetry"))]
    let collector = Registry::default().with(logger).with(env_filter);

    tracing::subscriber::set_global_default(collector)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn no_trace_id_outside_an_exported_span() {
        assert_eq!(get_trace_id(), None);
    }

    // This test only works when telemetry is initialized fully
    // and requires OPENTELEMETRY_ENDPOINT_URL pointing to a valid server
    #[cfg(feature = "telemetry")]
    #[test]
    #[ignore = "requires a trace exporter"]
    fn get_trace_id_returns_valid_traces() {
        super::init().unwrap();
        #[tracing::instrument(name = "test_span")] // need to be in an instrumented fn
        fn test_trace_id() -> Option<TraceId> {
            get_trace_id()
        }
        assert_ne!(test_trace_id(), None, "valid trace");
        assert_ne!(test_trace_id(), Some(TraceId::INVALID), "valid trace");
    }
}
