//! Optional tracing/OpenTelemetry wiring (cargo feature `otel`).
//!
//! Enabled at runtime by DOCKER_BIND_PROXY_OTEL=1. Spans are exported to stdout through
//! opentelemetry-stdout; DOCKER_BIND_PROXY_TRACING_FMT=1 adds a human-readable fmt layer
//! on stderr, filtered by RUST_LOG (default "info").
use std::env;
use std::time::SystemTime;

use once_cell::sync::OnceCell;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub struct TelemetryGuard {
    provider: SdkTracerProvider,
}

static INIT: OnceCell<()> = OnceCell::new();

fn telemetry_enabled_env() -> bool {
    env::var("DOCKER_BIND_PROXY_OTEL").ok().as_deref() == Some("1")
}

fn build_resource() -> Resource {
    let service_name = env::var("OTEL_SERVICE_NAME")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "docker-bind-proxy".to_string());

    let pid = std::process::id() as i64;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut attrs = vec![
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        KeyValue::new("process.pid", pid),
        KeyValue::new("service.instance.id", format!("{pid}-{nanos}")),
    ];
    if let Ok(host) = hostname::get() {
        if let Ok(s) = host.into_string() {
            attrs.push(KeyValue::new("host.name", s));
        }
    }

    Resource::builder()
        .with_service_name(service_name)
        .with_attributes(attrs)
        .build()
}

/// Install the global subscriber. Returns None when disabled or already initialized.
pub fn telemetry_init() -> Option<TelemetryGuard> {
    if INIT.get().is_some() || !telemetry_enabled_env() {
        return None;
    }

    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
        .with_resource(build_resource())
        .build();
    let tracer = provider.tracer("docker-bind-proxy");
    opentelemetry::global::set_tracer_provider(provider.clone());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = (env::var("DOCKER_BIND_PROXY_TRACING_FMT").ok().as_deref() == Some("1"))
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .with(fmt_layer);
    if registry.try_init().is_err() {
        eprintln!("docker-bind-proxy: telemetry init skipped (global subscriber already set)");
        return None;
    }

    let _ = INIT.set(());
    Some(TelemetryGuard { provider })
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        let _ = self.provider.force_flush();
        let _ = self.provider.shutdown();
    }
}
