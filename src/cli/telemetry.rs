//! Log output and optional OTLP span export.
//!
//! Logs are JSON lines on stdout. Spans are exported over gRPC only when a
//! collector is configured through `OTEL_EXPORTER_OTLP_ENDPOINT`; the service
//! spans of interest are `token.*`, `whitelist.*`, `credentials.*`,
//! `delegation.*`, `vault.kv.*` and the per-request `http.request`.

use crate::GIT_COMMIT_HASH;
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine};
use once_cell::sync::OnceCell;
use opentelemetry::{
    global, propagation::TextMapCompositePropagator, trace::TracerProvider as _, KeyValue,
};
use opentelemetry_otlp::{WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    propagation::{BaggagePropagator, TraceContextPropagator},
    trace::{SdkTracerProvider, Tracer},
    Resource,
};
use std::time::Duration;
use tonic::{
    metadata::{AsciiMetadataKey, BinaryMetadataKey, MetadataMap, MetadataValue},
    transport::ClientTlsConfig,
};
use tracing::{debug, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
use ulid::Ulid;
use url::Url;

const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

static TRACER_PROVIDER: OnceCell<SdkTracerProvider> = OnceCell::new();

/// Collector settings read from the `OTEL_EXPORTER_OTLP_*` variables.
#[derive(Debug, PartialEq, Eq)]
struct ExportSettings {
    endpoint: String,
    /// Set for `https` endpoints: the server name checked against the certificate.
    tls_domain: Option<String>,
    headers: Vec<(String, String)>,
}

impl ExportSettings {
    /// `None` when no collector is configured. An endpoint without a scheme is
    /// taken as `https`.
    fn from_env(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let raw = lookup("OTEL_EXPORTER_OTLP_ENDPOINT")?;
        let raw = raw.trim().trim_end_matches('/');
        if raw.is_empty() {
            return None;
        }

        let endpoint = if raw.starts_with("http://") || raw.starts_with("https://") {
            raw.to_string()
        } else {
            format!("https://{raw}")
        };

        let tls_domain = Url::parse(&endpoint)
            .ok()
            .filter(|url| url.scheme() == "https")
            .and_then(|url| url.host_str().map(|host| host.trim_matches(['[', ']']).to_string()));

        let headers = lookup("OTEL_EXPORTER_OTLP_HEADERS")
            .map(|raw| {
                raw.split(',')
                    .filter_map(|pair| {
                        let (key, value) = pair.split_once('=')?;
                        let key = key.trim().to_ascii_lowercase();
                        (!key.is_empty()).then(|| (key, value.trim().to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            endpoint,
            tls_domain,
            headers,
        })
    }

    /// gRPC metadata for the exporter. Keys ending in `-bin` carry
    /// base64-encoded binary values.
    fn metadata(&self) -> Result<MetadataMap> {
        let mut metadata = MetadataMap::with_capacity(self.headers.len());

        for (key, value) in &self.headers {
            if key.ends_with("-bin") {
                let bytes = general_purpose::STANDARD
                    .decode(value)
                    .with_context(|| format!("header {key} is not base64"))?;
                let key = BinaryMetadataKey::from_bytes(key.as_bytes())
                    .map_err(|e| anyhow!("invalid header name {key}: {e}"))?;
                metadata.insert_bin(key, MetadataValue::from_bytes(&bytes));
            } else {
                let name = AsciiMetadataKey::from_bytes(key.as_bytes())
                    .map_err(|e| anyhow!("invalid header name {key}: {e}"))?;
                let value = value
                    .parse()
                    .map_err(|e| anyhow!("invalid value for header {key}: {e}"))?;
                metadata.insert(name, value);
            }
        }

        Ok(metadata)
    }
}

fn resource() -> Resource {
    Resource::builder_empty()
        .with_attributes([
            KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new("service.instance.id", Ulid::new().to_string()),
            KeyValue::new("vcs.revision", GIT_COMMIT_HASH),
        ])
        .build()
}

fn init_tracer(settings: &ExportSettings) -> Result<Tracer> {
    let mut builder = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&settings.endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .with_metadata(settings.metadata()?);

    if let Some(domain) = &settings.tls_domain {
        builder = builder.with_tls_config(
            ClientTlsConfig::new()
                .domain_name(domain.clone())
                .with_native_roots(),
        );
    }

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(builder.build()?)
        .with_resource(resource())
        .build();

    let _ = TRACER_PROVIDER.set(provider.clone());

    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ]));

    debug!(endpoint = %settings.endpoint, "exporting spans");

    Ok(provider.tracer(env!("CARGO_PKG_NAME")))
}

/// Install the global subscriber. `RUST_LOG` directives override the CLI level.
///
/// # Errors
///
/// Returns an error if the exporter or the subscriber cannot be set up.
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let fmt_layer = fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .with_span_list(false);

    let filter = EnvFilter::builder()
        .with_default_directive(verbosity_level.unwrap_or(Level::ERROR).into())
        .from_env_lossy()
        .add_directive("hyper=error".parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("opentelemetry_sdk=warn".parse()?);

    let otel_layer = ExportSettings::from_env(|name| std::env::var(name).ok())
        .map(|settings| init_tracer(&settings))
        .transpose()?
        .map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    let subscriber = Registry::default()
        .with(fmt_layer)
        .with(otel_layer)
        .with(filter);
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

/// Flush pending spans. Does nothing when export was never enabled.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        let _ = provider.shutdown();
    }
}
