//! Log output and optional OTLP span export.
//!
//! Spans always go to the console in the chosen [`LogFormat`]. When
//! `OTEL_EXPORTER_OTLP_ENDPOINT` is set they are also batched to a gRPC
//! collector, tagged with the gateway's version and commit.

use crate::cli::commands::logging::{LogFormat, LogOptions};
use anyhow::{anyhow, Result};
use base64ct::{Base64, Encoding};
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::{global, trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::{WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    propagation::{BaggagePropagator, TraceContextPropagator},
    runtime,
    trace::{Tracer, TracerProvider},
    Resource,
};
use std::{collections::HashMap, env::var, sync::OnceLock, time::Duration};
use tonic::{
    metadata::{Ascii, Binary, MetadataKey, MetadataMap, MetadataValue},
    transport::ClientTlsConfig,
};
use tracing::{debug, warn, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer, Registry};
use ulid::Ulid;

static TRACER_PROVIDER: OnceLock<TracerProvider> = OnceLock::new();

/// Crates that are noisy below these levels whatever `-v` says.
const QUIET: [&str; 5] = [
    "hyper=error",
    "h2=error",
    "tokio=error",
    "sqlx=warn",
    "opentelemetry_sdk=warn",
];

const SERVICE_NAMESPACE: &str = "sso";

/// Collector settings from the standard `OTEL_*` variables.
#[derive(Debug, PartialEq, Eq)]
struct OtlpSettings {
    endpoint: String,
    headers: HashMap<String, String>,
    service_name: String,
    instance_id: String,
    /// A non-gRPC `OTEL_EXPORTER_OTLP_PROTOCOL`, reported once logging is up.
    ignored_protocol: Option<String>,
}

impl OtlpSettings {
    /// `None` when no collector endpoint is configured.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let endpoint = lookup("OTEL_EXPORTER_OTLP_ENDPOINT")
            .map(|endpoint| endpoint.trim().to_string())
            .filter(|endpoint| !endpoint.is_empty())?;

        Some(Self {
            endpoint: normalize_endpoint(endpoint),
            headers: lookup("OTEL_EXPORTER_OTLP_HEADERS")
                .map(|headers| parse_headers_env(&headers))
                .unwrap_or_default(),
            service_name: lookup("OTEL_SERVICE_NAME")
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string()),
            instance_id: lookup("OTEL_SERVICE_INSTANCE_ID")
                .unwrap_or_else(|| Ulid::new().to_string()),
            ignored_protocol: lookup("OTEL_EXPORTER_OTLP_PROTOCOL")
                .filter(|protocol| protocol != "grpc"),
        })
    }

    /// Host to verify the collector certificate against, for `https` endpoints.
    fn tls_domain(&self) -> Option<&str> {
        self.endpoint
            .strip_prefix("https://")
            .and_then(|rest| rest.split('/').next())
            .and_then(|authority| authority.split(':').next())
            .filter(|host| !host.is_empty())
    }

    fn resource(&self) -> Resource {
        Resource::new(vec![
            KeyValue::new("service.name", self.service_name.clone()),
            KeyValue::new("service.namespace", SERVICE_NAMESPACE),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new("service.instance.id", self.instance_id.clone()),
            KeyValue::new("vcs.ref.head.revision", crate::GIT_COMMIT_HASH),
        ])
    }
}

fn parse_headers_env(headers_str: &str) -> HashMap<String, String> {
    headers_str
        .split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

// Keys ending in "-bin" carry base64 encoded binary values.
fn headers_to_metadata(headers: &HashMap<String, String>) -> Result<MetadataMap> {
    let mut meta = MetadataMap::with_capacity(headers.len());

    for (k, v) in headers {
        let key_str = k.to_ascii_lowercase();

        if key_str.ends_with("-bin") {
            let bytes = Base64::decode_vec(v)
                .map_err(|e| anyhow!("failed to base64-decode value for key {key_str}: {e}"))?;
            let key = MetadataKey::<Binary>::from_bytes(key_str.as_bytes())
                .map_err(|e| anyhow!("invalid binary metadata key {key_str}: {e}"))?;
            meta.insert_bin(key, MetadataValue::from_bytes(&bytes));
        } else {
            let key = MetadataKey::<Ascii>::from_bytes(key_str.as_bytes())
                .map_err(|e| anyhow!("invalid ASCII metadata key {key_str}: {e}"))?;
            let val: MetadataValue<_> = v
                .parse()
                .map_err(|e| anyhow!("invalid ASCII metadata value for key {key_str}: {e}"))?;
            meta.insert(key, val);
        }
    }

    Ok(meta)
}

fn normalize_endpoint(ep: String) -> String {
    if ep.starts_with("http://") || ep.starts_with("https://") {
        ep
    } else {
        format!("https://{}", ep.trim_end_matches('/'))
    }
}

fn filter(level: Level) -> Result<EnvFilter> {
    QUIET.iter().try_fold(
        EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy(),
        |filter, directive| -> Result<EnvFilter> { Ok(filter.add_directive(directive.parse()?)) },
    )
}

fn init_tracer(settings: &OtlpSettings) -> Result<Tracer> {
    let mut builder = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(settings.endpoint.as_str())
        .with_timeout(Duration::from_secs(3));

    if let Some(domain) = settings.tls_domain() {
        let tls = ClientTlsConfig::new()
            .domain_name(domain.to_string())
            .with_native_roots();
        builder = builder.with_tls_config(tls);
    }

    if !settings.headers.is_empty() {
        builder = builder.with_metadata(headers_to_metadata(&settings.headers)?);
    }

    let provider = TracerProvider::builder()
        .with_batch_exporter(builder.build()?, runtime::Tokio)
        .with_resource(settings.resource())
        .build();

    let _ = TRACER_PROVIDER.set(provider.clone());

    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ]));

    Ok(provider.tracer(env!("CARGO_PKG_NAME")))
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if the exporter cannot be built or a subscriber is
/// already installed.
pub fn init(options: LogOptions) -> Result<()> {
    let fmt_layer = match options.format {
        LogFormat::Pretty => fmt::layer()
            .with_file(false)
            .with_line_number(false)
            .with_target(false)
            .pretty()
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .boxed(),
    };
    let filter = filter(options.level)?;
    let settings = OtlpSettings::from_lookup(|key| var(key).ok());

    if let Some(settings) = &settings {
        let otel_layer = tracing_opentelemetry::layer().with_tracer(init_tracer(settings)?);
        let subscriber = Registry::default()
            .with(fmt_layer)
            .with(otel_layer)
            .with(filter);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = Registry::default().with(fmt_layer).with(filter);
        tracing::subscriber::set_global_default(subscriber)?;
    }

    if let Some(protocol) = settings.and_then(|settings| settings.ignored_protocol) {
        warn!("OTEL_EXPORTER_OTLP_PROTOCOL='{protocol}' ignored: spans are exported over gRPC");
    }

    Ok(())
}

/// Flush pending spans. Does nothing when no exporter was started.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        debug!("shutting down tracer provider");
        if let Err(err) = provider.shutdown() {
            debug!("tracer provider shutdown failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::{Key, Value};

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn no_endpoint_means_no_exporter() {
        assert!(OtlpSettings::from_lookup(lookup(&[])).is_none());
        assert!(OtlpSettings::from_lookup(lookup(&[("OTEL_EXPORTER_OTLP_ENDPOINT", " ")])).is_none());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn settings_from_otel_variables() {
        let settings = OtlpSettings::from_lookup(lookup(&[
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "collector.example.com:4317/"),
            ("OTEL_EXPORTER_OTLP_HEADERS", "x-tenant=login, authorization=Bearer t"),
            ("OTEL_EXPORTER_OTLP_PROTOCOL", "http/protobuf"),
            ("OTEL_SERVICE_NAME", "pordisto-eu"),
            ("OTEL_SERVICE_INSTANCE_ID", "node-1"),
        ]))
        .unwrap();

        assert_eq!(settings.endpoint, "https://collector.example.com:4317");
        assert_eq!(settings.tls_domain(), Some("collector.example.com"));
        assert_eq!(settings.headers.get("x-tenant").map(String::as_str), Some("login"));
        assert_eq!(settings.service_name, "pordisto-eu");
        assert_eq!(settings.instance_id, "node-1");
        assert_eq!(settings.ignored_protocol.as_deref(), Some("http/protobuf"));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn plain_http_collector_and_defaults() {
        let settings = OtlpSettings::from_lookup(lookup(&[
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://localhost:4317"),
            ("OTEL_EXPORTER_OTLP_PROTOCOL", "grpc"),
        ]))
        .unwrap();

        assert_eq!(settings.tls_domain(), None);
        assert_eq!(settings.service_name, env!("CARGO_PKG_NAME"));
        assert!(Ulid::from_string(&settings.instance_id).is_ok());
        assert!(settings.ignored_protocol.is_none());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn resource_names_the_gateway() {
        let settings = OtlpSettings::from_lookup(lookup(&[
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://localhost:4317"),
            ("OTEL_SERVICE_INSTANCE_ID", "node-1"),
        ]))
        .unwrap();
        let resource = settings.resource();

        assert_eq!(
            resource.get(Key::new("service.name")),
            Some(Value::from(env!("CARGO_PKG_NAME")))
        );
        assert_eq!(
            resource.get(Key::new("service.namespace")),
            Some(Value::from(SERVICE_NAMESPACE))
        );
        assert_eq!(
            resource.get(Key::new("service.instance.id")),
            Some(Value::from("node-1"))
        );
        assert_eq!(
            resource.get(Key::new("vcs.ref.head.revision")),
            Some(Value::from(crate::GIT_COMMIT_HASH))
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn filter_quiets_dependencies() {
        temp_env::with_var("RUST_LOG", None::<&str>, || {
            let rendered = filter(Level::DEBUG).unwrap().to_string();
            assert!(rendered.contains("debug"));
            for directive in QUIET {
                assert!(rendered.contains(directive), "{directive} in {rendered}");
            }
        });
    }

    #[test]
    fn parse_headers_env_cases() {
        assert!(parse_headers_env("").is_empty());

        let result = parse_headers_env("key1 = value1 , key2=a=b");
        assert_eq!(result.len(), 2);
        assert_eq!(result.get("key1"), Some(&"value1".to_string()));
        assert_eq!(result.get("key2"), Some(&"a=b".to_string()));

        let result = parse_headers_env("key1=value1,malformed");
        assert_eq!(result.len(), 1);
        assert!(!result.contains_key("malformed"));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn headers_to_metadata_mixed() {
        let mut headers = HashMap::new();
        headers.insert("authorization".to_string(), "Bearer token123".to_string());
        headers.insert("custom-bin".to_string(), "YmluYXJ5IGRhdGE=".to_string());

        let metadata = headers_to_metadata(&headers).unwrap();
        assert_eq!(metadata.len(), 2);
    }

    #[test]
    fn headers_to_metadata_invalid_base64() {
        let mut headers = HashMap::new();
        headers.insert("custom-bin".to_string(), "not-valid-base64!!!".to_string());

        let err = headers_to_metadata(&headers).err().map(|e| e.to_string());
        assert!(err.is_some_and(|e| e.contains("failed to base64-decode")));
    }

    #[test]
    fn shutdown_without_provider_is_noop() {
        shutdown_tracer();
    }
}
