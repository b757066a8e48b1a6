use anyhow::{Context, Result};
use clap::Parser;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use puosu_server::{Api, Server, ServerConfig};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() -> Result<()> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .ok()
        .and_then(|value| {
            let trimmed = value.trim().to_string();
            (!trimmed.is_empty()).then_some(trimmed)
        });

    if let Some(endpoint) = endpoint {
        let service_name =
            std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "puosu-server".to_string());
        let rate = std::env::var("OTEL_SAMPLING_RATE")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .map(|value| value.clamp(0.0, 1.0))
            .unwrap_or(1.0);
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .build()
            .context("failed to build OTLP exporter")?;
        let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
            .with_sampler(opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(rate))
            .with_resource(
                opentelemetry_sdk::Resource::builder_empty()
                    .with_attributes([opentelemetry::KeyValue::new("service.name", service_name)])
                    .build(),
            )
            .with_batch_exporter(exporter)
            .build();
        let tracer = tracer_provider.tracer("puosu-server");
        opentelemetry::global::set_tracer_provider(tracer_provider);

        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_filter(LevelFilter::INFO))
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    Ok(())
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host interface to bind (default: localhost).
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// YAML config file; CLI flags and environment overrides win over it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite datastore path (in-memory when omitted).
    #[arg(long)]
    database_path: Option<PathBuf>,

    /// Base URL of the match statistics API.
    #[arg(long)]
    stats_api_url: Option<String>,

    /// Seed for the simulation RNG (optional).
    #[arg(long)]
    deterministic_seed: Option<u64>,

    /// Function rate limit per IP in requests per minute (0 disables rate limiting).
    #[arg(long)]
    function_rate_limit_per_minute: Option<u64>,

    /// Function rate limit burst size (0 disables rate limiting).
    #[arg(long)]
    function_rate_limit_burst: Option<u32>,

    /// Max request body size in bytes (0 disables limit).
    #[arg(long)]
    http_body_limit_bytes: Option<usize>,
}

fn is_production() -> bool {
    matches!(
        std::env::var("NODE_ENV").as_deref(),
        Ok("production") | Ok("prod")
    )
}

/// Maps an optional arg value to Option: 0 => None, Some(v) => Some(v), None => default
fn map_optional_limit<T: Copy + PartialEq + From<u8>>(
    arg: Option<T>,
    default: Option<T>,
) -> Option<T> {
    match arg {
        Some(v) if v == T::from(0) => None,
        Some(v) => Some(v),
        None => default,
    }
}

fn build_config(args: &Args) -> Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::from_yaml_file(path)?,
        None => ServerConfig::default(),
    };
    config.apply_env()?;

    if let Some(path) = &args.database_path {
        config.database_path = Some(path.clone());
    }
    if let Some(url) = &args.stats_api_url {
        config.stats_api_url = Some(url.clone());
    }
    config.deterministic_seed = args.deterministic_seed.or(config.deterministic_seed);
    config.function_rate_limit_per_minute = map_optional_limit(
        args.function_rate_limit_per_minute,
        config.function_rate_limit_per_minute,
    );
    config.function_rate_limit_burst =
        map_optional_limit(args.function_rate_limit_burst, config.function_rate_limit_burst);
    config.http_body_limit_bytes =
        map_optional_limit(args.http_body_limit_bytes, config.http_body_limit_bytes);

    config.validate()?;
    Ok(config)
}

fn require_env(var: &str) -> Result<String> {
    let value = std::env::var(var).unwrap_or_default();
    if value.trim().is_empty() {
        anyhow::bail!("Missing required env: {var}");
    }
    Ok(value)
}

fn ensure_production_env(config: &ServerConfig) -> Result<()> {
    if !is_production() {
        return Ok(());
    }

    require_env("METRICS_AUTH_TOKEN")?;
    if config.function_rate_limit().is_none() {
        anyhow::bail!("function rate limit must be configured in production");
    }
    if config.database_path.is_none() {
        anyhow::bail!("database_path must be configured in production");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let args = Args::parse();
    let config = build_config(&args)?;
    ensure_production_env(&config)?;

    let server = Arc::new(Server::open(config)?);
    let api = Api::new(server);
    let app = api.router();

    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "puosu server listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server exited")?;

    Ok(())
}
