//! Buildcache Node
//!
//! Runs one cache node: loads the YAML configuration, joins the cluster,
//! reports node metrics and serves health and Prometheus endpoints until
//! interrupted.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Buildcache Node                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │    Health    │───▶│ CacheService │◀───│   Metrics    │       │
//! │  │   /healthz   │    │              │    │   /metrics   │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use prometheus::Registry;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use buildcache::adapters::{LocalCluster, PrometheusSink, SystemDnsLookup};
use buildcache::cluster::{CacheConfig, InstanceMode, RetainingResolver};
use buildcache::error::{Error, Result};
use buildcache::CacheService;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Buildcache - distributed build-artifact cache node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "BUILDCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Node mode (server or client), overrides the configuration file
    #[arg(long, env = "BUILDCACHE_MODE")]
    mode: Option<InstanceMode>,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let mut config = match &args.config {
        Some(path) => CacheConfig::from_yaml_file(path).await?,
        None => CacheConfig::default(),
    };
    if let Some(mode) = args.mode {
        config.mode = mode;
    }

    info!("Starting buildcache node");
    info!("  Mode: {}", config.mode);
    info!("  Cache mode: {}", config.cache_mode);
    info!("  Backups: {}", config.backup_count);
    info!(
        "  Default TTL: {} {}",
        config.expiration_time_value, config.expiration_time_unit
    );
    info!("  Off-heap max size: {}", config.off_heap_max_size);

    let registry = Registry::new();
    let service = Arc::new(CacheService::new(
        Arc::new(LocalCluster::new()),
        Arc::new(RetainingResolver::new(Arc::new(SystemDnsLookup::new()))),
        Arc::new(PrometheusSink::new(registry.clone())),
    ));

    service.init(&config, config.mode).await.map_err(|e| {
        error!("Failed to join cluster: {}", e);
        e
    })?;
    service.start()?;

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_service = Arc::clone(&service);
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_service).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, registry).await {
            error!("Metrics server error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    service.stop().await;
    info!("Node shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    if let Ok(directive) = "hyper=warn".parse() {
        filter = filter.add_directive(directive);
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// HTTP Helpers
// =============================================================================

type HttpResponse = hyper::Response<http_body_util::Full<hyper::body::Bytes>>;

fn respond(status: hyper::StatusCode, content_type: &str, body: impl Into<hyper::body::Bytes>) -> HttpResponse {
    let mut response = hyper::Response::new(http_body_util::Full::new(body.into()));
    *response.status_mut() = status;
    if let Ok(value) = hyper::header::HeaderValue::from_str(content_type) {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

async fn bind(addr: &str, name: &str) -> Result<tokio::net::TcpListener> {
    let addr: std::net::SocketAddr = addr
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid {} server address: {}", name, e)))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind {} server: {}", name, e)))?;

    info!("{} server listening on {}", name, addr);
    Ok(listener)
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: &str, service: Arc<CacheService>) -> Result<()> {
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, StatusCode};
    use hyper_util::rt::TokioIo;

    async fn health_handler(
        req: Request<hyper::body::Incoming>,
        service: Arc<CacheService>,
    ) -> std::result::Result<HttpResponse, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/livez" => respond(StatusCode::OK, "text/plain", "ok"),
            "/healthz" | "/readyz" => {
                let health = service.health().await;
                let status = if health.status.is_operational() {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                match serde_json::to_vec(&health) {
                    Ok(body) => respond(status, "application/json", body),
                    Err(e) => respond(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "text/plain",
                        e.to_string(),
                    ),
                }
            }
            _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found"),
        };
        Ok(response)
    }

    let listener = bind(addr, "Health").await?;

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("Health server accept error: {}", e)))?;

        let io = TokioIo::new(stream);
        let service = Arc::clone(&service);

        tokio::spawn(async move {
            let handler = service_fn(move |req| health_handler(req, Arc::clone(&service)));
            if let Err(e) = http1::Builder::new().serve_connection(io, handler).await {
                tracing::error!("Health server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, registry: Registry) -> Result<()> {
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, StatusCode};
    use hyper_util::rt::TokioIo;
    use prometheus::{Encoder, TextEncoder};

    async fn metrics_handler(
        req: Request<hyper::body::Incoming>,
        registry: Registry,
    ) -> std::result::Result<HttpResponse, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/metrics" => {
                let encoder = TextEncoder::new();
                let mut buffer = Vec::new();
                match encoder.encode(&registry.gather(), &mut buffer) {
                    Ok(()) => respond(StatusCode::OK, encoder.format_type(), buffer),
                    Err(e) => respond(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "text/plain",
                        e.to_string(),
                    ),
                }
            }
            _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found"),
        };
        Ok(response)
    }

    let listener = bind(addr, "Metrics").await?;

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("Metrics server accept error: {}", e)))?;

        let io = TokioIo::new(stream);
        let registry = registry.clone();

        tokio::spawn(async move {
            let handler = service_fn(move |req| metrics_handler(req, registry.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, handler).await {
                tracing::error!("Metrics server connection error: {}", e);
            }
        });
    }
}
