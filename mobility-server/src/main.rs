//! mobilityd
//!
//! Subscriber IP address allocation daemon for the mobile gateway

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use clap::Parser;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use mobility_common::{protocol::endpoints, ServerConfig};
use mobility_ipam::{IpAllocator, IpPoolAllocator, IpamMetrics};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tracing::{info, warn};

mod config;
mod handlers;
mod middleware;
mod service;

use service::MobilityService;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "MOBILITYD_CONFIG", default_value = "mobilityd.toml")]
    config: String,

    /// Bind address (overrides config)
    #[arg(long, env = "MOBILITYD_BIND")]
    bind: Option<SocketAddr>,

    /// Seconds a released address cools down before reuse (overrides config)
    #[arg(long, env = "MOBILITYD_RECYCLE_INTERVAL")]
    recycle_interval: Option<u64>,

    /// Log level (overrides config)
    #[arg(long)]
    log_level: Option<String>,
}

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    service: Arc<MobilityService>,
    prometheus: Option<PrometheusHandle>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = config::load_config(&args.config).await?;

    // Override config with command line arguments
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(secs) = args.recycle_interval {
        config.allocator.recycle_interval_secs = secs;
    }
    if let Some(log_level) = args.log_level {
        config.log_level = log_level;
    }

    init_tracing(&config.log_level)?;

    info!("Starting mobilityd v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {:#?}", config);

    let prometheus = if config.metrics_config.enabled {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("Failed to initialize Prometheus metrics")?;
        metrics::gauge!(
            format!("{}_info", config.metrics_config.metrics_prefix),
            "version" => env!("CARGO_PKG_VERSION")
        )
        .set(1.0);
        Some(handle)
    } else {
        None
    };

    let allocator = build_allocator(&config).await?;
    let service = Arc::new(MobilityService::new(allocator));

    let app_state = AppState {
        service: Arc::clone(&service),
        prometheus,
    };

    // Build the application router
    let app = build_router(app_state, Duration::from_secs(config.request_timeout_secs));

    // Start the server
    let listener = TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_address))?;

    info!("mobilityd listening on {}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    service.shutdown().await;
    info!("mobilityd stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = log_level.parse::<tracing::Level>()
        .context("Invalid log level")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    format!("mobility_server={},mobility_ipam={}", log_level, log_level).into()
                })
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Create the allocator, register configured blocks and start recycling
async fn build_allocator(config: &ServerConfig) -> Result<Arc<dyn IpAllocator>> {
    let metrics = IpamMetrics::new(&config.metrics_config.metrics_prefix);
    let allocator = IpPoolAllocator::with_metrics(config.allocator.clone(), metrics);

    let blocks = config
        .allocator
        .parse_ip_blocks()
        .context("Invalid IP block in configuration")?;
    for block in blocks {
        allocator
            .add_ip_block(block)
            .await
            .with_context(|| format!("Failed to register configured block {}", block))?;
    }

    allocator.start_recycler().await;
    Ok(Arc::new(allocator))
}

/// Resolve when the process is asked to stop
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Build the application router with all routes
fn build_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        // Health check endpoint
        .route(endpoints::HEALTH, get(handlers::health_check))

        // IP block management
        .route(endpoints::ADD_IP_BLOCK, post(handlers::add_ip_block))
        .route(endpoints::REMOVE_IP_BLOCK, post(handlers::remove_ip_block))
        .route(endpoints::LIST_IPV4_BLOCKS, get(handlers::list_added_ipv4_blocks))

        // Subscriber addresses
        .route(endpoints::ALLOCATE_IP, post(handlers::allocate_ip_address))
        .route(endpoints::RELEASE_IP, post(handlers::release_ip_address))
        .route(endpoints::LIST_ALLOCATED_IPS, post(handlers::list_allocated_ips))
        .route(endpoints::SUBSCRIBER_IP_TABLE, get(handlers::subscriber_ip_table))

        // Gateway information
        .route(
            endpoints::GATEWAY_INFO,
            get(handlers::get_gateway_info).put(handlers::set_gateway_info),
        )

        // Metrics endpoint
        .route(endpoints::METRICS, get(handlers::metrics_handler))

        // Add middleware
        .layer(
            ServiceBuilder::new()
                .layer(middleware::logging_middleware())
                .layer(middleware::cors_middleware())
                .layer(middleware::timeout_middleware(request_timeout)),
        )

        // Add shared state
        .with_state(state)
}
