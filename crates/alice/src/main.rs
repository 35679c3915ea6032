use alice::engine::AggregatorService;
use alice::source::{SourceContext, SourceRegistry};
use alice::telemetry;
use alice::web::{self, WebState};
use alice::{Aggregator, EventBus, SourceClass};
use aliceconf::AliceConfig;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// The ALICE hub daemon
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file used in place of ./alice.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP port (overrides bind.http_port)
    #[arg(short, long)]
    port: Option<u16>,

    /// OTLP gRPC endpoint (e.g. "127.0.0.1:4317"); empty disables export
    #[arg(long)]
    otlp_endpoint: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) = AliceConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(port) = cli.port {
        config.infra.bind.http_port = port;
    }
    if let Some(endpoint) = cli.otlp_endpoint {
        config.infra.telemetry.otlp_endpoint = endpoint;
    }

    if cli.print_config {
        print!("{}", config.to_toml());
        return Ok(());
    }

    telemetry::init(&config.infra.telemetry).context("Failed to initialize telemetry")?;

    for file in &sources.files {
        tracing::info!(path = %file.display(), "loaded config file");
    }
    for var in &sources.env_overrides {
        tracing::info!(var = %var, "config overridden from environment");
    }

    let context = SourceContext::new(&config.bootstrap.clients.user_agent)
        .context("Failed to build HTTP client")?;
    let registry = Arc::new(SourceRegistry::with_builtin(context));

    let engine_config = &config.infra.engine;
    let mut aggregator = Aggregator::new(
        Arc::new(EventBus::new()),
        engine_config.pending_cycle(),
        engine_config.wanted_cycle(),
        Instant::now(),
    );

    for definition in &config.bootstrap.sources.data {
        match registry.load(SourceClass::Data, definition) {
            Ok(source) => {
                aggregator.add_source(source);
            }
            Err(e) => {
                tracing::error!(
                    source_type = %definition.source_type,
                    backend = %definition.source,
                    error = %e,
                    "skipping data source"
                );
            }
        }
    }
    if aggregator.stats().data_sources == 0 {
        tracing::warn!("no data sources configured; data connectors will never resolve");
    }

    let shutdown_token = CancellationToken::new();

    let (service, engine) = AggregatorService::new(
        aggregator,
        engine_config.tick_interval(),
        engine_config.command_buffer,
    );
    let engine_task = tokio::spawn(service.run(shutdown_token.clone()));

    let addr = format!("{}:{}", config.infra.bind.address, config.infra.bind.http_port);
    tracing::info!("ALICE hub starting on http://{}", addr);
    tracing::info!("   Displays: GET ws://{}/ui", addr);
    tracing::info!("   Sensors: GET ws://{}/sensor", addr);
    tracing::info!("   Health: GET http://{}/health", addr);

    let state = WebState::new(
        engine.clone(),
        registry,
        config.bootstrap.clients.field_aliases.clone(),
    );
    let app = web::router(state);

    let bind_addr: std::net::SocketAddr = addr.parse().context("Failed to parse bind address")?;
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    let shutdown_token_srv = shutdown_token.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_token_srv.cancelled().await;
        tracing::info!("Server shutdown signal received");
    });

    tokio::spawn(async move {
        if let Err(e) = server.await {
            tracing::error!("Server shutdown with error: {:?}", e);
        }
    });

    // Periodic engine statistics
    let stats_engine = engine.clone();
    let stats_ct = shutdown_token.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match stats_engine.stats().await {
                        Ok(stats) => tracing::info!(
                            sources.data = stats.data_sources,
                            sources.sensor = stats.sensor_sources,
                            wants.active = stats.active_wants,
                            wants.pending = stats.pending_wants,
                            cache.entries = stats.cached_results,
                            "Engine statistics"
                        ),
                        Err(e) => {
                            tracing::warn!(error = %e, "engine statistics unavailable");
                            break;
                        }
                    }
                }
                _ = stats_ct.cancelled() => {
                    break;
                }
            }
        }
    });

    // Handle both SIGINT (Ctrl+C) and SIGTERM (systemd, etc.)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        result = sigterm() => {
            result.context("Failed to install SIGTERM handler")?;
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        }
    }
    shutdown_token.cancel();

    if let Err(e) = engine_task.await {
        tracing::error!("Aggregator task failed: {:?}", e);
    }

    tracing::info!("Shutdown complete");
    telemetry::shutdown();

    Ok(())
}

#[cfg(unix)]
async fn sigterm() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn sigterm() -> std::io::Result<()> {
    std::future::pending::<()>().await;
    Ok(())
}
