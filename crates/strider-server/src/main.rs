use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use strider_client::{ItemProcessor, default_module_set};
use strider_core::{
    CrawlConfig, CrawlerError, DefaultDomainResolver, DomainResolver, HttpRequest, Item, Monitor,
    MonitorConfig, Scheduler, Status, TracingMonitorReporter,
};
use strider_server::routes;
use strider_server::state::AppState;

#[derive(Parser)]
#[command(name = "strider-server", version, about = "Crawl a site and expose its scheduler over HTTP")]
struct Args {
    /// Seed URL
    #[arg(long, env = "STRIDER_URL")]
    url: String,

    /// JSON crawl configuration
    #[arg(long, env = "STRIDER_CONFIG")]
    config: Option<PathBuf>,

    /// Bearer token for the /v1 endpoints; they answer 403 without one
    #[arg(long, env = "STRIDER_SERVER_API_KEY")]
    api_key: Option<String>,

    #[arg(long, env = "STRIDER_SERVER_PORT", default_value_t = 3000)]
    port: u16,

    /// Consecutive idle checks after which the crawl is stopped
    #[arg(long, env = "STRIDER_IDLE_CHECKS", default_value_t = 5)]
    idle_checks: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("strider=info".parse()?))
        .with_target(false)
        .init();

    let args = Args::parse();
    if args.api_key.is_none() {
        tracing::warn!("STRIDER_SERVER_API_KEY not set, control endpoints are disabled");
    }

    let seed = HttpRequest::parse(&args.url).context("Invalid seed URL")?;
    let mut config = match &args.config {
        Some(path) => CrawlConfig::from_path(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => CrawlConfig::default(),
    };
    if config.request.accepted_domains.is_empty() {
        let host = seed.host().context("Seed URL has no host")?;
        config
            .request
            .accepted_domains
            .push(DefaultDomainResolver.primary_domain(host)?);
    }

    let modules = default_module_set(&config, vec![log_item()])
        .context("Failed to build crawler modules")?;
    let scheduler = Scheduler::new();
    scheduler
        .init(config.request.clone(), config.buffers, modules)
        .context("Failed to initialize scheduler")?;
    if let Some(mut errors) = scheduler.error_chan() {
        tokio::spawn(async move {
            while let Some(error) = errors.recv().await {
                tracing::warn!(%error, "Crawl error");
            }
        });
    }
    scheduler.start(seed).context("Failed to start scheduler")?;

    let shutdown = CancellationToken::new();
    let monitor = Monitor::new(
        scheduler.clone(),
        MonitorConfig::default().with_max_idle_count(args.idle_checks),
    );
    let monitor_token = shutdown.clone();
    let monitor_task = tokio::spawn(async move {
        if let Err(e) = monitor.run(monitor_token, &TracingMonitorReporter).await {
            tracing::error!(error = %e, "Monitor failed");
        }
    });

    let state = Arc::new(AppState {
        scheduler: scheduler.clone(),
        api_key: args.api_key,
    });
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", args.port);
    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), monitor_task).await;
    if scheduler.status() == Status::Started {
        scheduler.stop()?;
    }
    Ok(())
}

/// Logs every item at info level.
fn log_item() -> ItemProcessor {
    Arc::new(|item: Item| -> Result<Item, CrawlerError> {
        let url = item.get("url").and_then(|v| v.as_str()).unwrap_or_default();
        tracing::info!(%url, "Item");
        Ok(item)
    })
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for CTRL+C");
            }
        }
        () = shutdown.cancelled() => {}
    }
    tracing::info!("Shutdown signal received");
}
