use anyhow::{Context, Result};
use clap::Parser;
use loqa_voice::{create_router, nats, AppState, Config, Dispatcher, NatsClient, SessionManager};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};

#[derive(Parser, Debug)]
#[command(name = "loqa-voice", about = "Real-time voice interaction server", version)]
struct Args {
    /// Config file (any format the `config` crate understands)
    #[arg(short, long, default_value = "config/loqa-voice")]
    config: String,

    /// Override the HTTP bind address
    #[arg(long)]
    host: Option<String>,

    /// Override the HTTP port
    #[arg(long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let mut cfg = Config::load(&args.config)?;
    if let Some(host) = args.host {
        cfg.service.http.bind = host;
    }
    if let Some(port) = args.port {
        cfg.service.http.port = port;
    }

    info!("Loqa Voice v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);
    info!("Replies directory: {}", cfg.session.replies_dir.display());

    let client = NatsClient::connect(
        &cfg.nats.url,
        Duration::from_secs(cfg.nats.request_timeout_secs),
    )
    .await?;
    let pipeline = Arc::new(nats::services::pipeline(client, &cfg.nats));
    let dispatcher = Arc::new(Dispatcher::new(pipeline, cfg.dispatch.worker_threads)?);

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let manager = SessionManager::new(cfg, dispatcher);
    let app = create_router(AppState::new(manager.clone()));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(manager.clone()))
        .await
        .context("HTTP server failed")?;

    manager.shutdown_all().await;
    info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl-C, then close live sessions so their sockets drain.
async fn shutdown_signal(manager: SessionManager) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
    manager.shutdown_all().await;
}
