mod http;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use fireball_core::defcon::DefconClient;
use fireball_core::engine::BollardEngine;
use fireball_core::reconciler;
use fireball_core::repo::RepoWatcher;
use fireball_core::siren::SirenClient;
use fireball_core::state::AppContext;
use fireball_core::FireballConfig;
use tokio::signal;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Exploit execution orchestrator for an attack/defense CTF")]
struct Cli {
    /// Bind address for the admin HTTP surface.
    #[arg(long, default_value = "0.0.0.0:8000")]
    listen: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = FireballConfig::from_env();
    init_logging(config.log_webhook_url.clone());

    info!(prod_mode = config.prod_mode, repo_path = %config.repo_path, "starting fireball");

    let engine = Arc::new(
        BollardEngine::connect(&config.docker_socket).context("failed to connect to the container engine")?,
    );
    let siren = SirenClient::new(config.scoring_url.clone());
    let defcon = DefconClient::new(config.game_api_url.clone());
    let repo = RepoWatcher::new(&config.repo_path, &config.repo_branch).context("failed to open exploit repo")?;

    let ctx = Arc::new(AppContext::new(
        engine,
        siren,
        defcon,
        repo,
        std::path::PathBuf::from(&config.repo_path),
        config.current_team_slug.clone(),
    ));

    ctx.connect().await.context("startup bootstrap failed")?;

    let reconciler_handle = spawn_reconciler(ctx.clone(), config.poll_interval_seconds, config.max_running_containers);

    let app = http::router(ctx.clone());
    let listener = tokio::net::TcpListener::bind(&cli.listen).await?;
    info!(listen = %cli.listen, "admin HTTP surface up");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Acquire the main lock first so any in-flight reconciliation iteration
    // finishes draining, then cancel the timer task.
    let _ = ctx.state.lock().await;
    reconciler_handle.abort();

    Ok(())
}

fn spawn_reconciler(ctx: Arc<AppContext>, poll_interval_seconds: u64, max_running_containers: usize) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(poll_interval_seconds));
        loop {
            interval.tick().await;
            let mut state = ctx.state.lock().await;
            reconciler::run_iteration(&ctx, &mut state, max_running_containers).await;
        }
    })
}

fn init_logging(webhook_url: Option<String>) {
    let registry = tracing_subscriber::registry().with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    match webhook_url {
        Some(url) => registry
            .with(tracing_subscriber::fmt::layer())
            .with(fireball_core::webhook_log::WebhookLogLayer::new(Some(url)))
            .init(),
        None => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
