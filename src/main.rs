use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use build_publisher::builds::FsBuildStore;
use build_publisher::config::PublisherConfig;
use build_publisher::server::{AppState, build_router};
use build_publisher::status::StatusTracker;
use build_publisher::target::TargetRegistry;
use build_publisher::worker::{AuditLog, PostActions, WorkerContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "build_publisher=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = PublisherConfig::load().context("loading configuration")?;
    let targets = config
        .target_settings()
        .context("validating target configuration")?;

    let ctx = WorkerContext {
        store: Arc::new(FsBuildStore::new(config.builds_root.clone())),
        tracker: Arc::new(StatusTracker::new()),
        post_actions: PostActions::new().with(AuditLog),
        options: config.worker_options(),
        state_dir: config.state_dir.clone(),
    };
    let registry = Arc::new(TargetRegistry::load(ctx, targets));
    let app = build_router(AppState::new(registry.clone()));

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, builds_root = %config.builds_root.display(), "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    tracing::info!("shutting down publishing workers");
    registry.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
