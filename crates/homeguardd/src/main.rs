use anyhow::{Context, Result};
use homeguard_media::cleanup_old_files;
use homeguardd::config::Config;
use homeguardd::engine::spawn_engine;
use homeguardd::{create_router, AppState};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const RETENTION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "homeguardd starting");

    let config = Config::from_env();
    tracing::info!(
        data_dir = %config.data_dir.display(),
        model_dir = %config.model_dir.display(),
        match_distance = config.match_distance,
        intrusion_frames = config.intrusion_frames,
        dev_mode = config.alert.dev_mode,
        "config loaded"
    );

    let engine = spawn_engine(&config.scrfd_model_path(), &config.arcface_model_path())
        .context("loading face models")?;

    let listen_addr = config.listen_addr.clone();
    let retention = config.retention;
    let cleanup_dirs = vec![config.videos_dir(), config.detected_faces_dir()];

    let state = AppState::new(config, engine)?;
    spawn_retention(cleanup_dirs, retention);

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("binding {listen_addr}"))?;
    tracing::info!(addr = %listen_addr, "homeguardd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("homeguardd shutting down");
    Ok(())
}

/// Delete old recordings and snapshots now, then once a day.
fn spawn_retention(dirs: Vec<PathBuf>, max_age: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RETENTION_INTERVAL);
        loop {
            ticker.tick().await;
            for dir in &dirs {
                let target = dir.clone();
                let summary =
                    tokio::task::spawn_blocking(move || cleanup_old_files(&target, max_age)).await;
                match summary {
                    Ok(s) => tracing::info!(
                        dir = %dir.display(),
                        files_deleted = s.files_deleted,
                        bytes_freed = s.bytes_freed,
                        errors = s.errors,
                        "retention cleanup finished"
                    ),
                    Err(e) => tracing::error!(error = %e, dir = %dir.display(), "retention cleanup panicked"),
                }
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
