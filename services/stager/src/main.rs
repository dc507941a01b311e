//! Stager
//!
//! Accepts staging requests over HTTP, turns each into a task with an
//! ordered action plan, and desires it on the bulletin board for an
//! executor to run.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use stager::{api, config::Config, state::AppState, Stager};
use stager_bbs::{Bbs, ExecutorBbs, FileServerBbs};
use stager_store::MemoryStore;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEV_FILE_SERVER_ID: &str = "dev";

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to STAGER_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting stager");
    info!(
        listen_addr = %config.listen_addr,
        stacks = ?config.compilers.stacks().collect::<Vec<_>>(),
        "Configuration loaded"
    );
    if config.compilers.is_empty() {
        warn!("No compilers configured; every staging request will be rejected");
    }

    let bbs = Bbs::new(Arc::new(MemoryStore::new()));

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // In-process file server presence and task log (dev only)
    let dev_presence = match &config.dev_file_server_url {
        Some(url) => {
            let lease = bbs
                .maintain_file_server_presence(config.presence_ttl, url, DEV_FILE_SERVER_ID)
                .await?;
            info!(address = %url, "Registered dev file server");
            Some(lease)
        }
        None => None,
    };
    let task_log_handle = spawn_desired_task_log(&bbs, shutdown_rx.clone()).await?;

    // Create application state
    let stager = Stager::new(Arc::new(bbs.clone()), config.compilers.clone());
    let state = AppState::new(stager, Arc::new(bbs));

    // Build and run the server
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    // Spawn the server with graceful shutdown
    let server_handle = tokio::spawn({
        let mut shutdown_rx = shutdown_rx;
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.wait_for(|stop| *stop).await;
                    info!("HTTP server shutting down");
                })
                .await
        }
    });

    // Wait for shutdown signal (Ctrl+C)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    // Signal shutdown to background tasks
    let _ = shutdown_tx.send(true);

    if let Some(lease) = dev_presence {
        lease.release().await;
    }

    if tokio::time::timeout(Duration::from_secs(10), task_log_handle)
        .await
        .is_err()
    {
        warn!("Desired task log did not shut down in time");
    }

    info!("Stager shutdown complete");
    Ok(())
}

/// Log every task desired on the in-process board until shutdown.
async fn spawn_desired_task_log(
    bbs: &Bbs,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<tokio::task::JoinHandle<()>> {
    let (mut tasks, mut errors, canceller) = bbs.watch_for_desired_task().await?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                task = tasks.recv() => {
                    let Some(task) = task else { break };
                    info!(
                        guid = %task.guid,
                        reply_to = %task.reply_to,
                        actions = ?task.actions.iter().map(|a| a.name()).collect::<Vec<_>>(),
                        "Desired task"
                    );
                }
                Some(e) = errors.recv() => {
                    warn!(error = %e, "Desired task watch error");
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        canceller.cancel();
    }))
}
