use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tokio::time::{interval, sleep, Duration};

use crate::core::state::AppState;
use crate::services::identify::cloud::CloudOcrService;
use crate::tasks::{maintenance, pipeline};

const TASK_WORKER_CONCURRENCY: usize = 3;

pub(crate) async fn run(state: AppState) -> Result<()> {
    let cloud = CloudOcrService::from_settings(state.settings())?.map(Arc::new);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut handles = Vec::with_capacity(TASK_WORKER_CONCURRENCY + 2);

    for _ in 0..TASK_WORKER_CONCURRENCY {
        handles.push(tokio::spawn(task_worker(state.clone(), cloud.clone(), shutdown_rx.clone())));
    }

    handles.push(tokio::spawn(stuck_copy_loop(state.clone(), shutdown_rx.clone())));
    handles.push(tokio::spawn(draft_reaper_loop(state.clone(), shutdown_rx.clone())));

    crate::core::shutdown::shutdown_signal().await;
    if shutdown_tx.send(true).is_err() {
        tracing::warn!("Failed to broadcast shutdown signal to background tasks");
    }

    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Background task join failed");
        }
    }

    Ok(())
}

async fn task_worker(
    state: AppState,
    cloud: Option<Arc<CloudOcrService>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        match pipeline::claim_next_task(state.db()).await {
            Ok(Some(task)) => {
                pipeline::run_task(&state, cloud.as_deref(), &task).await;
                continue;
            }
            Ok(None) => {}
            Err(err) => tracing::error!(error = %err, "Failed to claim background task"),
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep(Duration::from_secs(2)) => {}
        }
    }
}

async fn stuck_copy_loop(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let mut tick = interval(Duration::from_secs(300));
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                if let Err(err) = maintenance::reap_stuck_copies(&state, false).await {
                    tracing::error!(error = %err, "reap_stuck_copies failed");
                }
            }
        }
    }
}

async fn draft_reaper_loop(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let mut tick = interval(Duration::from_secs(3600));
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                if let Err(err) = maintenance::reap_expired_drafts(&state).await {
                    tracing::error!(error = %err, "reap_expired_drafts failed");
                }
            }
        }
    }
}
