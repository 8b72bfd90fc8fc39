//! Idle sweeper
//!
//! Periodic background task that discards drafts idle beyond their window
//! (returning their reservations to the shared pool) and abandons stale open
//! sessions. Policy-driven cleanup, not cancellation of in-flight work.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::engine::StagingEngine;

/// Spawn the sweep loop; resolves when the token is cancelled
pub fn spawn(engine: Arc<StagingEngine>, cancel: CancellationToken) -> JoinHandle<()> {
    let period = std::time::Duration::from_millis(engine.config().sweep_interval_ms);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The immediate first tick would sweep before anything can be idle
        interval.tick().await;
        tracing::info!(period_ms = period.as_millis() as u64, "Idle sweeper started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Idle sweeper stopped");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(err) = engine.sweep_idle_drafts().await {
                        tracing::error!(error = %err, "Draft sweep failed");
                    }
                    if let Err(err) = engine.sweep_idle_sessions().await {
                        tracing::error!(error = %err, "Session sweep failed");
                    }
                }
            }
        }
    })
}
