//! Background tasks for the Warden server.
//!
//! Includes:
//! - Refreshing permissions at startup and sweeping pending join requests.
//! - Recording every activity event to the store.

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::sleep;
use warden_rules::ModerationEngine;
use warden_store::SqliteStore;
use warden_types::NormalizedEvent;

/// Delay before the first permission refresh is retried after a failure.
const REFRESH_RETRY: Duration = Duration::from_secs(30);

/// Starts the permission refresh and pending-request sweep task.
///
/// Permissions are refreshed once before the first sweep, retrying until
/// the platform answers. Sweeps then run every `sweep_interval_secs`;
/// `0` disables them.
pub async fn start_sweep_task(engine: ModerationEngine) {
    loop {
        match engine.refresh_permissions().await {
            Ok(groups) => {
                tracing::info!(groups, "moderation permissions loaded");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, retry_secs = REFRESH_RETRY.as_secs(), "permission refresh failed");
                sleep(REFRESH_RETRY).await;
            }
        }
    }

    let Some(interval) = engine.config().sweep_interval() else {
        tracing::warn!("pending join request sweep disabled (interval=0)");
        return;
    };
    tracing::info!(interval_secs = interval.as_secs(), "starting join request sweep task");

    loop {
        sleep(interval).await;

        match engine.process_all_pending_requests(None).await {
            Ok(summary) => {
                if summary.pending > 0 {
                    tracing::info!(
                        groups = summary.groups,
                        pending = summary.pending,
                        enforced = summary.enforced,
                        deferred = summary.deferred,
                        failed = summary.failed,
                        "swept pending join requests"
                    );
                }
            }
            Err(e) => {
                tracing::error!("join request sweep failed: {}", e);
            }
        }
    }
}

/// Writes every event received on `rx` to the store until the bus closes.
pub async fn start_event_recorder(
    mut rx: broadcast::Receiver<NormalizedEvent>,
    store: SqliteStore,
) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event recorder lagged; events were not persisted");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let store = store.clone();
        let kind = event.kind;
        let res = tokio::task::spawn_blocking(move || store.insert_event(&event)).await;

        match res {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                tracing::error!(kind = %kind, "failed to persist activity event: {}", e);
            }
            Err(e) => {
                tracing::error!("event recorder join error: {}", e);
            }
        }
    }
    tracing::info!("event recorder stopped");
}
