//! Background drain loop for the sync queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::SyncQueue;
use crate::remote::Connectivity;

/// Drains the queue on an interval, when nudged, and right after reconnecting.
pub struct SyncWorker {
    nudge: Arc<Notify>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SyncWorker {
    pub fn spawn(queue: SyncQueue, connectivity: Connectivity, interval: Duration) -> Self {
        let nudge = Arc::new(Notify::new());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run(queue, connectivity, interval, Arc::clone(&nudge), shutdown_rx));
        Self {
            nudge,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Ask for a drain pass soon. The per-type minimum interval still applies.
    pub fn nudge(&self) {
        self.nudge.notify_one();
    }

    /// Stop the loop and wait for an in-progress pass to finish.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if let Err(error) = handle.await {
                tracing::warn!("Sync worker exited abnormally: {error}");
            }
        }
    }

    fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(
    queue: SyncQueue,
    connectivity: Connectivity,
    interval: Duration,
    nudge: Arc<Notify>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut online = connectivity.watch();
    let mut was_online = *online.borrow_and_update();
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(interval_ms = interval.as_millis(), "Sync worker started");

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                if was_online {
                    queue.drain_all(false).await;
                }
            }
            () = nudge.notified() => {
                if was_online {
                    queue.drain_all(false).await;
                }
            }
            changed = online.changed() => {
                if changed.is_err() {
                    break;
                }
                let now_online = *online.borrow_and_update();
                if now_online && !was_online {
                    tracing::info!("Connectivity restored; draining sync queue");
                    match queue.clear_delays().await {
                        Ok(cleared) if cleared > 0 => tracing::debug!(count = cleared, "Cleared retry delays"),
                        Ok(_) => {}
                        Err(error) => tracing::warn!("Failed to clear retry delays: {error}"),
                    }
                    queue.drain_all(true).await;
                }
                was_online = now_online;
            }
        }
    }
    tracing::info!("Sync worker stopped");
}
