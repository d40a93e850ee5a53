//! Background recycling of cooled-down addresses

use crate::engine::IpamState;
use crate::metrics::IpamMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Run one sweep under the allocator lock
pub(crate) async fn sweep(state: &Mutex<IpamState>, metrics: &IpamMetrics) -> usize {
    let started = Instant::now();
    let mut state = state.lock().await;
    let recycled = state.recycle(Instant::now());
    metrics.usage_updated(&state.block_usage());
    drop(state);

    metrics.sweep_completed(recycled, started.elapsed());
    recycled
}

/// Handle to the periodic sweep task
#[derive(Debug)]
pub(crate) struct Recycler {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Recycler {
    /// Spawn the sweep task on the current runtime
    pub(crate) fn spawn(state: Arc<Mutex<IpamState>>, period: Duration, metrics: IpamMetrics) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(state, period, metrics, shutdown_rx));
        info!(period_ms = period.as_millis() as u64, "Started IP recycler");
        Self { shutdown_tx, task }
    }

    /// Signal the task and wait for it to finish its current sweep
    pub(crate) async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!("IP recycler task ended abnormally: {}", e);
        }
        info!("Stopped IP recycler");
    }
}

async fn run(
    state: Arc<Mutex<IpamState>>,
    period: Duration,
    metrics: IpamMetrics,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let recycled = sweep(&state, &metrics).await;
                if recycled > 0 {
                    debug!(recycled, "Returned addresses to free pools");
                }
            }
            changed = shutdown_rx.changed() => {
                // A dropped sender also means shutdown
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}
