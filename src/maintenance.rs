//! Background pool maintenance
//!
//! Two periodic tasks run while the pool is started: a monitor loop that
//! snapshots stats and drives one sizing cycle per interval, and a cleanup
//! loop that reaps idle connections and health-sweeps the rest. Both exit
//! on the pool's shutdown signal; neither ever fails a caller.

use crate::pool::PoolShared;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

pub(crate) fn spawn_monitor(
    shared: Arc<PoolShared>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let interval = shared.config.stats_collection_interval;
        debug!("pool monitor started (interval: {:?})", interval);

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => break,
            }

            if !shared.is_running() {
                break;
            }

            let stats = shared.stats();
            debug!(
                active = stats.active_connections,
                idle = stats.idle_connections,
                waiting = stats.waiting_requests,
                served = stats.total_requests_served,
                success_rate = stats.success_rate,
                "pool stats"
            );

            shared.maybe_adjust_size();
        }

        debug!("pool monitor stopped");
    })
}

pub(crate) fn spawn_cleanup(
    shared: Arc<PoolShared>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        debug!("pool cleanup started (interval: {:?})", CLEANUP_INTERVAL);

        loop {
            tokio::select! {
                _ = tokio::time::sleep(CLEANUP_INTERVAL) => {}
                _ = shutdown.changed() => break,
            }

            if !shared.is_running() {
                break;
            }

            shared.reap_idle();
            shared.health_sweep();
        }

        debug!("pool cleanup stopped");
    })
}
