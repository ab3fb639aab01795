//! Background eviction of idle sessions.

use crate::context::ServerContext;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Spawn the timeout sweeper. It scans every `every` and evicts sessions idle
/// for longer than `timeout`, until `shutdown` fires.
pub fn spawn_timeout_sweeper(
    context: Arc<ServerContext>,
    every: Duration,
    timeout: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("⏱️ Session sweeper running every {:?} (timeout {:?})", every, timeout);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = context.sweep(Instant::now().into_std(), timeout);
                    if !evicted.is_empty() {
                        debug!("Evicted {} idle session(s)", evicted.len());
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Session sweeper stopping");
                    break;
                }
            }
        }
    })
}
