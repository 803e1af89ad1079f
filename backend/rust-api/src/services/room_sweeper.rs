use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use super::room_registry::RoomRegistry;

/// Periodically evicts rooms that nobody is connected to anymore.
pub struct RoomSweeper {
    registry: Arc<RoomRegistry>,
    interval: Duration,
}

impl RoomSweeper {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        let interval = registry.settings().sweep_interval();
        Self { registry, interval }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    pub async fn run(&self) {
        info!(
            "Starting room sweeper loop (interval {}s, grace {}s)",
            self.interval.as_secs(),
            self.registry.settings().idle_grace_seconds
        );

        loop {
            sleep(self.interval).await;
            self.run_once().await;
        }
    }

    pub async fn run_once(&self) -> usize {
        let evicted = self.registry.evict_idle(Instant::now()).await;
        if evicted.is_empty() {
            debug!("Room sweeper tick: nothing to evict");
        } else {
            info!(count = evicted.len(), rooms = ?evicted, "Room sweeper evicted idle rooms");
        }
        evicted.len()
    }
}
