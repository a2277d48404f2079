//! Periodic directory refresh feeding the engine's update channel.
//!
//! Startup refresh is fail-fast; here a failed refresh only costs one tick.

use super::{RelayDirectory, RelaySnapshot};
use crate::error::DirectoryError;
use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub fn spawn_refresher(
    directory: Arc<RelayDirectory>,
    period: Duration,
    current_published: DateTime<Local>,
    updates: mpsc::Sender<Arc<RelaySnapshot>>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Directory refresher started (every {}s)", period.as_secs());
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        let mut last_published = current_published;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    match directory.refresh(&token).await {
                        Ok(snapshot) if snapshot.published() > last_published => {
                            last_published = snapshot.published();
                            if updates.send(snapshot).await.is_err() {
                                debug!("Directory update channel closed");
                                break;
                            }
                        }
                        Ok(_) => debug!("Guard directory unchanged"),
                        Err(DirectoryError::Cancelled) => break,
                        Err(e) => warn!("⚠️  Directory refresh failed, keeping current snapshot: {}", e),
                    }
                }
            }
        }
        info!("Directory refresher shutting down gracefully");
    })
}
