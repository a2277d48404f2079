//! Coordinated shutdown of the monitor's background tasks.
//!
//! Shutdown starts either on Ctrl-C or when something inside the process
//! cancels the shared token (the analysis worker does so when the packet
//! stream ends).

use crate::constants::pipeline::SHUTDOWN_TIMEOUT_SECS;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Why [`ShutdownManager::wait_for_shutdown`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal,
    Cancelled,
}

pub struct ShutdownManager {
    /// Token to signal shutdown to all tasks
    cancel_token: CancellationToken,
    /// Handles to sinks and helpers that should finish before exit
    task_handles: Vec<JoinHandle<()>>,
    timeout: Duration,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
            task_handles: Vec::new(),
            timeout: Duration::from_secs(SHUTDOWN_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get a clone of the cancellation token for spawning tasks
    pub fn token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn register_task(&mut self, handle: JoinHandle<()>) {
        self.task_handles.push(handle);
    }

    /// Waits for Ctrl-C or an in-process cancellation, then cancels every
    /// task and joins the registered ones (bounded by the timeout).
    pub async fn wait_for_shutdown(self) -> ShutdownReason {
        let reason = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => tracing::info!("🛑 Shutdown signal received"),
                    Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
                }
                ShutdownReason::Signal
            }
            _ = self.cancel_token.cancelled() => {
                tracing::info!("🛑 Pipeline finished, shutting down");
                ShutdownReason::Cancelled
            }
        };

        self.shutdown().await;
        reason
    }

    /// Cancels the token and joins registered tasks without waiting for a
    /// signal.
    pub async fn shutdown(mut self) {
        self.cancel_token.cancel();

        let shutdown_tasks = std::pin::pin!(async {
            for handle in self.task_handles.drain(..) {
                let _ = handle.await;
            }
        });

        match tokio::time::timeout(self.timeout, shutdown_tasks).await {
            Ok(_) => {
                tracing::info!("✓ All tasks shut down gracefully");
            }
            Err(_) => {
                tracing::warn!("⏱️  Shutdown timeout: Some tasks did not complete");
            }
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
