//! Process-wide shutdown signal
//!
//! Triggering never blocks and never joins anything, so it is safe to call
//! from a method running inside a session. The accept loops and sessions
//! observe the signal and wind themselves down.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Requests shutdown. Returns `true` for the first request only.
    pub fn trigger(&self, reason: &str) -> bool {
        let already = self.sender.send_replace(true);
        if !already {
            info!(reason, "shutdown requested");
        }
        !already
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once shutdown has been requested, immediately if it already was.
    pub async fn wait(&self) {
        let mut receiver = self.sender.subscribe();
        let _ = receiver.wait_for(|stopped| *stopped).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
