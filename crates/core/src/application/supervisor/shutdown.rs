// Shutdown / abort token

use tokio::sync::watch;

/// Cancellation signal observed by in-flight startups and run loops
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Check if shutdown was requested
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for shutdown signal (returns at once if already requested)
    pub async fn wait(&mut self) {
        // Err only when the sender is gone, which also means nobody can cancel us anymore
        let _ = self.rx.wait_for(|requested| *requested).await;
    }
}

/// Shutdown sender
pub struct ShutdownSender {
    tx: watch::Sender<bool>,
}

impl ShutdownSender {
    /// Signal shutdown to every token holder
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    /// Create another token observing this sender
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            rx: self.tx.subscribe(),
        }
    }
}

/// Create a shutdown channel
pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSender { tx }, ShutdownToken { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_returns_after_signal() {
        let (tx, mut token) = shutdown_channel();
        assert!(!token.is_shutdown());

        tx.shutdown();
        tokio::time::timeout(Duration::from_millis(100), token.wait())
            .await
            .expect("token should resolve after shutdown");
        assert!(token.is_shutdown());
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_shutdown() {
        let (tx, _token) = shutdown_channel();
        tx.shutdown();

        let mut late = tx.token();
        assert!(late.is_shutdown());
        tokio::time::timeout(Duration::from_millis(100), late.wait())
            .await
            .expect("late token should resolve immediately");
    }
}
