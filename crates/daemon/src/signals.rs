//! Interrupt/termination signal handling

use anyhow::{Context, Result};
use futures::stream::{self, BoxStream, StreamExt};

/// Listens for SIGINT and SIGTERM (Ctrl+C elsewhere)
pub struct ShutdownSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    pub fn install() -> Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            Ok(Self {
                interrupt: signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?,
                terminate: signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?,
            })
        }

        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Endless stream of received signal names
    pub fn into_stream(self) -> BoxStream<'static, String> {
        stream::unfold(self, |mut signals| async move {
            let name = signals.recv().await;
            Some((name, signals))
        })
        .boxed()
    }

    /// Wait for the next signal and return its name
    pub async fn recv(&mut self) -> String {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = self.interrupt.recv() => "SIGINT".to_string(),
                _ = self.terminate.recv() => "SIGTERM".to_string(),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            "CTRL_C".to_string()
        }
    }
}
