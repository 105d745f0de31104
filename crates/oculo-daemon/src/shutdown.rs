//! Graceful shutdown coordination.
//!
//! A single [`CancellationToken`] acts as the shutdown broadcast: cloning it
//! is cheap and a copy is handed to the accept loop, every connection task,
//! the flush loop, and the metrics server. [`shutdown_signal`] resolves when
//! an OS signal arrives and cancels the token.

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Wait for SIGTERM/SIGINT (Ctrl-C on non-Unix) or an external cancellation,
/// then propagate the cancellation to all subsystems.
pub async fn shutdown_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => info!("shutdown signal received (SIGTERM)"),
            _ = sigint.recv() => info!("shutdown signal received (SIGINT)"),
            _ = token.cancelled() => info!("shutdown requested"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("shutdown signal received (Ctrl-C)"),
            _ = token.cancelled() => info!("shutdown requested"),
        }
    }

    token.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_external_cancellation_resolves() {
        let token = CancellationToken::new();
        let trigger = token.clone();

        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let start = tokio::time::Instant::now();
        shutdown_signal(token.clone()).await;
        assert!(start.elapsed().as_millis() < 1000);
        assert!(token.is_cancelled());
    }
}
