//! Shutdown signalling shared by the scheduler and the workers.
//!
//! One `watch::Sender<bool>` is owned by the service; every task holds a
//! receiver and stops once it reads `true` or the sender is dropped.

use tokio::sync::watch;

/// Creates the shutdown channel in the running state.
pub fn channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Resolves once shutdown was requested or the sender is gone.
pub async fn requested(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

/// Sleeps for `duration` unless shutdown arrives first.
///
/// Returns true if shutdown was requested.
pub async fn sleep_or_shutdown(
    shutdown_rx: &mut watch::Receiver<bool>,
    duration: std::time::Duration,
) -> bool {
    tokio::select! {
        biased;
        _ = requested(shutdown_rx) => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_without_signal() {
        let (_tx, mut rx) = channel();
        assert!(!sleep_or_shutdown(&mut rx, Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_interrupts_sleep() {
        let (tx, mut rx) = channel();
        let sleeper = tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            let stopped = sleep_or_shutdown(&mut rx, Duration::from_secs(3600)).await;
            (stopped, started.elapsed())
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        tx.send(true).unwrap();

        let (stopped, elapsed) = sleeper.await.unwrap();
        assert!(stopped);
        assert!(elapsed < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_dropped_sender_counts_as_shutdown() {
        let (tx, mut rx) = channel();
        drop(tx);
        requested(&mut rx).await;
    }

    #[tokio::test]
    async fn test_signal_sent_before_wait_is_seen() {
        let (tx, mut rx) = channel();
        tx.send(true).unwrap();
        assert!(sleep_or_shutdown(&mut rx, Duration::from_secs(3600)).await);
    }
}
