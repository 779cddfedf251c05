//! Polling helpers for hardware state changes

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// Floor for the polling interval; a zero interval would never yield to the clock
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Poll `predicate` until it returns true or `timeout` elapses
///
/// The predicate is evaluated at least once, and `poll_interval` is slept
/// between checks (at least 1ms). Returns whether the condition was met in time.
pub async fn wait_for_condition<F, Fut>(mut predicate: F, timeout: Duration, poll_interval: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
    let deadline = Instant::now() + timeout;
    loop {
        if predicate().await {
            return true;
        }

        let now = Instant::now();
        if now >= deadline {
            tracing::debug!(timeout_ms = timeout.as_millis() as u64, "Condition not met before timeout");
            return false;
        }
        tokio::time::sleep(poll_interval.min(deadline - now)).await;
    }
}

/// Sleep for `duration`, skipping zero-length waits
pub async fn safe_wait(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_condition_met_after_polls() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let met = wait_for_condition(
            move || {
                let counter = counter.clone();
                async move { counter.fetch_add(1, Ordering::SeqCst) + 1 >= 3 }
            },
            Duration::from_secs(5),
            Duration::from_millis(100),
        )
        .await;

        assert!(met);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_condition_times_out() {
        let start = Instant::now();
        let met = wait_for_condition(
            || async { false },
            Duration::from_millis(500),
            Duration::from_millis(100),
        )
        .await;

        assert!(!met);
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert!(start.elapsed() < Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_checks_once() {
        assert!(wait_for_condition(|| async { true }, Duration::ZERO, Duration::from_millis(10)).await);
        assert!(!wait_for_condition(|| async { false }, Duration::ZERO, Duration::from_millis(10)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_poll_interval_still_times_out() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let start = Instant::now();

        let met = wait_for_condition(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { false }
            },
            Duration::from_millis(50),
            Duration::ZERO,
        )
        .await;

        assert!(!met);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(calls.load(Ordering::SeqCst) <= 52);
    }

    #[tokio::test(start_paused = true)]
    async fn test_safe_wait() {
        let start = Instant::now();
        safe_wait(Duration::ZERO).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        safe_wait(Duration::from_millis(20)).await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
