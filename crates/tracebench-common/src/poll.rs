//! Condition poller
//!
//! [`poll_until`] evaluates a check on a fixed interval until it reports
//! `true`, fails, the deadline elapses, or the token is cancelled. It has no
//! opinion on direction: readiness waits return `true` once the thing
//! exists, deletion waits return `true` once it is gone.
//!
//! A failing check ends the poll immediately. Retrying transient check
//! errors is the retry engine's job, not the poller's.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::{Error, Result};

/// Longest wait honoured; larger timeouts (up to `Duration::MAX`) mean "no deadline"
const MAX_WAIT: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// Poll `check_fn` every `interval` until it returns `Ok(true)`.
///
/// With `immediate` the first check runs right away, otherwise after one
/// interval. Returns [`Error::Timeout`] naming `operation` when `timeout`
/// elapses first and [`Error::Cancelled`] when `cancel` fires.
pub async fn poll_until<F, Fut>(
    cancel: &CancellationToken,
    timeout: Duration,
    interval: Duration,
    immediate: bool,
    operation: &str,
    mut check_fn: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let start = Instant::now();
    let deadline = start + timeout.min(MAX_WAIT);

    if !immediate {
        wait_interval(cancel, deadline, interval, operation, start).await?;
    }

    loop {
        if cancel.is_cancelled() {
            return Err(Error::cancelled(operation));
        }

        let done = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::cancelled(operation)),
            _ = tokio::time::sleep_until(deadline) => {
                return Err(Error::timeout(operation, start.elapsed()));
            }
            outcome = check_fn() => outcome?,
        };

        if done {
            return Ok(());
        }
        trace!(operation, "condition not yet met");

        wait_interval(cancel, deadline, interval, operation, start).await?;
    }
}

async fn wait_interval(
    cancel: &CancellationToken,
    deadline: Instant,
    interval: Duration,
    operation: &str,
    start: Instant,
) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::cancelled(operation)),
        _ = tokio::time::sleep_until(deadline) => Err(Error::timeout(operation, start.elapsed())),
        _ = tokio::time::sleep(interval) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn returns_as_soon_as_condition_holds() {
        let cancel = CancellationToken::new();
        let checks = AtomicU32::new(0);

        poll_until(
            &cancel,
            Duration::from_secs(60),
            Duration::from_secs(2),
            true,
            "pod ready",
            || async { Ok(checks.fetch_add(1, Ordering::SeqCst) == 2) },
        )
        .await
        .unwrap();

        assert_eq!(checks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_timeout_does_not_overflow() {
        let cancel = CancellationToken::new();

        poll_until(
            &cancel,
            Duration::from_secs(u64::MAX),
            Duration::from_millis(1),
            true,
            "ready",
            || async { Ok(true) },
        )
        .await
        .unwrap();

        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(90)).await;
            token.cancel();
        });

        let err = poll_until(
            &cancel,
            Duration::MAX,
            Duration::from_secs(10),
            false,
            "deleted",
            || async { Ok(false) },
        )
        .await
        .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_check_runs_before_first_interval() {
        let cancel = CancellationToken::new();
        let start = Instant::now();

        poll_until(
            &cancel,
            Duration::from_secs(60),
            Duration::from_secs(5),
            true,
            "ready",
            || async { Ok(true) },
        )
        .await
        .unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_first_check_waits_one_interval() {
        let cancel = CancellationToken::new();
        let start = Instant::now();

        poll_until(
            &cancel,
            Duration::from_secs(60),
            Duration::from_secs(5),
            false,
            "ready",
            || async { Ok(true) },
        )
        .await
        .unwrap();

        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn check_error_is_returned_without_retry() {
        let cancel = CancellationToken::new();
        let checks = AtomicU32::new(0);

        let err = poll_until(
            &cancel,
            Duration::from_secs(60),
            Duration::from_secs(1),
            true,
            "absent",
            || async {
                checks.fetch_add(1, Ordering::SeqCst);
                Err::<bool, _>(Error::internal("api unavailable"))
            },
        )
        .await
        .unwrap_err();

        assert_eq!(checks.load(Ordering::SeqCst), 1);
        assert!(matches!(err, Error::Internal { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_condition_never_holds() {
        let cancel = CancellationToken::new();

        let err = poll_until(
            &cancel,
            Duration::from_secs(10),
            Duration::from_secs(2),
            true,
            "tempostack deleted",
            || async { Ok(false) },
        )
        .await
        .unwrap_err();

        assert!(err.is_timeout());
        assert!(!err.is_cancelled());
        match err {
            Error::Timeout { operation, elapsed } => {
                assert_eq!(operation, "tempostack deleted");
                assert!(elapsed >= Duration::from_secs(10));
            }
            other => panic!("expected timeout, got {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_is_distinct_from_timeout() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            trigger.cancel();
        });

        let err = poll_until(
            &cancel,
            Duration::from_secs(120),
            Duration::from_secs(2),
            true,
            "namespace deleted",
            || async { Ok(false) },
        )
        .await
        .unwrap_err();

        assert!(err.is_cancelled());
        assert!(!err.is_timeout());
    }

    #[tokio::test]
    async fn hung_check_is_abandoned_at_deadline() {
        let cancel = CancellationToken::new();

        let err = poll_until(
            &cancel,
            Duration::from_millis(20),
            Duration::from_millis(5),
            true,
            "stuck",
            || std::future::pending::<Result<bool>>(),
        )
        .await
        .unwrap_err();

        assert!(err.is_timeout());
    }
}
