use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

/// Exponential backoff policy shared by every external call in the
/// pipeline: base 500 ms, doubling, capped at 8 s, 5 attempts total.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub factor: u32,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            factor: 2,
            cap: Duration::from_secs(8),
            max_attempts: 5,
        }
    }
}

impl Backoff {
    /// Delay before retrying after the given zero-based attempt.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.factor.saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// Creates the cancellation channel workers observe. `true` means stop.
#[must_use]
pub fn cancellation_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Resolves once the cancellation channel flips to `true`. If the sender is
/// gone without cancelling, pends forever.
pub async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Runs `op` with the given backoff policy, checking the cancellation
/// signal before every attempt and during every backoff sleep.
///
/// The attempt index (zero-based) is passed to `op` for logging.
///
/// # Errors
///
/// Returns the last attempt's error once attempts are exhausted, or a
/// cancellation error as soon as the signal fires.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: Backoff,
    cancel: &watch::Receiver<bool>,
    what: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;

    for attempt in 0..policy.max_attempts {
        if *cancel.borrow() {
            anyhow::bail!("{what}: cancelled");
        }

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::warn!(
                    attempt = attempt + 1,
                    max = policy.max_attempts,
                    "{what} failed: {e}"
                );
                last_err = Some(e);
            }
        }

        if attempt + 1 < policy.max_attempts {
            let mut cancel_rx = cancel.clone();
            tokio::select! {
                () = tokio::time::sleep(policy.delay(attempt)) => {}
                () = cancelled(&mut cancel_rx) => anyhow::bail!("{what}: cancelled"),
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{what}: no attempts made")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delays_double_up_to_cap() {
        let policy = Backoff::default();
        assert_eq!(policy.delay(0), Duration::from_millis(500));
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(4), Duration::from_secs(8));
        assert_eq!(policy.delay(10), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let (_tx, rx) = cancellation_channel();
        let attempts = AtomicU32::new(0);
        let policy = Backoff {
            base: Duration::from_millis(1),
            ..Backoff::default()
        };

        let result = retry_with_backoff(policy, &rx, "test op", |_| async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                anyhow::bail!("transient");
            }
            Ok(42)
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let (_tx, rx) = cancellation_channel();
        let attempts = AtomicU32::new(0);
        let policy = Backoff {
            base: Duration::from_millis(1),
            max_attempts: 3,
            ..Backoff::default()
        };

        let result: Result<()> = retry_with_backoff(policy, &rx, "test op", |_| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("always fails")
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_short_circuits_before_attempt() {
        let (tx, rx) = cancellation_channel();
        tx.send(true).unwrap();

        let result: Result<()> =
            retry_with_backoff(Backoff::default(), &rx, "test op", |_| async {
                panic!("should not run")
            })
            .await;

        assert!(result.unwrap_err().to_string().contains("cancelled"));
    }
}
