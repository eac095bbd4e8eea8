use std::time::Duration;

use rand::Rng as _;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::Error;

/// Bounded exponential backoff with full jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Total number of attempts, including the first one.
    pub attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempts: 3,
            base: Duration::from_millis(500),
            max: Duration::from_secs(10),
        }
    }
}

impl Backoff {
    /// Delay before attempt `attempt + 1`, sampled uniformly from
    /// `0..=min(max, base * 2^attempt)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self
            .base
            .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
            .min(self.max);
        let millis = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
    }
}

/// Runs `f` until it succeeds, fails with a non transient error, or the
/// attempts are exhausted. Cancellation interrupts the wait between attempts.
pub async fn retry<T, F>(
    backoff: Backoff,
    cancel: &CancellationToken,
    what: &str,
    mut f: F,
) -> Result<T, Error>
where
    F: AsyncFnMut() -> Result<T, Error>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < backoff.attempts => {
                let delay = backoff.delay(attempt);
                attempt += 1;
                warn!(
                    "{what} failed (attempt {attempt}/{}), retrying in {delay:?}: {err}",
                    backoff.attempts
                );
                tokio::select! {
                    () = cancel.cancelled() => return Err(Error::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::*;

    fn server_error() -> Error {
        Error::UnexpectedStatus {
            url: "http://hello/update/switch".into(),
            status: StatusCode::BAD_GATEWAY,
            body: String::new(),
        }
    }

    const FAST: Backoff = Backoff {
        attempts: 3,
        base: Duration::from_millis(1),
        max: Duration::from_millis(2),
    };

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let mut calls = 0;
        let result = retry(FAST, &CancellationToken::new(), "switch", async || {
            calls += 1;
            if calls < 3 { Err(server_error()) } else { Ok(calls) }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let mut calls = 0;
        let result: Result<(), _> =
            retry(FAST, &CancellationToken::new(), "switch", async || {
                calls += 1;
                Err(server_error())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> =
            retry(FAST, &CancellationToken::new(), "switch", async || {
                calls += 1;
                Err(Error::ServiceNotFound("hello".into()))
            })
            .await;
        assert!(matches!(result, Err(Error::ServiceNotFound(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn delay_is_capped() {
        let backoff = Backoff {
            attempts: 10,
            base: Duration::from_millis(100),
            max: Duration::from_millis(250),
        };
        for attempt in 0..40 {
            assert!(backoff.delay(attempt) <= Duration::from_millis(250));
        }
    }
}
