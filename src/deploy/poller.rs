//! Remote state polling
//!
//! Stack and change set operations settle asynchronously, and the API
//! answering the polls both throttles and, right after a create, sometimes
//! claims the stack does not exist yet. The poller keeps those concerns in
//! one place: random backoff between polls, a fixed short delay on
//! throttling, and a bounded tolerance for ambiguous answers.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::cloud::RemoteError;

/// One poll's verdict on the remote state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe<T> {
    /// The awaited state was reached.
    Terminal(T),

    /// Still in progress.
    Pending,

    /// No usable answer, such as a describe that found nothing.
    Ambiguous,
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Upper bound for the random delay between polls.
    pub backoff_ceiling: Duration,

    /// Fixed delay after a throttled call.
    pub throttle_delay: Duration,

    /// Ambiguous answers tolerated before the poll concludes negatively.
    pub ambiguity_budget: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            backoff_ceiling: Duration::from_secs(10),
            throttle_delay: Duration::from_secs(1),
            ambiguity_budget: 3,
        }
    }
}

/// Repeats a probe until it settles.
#[derive(Debug, Clone, Default)]
pub struct Poller {
    config: PollerConfig,
}

impl Poller {
    pub fn new(config: PollerConfig) -> Self {
        Self { config }
    }

    /// Poll until the probe reports a terminal state.
    ///
    /// Throttled probes wait the fixed delay and never consume the
    /// ambiguity budget. Exhausting the budget returns `None`, the
    /// definitive negative. Any other remote error ends the poll.
    pub async fn run<T, F, Fut>(&self, mut probe: F) -> Result<Option<T>, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Probe<T>, RemoteError>>,
    {
        let mut ambiguous = 0u32;
        loop {
            match probe().await {
                Ok(Probe::Terminal(value)) => return Ok(Some(value)),
                Ok(Probe::Pending) => self.backoff().await,
                Ok(Probe::Ambiguous) => {
                    ambiguous += 1;
                    if ambiguous >= self.config.ambiguity_budget {
                        return Ok(None);
                    }
                    tracing::debug!(ambiguous, "no usable answer from remote, polling again");
                    self.backoff().await;
                }
                Err(e) if e.is_throttle() => {
                    tracing::debug!("remote throttled the poll");
                    tokio::time::sleep(self.config.throttle_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run a one-shot call, waiting out any throttling.
    ///
    /// Only throttles are retried; the first real answer or failure is
    /// returned as is.
    pub async fn retry_on_throttle<T, F, Fut>(&self, mut call: F) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        loop {
            match call().await {
                Err(e) if e.is_throttle() => {
                    tracing::debug!("remote throttled the call, retrying");
                    tokio::time::sleep(self.config.throttle_delay).await;
                }
                other => return other,
            }
        }
    }

    async fn backoff(&self) {
        let ceiling = self.config.backoff_ceiling.as_millis().max(1) as u64;
        let delay = {
            let mut rng = rand::rng();
            rng.random_range(0..ceiling)
        };
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn quick_poller() -> Poller {
        Poller::new(PollerConfig {
            backoff_ceiling: Duration::from_millis(2),
            throttle_delay: Duration::from_millis(1),
            ambiguity_budget: 3,
        })
    }

    #[tokio::test]
    async fn terminal_probe_ends_the_poll() {
        let result = quick_poller()
            .run(|| async { Ok(Probe::Terminal("done")) })
            .await
            .unwrap();
        assert_eq!(result, Some("done"));
    }

    #[tokio::test]
    async fn pending_probes_repeat_until_terminal() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let result = quick_poller()
            .run(move || {
                let calls = seen.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Ok(Probe::Pending)
                    } else {
                        Ok(Probe::Terminal(42))
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn ambiguity_budget_concludes_negatively() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let result: Option<()> = quick_poller()
            .run(move || {
                let calls = seen.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Probe::Ambiguous)
                }
            })
            .await
            .unwrap();
        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn throttles_never_consume_the_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let result = quick_poller()
            .run(move || {
                let calls = seen.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 5 {
                        Err(RemoteError::Throttled("Rate exceeded".into()))
                    } else {
                        Ok(Probe::Terminal("settled"))
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, Some("settled"));
    }

    #[tokio::test]
    async fn fatal_errors_end_the_poll() {
        let err = quick_poller()
            .run(|| async {
                Err::<Probe<()>, _>(RemoteError::Api("access denied".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Api(_)));
    }

    #[tokio::test]
    async fn one_shot_calls_wait_out_throttling() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let value = quick_poller()
            .retry_on_throttle(move || {
                let calls = seen.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                        Err(RemoteError::Throttled("Rate exceeded".into()))
                    } else {
                        Ok("created")
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(value, "created");
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        let err = quick_poller()
            .retry_on_throttle(|| async { Err::<(), _>(RemoteError::Api("boom".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Api(_)));
    }
}
