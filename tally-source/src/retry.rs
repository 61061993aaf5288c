use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::{extract_count, MetricSource};

/// Time as seen by the fetcher and collector.
///
/// Injected so retry and pacing policy can be tested without real delays.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Monotonic time since an arbitrary origin.
    fn now(&self) -> Duration;

    async fn sleep(&self, duration: Duration);
}

pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock that only moves when told to; `sleep` advances it instantly.
#[derive(Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    /// Every sleep requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(duration);
        self.advance(duration);
    }
}

/// Flat retry delay bounded only by total elapsed time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub ceiling: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchState {
    Fetching { attempt: u32 },
    Waiting { attempt: u32 },
    Succeeded { value: i64, attempts: u32 },
    TimedOut { attempts: u32 },
}

impl RetryPolicy {
    /// State after attempt number `attempt` produced `outcome`, `elapsed`
    /// into the fetch. A value always wins, however late.
    pub fn after_attempt(&self, attempt: u32, outcome: Option<i64>, elapsed: Duration) -> FetchState {
        match outcome {
            Some(value) => FetchState::Succeeded {
                value,
                attempts: attempt,
            },
            None if elapsed >= self.ceiling => FetchState::TimedOut { attempts: attempt },
            None => FetchState::Waiting { attempt },
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("fetch for `{key}` timed out: no value within the {}s ceiling ({attempts} attempts)", .ceiling.as_secs_f64())]
pub struct FetchTimeout {
    pub key: String,
    pub ceiling: Duration,
    pub attempts: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fetched {
    pub value: i64,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Fetch + extract with time-bounded retry.
pub struct RetryingFetcher {
    source: Arc<dyn MetricSource>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl RetryingFetcher {
    pub fn new(source: Arc<dyn MetricSource>, clock: Arc<dyn Clock>, policy: RetryPolicy) -> Self {
        Self {
            source,
            clock,
            policy,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn fetch(&self, key: &str) -> Result<Fetched, FetchTimeout> {
        let started = self.clock.now();
        let mut state = FetchState::Fetching { attempt: 1 };
        loop {
            state = match state {
                FetchState::Fetching { attempt } => {
                    let outcome = self.attempt(key).await;
                    let elapsed = self.clock.now().saturating_sub(started);
                    self.policy.after_attempt(attempt, outcome, elapsed)
                }
                FetchState::Waiting { attempt } => {
                    self.clock.sleep(self.policy.delay).await;
                    FetchState::Fetching {
                        attempt: attempt + 1,
                    }
                }
                FetchState::Succeeded { value, attempts } => {
                    return Ok(Fetched {
                        value,
                        attempts,
                        elapsed: self.clock.now().saturating_sub(started),
                    });
                }
                FetchState::TimedOut { attempts } => {
                    return Err(FetchTimeout {
                        key: key.to_string(),
                        ceiling: self.policy.ceiling,
                        attempts,
                    });
                }
            };
        }
    }

    async fn attempt(&self, key: &str) -> Option<i64> {
        match self.source.fetch_page(key).await {
            Ok(page) => {
                let value = extract_count(&page);
                if value.is_none() {
                    tracing::debug!(key, bytes = page.len(), "no count in page");
                }
                value
            }
            Err(e) => {
                tracing::debug!(key, error = %e, "page fetch failed");
                None
            }
        }
    }
}
