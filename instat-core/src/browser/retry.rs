use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::config::{AttemptSection, CollectionSection};

use super::error::{BrowserError, BrowserResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    RefreshPage,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    pause: Duration,
    escalation: Option<Escalation>,
}

#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub result: T,
    pub attempts: usize,
}

#[derive(Debug, Clone)]
pub struct RoundState {
    pub refresh_attempts: usize,
    pub stale_try_count: usize,
    pub progress_count: usize,
    pub started_at: Instant,
}

impl RoundState {
    pub fn new() -> Self {
        Self {
            refresh_attempts: 0,
            stale_try_count: 0,
            progress_count: 0,
            started_at: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn budget_exceeded(&self, budget: Option<Duration>) -> bool {
        budget.is_some_and(|limit| self.elapsed() > limit)
    }
}

impl Default for RoundState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundVerdict {
    Progress,
    Stalled { stale_try_count: usize },
    Escalate(Escalation),
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, pause: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            pause,
            escalation: None,
        }
    }

    pub fn from_section(section: &AttemptSection) -> Self {
        Self::new(section.max_attempts, section.pause())
    }

    pub fn stall(config: &CollectionSection) -> Self {
        Self {
            max_attempts: config.max_retry_without_new_profiles,
            pause: config.refresh_settle(),
            escalation: None,
        }
        .with_escalation(Escalation::RefreshPage)
    }

    pub fn with_escalation(mut self, escalation: Escalation) -> Self {
        self.escalation = Some(escalation);
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn pause(&self) -> Duration {
        self.pause
    }

    pub fn escalation(&self) -> Option<Escalation> {
        self.escalation
    }

    pub async fn run<F, Fut, T>(&self, label: &str, mut operation: F) -> BrowserResult<RetryOutcome<T>>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = BrowserResult<T>>,
    {
        let mut attempt = 0usize;
        loop {
            match operation(attempt).await {
                Ok(result) => {
                    return Ok(RetryOutcome {
                        result,
                        attempts: attempt + 1,
                    });
                }
                Err(error) => {
                    attempt += 1;
                    if !error.is_retryable() || attempt >= self.max_attempts {
                        return Err(error);
                    }
                    if matches!(error, BrowserError::NotFound(_)) {
                        debug!(target_label = label, attempt, "nothing matched yet, retrying");
                    } else {
                        warn!(
                            target_label = label,
                            attempt,
                            max_attempts = self.max_attempts,
                            error = %error,
                            "retrying element access"
                        );
                    }
                    if !self.pause.is_zero() {
                        sleep(self.pause).await;
                    }
                }
            }
        }
    }

    pub fn record_round(&self, state: &mut RoundState, new_found: bool) -> RoundVerdict {
        if new_found {
            state.stale_try_count = 0;
            state.progress_count += 1;
            debug!(progress = state.progress_count, "round yielded new items");
            return RoundVerdict::Progress;
        }

        state.stale_try_count += 1;
        debug!(
            stale = state.stale_try_count,
            max = self.max_attempts,
            "round yielded nothing new"
        );
        if let Some(escalation) = self.escalation.filter(|_| state.stale_try_count > self.max_attempts) {
            state.refresh_attempts += 1;
            state.stale_try_count = 0;
            state.progress_count = 0;
            return RoundVerdict::Escalate(escalation);
        }
        RoundVerdict::Stalled {
            stale_try_count: state.stale_try_count,
        }
    }
}
