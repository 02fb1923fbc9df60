use futures::future::join_all;
use tracing::{debug, warn};

use crate::config::RetrySection;

use super::driver::{ElementHandle, Locator, UiDriver};
use super::error::BrowserError;
use super::retry::RetryPolicy;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextSnapshot {
    pub texts: Vec<String>,
    pub skipped: usize,
}

// Lookups never fail: exhausted retries and hard faults are logged and read as "nothing found".
pub struct ElementAccessor<'d> {
    driver: &'d dyn UiDriver,
    single: RetryPolicy,
    many: RetryPolicy,
}

impl<'d> ElementAccessor<'d> {
    pub fn new(driver: &'d dyn UiDriver, single: RetryPolicy, many: RetryPolicy) -> Self {
        Self {
            driver,
            single,
            many,
        }
    }

    pub fn from_config(driver: &'d dyn UiDriver, retry: &RetrySection) -> Self {
        Self::new(
            driver,
            RetryPolicy::from_section(&retry.single),
            RetryPolicy::from_section(&retry.many),
        )
    }

    pub fn driver(&self) -> &'d dyn UiDriver {
        self.driver
    }

    pub async fn find_one(&self, locator: &Locator) -> Option<ElementHandle> {
        let driver = self.driver;
        let outcome = self
            .single
            .run(locator.as_str(), |_| async move {
                driver
                    .find_one(locator)
                    .await?
                    .ok_or_else(|| BrowserError::NotFound(locator.to_string()))
            })
            .await;
        match outcome {
            Ok(found) => {
                log_lookup_retries(locator, found.attempts);
                Some(found.result)
            }
            Err(err) => {
                log_lookup_failure(locator, &err);
                None
            }
        }
    }

    pub async fn find_many(&self, locator: &Locator) -> Vec<ElementHandle> {
        self.find_many_with(locator, &self.many).await
    }

    pub async fn find_many_with(&self, locator: &Locator, policy: &RetryPolicy) -> Vec<ElementHandle> {
        let driver = self.driver;
        let outcome = policy
            .run(locator.as_str(), |_| async move {
                let elements = driver.find_many(locator).await?;
                if elements.is_empty() {
                    Err(BrowserError::NotFound(locator.to_string()))
                } else {
                    Ok(elements)
                }
            })
            .await;
        match outcome {
            Ok(found) => {
                log_lookup_retries(locator, found.attempts);
                found.result
            }
            Err(err) => {
                log_lookup_failure(locator, &err);
                Vec::new()
            }
        }
    }

    pub async fn parallel_find_many(&self, locator: &Locator, fan_out: usize) -> Vec<ElementHandle> {
        let branches = (0..fan_out.max(1)).map(|_| self.driver.find_many(locator));
        let mut merged = Vec::new();
        for (branch, result) in join_all(branches).await.into_iter().enumerate() {
            match result {
                Ok(elements) => merged.extend(elements),
                Err(err) => warn!(branch, locator = %locator, error = %err, "fan-out lookup failed"),
            }
        }
        merged
    }

    pub async fn read_texts(&self, elements: Vec<ElementHandle>) -> TextSnapshot {
        let mut snapshot = TextSnapshot::default();
        for element in elements {
            match element.text().await {
                Ok(text) => {
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        snapshot.texts.push(trimmed.to_string());
                    }
                }
                Err(err) => {
                    debug!(error = %err, "skipping element that went away mid-read");
                    snapshot.skipped += 1;
                }
            }
        }
        snapshot
    }

    pub async fn snapshot_texts(&self, locator: &Locator, policy: &RetryPolicy) -> TextSnapshot {
        let elements = self.find_many_with(locator, policy).await;
        self.read_texts(elements).await
    }

    pub async fn visible_texts(&self, locator: &Locator) -> Vec<String> {
        self.snapshot_texts(locator, &self.many).await.texts
    }
}

fn log_lookup_retries(locator: &Locator, attempts: usize) {
    if attempts > 1 {
        debug!(locator = %locator, attempts, "element lookup settled after retries");
    }
}

fn log_lookup_failure(locator: &Locator, err: &BrowserError) {
    if err.is_retryable() {
        debug!(locator = %locator, "element lookup exhausted retries");
    } else {
        warn!(locator = %locator, error = %err, "element lookup aborted by driver fault");
    }
}
