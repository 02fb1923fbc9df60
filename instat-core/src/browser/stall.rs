use std::borrow::Borrow;
use std::collections::HashSet;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::{CollectionSection, RetrySection};

use super::accessor::ElementAccessor;
use super::driver::{Locator, UiElement};
use super::error::BrowserError;
use super::retry::RetryPolicy;
use super::scroll::ScrollController;
use super::wait::wait_until_not;

pub struct StallAwareWaiter<'a, 'd> {
    accessor: &'a ElementAccessor<'d>,
    spinner: Locator,
    spinner_timeout: Duration,
    poll: Duration,
    scroll_pause: Duration,
    snapshot: RetryPolicy,
    max_spins: usize,
}

impl<'a, 'd> StallAwareWaiter<'a, 'd> {
    pub fn new(
        accessor: &'a ElementAccessor<'d>,
        spinner: Locator,
        collection: &CollectionSection,
        retry: &RetrySection,
    ) -> Self {
        Self {
            accessor,
            spinner,
            spinner_timeout: collection.spinner_timeout(),
            poll: collection.poll_interval(),
            scroll_pause: collection.stall_scroll_pause(),
            snapshot: RetryPolicy::from_section(&retry.snapshot),
            max_spins: collection.stall_max_spins.max(1),
        }
    }

    pub async fn wait_for_change<H>(
        &self,
        surface: &dyn UiElement,
        item_locator: &Locator,
        existing: &HashSet<H>,
        wait_interval: Duration,
        extra_scroll_attempts: usize,
    ) -> bool
    where
        H: Borrow<str> + Hash + Eq,
    {
        let scroller = ScrollController::new(self.accessor);
        for spin in 0..self.max_spins {
            self.await_spinner().await;

            if self.has_unseen(item_locator, existing).await {
                return true;
            }

            scroller
                .scroll(surface, item_locator, self.scroll_pause, extra_scroll_attempts)
                .await;
            sleep(wait_interval).await;

            if !self.has_unseen(item_locator, existing).await {
                debug!(spin, "no new items after extra scrolling");
                return false;
            }
        }
        warn!(spins = self.max_spins, "list kept changing, giving up on settling");
        true
    }

    async fn await_spinner(&self) {
        let driver = self.accessor.driver();
        let spinner = &self.spinner;
        let visible = matches!(driver.find_one(spinner).await, Ok(Some(_)));
        if !visible {
            return;
        }
        let cleared = wait_until_not("loading spinner", self.spinner_timeout, self.poll, || async move {
            Ok::<_, BrowserError>(driver.find_one(spinner).await?.is_some())
        })
        .await;
        if let Err(err) = cleared {
            debug!(error = %err, "spinner still visible, continuing");
        }
    }

    async fn has_unseen<H>(&self, item_locator: &Locator, existing: &HashSet<H>) -> bool
    where
        H: Borrow<str> + Hash + Eq,
    {
        let snapshot = self.accessor.snapshot_texts(item_locator, &self.snapshot).await;
        snapshot
            .texts
            .iter()
            .any(|text| !existing.contains(text.as_str()))
    }
}
