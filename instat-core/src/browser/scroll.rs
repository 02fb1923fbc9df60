use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use super::accessor::ElementAccessor;
use super::driver::{Locator, UiElement};

pub struct ScrollController<'a, 'd> {
    accessor: &'a ElementAccessor<'d>,
}

impl<'a, 'd> ScrollController<'a, 'd> {
    pub fn new(accessor: &'a ElementAccessor<'d>) -> Self {
        Self { accessor }
    }

    pub async fn scroll(
        &self,
        surface: &dyn UiElement,
        item_locator: &Locator,
        pause: Duration,
        max_attempts: usize,
    ) {
        for attempt in 0..max_attempts {
            let items = self.accessor.find_many(item_locator).await;
            let target: &dyn UiElement = match items.last() {
                Some(last) => &**last,
                None => {
                    debug!(attempt, "no items rendered yet, focusing scroll surface");
                    surface
                }
            };
            if let Err(err) = target.scroll_into_view().await {
                warn!(attempt, error = %err, "scrolling stopped by driver fault");
                return;
            }
            sleep(pause).await;
        }
    }
}
