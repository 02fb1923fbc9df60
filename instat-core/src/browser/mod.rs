mod accessor;
mod automation;
mod driver;
mod error;
mod metrics;
mod retry;
mod scroll;
mod side_task;
mod stall;
mod wait;

pub use accessor::{ElementAccessor, TextSnapshot};
pub use automation::{BrowserLauncher, BrowserSession, ChromiumElement};
pub use driver::{ElementHandle, Locator, UiDriver, UiElement};
pub use error::{BrowserError, BrowserResult};
pub use metrics::CollectionMetrics;
pub use retry::{Escalation, RetryOutcome, RetryPolicy, RoundState, RoundVerdict};
pub use scroll::ScrollController;
pub use side_task::SideTaskOutcome;
pub use stall::StallAwareWaiter;
pub use wait::{wait_until, wait_until_not};
