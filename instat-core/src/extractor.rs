//! Incremental harvesting of a followers/following list from its modal surface.

use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::browser::{
    wait_until, CollectionMetrics, ElementAccessor, ElementHandle, Escalation, Locator,
    RetryPolicy, RoundState, RoundVerdict, ScrollController, SideTaskOutcome, StallAwareWaiter,
    UiDriver,
};
use crate::config::{InstatConfig, OptionalSelector, SelectorKey, SelectorMap};
use crate::count::{join_count_tokens, parse_count_text};
use crate::login::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListKind {
    Followers,
    Following,
}

impl ListKind {
    fn entry_selector(&self) -> SelectorKey {
        match self {
            ListKind::Followers => SelectorKey::FollowersLink,
            ListKind::Following => SelectorKey::FollowingLink,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::Followers => "followers",
            ListKind::Following => "following",
        }
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "followers" => Ok(ListKind::Followers),
            "following" => Ok(ListKind::Following),
            other => Err(format!("unknown list kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListRequest {
    subject: String,
    kind: ListKind,
    budget: Option<Duration>,
}

impl ListRequest {
    pub fn new(subject: impl Into<String>, kind: ListKind) -> Self {
        Self {
            subject: subject.into().trim().to_string(),
            kind,
            budget: None,
        }
    }

    pub fn with_budget(mut self, budget: Option<Duration>) -> Self {
        self.budget = budget;
        self
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn kind(&self) -> ListKind {
        self.kind
    }

    pub fn budget(&self) -> Option<Duration> {
        self.budget
    }
}

/// A collected account name: trimmed and never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ProfileHandle(String);

impl ProfileHandle {
    pub fn normalize(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| ProfileHandle(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ProfileHandle {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProfileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a collection run stopped. None of these is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    TargetReached,
    BudgetExceeded,
    RefreshCeilingReached,
    SurfaceUnavailable,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Termination::TargetReached => "target reached",
            Termination::BudgetExceeded => "budget exceeded",
            Termination::RefreshCeilingReached => "refresh ceiling reached",
            Termination::SurfaceUnavailable => "surface unavailable",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionOutcome {
    pub handles: HashSet<ProfileHandle>,
    pub expected: Option<u64>,
    pub termination: Termination,
    pub rounds: usize,
    pub refreshes: usize,
    pub elapsed: Duration,
    pub metrics: CollectionMetrics,
}

impl CollectionOutcome {
    fn unavailable(started: Instant, metrics: CollectionMetrics) -> Self {
        Self {
            handles: HashSet::new(),
            expected: None,
            termination: Termination::SurfaceUnavailable,
            rounds: 0,
            refreshes: 0,
            elapsed: started.elapsed(),
            metrics,
        }
    }

    /// Handles in lexical order.
    pub fn sorted_handles(&self) -> Vec<&ProfileHandle> {
        let mut handles: Vec<_> = self.handles.iter().collect();
        handles.sort();
        handles
    }
}

struct OpenSurface {
    expected: Option<u64>,
    surface: ElementHandle,
}

/// Harvests one membership list per call against a live session.
///
/// The count shown on the entry link is only a hint: once the collected set
/// reaches it the run stops, so a stale count that is lower than the true
/// membership ends collection early.
pub struct CollectionEngine<'s> {
    session: &'s mut Session,
    config: Arc<InstatConfig>,
    selectors: Arc<SelectorMap>,
    metrics: CollectionMetrics,
}

impl<'s> CollectionEngine<'s> {
    pub fn new(session: &'s mut Session, config: Arc<InstatConfig>, selectors: Arc<SelectorMap>) -> Self {
        Self {
            session,
            config,
            selectors,
            metrics: CollectionMetrics::default(),
        }
    }

    /// Metrics accumulated across every run of this engine.
    pub fn metrics(&self) -> &CollectionMetrics {
        &self.metrics
    }

    pub async fn collect(&mut self, request: &ListRequest) -> HashSet<ProfileHandle> {
        self.collect_detailed(request).await.handles
    }

    pub async fn collect_detailed(&mut self, request: &ListRequest) -> CollectionOutcome {
        let started = Instant::now();
        if !self.session.is_live() {
            warn!(subject = %request.subject(), "collection requested on a closed session");
            return CollectionOutcome::unavailable(started, self.metrics.clone());
        }

        let config = Arc::clone(&self.config);
        let selectors = Arc::clone(&self.selectors);
        let collection = &config.collection;
        let driver = self.session.driver();
        let accessor = ElementAccessor::from_config(driver, &config.retry);

        info!(subject = %request.subject(), kind = %request.kind(), "opening list surface");
        let Some(OpenSurface {
            expected,
            mut surface,
        }) = open_surface(driver, &accessor, &config, &selectors, request).await
        else {
            return CollectionOutcome::unavailable(started, self.metrics.clone());
        };
        self.metrics.record_surface_open();

        let item = selectors.get(SelectorKey::ProfileUsernameSpan);
        let container = surface_locator(&selectors);
        let scroller = ScrollController::new(&accessor);
        let waiter = StallAwareWaiter::new(
            &accessor,
            selectors.get(SelectorKey::LoadingSpinner).clone(),
            collection,
            &config.retry,
        );
        let stall = RetryPolicy::stall(collection);
        let fan_out = collection.snapshot_fan_out.max(1);

        let mut handles: HashSet<ProfileHandle> = HashSet::new();
        let mut state = RoundState::new();
        let mut rounds = 0usize;

        let termination = loop {
            if state.refresh_attempts >= collection.max_refresh_attempts {
                break Termination::RefreshCeilingReached;
            }
            if state.budget_exceeded(request.budget()) {
                break Termination::BudgetExceeded;
            }
            rounds += 1;

            scroller
                .scroll(
                    surface.as_ref(),
                    item,
                    collection.pause_time(),
                    collection.max_attempts,
                )
                .await;
            waiter
                .wait_for_change(
                    surface.as_ref(),
                    item,
                    &handles,
                    collection.wait_interval(),
                    collection.additional_scroll_attempts,
                )
                .await;

            let elements = if fan_out > 1 {
                accessor.parallel_find_many(item, fan_out).await
            } else {
                accessor.find_many(item).await
            };
            let snapshot = accessor.read_texts(elements).await;
            self.metrics.record_stale_elements(snapshot.skipped);

            let before = handles.len();
            handles.extend(snapshot.texts.iter().filter_map(|text| ProfileHandle::normalize(text)));
            let new_found = handles.len() > before;
            self.metrics.record_round(new_found);
            self.metrics.record_handles(handles.len());
            debug!(
                round = rounds,
                collected = handles.len(),
                added = handles.len() - before,
                "collection round finished"
            );

            if expected.is_some_and(|target| handles.len() as u64 >= target) {
                break Termination::TargetReached;
            }

            match stall.record_round(&mut state, new_found) {
                RoundVerdict::Progress | RoundVerdict::Stalled { .. } => {}
                RoundVerdict::Escalate(Escalation::RefreshPage) => {
                    info!(
                        refresh = state.refresh_attempts,
                        max = collection.max_refresh_attempts,
                        "no new profiles, refreshing page"
                    );
                    self.metrics.record_refresh();
                    if let Err(err) = driver.refresh().await {
                        warn!(error = %err, "page refresh failed");
                    }
                    sleep(stall.pause()).await;
                    match accessor.find_one(&container).await {
                        Some(fresh) => surface = fresh,
                        None => debug!("scroll surface not found after refresh"),
                    }
                }
            }
        };

        close_surface(driver, &config, &selectors).await.log("close list surface");

        let elapsed = started.elapsed();
        info!(
            subject = %request.subject(),
            kind = %request.kind(),
            collected = handles.len(),
            expected = ?expected,
            elapsed_ms = elapsed.as_millis() as u64,
            termination = %termination,
            "collection finished"
        );

        CollectionOutcome {
            handles,
            expected,
            termination,
            rounds,
            refreshes: state.refresh_attempts,
            elapsed,
            metrics: self.metrics.clone(),
        }
    }
}

fn surface_locator(selectors: &SelectorMap) -> Locator {
    selectors
        .optional(OptionalSelector::ScrollContainer)
        .cloned()
        .unwrap_or_else(|| Locator::css("body"))
}

async fn open_surface(
    driver: &dyn UiDriver,
    accessor: &ElementAccessor<'_>,
    config: &InstatConfig,
    selectors: &SelectorMap,
    request: &ListRequest,
) -> Option<OpenSurface> {
    let collection = &config.collection;
    let url = collection.profile_url(request.subject());
    if let Err(err) = driver.navigate(&url).await {
        warn!(%url, error = %err, "profile page unavailable");
        return None;
    }

    let entry_locator = selectors.get(request.kind().entry_selector());
    let entry = wait_until(
        "list entry link",
        collection.timeout(),
        config.collection.poll_interval(),
        || async move { driver.find_one(entry_locator).await },
    )
    .await;
    let entry = match entry {
        Ok(entry) => entry,
        Err(err) => {
            warn!(kind = %request.kind(), error = %err, "list entry link not found");
            return None;
        }
    };

    let label = entry.text().await.unwrap_or_default();
    let expected = match parse_count_text(&join_count_tokens(&label)) {
        Ok(count) => Some(count),
        Err(err) => {
            warn!(label = %label.trim(), error = %err, "list count unreadable, collecting without a target");
            None
        }
    };

    if let Err(err) = entry.click().await {
        warn!(kind = %request.kind(), error = %err, "could not open list surface");
        return None;
    }

    let Some(surface) = accessor.find_one(&surface_locator(selectors)).await else {
        warn!("scroll surface not found");
        return None;
    };
    Some(OpenSurface { expected, surface })
}

async fn close_surface(
    driver: &dyn UiDriver,
    config: &InstatConfig,
    selectors: &SelectorMap,
) -> SideTaskOutcome {
    let locator = selectors.get(SelectorKey::CloseModalButton);
    let button = wait_until(
        "close button",
        config.collection.timeout(),
        config.collection.poll_interval(),
        || async move { driver.find_one(locator).await },
    )
    .await;
    match button {
        Ok(button) => match button.click().await {
            Ok(()) => SideTaskOutcome::Succeeded,
            Err(err) => SideTaskOutcome::failed(err),
        },
        Err(err) if err.is_timeout() => SideTaskOutcome::skipped("close button not shown"),
        Err(err) => SideTaskOutcome::failed(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_trims_and_rejects_blank() {
        assert_eq!(
            ProfileHandle::normalize("  alice \n").map(|h| h.to_string()),
            Some("alice".to_string())
        );
        assert!(ProfileHandle::normalize("   ").is_none());
        assert!(ProfileHandle::normalize("").is_none());
    }

    #[test]
    fn normalize_is_idempotent() {
        for raw in ["bob", "  bob", "bob\t", " b o b "] {
            let once = ProfileHandle::normalize(raw).unwrap();
            let twice = ProfileHandle::normalize(once.as_str()).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn list_kind_parses_and_displays() {
        assert_eq!("Followers".parse::<ListKind>(), Ok(ListKind::Followers));
        assert_eq!(" following ".parse::<ListKind>(), Ok(ListKind::Following));
        assert!("likes".parse::<ListKind>().is_err());
        assert_eq!(ListKind::Following.to_string(), "following");
    }

    #[test]
    fn request_trims_subject() {
        let request = ListRequest::new("  carol ", ListKind::Followers)
            .with_budget(Some(Duration::from_secs(30)));
        assert_eq!(request.subject(), "carol");
        assert_eq!(request.budget(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn handle_set_lookup_by_str() {
        let mut set = HashSet::new();
        set.insert(ProfileHandle::normalize("dave").unwrap());
        assert!(set.contains("dave"));
    }
}
