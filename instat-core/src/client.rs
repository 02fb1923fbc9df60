use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::browser::{BrowserLauncher, UiDriver};
use crate::config::{load_instat_config, InstatConfig, SelectorMap};
use crate::error::InstatResult;
use crate::extractor::{CollectionEngine, CollectionOutcome, ListKind, ListRequest, ProfileHandle};
use crate::login::{AuthenticationFlow, Session};

/// Entry point for callers: log in, collect lists, tear down.
#[derive(Debug, Clone)]
pub struct InstaClient {
    config: Arc<InstatConfig>,
    selectors: Arc<SelectorMap>,
    launcher: BrowserLauncher,
}

impl InstaClient {
    pub fn new(config: InstatConfig) -> InstatResult<Self> {
        config.validate()?;
        let selectors = Arc::new(config.selector_map()?);
        let launcher = BrowserLauncher::new(config.chromium.clone());
        Ok(Self {
            config: Arc::new(config),
            selectors,
            launcher,
        })
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> InstatResult<Self> {
        Self::new(load_instat_config(path)?)
    }

    pub fn with_launcher(mut self, launcher: BrowserLauncher) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn config(&self) -> &InstatConfig {
        &self.config
    }

    pub fn selectors(&self) -> &SelectorMap {
        &self.selectors
    }

    pub fn launcher(&self) -> &BrowserLauncher {
        &self.launcher
    }

    /// Launches Chromium and logs in.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
        timeout: Option<Duration>,
    ) -> InstatResult<Session> {
        let browser = self.launcher.launch().await?;
        self.authenticate_with(Box::new(browser), username, password, timeout)
            .await
    }

    /// Logs in through an already running driver.
    pub async fn authenticate_with(
        &self,
        driver: Box<dyn UiDriver>,
        username: &str,
        password: &str,
        timeout: Option<Duration>,
    ) -> InstatResult<Session> {
        let mut flow = AuthenticationFlow::new(Arc::clone(&self.config), Arc::clone(&self.selectors));
        if let Some(timeout) = timeout {
            flow = flow.with_timeout(timeout);
        }
        flow.run(driver, username, password).await
    }

    pub async fn collect(
        &self,
        session: &mut Session,
        subject: &str,
        kind: ListKind,
        budget: Option<Duration>,
    ) -> HashSet<ProfileHandle> {
        self.collect_detailed(session, subject, kind, budget)
            .await
            .handles
    }

    pub async fn collect_detailed(
        &self,
        session: &mut Session,
        subject: &str,
        kind: ListKind,
        budget: Option<Duration>,
    ) -> CollectionOutcome {
        let request = ListRequest::new(subject, kind).with_budget(budget);
        CollectionEngine::new(session, Arc::clone(&self.config), Arc::clone(&self.selectors))
            .collect_detailed(&request)
            .await
    }

    pub async fn followers(
        &self,
        session: &mut Session,
        subject: &str,
        budget: Option<Duration>,
    ) -> HashSet<ProfileHandle> {
        self.collect(session, subject, ListKind::Followers, budget).await
    }

    pub async fn following(
        &self,
        session: &mut Session,
        subject: &str,
        budget: Option<Duration>,
    ) -> HashSet<ProfileHandle> {
        self.collect(session, subject, ListKind::Following, budget).await
    }

    pub async fn teardown(&self, mut session: Session) {
        if let Err(err) = session.close().await {
            warn!(error = %err, "browser did not shut down cleanly");
        }
    }
}
