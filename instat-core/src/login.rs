//! Authentication state machine producing a live [`Session`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::browser::{
    wait_until, wait_until_not, BrowserError, BrowserResult, ElementAccessor, ElementHandle,
    SideTaskOutcome, UiDriver, UiElement,
};
use crate::config::{InstatConfig, OptionalSelector, SelectorKey, SelectorMap};
use crate::error::{InstatError, InstatResult};

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("login form not found: {0}")]
    FormNotFound(String),
    #[error("failed to enter credentials: {0}")]
    CredentialEntryFailed(String),
    #[error("no login button matched the submit keywords ({0} candidates inspected)")]
    NoSuitableButton(usize),
    #[error("login button click did not complete: {0}")]
    FallbackClickFailed(String),
}

impl LoginError {
    pub fn failure(&self) -> LoginFailure {
        match self {
            LoginError::FormNotFound(_) => LoginFailure::FormNotFound,
            LoginError::CredentialEntryFailed(_) => LoginFailure::CredentialEntryFailed,
            LoginError::NoSuitableButton(_) => LoginFailure::NoSuitableButton,
            LoginError::FallbackClickFailed(_) => LoginFailure::FallbackClickFailed,
        }
    }
}

/// Diagnostics gathered when a verification page blocks the login.
#[derive(Debug, Clone, Serialize)]
pub struct InterstitialEvidence {
    pub url: String,
    pub title: String,
    pub signature: String,
    pub artifacts: Vec<PathBuf>,
}

#[derive(Debug, Error)]
#[error("verification interstitial at {} (matched '{}')", .evidence.url, .evidence.signature)]
pub struct InterstitialError {
    pub evidence: InterstitialEvidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoginFailure {
    FormNotFound,
    CredentialEntryFailed,
    NoSuitableButton,
    FallbackClickFailed,
    Interstitial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoginState {
    Start,
    FormVisible,
    CredentialsSubmitted,
    Redirected,
    FallbackNeeded,
    FallbackClicked,
    ObstacleCheck,
    Authenticated,
    Failed(LoginFailure),
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoginState::Failed(reason) => write!(f, "Failed({reason:?})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// An authenticated browser owned by one caller.
pub struct Session {
    driver: Box<dyn UiDriver>,
    username: String,
    live: bool,
}

impl Session {
    fn new(driver: Box<dyn UiDriver>, username: &str) -> Self {
        Self {
            driver,
            username: username.to_string(),
            live: true,
        }
    }

    pub fn driver(&self) -> &dyn UiDriver {
        self.driver.as_ref()
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Releases the browser. Safe to call more than once.
    pub async fn close(&mut self) -> BrowserResult<()> {
        if !self.live {
            return Ok(());
        }
        self.live = false;
        info!(username = %self.username, "tearing down session");
        self.driver.close().await
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.username)
            .field("live", &self.live)
            .finish()
    }
}

/// Single-shot login: no step is retried, every failure is terminal.
pub struct AuthenticationFlow {
    config: Arc<InstatConfig>,
    selectors: Arc<SelectorMap>,
    timeout: Duration,
    transitions: Vec<LoginState>,
}

impl AuthenticationFlow {
    pub fn new(config: Arc<InstatConfig>, selectors: Arc<SelectorMap>) -> Self {
        let timeout = config.login.timeout();
        Self {
            config,
            selectors,
            timeout,
            transitions: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// States visited by the most recent run, in order.
    pub fn transitions(&self) -> &[LoginState] {
        &self.transitions
    }

    pub fn state(&self) -> LoginState {
        self.transitions.last().copied().unwrap_or(LoginState::Start)
    }

    /// Logs in through `driver` and hands it over to the returned session.
    /// On failure the driver is closed before the error is returned.
    pub async fn run(
        &mut self,
        driver: Box<dyn UiDriver>,
        username: &str,
        password: &str,
    ) -> InstatResult<Session> {
        self.transitions.clear();
        self.enter(LoginState::Start);
        match self.authenticate(driver.as_ref(), username, password).await {
            Ok(()) => {
                self.enter(LoginState::Authenticated);
                info!(username, "authenticated");
                Ok(Session::new(driver, username))
            }
            Err(err) => {
                let failure = match &err {
                    InstatError::Login(login) => login.failure(),
                    _ => LoginFailure::Interstitial,
                };
                self.enter(LoginState::Failed(failure));
                warn!(username, error = %err, "authentication failed");
                if let Err(close_err) = driver.close().await {
                    debug!(error = %close_err, "closing driver after failed login");
                }
                Err(err)
            }
        }
    }

    async fn authenticate(
        &mut self,
        driver: &dyn UiDriver,
        username: &str,
        password: &str,
    ) -> InstatResult<()> {
        let login = &self.config.login;
        let accessor = ElementAccessor::from_config(driver, &self.config.retry);
        let login_url = login.login_url.clone();
        let poll = login.poll_interval();

        let (user_field, pass_field) = self.open_form(driver, &login_url).await?;
        self.enter(LoginState::FormVisible);

        submit_credentials(&user_field, &pass_field, username, password).await?;
        self.enter(LoginState::CredentialsSubmitted);

        self.dismiss_ignore_prompt(driver).await.log("ignore prompt");

        match wait_for_location_change(driver, &login_url, self.timeout, poll).await {
            Ok(url) => {
                debug!(%url, "left login page");
                self.enter(LoginState::Redirected);
            }
            Err(err) => {
                debug!(error = %err, "no redirect after submit, trying login button");
                self.enter(LoginState::FallbackNeeded);
                self.click_fallback_button(&accessor).await?;
                self.enter(LoginState::FallbackClicked);
                self.await_fallback_navigation(driver, &login_url).await?;
            }
        }

        self.enter(LoginState::ObstacleCheck);
        self.dismiss_save_login_prompt(driver, &accessor)
            .await
            .log("save login prompt");

        self.check_interstitial(driver).await
    }

    async fn open_form(
        &self,
        driver: &dyn UiDriver,
        login_url: &str,
    ) -> Result<(ElementHandle, ElementHandle), LoginError> {
        driver
            .navigate(login_url)
            .await
            .map_err(|err| LoginError::FormNotFound(err.to_string()))?;
        let user = self.selectors.get(SelectorKey::LoginUsernameInput);
        let pass = self.selectors.get(SelectorKey::LoginPasswordInput);
        wait_until("login form", self.timeout, self.config.login.poll_interval(), || async move {
            let Some(user_field) = visible(driver.find_one(user).await?).await? else {
                return Ok(None);
            };
            Ok::<_, BrowserError>(
                visible(driver.find_one(pass).await?)
                    .await?
                    .map(|pass_field| (user_field, pass_field)),
            )
        })
        .await
        .map_err(|err| LoginError::FormNotFound(err.to_string()))
    }

    async fn dismiss_ignore_prompt(&self, driver: &dyn UiDriver) -> SideTaskOutcome {
        let Some(locator) = self.selectors.optional(OptionalSelector::IgnoreButton) else {
            return SideTaskOutcome::skipped("IGNORE_BUTTON not configured");
        };
        let login = &self.config.login;
        let button = wait_until("ignore button", login.ignore_timeout(), login.poll_interval(), || async move {
            driver.find_one(locator).await
        })
        .await;
        let button = match button {
            Ok(button) => button,
            Err(err) if err.is_timeout() => return SideTaskOutcome::skipped("prompt not shown"),
            Err(err) => return SideTaskOutcome::failed(err),
        };
        sleep(login.ignore_click_delay()).await;
        match button.click().await {
            Ok(()) => SideTaskOutcome::Succeeded,
            Err(err) => SideTaskOutcome::failed(err),
        }
    }

    async fn click_fallback_button(&self, accessor: &ElementAccessor<'_>) -> Result<(), LoginError> {
        let candidates = accessor
            .find_many(self.selectors.get(SelectorKey::LoginButtonCandidate))
            .await;
        let keywords = &self.config.login.submit_keywords;
        for candidate in &candidates {
            let label = element_label(candidate.as_ref()).await;
            if matches_keyword(&label, keywords) {
                info!(button = %label.trim(), "clicking login button");
                return candidate
                    .click()
                    .await
                    .map_err(|err| LoginError::FallbackClickFailed(err.to_string()));
            }
        }
        Err(LoginError::NoSuitableButton(candidates.len()))
    }

    async fn await_fallback_navigation(
        &self,
        driver: &dyn UiDriver,
        login_url: &str,
    ) -> Result<(), LoginError> {
        let poll = self.config.login.poll_interval();
        wait_for_location_change(driver, login_url, self.timeout, poll)
            .await
            .map_err(|err| LoginError::FallbackClickFailed(err.to_string()))?;
        wait_until("document ready", self.timeout, poll, || async move {
            let state = driver.execute_script("document.readyState").await?;
            Ok::<_, BrowserError>((state.as_str() == Some("complete")).then_some(()))
        })
        .await
        .map_err(|err| LoginError::FallbackClickFailed(err.to_string()))?;
        sleep(self.config.login.settle_pause()).await;
        Ok(())
    }

    async fn dismiss_save_login_prompt(
        &self,
        driver: &dyn UiDriver,
        accessor: &ElementAccessor<'_>,
    ) -> SideTaskOutcome {
        let poll = self.config.login.poll_interval();
        let button_locator = self.selectors.get(SelectorKey::SaveLoginInfoButton);
        let buttons = wait_until("save login buttons", self.timeout, poll, || async move {
            let found = driver.find_many(button_locator).await?;
            Ok::<_, BrowserError>((!found.is_empty()).then_some(found))
        })
        .await;
        let buttons = match buttons {
            Ok(buttons) => buttons,
            Err(err) if err.is_timeout() => return SideTaskOutcome::skipped("prompt not shown"),
            Err(err) => return SideTaskOutcome::failed(err),
        };

        let keywords = &self.config.login.dismiss_keywords;
        let mut chosen = None;
        for button in &buttons {
            if matches_keyword(&element_label(button.as_ref()).await, keywords) {
                chosen = Some(button);
                break;
            }
        }
        let Some(button) = chosen else {
            return SideTaskOutcome::skipped("no dismiss button matched");
        };
        if let Err(err) = button.click().await {
            return SideTaskOutcome::failed(err);
        }

        let dialog = self.selectors.get(SelectorKey::SaveLoginInfoDialog);
        let closed = wait_until_not("save login dialog", self.timeout, poll, || async move {
            Ok::<_, BrowserError>(accessor.driver().find_one(dialog).await?.is_some())
        })
        .await;
        match closed {
            Ok(()) => SideTaskOutcome::Succeeded,
            Err(err) => SideTaskOutcome::failed(err),
        }
    }

    async fn check_interstitial(&self, driver: &dyn UiDriver) -> InstatResult<()> {
        let title = driver.page_title().await.unwrap_or_else(|err| {
            debug!(error = %err, "title unavailable");
            String::new()
        });
        let url = driver.current_url().await.unwrap_or_else(|err| {
            debug!(error = %err, "url unavailable");
            String::new()
        });
        let markup = driver.page_markup().await.unwrap_or_else(|err| {
            debug!(error = %err, "markup unavailable");
            String::new()
        });

        let haystack = format!("{title}\n{url}\n{markup}").to_lowercase();
        let Some(signature) = self
            .config
            .login
            .interstitial_signatures
            .iter()
            .find(|signature| haystack.contains(&signature.to_lowercase()))
        else {
            return Ok(());
        };

        warn!(%url, %title, %signature, "verification interstitial detected");
        let artifacts = self.capture_evidence(driver, &markup).await;
        Err(InterstitialError {
            evidence: InterstitialEvidence {
                url,
                title,
                signature: signature.clone(),
                artifacts,
            },
        }
        .into())
    }

    async fn capture_evidence(&self, driver: &dyn UiDriver, markup: &str) -> Vec<PathBuf> {
        let diagnostics = &self.config.diagnostics;
        let mut artifacts = Vec::new();
        if let Err(err) = tokio::fs::create_dir_all(&diagnostics.dir).await {
            warn!(dir = %diagnostics.dir.display(), error = %err, "cannot create diagnostics dir");
            return artifacts;
        }
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3fZ");

        if diagnostics.capture_markup {
            let path = evidence_path(&diagnostics.dir, &stamp, "html");
            match driver.save_markup(&path, markup).await {
                Ok(()) => artifacts.push(path),
                Err(err) => warn!(path = %path.display(), error = %err, "markup capture failed"),
            }
        }
        if diagnostics.capture_screenshot {
            let path = evidence_path(&diagnostics.dir, &stamp, "png");
            match driver.take_visual_snapshot(&path).await {
                Ok(()) => artifacts.push(path),
                Err(err) => warn!(path = %path.display(), error = %err, "screenshot capture failed"),
            }
        }
        artifacts
    }

    fn enter(&mut self, state: LoginState) {
        let from = self.state();
        info!(%from, to = %state, "login transition");
        self.transitions.push(state);
    }
}

async fn submit_credentials(
    user_field: &ElementHandle,
    pass_field: &ElementHandle,
    username: &str,
    password: &str,
) -> Result<(), LoginError> {
    let entry = async {
        user_field.clear().await?;
        user_field.send_keys(username).await?;
        pass_field.clear().await?;
        pass_field.send_keys(password).await?;
        pass_field.submit().await
    };
    entry
        .await
        .map_err(|err| LoginError::CredentialEntryFailed(err.to_string()))
}

async fn wait_for_location_change(
    driver: &dyn UiDriver,
    from: &str,
    timeout: Duration,
    poll: Duration,
) -> BrowserResult<String> {
    wait_until("location change", timeout, poll, || async move {
        let url = driver.current_url().await?;
        Ok::<_, BrowserError>((url != from).then_some(url))
    })
    .await
}

async fn visible(element: Option<ElementHandle>) -> BrowserResult<Option<ElementHandle>> {
    let Some(element) = element else {
        return Ok(None);
    };
    Ok(element.is_visible().await?.then_some(element))
}

/// Text used for keyword matching: `textContent`, else rendered text.
async fn element_label(element: &dyn UiElement) -> String {
    match element.attribute("textContent").await {
        Ok(Some(text)) if !text.trim().is_empty() => text,
        _ => element.text().await.unwrap_or_default(),
    }
}

fn matches_keyword(label: &str, keywords: &[String]) -> bool {
    let label = label.to_lowercase();
    keywords
        .iter()
        .any(|keyword| label.contains(&keyword.to_lowercase()))
}

fn evidence_path(dir: &Path, stamp: &impl fmt::Display, extension: &str) -> PathBuf {
    dir.join(format!("interstitial-{stamp}.{extension}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_matching_is_case_insensitive() {
        let keywords = vec!["log in".to_string(), "entrar".to_string()];
        assert!(matches_keyword("  Log In ", &keywords));
        assert!(matches_keyword("ENTRAR", &keywords));
        assert!(!matches_keyword("Sign up", &keywords));
    }

    #[test]
    fn login_errors_map_to_failure_states() {
        assert_eq!(
            LoginError::NoSuitableButton(2).failure(),
            LoginFailure::NoSuitableButton
        );
        assert_eq!(
            LoginError::FormNotFound("timeout".into()).failure(),
            LoginFailure::FormNotFound
        );
    }

    #[test]
    fn state_display_names_failure() {
        assert_eq!(LoginState::Redirected.to_string(), "Redirected");
        assert_eq!(
            LoginState::Failed(LoginFailure::Interstitial).to_string(),
            "Failed(Interstitial)"
        );
    }

    #[test]
    fn evidence_paths_live_under_diagnostics_dir() {
        let path = evidence_path(Path::new("diag"), &"20240101T000000000Z", "html");
        assert_eq!(path, PathBuf::from("diag/interstitial-20240101T000000000Z.html"));
    }
}
