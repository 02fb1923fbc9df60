use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::browser::Locator;
use crate::error::{ConfigError, Result};

const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 8.0; Nexus 5 Build/OPR6.170623.013) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/89.0.4389.72 Mobile Safari/537.36";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct InstatConfig {
    #[serde(default)]
    pub chromium: ChromiumSection,
    #[serde(default)]
    pub login: LoginSection,
    #[serde(default)]
    pub collection: CollectionSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub diagnostics: DiagnosticsSection,
    pub selectors: HashMap<String, String>,
}

impl InstatConfig {
    /// Builds the validated selector table.
    pub fn selector_map(&self) -> Result<SelectorMap> {
        SelectorMap::from_table(&self.selectors)
    }

    pub fn validate(&self) -> Result<()> {
        self.selector_map()?;
        url::Url::parse(&self.login.login_url).map_err(|err| ConfigError::Invalid {
            field: "login.login_url",
            reason: err.to_string(),
        })?;
        if !self.collection.profile_url_template.contains("{subject}") {
            return Err(ConfigError::Invalid {
                field: "collection.profile_url_template",
                reason: "template must contain {subject}".to_string(),
            });
        }
        if self.collection.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "collection.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.collection.stall_max_spins == 0 {
            return Err(ConfigError::Invalid {
                field: "collection.stall_max_spins",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChromiumSection {
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub user_agent: String,
    pub window_size: [u32; 2],
    pub hide_webdriver_flag: bool,
    pub lang: Option<String>,
    pub request_timeout_seconds: Option<u64>,
}

impl Default for ChromiumSection {
    fn default() -> Self {
        Self {
            executable_path: None,
            headless: true,
            sandbox: false,
            disable_gpu: true,
            user_agent: MOBILE_USER_AGENT.to_string(),
            window_size: [375, 667],
            hide_webdriver_flag: true,
            lang: None,
            request_timeout_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoginSection {
    pub login_url: String,
    pub timeout_seconds: u64,
    pub poll_interval_ms: u64,
    pub submit_keywords: Vec<String>,
    pub dismiss_keywords: Vec<String>,
    pub interstitial_signatures: Vec<String>,
    pub ignore_timeout_seconds: u64,
    pub ignore_click_delay_ms: u64,
    pub settle_pause_ms: u64,
}

impl LoginSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn ignore_timeout(&self) -> Duration {
        Duration::from_secs(self.ignore_timeout_seconds)
    }

    pub fn ignore_click_delay(&self) -> Duration {
        Duration::from_millis(self.ignore_click_delay_ms)
    }

    pub fn settle_pause(&self) -> Duration {
        Duration::from_millis(self.settle_pause_ms)
    }
}

impl Default for LoginSection {
    fn default() -> Self {
        Self {
            login_url: "https://www.instagram.com/accounts/login/".to_string(),
            timeout_seconds: 10,
            poll_interval_ms: 250,
            submit_keywords: strings(&[
                "entrar",
                "log in",
                "login",
                "iniciar sesión",
                "connexion",
                "anmelden",
            ]),
            dismiss_keywords: strings(&["not now", "agora não", "salvar", "save", "skip"]),
            interstitial_signatures: strings(&[
                "meta verified",
                "confirm it's you",
                "suspicious login attempt",
                "challenge_required",
                "/challenge/",
                "we suspended your account",
            ]),
            ignore_timeout_seconds: 5,
            ignore_click_delay_ms: 1000,
            settle_pause_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectionSection {
    pub profile_url_template: String,
    pub timeout_seconds: u64,
    pub max_refresh_attempts: usize,
    pub max_retry_without_new_profiles: usize,
    pub wait_interval_ms: u64,
    pub additional_scroll_attempts: usize,
    pub pause_time_ms: u64,
    pub max_attempts: usize,
    pub refresh_settle_ms: u64,
    pub spinner_timeout_seconds: u64,
    pub stall_scroll_pause_ms: u64,
    pub stall_max_spins: usize,
    pub snapshot_fan_out: usize,
    pub poll_interval_ms: u64,
}

impl CollectionSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn wait_interval(&self) -> Duration {
        Duration::from_millis(self.wait_interval_ms)
    }

    pub fn pause_time(&self) -> Duration {
        Duration::from_millis(self.pause_time_ms)
    }

    pub fn refresh_settle(&self) -> Duration {
        Duration::from_millis(self.refresh_settle_ms)
    }

    pub fn spinner_timeout(&self) -> Duration {
        Duration::from_secs(self.spinner_timeout_seconds)
    }

    pub fn stall_scroll_pause(&self) -> Duration {
        Duration::from_millis(self.stall_scroll_pause_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn profile_url(&self, subject: &str) -> String {
        self.profile_url_template.replace("{subject}", subject)
    }
}

impl Default for CollectionSection {
    fn default() -> Self {
        Self {
            profile_url_template: "https://www.instagram.com/{subject}/".to_string(),
            timeout_seconds: 10,
            max_refresh_attempts: 100,
            max_retry_without_new_profiles: 3,
            wait_interval_ms: 500,
            additional_scroll_attempts: 1,
            pause_time_ms: 500,
            max_attempts: 2,
            refresh_settle_ms: 3000,
            spinner_timeout_seconds: 5,
            stall_scroll_pause_ms: 400,
            stall_max_spins: 10,
            snapshot_fan_out: 1,
            poll_interval_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AttemptSection {
    pub max_attempts: usize,
    pub pause_ms: u64,
}

impl AttemptSection {
    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// Single-element lookups.
    pub single: AttemptSection,
    /// Multi-element lookups.
    pub many: AttemptSection,
    /// Snapshots taken by the stall waiter.
    pub snapshot: AttemptSection,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            single: AttemptSection {
                max_attempts: 3,
                pause_ms: 1000,
            },
            many: AttemptSection {
                max_attempts: 3,
                pause_ms: 300,
            },
            snapshot: AttemptSection {
                max_attempts: 2,
                pause_ms: 700,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiagnosticsSection {
    pub dir: PathBuf,
    pub capture_markup: bool,
    pub capture_screenshot: bool,
}

impl Default for DiagnosticsSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("diagnostics"),
            capture_markup: true,
            capture_screenshot: true,
        }
    }
}

/// Selector names the core cannot run without.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectorKey {
    LoginUsernameInput,
    LoginPasswordInput,
    LoginButtonCandidate,
    SaveLoginInfoButton,
    SaveLoginInfoDialog,
    FollowersLink,
    FollowingLink,
    ProfileUsernameSpan,
    LoadingSpinner,
    CloseModalButton,
}

impl SelectorKey {
    pub const REQUIRED: [SelectorKey; 10] = [
        SelectorKey::LoginUsernameInput,
        SelectorKey::LoginPasswordInput,
        SelectorKey::LoginButtonCandidate,
        SelectorKey::SaveLoginInfoButton,
        SelectorKey::SaveLoginInfoDialog,
        SelectorKey::FollowersLink,
        SelectorKey::FollowingLink,
        SelectorKey::ProfileUsernameSpan,
        SelectorKey::LoadingSpinner,
        SelectorKey::CloseModalButton,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SelectorKey::LoginUsernameInput => "LOGIN_USERNAME_INPUT",
            SelectorKey::LoginPasswordInput => "LOGIN_PASSWORD_INPUT",
            SelectorKey::LoginButtonCandidate => "LOGIN_BUTTON_CANDIDATE",
            SelectorKey::SaveLoginInfoButton => "SAVE_LOGIN_INFO_BUTTON",
            SelectorKey::SaveLoginInfoDialog => "SAVE_LOGIN_INFO_DIALOG",
            SelectorKey::FollowersLink => "FOLLOWERS_LINK",
            SelectorKey::FollowingLink => "FOLLOWING_LINK",
            SelectorKey::ProfileUsernameSpan => "PROFILE_USERNAME_SPAN",
            SelectorKey::LoadingSpinner => "LOADING_SPINNER",
            SelectorKey::CloseModalButton => "CLOSE_MODAL_BUTTON",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for SelectorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selector names that may be left out of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionalSelector {
    IgnoreButton,
    ScrollContainer,
}

impl OptionalSelector {
    pub const ALL: [OptionalSelector; 2] = [OptionalSelector::IgnoreButton, OptionalSelector::ScrollContainer];

    pub fn as_str(&self) -> &'static str {
        match self {
            OptionalSelector::IgnoreButton => "IGNORE_BUTTON",
            OptionalSelector::ScrollContainer => "SCROLL_CONTAINER",
        }
    }
}

impl fmt::Display for OptionalSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SelectorEntry<'a> {
    pub name: &'static str,
    pub required: bool,
    pub locator: &'a Locator,
}

/// Selector table resolved once at startup. Every required key is present.
#[derive(Debug, Clone)]
pub struct SelectorMap {
    required: Vec<Locator>,
    optional: HashMap<OptionalSelector, Locator>,
}

impl SelectorMap {
    pub fn from_table(table: &HashMap<String, String>) -> Result<Self> {
        let mut required = Vec::with_capacity(SelectorKey::REQUIRED.len());
        for key in SelectorKey::REQUIRED {
            let raw = table
                .get(key.as_str())
                .ok_or_else(|| ConfigError::MissingSelector(key.as_str().to_string()))?;
            required.push(parse_selector(key.as_str(), raw)?);
        }
        let mut optional = HashMap::new();
        for key in OptionalSelector::ALL {
            if let Some(raw) = table.get(key.as_str()) {
                optional.insert(key, parse_selector(key.as_str(), raw)?);
            }
        }
        Ok(Self { required, optional })
    }

    pub fn get(&self, key: SelectorKey) -> &Locator {
        &self.required[key.index()]
    }

    pub fn optional(&self, key: OptionalSelector) -> Option<&Locator> {
        self.optional.get(&key)
    }

    pub fn entries(&self) -> Vec<SelectorEntry<'_>> {
        let required = SelectorKey::REQUIRED.iter().map(|key| SelectorEntry {
            name: key.as_str(),
            required: true,
            locator: self.get(*key),
        });
        let optional = OptionalSelector::ALL.iter().filter_map(|key| {
            self.optional(*key).map(|locator| SelectorEntry {
                name: key.as_str(),
                required: false,
                locator,
            })
        });
        let mut entries: Vec<_> = required.chain(optional).collect();
        entries.sort_by_key(|entry| entry.name);
        entries
    }
}

fn parse_selector(name: &str, raw: &str) -> Result<Locator> {
    if raw.trim().is_empty() {
        return Err(ConfigError::InvalidSelector {
            key: name.to_string(),
        });
    }
    Ok(Locator::parse(raw))
}

pub fn load_instat_config<P: AsRef<Path>>(path: P) -> Result<InstatConfig> {
    let config: InstatConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

pub fn parse_instat_config(content: &str) -> Result<InstatConfig> {
    let config: InstatConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
        source,
        path: PathBuf::from("<inline>"),
    })?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}
