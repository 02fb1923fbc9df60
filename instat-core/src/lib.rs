pub mod browser;
pub mod client;
pub mod config;
pub mod count;
pub mod error;
pub mod extractor;
pub mod login;

pub use browser::{
    BrowserError, BrowserLauncher, BrowserResult, BrowserSession, CollectionMetrics, Locator,
    SideTaskOutcome, UiDriver, UiElement,
};
pub use client::InstaClient;
pub use config::{
    load_instat_config, parse_instat_config, InstatConfig, OptionalSelector, SelectorEntry,
    SelectorKey, SelectorMap,
};
pub use count::{join_count_tokens, parse_count_text, CountFormatError};
pub use error::{ConfigError, InstatError, InstatResult, Result};
pub use extractor::{
    CollectionEngine, CollectionOutcome, ListKind, ListRequest, ProfileHandle, Termination,
};
pub use login::{
    AuthenticationFlow, InterstitialError, InterstitialEvidence, LoginError, LoginFailure,
    LoginState, Session,
};
