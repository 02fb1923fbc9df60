use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand, ValueEnum};
use instat_core::{
    load_instat_config, CollectionMetrics, InstaClient, InstatConfig, InstatError, ListKind,
    Locator, OptionalSelector, Termination,
};
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] instat_core::ConfigError),
    #[error(transparent)]
    Core(#[from] InstatError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("missing credential: pass --{0} or set INSTAT_{1}")]
    MissingCredential(&'static str, &'static str),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Collect followers/following lists from Instagram", long_about = None)]
pub struct Cli {
    /// Path to instat.toml
    #[arg(long, default_value = "configs/instat.toml")]
    pub config: PathBuf,
    /// Chromium executable, overrides chromium.executable_path
    #[arg(long, env = "INSTAT_CHROME")]
    pub chrome: Option<String>,
    /// Run Chromium without a window
    #[arg(long, conflicts_with = "headed")]
    pub headless: bool,
    /// Run Chromium with a visible window
    #[arg(long)]
    pub headed: bool,
    /// Login wait timeout in seconds, overrides login.timeout_seconds
    #[arg(long)]
    pub timeout: Option<u64>,
    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Collect the accounts following a profile
    Followers(ListArgs),
    /// Collect the accounts a profile follows
    Following(ListArgs),
    /// Log in, report the outcome and close the browser
    Login(CredentialArgs),
    /// Validate and print the selector table
    Selectors,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Profile whose list is collected
    pub profile: String,
    /// Stop collecting after this many seconds
    #[arg(long)]
    pub max_duration: Option<u64>,
    #[command(flatten)]
    pub credentials: CredentialArgs,
}

#[derive(Args, Debug)]
pub struct CredentialArgs {
    #[arg(long, env = "INSTAT_USERNAME")]
    pub username: Option<String>,
    #[arg(long, env = "INSTAT_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

impl CredentialArgs {
    fn resolve(&self) -> Result<(&str, &str)> {
        let username = self
            .username
            .as_deref()
            .ok_or(AppError::MissingCredential("username", "USERNAME"))?;
        let password = self
            .password
            .as_deref()
            .ok_or(AppError::MissingCredential("password", "PASSWORD"))?;
        Ok((username, password))
    }
}

pub fn run(cli: Cli) -> Result<()> {
    init_tracing(&cli.log_level);
    let config = load_instat_config(&cli.config)?;

    match &cli.command {
        Commands::Selectors => {
            let report = SelectorReport::from_config(&config)?;
            render(&report, cli.format)?;
        }
        Commands::Login(credentials) => {
            let client = build_client(&cli, config)?;
            let report = block_on(login(&client, credentials, login_timeout(&cli)))??;
            render(&report, cli.format)?;
        }
        Commands::Followers(args) => {
            let client = build_client(&cli, config)?;
            let report = block_on(collect(&client, args, ListKind::Followers, login_timeout(&cli)))??;
            render(&report, cli.format)?;
        }
        Commands::Following(args) => {
            let client = build_client(&cli, config)?;
            let report = block_on(collect(&client, args, ListKind::Following, login_timeout(&cli)))??;
            render(&report, cli.format)?;
        }
    }

    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_client(cli: &Cli, config: InstatConfig) -> Result<InstaClient> {
    let client = InstaClient::new(config)?;
    let mut launcher = client.launcher().clone();
    if let Some(chrome) = &cli.chrome {
        launcher = launcher.with_executable(chrome.clone());
    }
    if cli.headed {
        launcher = launcher.with_headless(false);
    } else if cli.headless {
        launcher = launcher.with_headless(true);
    }
    Ok(client.with_launcher(launcher))
}

fn login_timeout(cli: &Cli) -> Option<Duration> {
    cli.timeout.map(Duration::from_secs)
}

/// Driver traits are not `Send`, so everything runs on one thread.
fn block_on<F: std::future::Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(runtime.block_on(future))
}

async fn login(
    client: &InstaClient,
    credentials: &CredentialArgs,
    timeout: Option<Duration>,
) -> Result<LoginReport> {
    let (username, password) = credentials.resolve()?;
    let started = Instant::now();
    let session = client.authenticate(username, password, timeout).await?;
    client.teardown(session).await;
    Ok(LoginReport {
        username: username.to_string(),
        authenticated: true,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

async fn collect(
    client: &InstaClient,
    args: &ListArgs,
    kind: ListKind,
    timeout: Option<Duration>,
) -> Result<ListReport> {
    let (username, password) = args.credentials.resolve()?;
    let mut session = client.authenticate(username, password, timeout).await?;
    let budget = args.max_duration.map(Duration::from_secs);
    let outcome = client
        .collect_detailed(&mut session, &args.profile, kind, budget)
        .await;
    client.teardown(session).await;
    info!(profile = %args.profile, %kind, collected = outcome.handles.len(), "list collected");

    Ok(ListReport {
        profile: args.profile.clone(),
        kind,
        expected: outcome.expected,
        collected: outcome.handles.len(),
        termination: outcome.termination,
        elapsed_ms: outcome.elapsed.as_millis() as u64,
        handles: outcome
            .sorted_handles()
            .into_iter()
            .map(|handle| handle.to_string())
            .collect(),
        metrics: outcome.metrics,
    })
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug, Serialize)]
struct SelectorReport {
    rows: Vec<SelectorRow>,
}

#[derive(Debug, Serialize)]
struct SelectorRow {
    key: String,
    strategy: &'static str,
    value: String,
    required: bool,
}

impl SelectorReport {
    fn from_config(config: &InstatConfig) -> Result<Self> {
        let selectors = config.selector_map()?;
        let rows = selectors
            .entries()
            .into_iter()
            .map(|entry| SelectorRow {
                key: entry.name.to_string(),
                strategy: match entry.locator {
                    Locator::Css(_) => "css",
                    Locator::XPath(_) => "xpath",
                },
                value: entry.locator.as_str().to_string(),
                required: entry.required,
            })
            .collect();
        Ok(Self { rows })
    }
}

impl DisplayFallback for SelectorReport {
    fn display(&self) -> String {
        let mut lines: Vec<String> = self
            .rows
            .iter()
            .map(|row| {
                let marker = if row.required { "" } else { " (optional)" };
                format!("{}{marker} [{}] {}", row.key, row.strategy, row.value)
            })
            .collect();
        let missing_optional: Vec<&str> = OptionalSelector::ALL
            .iter()
            .map(|key| key.as_str())
            .filter(|key| !self.rows.iter().any(|row| row.key == *key))
            .collect();
        if !missing_optional.is_empty() {
            lines.push(format!("not configured: {}", missing_optional.join(", ")));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
struct LoginReport {
    username: String,
    authenticated: bool,
    elapsed_ms: u64,
}

impl DisplayFallback for LoginReport {
    fn display(&self) -> String {
        format!(
            "Logged in as {} in {:.1}s",
            self.username,
            self.elapsed_ms as f64 / 1000.0
        )
    }
}

#[derive(Debug, Serialize)]
struct ListReport {
    profile: String,
    kind: ListKind,
    expected: Option<u64>,
    collected: usize,
    termination: Termination,
    elapsed_ms: u64,
    handles: Vec<String>,
    metrics: CollectionMetrics,
}

impl DisplayFallback for ListReport {
    fn display(&self) -> String {
        let expected = self
            .expected
            .map(|count| count.to_string())
            .unwrap_or_else(|| "?".to_string());
        let mut lines = vec![format!(
            "{} of {}: {}/{} collected ({}, {:.1}s, {} refreshes, {:.0}% productive rounds)",
            self.kind,
            self.profile,
            self.collected,
            expected,
            self.termination,
            self.elapsed_ms as f64 / 1000.0,
            self.metrics.refreshes,
            self.metrics.productive_round_rate()
        )];
        lines.extend(self.handles.iter().map(|handle| format!("  {handle}")));
        lines.join("\n")
    }
}
