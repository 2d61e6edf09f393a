//! Configuration types and loading
//!
//! Config precedence: env vars > config file > defaults. The config file is
//! optional. API keys are read from `API_FOOTBALL_KEY` and
//! `API_FOOTBALL_KEY_1` through `API_FOOTBALL_KEY_9` only, never from TOML,
//! to avoid leaking secrets into checked-in files.

use api_client::{ClientOptions, RetryPolicy};
use common::Secret;
use key_pool::QuotaLimits;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "football-scraper.toml";

/// Placeholder shipped in sample env files.
const PLACEHOLDER_KEY: &str = "your_api_key_here";

/// Numbered key variables checked after `API_FOOTBALL_KEY`.
const MAX_NUMBERED_KEYS: u32 = 9;

/// Root configuration
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub quota: QuotaConfig,
    pub retry: RetryConfig,
    pub scrape: ScrapeConfig,
    pub output: OutputConfig,
    /// `(variable name, key)` pairs in discovery order, duplicates removed.
    #[serde(skip)]
    pub api_keys: Vec<(String, Secret<String>)>,
}

/// Upstream API settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub timeout_secs: u64,
}

/// Per-key quota ceilings and the wait budget per request
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub requests_per_key_per_minute: u32,
    pub requests_per_key_per_day: u32,
    pub max_wait_secs: u64,
}

/// Backoff for transient failures
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

/// A league or cup as identified upstream
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Competition {
    pub id: u32,
    pub name: String,
}

impl Competition {
    fn new(id: u32, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
        }
    }
}

/// What to scrape
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    /// League whose teams seed the team list
    pub world_cup_league: u32,
    pub reference_season: u32,
    /// Season used for the qualification team lists
    pub qualification_season: u32,
    pub qualifications: Vec<Competition>,
    /// Seasons of player statistics and fixtures
    pub seasons: Vec<u32>,
    /// Competitions whose fixtures are collected
    pub competitions: Vec<Competition>,
    pub host_nations: Vec<String>,
    /// Ask upstream for the remaining daily quota before every Nth team.
    /// 0 turns the check off.
    pub quota_check_every: usize,
    /// Pause when the enabled keys have this many requests left or fewer
    pub min_upstream_remaining: u64,
    /// Pause after this many failed units in a row. 0 never pauses.
    pub max_consecutive_failures: usize,
    /// Squads smaller than this are saved with a warning
    pub min_squad_size: usize,
}

/// Where CSV files go
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            quota: QuotaConfig::default(),
            retry: RetryConfig::default(),
            scrape: ScrapeConfig::default(),
            output: OutputConfig::default(),
            api_keys: Vec::new(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "v3.football.api-sports.io".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            requests_per_key_per_minute: 10,
            requests_per_key_per_day: 100,
            max_wait_secs: 300,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 1000,
            backoff_max_ms: 30_000,
        }
    }
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            world_cup_league: 1,
            reference_season: 2022,
            qualification_season: 2024,
            qualifications: vec![
                Competition::new(32, "Europe"),
                Competition::new(29, "South America"),
                Competition::new(31, "CONCACAF"),
                Competition::new(33, "Africa"),
                Competition::new(30, "Asia"),
                Competition::new(34, "Oceania"),
            ],
            seasons: vec![2022, 2023, 2024],
            competitions: vec![
                Competition::new(1, "World Cup"),
                Competition::new(32, "WC Qualification Europe"),
                Competition::new(29, "WC Qualification South America"),
                Competition::new(31, "WC Qualification CONCACAF"),
                Competition::new(33, "WC Qualification Africa"),
                Competition::new(30, "WC Qualification Asia"),
                Competition::new(4, "UEFA Euro"),
                Competition::new(9, "Copa America"),
                Competition::new(22, "CONCACAF Gold Cup"),
                Competition::new(6, "Africa Cup of Nations"),
                Competition::new(7, "AFC Asian Cup"),
                Competition::new(5, "UEFA Nations League"),
                Competition::new(2, "UEFA Champions League"),
                Competition::new(3, "UEFA Europa League"),
                Competition::new(13, "Copa Libertadores"),
            ],
            host_nations: vec!["USA".into(), "Canada".into(), "Mexico".into()],
            quota_check_every: 5,
            min_upstream_remaining: 10,
            max_consecutive_failures: 5,
            min_squad_size: 10,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
        }
    }
}

/// Parse an env override, naming the variable on failure.
fn parse_var<T: FromStr>(key: &str, value: String) -> common::Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| common::Error::InvalidValue {
            key: key.to_string(),
            value,
        })
}

impl Config {
    /// Load configuration from an optional TOML file, then overlay the
    /// process environment.
    pub fn load(path: Option<&Path>) -> common::Result<Self> {
        let contents = match path {
            Some(p) => Some(std::fs::read_to_string(p)?),
            None => None,
        };
        Self::from_sources(contents.as_deref(), |key| std::env::var(key).ok())
    }

    /// Build a config from TOML text and an environment lookup.
    pub fn from_sources(
        toml_text: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> common::Result<Self> {
        let mut config: Config = match toml_text {
            Some(text) => toml::from_str(text)?,
            None => Config::default(),
        };
        config.apply_env(&env)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, env: &impl Fn(&str) -> Option<String>) -> common::Result<()> {
        if let Some(host) = env("API_FOOTBALL_HOST") {
            self.api.host = host.trim().to_string();
        }
        if let Some(v) = env("REQUESTS_PER_KEY_PER_MINUTE") {
            self.quota.requests_per_key_per_minute = parse_var("REQUESTS_PER_KEY_PER_MINUTE", v)?;
        }
        if let Some(v) = env("REQUESTS_PER_KEY_PER_DAY") {
            self.quota.requests_per_key_per_day = parse_var("REQUESTS_PER_KEY_PER_DAY", v)?;
        }
        if let Some(v) = env("MAX_RETRIES") {
            self.retry.max_retries = parse_var("MAX_RETRIES", v)?;
        }
        if let Some(v) = env("BACKOFF_BASE_MS") {
            self.retry.backoff_base_ms = parse_var("BACKOFF_BASE_MS", v)?;
        }
        if let Some(v) = env("MAX_CONSECUTIVE_FAILURES") {
            self.scrape.max_consecutive_failures = parse_var("MAX_CONSECUTIVE_FAILURES", v)?;
        }
        if let Some(dir) = env("OUTPUT_DIR") {
            self.output.dir = PathBuf::from(dir);
        }

        let names = std::iter::once("API_FOOTBALL_KEY".to_string())
            .chain((1..=MAX_NUMBERED_KEYS).map(|n| format!("API_FOOTBALL_KEY_{n}")));
        for name in names {
            let Some(value) = env(&name) else { continue };
            let value = value.trim().to_string();
            if value.is_empty() || value == PLACEHOLDER_KEY {
                continue;
            }
            if self.api_keys.iter().any(|(_, k)| k.expose() == &value) {
                continue;
            }
            self.api_keys.push((name, Secret::new(value)));
        }
        Ok(())
    }

    fn validate(&self) -> common::Result<()> {
        if self.api.host.is_empty() {
            return Err(common::Error::Config("api.host must not be empty".into()));
        }
        if self.api.timeout_secs == 0 {
            return Err(common::Error::Config(
                "api.timeout_secs must be greater than 0".into(),
            ));
        }
        if self.quota.requests_per_key_per_minute == 0 {
            return Err(common::Error::Config(
                "requests_per_key_per_minute must be greater than 0".into(),
            ));
        }
        if self.quota.requests_per_key_per_day < self.quota.requests_per_key_per_minute {
            return Err(common::Error::Config(format!(
                "requests_per_key_per_day ({}) must be at least requests_per_key_per_minute ({})",
                self.quota.requests_per_key_per_day, self.quota.requests_per_key_per_minute
            )));
        }
        if self.retry.backoff_max_ms < self.retry.backoff_base_ms {
            return Err(common::Error::Config(
                "retry.backoff_max_ms must be at least retry.backoff_base_ms".into(),
            ));
        }
        if self.scrape.seasons.is_empty() {
            return Err(common::Error::Config(
                "scrape.seasons must list at least one season".into(),
            ));
        }
        Ok(())
    }

    /// Fail when no API key was configured. Commands that talk to the live
    /// API call this; mock runs and local reports do not.
    pub fn require_keys(&self) -> common::Result<()> {
        if self.api_keys.is_empty() {
            return Err(common::Error::MissingCredentials(
                "API_FOOTBALL_KEY or API_FOOTBALL_KEY_1..API_FOOTBALL_KEY_9".into(),
            ));
        }
        Ok(())
    }

    pub fn quota_limits(&self) -> QuotaLimits {
        QuotaLimits {
            per_minute: self.quota.requests_per_key_per_minute,
            per_day: self.quota.requests_per_key_per_day,
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            retry: RetryPolicy {
                max_retries: self.retry.max_retries,
                base_delay: Duration::from_millis(self.retry.backoff_base_ms),
                max_delay: Duration::from_millis(self.retry.backoff_max_ms),
            },
            max_quota_wait: Duration::from_secs(self.quota.max_wait_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    /// Resolve the config file from CLI arg, CONFIG_PATH env var, or the
    /// default file when it exists. `None` means built-in defaults.
    pub fn resolve_path(cli_path: Option<&Path>) -> Option<PathBuf> {
        if let Some(p) = cli_path {
            return Some(p.to_path_buf());
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return Some(PathBuf::from(p));
        }
        let default = PathBuf::from(DEFAULT_CONFIG_FILE);
        default.exists().then_some(default)
    }
}
