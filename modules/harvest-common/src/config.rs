use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::info;

/// Default banner shown by the feed when requests are being throttled.
pub const DEFAULT_RATE_LIMIT_TEXT: &str = "Something went wrong. Try reloading.";
/// Default prompt shown when the feed demands an emailed confirmation code.
pub const DEFAULT_EMAIL_VERIFICATION_TEXT: &str = "Check your email";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Storage
    pub database_url: String,
    pub ipfs_api_url: String,
    pub ipfs_api_token: Option<String>,

    // Feed
    pub feed_url: String,
    pub feed_origin: String,

    // Browser
    pub chrome_bin: Option<String>,
    pub browser_profile_dir: Option<String>,
    pub headless: bool,

    // Rounds
    pub round_genesis: DateTime<Utc>,
    pub round_length: Duration,

    // Pacing
    pub pass_cooldown: Duration,
    pub session_cooldown: Duration,
    pub scroll_settle: Duration,
    pub max_scrolls_per_pass: u32,

    // Detection copy
    pub rate_limit_text: String,
    /// Regex alternative to `rate_limit_text`; wins when set.
    pub rate_limit_pattern: Option<String>,
    pub email_verification_text: String,

    // Login (only read by the explicit login command)
    pub username: Option<String>,
    pub password: Option<String>,
    pub username_confirmation: Option<String>,
}

impl Config {
    /// Load configuration from the environment (and `.env` if present).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let feed_url = required_env("FEED_URL")?;
        let feed_origin = match env::var("FEED_ORIGIN") {
            Ok(origin) => origin,
            Err(_) => origin_of(&feed_url)?,
        };

        let round_genesis = match env::var("ROUND_GENESIS") {
            Ok(raw) => DateTime::parse_from_rfc3339(&raw)
                .context("ROUND_GENESIS must be an RFC 3339 timestamp")?
                .with_timezone(&Utc),
            Err(_) => DateTime::<Utc>::UNIX_EPOCH,
        };

        Ok(Self {
            database_url: required_env("DATABASE_URL")?,
            ipfs_api_url: env::var("IPFS_API_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:5001".to_string()),
            ipfs_api_token: env::var("IPFS_API_TOKEN").ok(),
            feed_url,
            feed_origin,
            chrome_bin: env::var("CHROME_BIN").ok(),
            browser_profile_dir: env::var("BROWSER_PROFILE_DIR").ok(),
            headless: parsed_env("HEADLESS", true)?,
            round_genesis,
            round_length: Duration::from_secs(parsed_env("ROUND_LENGTH_SECS", 3600)?),
            pass_cooldown: Duration::from_secs(parsed_env("PASS_COOLDOWN_SECS", 300)?),
            session_cooldown: Duration::from_secs(parsed_env("SESSION_COOLDOWN_SECS", 60)?),
            scroll_settle: Duration::from_millis(parsed_env("SCROLL_SETTLE_MS", 2000)?),
            max_scrolls_per_pass: parsed_env("MAX_SCROLLS_PER_PASS", 50)?,
            rate_limit_text: env::var("RATE_LIMIT_TEXT")
                .unwrap_or_else(|_| DEFAULT_RATE_LIMIT_TEXT.to_string()),
            rate_limit_pattern: env::var("RATE_LIMIT_PATTERN").ok(),
            email_verification_text: env::var("EMAIL_VERIFICATION_TEXT")
                .unwrap_or_else(|_| DEFAULT_EMAIL_VERIFICATION_TEXT.to_string()),
            username: env::var("FEED_USERNAME").ok(),
            password: env::var("FEED_PASSWORD").ok(),
            username_confirmation: env::var("FEED_USERNAME_CONFIRMATION").ok(),
        })
    }

    /// Log the effective configuration with secrets elided.
    pub fn log_redacted(&self) {
        info!(
            feed_url = %self.feed_url,
            feed_origin = %self.feed_origin,
            ipfs_api_url = %self.ipfs_api_url,
            ipfs_token = self.ipfs_api_token.is_some(),
            profile_dir = ?self.browser_profile_dir,
            headless = self.headless,
            round_genesis = %self.round_genesis,
            round_length_secs = self.round_length.as_secs(),
            pass_cooldown_secs = self.pass_cooldown.as_secs(),
            session_cooldown_secs = self.session_cooldown.as_secs(),
            max_scrolls_per_pass = self.max_scrolls_per_pass,
            credentials = self.username.is_some() && self.password.is_some(),
            "Loaded config"
        );
    }
}

fn required_env(key: &str) -> Result<String> {
    env::var(key).with_context(|| format!("{key} environment variable is required"))
}

fn parsed_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}

/// `scheme://host[:port]` of a URL.
fn origin_of(raw: &str) -> Result<String> {
    let parsed = url::Url::parse(raw).with_context(|| format!("Invalid FEED_URL: {raw}"))?;
    Ok(parsed.origin().ascii_serialization())
}
