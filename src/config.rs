//! Runtime configuration assembled once at startup and passed by reference.

use std::error::Error;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono::FixedOffset;
use clap::Parser;
use serde::{Deserialize, Serialize};

/// Default advisory page (Chilean-Spanish localization of HT201222).
const DEFAULT_ADVISORY_URL: &str = "https://support.apple.com/es-cl/HT201222";

/// Command-line interface for the notifier bot.
#[derive(Parser, Debug, Clone)]
#[command(name = "asu-bot", about = "Apple security-advisory watcher with Telegram notifications")]
pub struct Cli {
    /// Optional JSON config file; CLI flags override its values
    #[arg(long, env = "ASU_CONFIG")]
    pub config: Option<PathBuf>,

    /// Advisory page URL to poll
    #[arg(long, env = "ASU_ADVISORY_URL")]
    pub advisory_url: Option<String>,

    /// SQLite database path
    #[arg(long, env = "ASU_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Telegram bot token
    #[arg(long, env = "ASU_BOT_TOKEN")]
    pub bot_token: Option<String>,

    /// Destination chat ids, comma separated (e.g. "-123456,-789012")
    #[arg(long, env = "ASU_CHAT_IDS", allow_hyphen_values = true)]
    pub chat_ids: Option<String>,

    /// UTC offset applied to run timestamps, as ±HH:MM
    #[arg(long, env = "ASU_UTC_OFFSET", allow_hyphen_values = true)]
    pub utc_offset: Option<String>,

    /// Minutes between poll cycles
    #[arg(long, env = "ASU_POLL_MINUTES")]
    pub poll_minutes: Option<u64>,

    /// Record cap for the first-run recent window
    #[arg(long, env = "ASU_RECENT_CAP")]
    pub recent_cap: Option<usize>,

    /// HTTP timeout in seconds for fetch and dispatch
    #[arg(long, env = "ASU_HTTP_TIMEOUT_SECS")]
    pub http_timeout_secs: Option<u64>,

    /// Run a single cycle and exit (for external schedulers)
    #[arg(long, default_value_t = false)]
    pub once: bool,
}

/// On-disk JSON configuration; every field optional, CLI wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct FileConfig {
    pub advisory_url: Option<String>,
    pub db_path: Option<PathBuf>,
    pub bot_token: Option<String>,
    pub chat_ids: Option<Vec<String>>,
    pub utc_offset: Option<String>,
    pub poll_minutes: Option<u64>,
    pub recent_cap: Option<usize>,
    pub http_timeout_secs: Option<u64>,
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Advisory page URL to poll.
    pub advisory_url: String,
    /// SQLite database path.
    pub db_path: PathBuf,
    /// Telegram bot token.
    pub bot_token: String,
    /// Destination chat ids.
    pub chat_ids: Vec<String>,
    /// Offset applied to run timestamps.
    pub utc_offset: FixedOffset,
    /// Delay between poll cycles.
    pub poll_interval: Duration,
    /// Record cap for the first-run recent window.
    pub recent_cap: usize,
    /// Bound on every HTTP call.
    pub http_timeout: Duration,
    /// Single-cycle mode.
    pub once: bool,
}

/// Errors surfaced while resolving configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    Io(PathBuf, std::io::Error),
    /// The config file was not valid JSON.
    Parse(PathBuf, serde_json::Error),
    /// A required field is missing from both CLI and file.
    Missing(&'static str),
    /// A field value failed validation.
    Invalid(&'static str, String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(path, err) => write!(f, "cannot read config {}: {err}", path.display()),
            Self::Parse(path, err) => write!(f, "invalid config {}: {err}", path.display()),
            Self::Missing(field) => write!(f, "missing required config field '{field}'"),
            Self::Invalid(field, value) => write!(f, "invalid value for '{field}': {value}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(_, err) => Some(err),
            Self::Parse(_, err) => Some(err),
            Self::Missing(_) | Self::Invalid(_, _) => None,
        }
    }
}

impl AppConfig {
    /// Resolves the final configuration from CLI flags over the optional file.
    pub fn resolve(cli: &Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .map_err(|err| ConfigError::Io(path.clone(), err))?;
                serde_json::from_str::<FileConfig>(&raw)
                    .map_err(|err| ConfigError::Parse(path.clone(), err))?
            }
            None => FileConfig::default(),
        };

        let advisory_url = cli
            .advisory_url
            .clone()
            .or(file.advisory_url)
            .unwrap_or_else(|| DEFAULT_ADVISORY_URL.to_string());

        let db_path = cli
            .db_path
            .clone()
            .or(file.db_path)
            .unwrap_or_else(|| PathBuf::from("asu-notifier.db"));

        let bot_token = cli
            .bot_token
            .clone()
            .or(file.bot_token)
            .ok_or(ConfigError::Missing("bot_token"))?;
        if !valid_bot_token(&bot_token) {
            return Err(ConfigError::Invalid("bot_token", redact(&bot_token)));
        }

        let chat_ids: Vec<String> = match &cli.chat_ids {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => file.chat_ids.unwrap_or_default(),
        };
        if chat_ids.is_empty() {
            return Err(ConfigError::Missing("chat_ids"));
        }

        let offset_text = cli
            .utc_offset
            .clone()
            .or(file.utc_offset)
            .unwrap_or_else(|| "+00:00".to_string());
        let utc_offset = parse_offset(&offset_text)
            .ok_or_else(|| ConfigError::Invalid("utc_offset", offset_text.clone()))?;

        let poll_minutes = cli.poll_minutes.or(file.poll_minutes).unwrap_or(60);
        if poll_minutes == 0 {
            return Err(ConfigError::Invalid("poll_minutes", "0".to_string()));
        }

        let http_timeout_secs = cli
            .http_timeout_secs
            .or(file.http_timeout_secs)
            .unwrap_or(30);

        Ok(Self {
            advisory_url,
            db_path,
            bot_token,
            chat_ids,
            utc_offset,
            poll_interval: Duration::from_secs(poll_minutes * 60),
            recent_cap: cli.recent_cap.or(file.recent_cap).unwrap_or(5),
            http_timeout: Duration::from_secs(http_timeout_secs.max(1)),
            once: cli.once,
        })
    }
}

/// Token shape: numeric bot id, a colon, then a 35-character secret.
fn valid_bot_token(token: &str) -> bool {
    let Some((id, secret)) = token.split_once(':') else {
        return false;
    };
    !id.is_empty()
        && id.bytes().all(|b| b.is_ascii_digit())
        && secret.len() == 35
        && secret
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Parses `±HH:MM` into a fixed offset.
fn parse_offset(text: &str) -> Option<FixedOffset> {
    let (sign, rest) = match *text.as_bytes().first()? {
        b'+' => (1, &text[1..]),
        b'-' => (-1, &text[1..]),
        _ => (1, text),
    };
    let (hours, minutes) = rest.split_once(':')?;
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn redact(token: &str) -> String {
    match token.split_once(':') {
        Some((id, _)) => format!("{id}:***"),
        None => "***".to_string(),
    }
}
