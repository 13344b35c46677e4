//! Poll-loop orchestration: fetch, normalize, detect, format, dispatch.

use std::error::Error;
use std::fmt;

use chrono::Utc;
use reqwest::Client;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::config::AppConfig;
use crate::detector::{ChangeDetector, DetectError, DetectionResult};
use crate::message::format_message;
use crate::normalizer::{normalize_rows, NormalizeError};
use crate::scrape::{fetch_advisories, FetchError};
use crate::store::{HistoryStore, SqliteStore, StoreError};
use crate::telegram::{send_message, DispatchError};

/// Everything that can go wrong inside one poll cycle.
#[derive(Debug)]
pub enum CycleError {
    /// Retrieval or parsing of the advisory page failed.
    Fetch(FetchError),
    /// The fetched table rows were structurally malformed.
    Normalize(NormalizeError),
    /// Detection or persistence failed; nothing was committed.
    Detect(DetectError),
    /// History is committed but the notification did not go out.
    Dispatch(DispatchError),
    /// Opening the history store failed.
    Store(StoreError),
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch(err) => write!(f, "{err}"),
            Self::Normalize(err) => write!(f, "{err}"),
            Self::Detect(err) => write!(f, "{err}"),
            Self::Dispatch(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CycleError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Fetch(err) => Some(err),
            Self::Normalize(err) => Some(err),
            Self::Detect(err) => Some(err),
            Self::Dispatch(err) => Some(err),
            Self::Store(err) => Some(err),
        }
    }
}

impl From<FetchError> for CycleError {
    fn from(err: FetchError) -> Self {
        Self::Fetch(err)
    }
}

impl From<NormalizeError> for CycleError {
    fn from(err: NormalizeError) -> Self {
        Self::Normalize(err)
    }
}

impl From<DetectError> for CycleError {
    fn from(err: DetectError) -> Self {
        Self::Detect(err)
    }
}

impl From<DispatchError> for CycleError {
    fn from(err: DispatchError) -> Self {
        Self::Dispatch(err)
    }
}

impl From<StoreError> for CycleError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

/// Runs one complete observation cycle against the given store.
///
/// A failing cycle commits nothing except the one case the spec allows: a
/// dispatch failure after the history append, which is logged and must not
/// be retried (re-sending would duplicate the notification).
pub async fn run_cycle<S: HistoryStore>(
    client: &Client,
    config: &AppConfig,
    store: &S,
) -> Result<DetectionResult, CycleError> {
    let fetched = fetch_advisories(client, &config.advisory_url).await?;
    let records = normalize_rows(&fetched.rows)?;

    let observed = Utc::now().with_timezone(&config.utc_offset);
    let detector = ChangeDetector::new(store);
    let result = detector.detect(&fetched.payload, &records, observed, fetched.published)?;

    if result.is_unchanged() {
        return Ok(result);
    }

    if let Some(text) = format_message(&result.new_records, result.first_run, config.recent_cap) {
        send_message(client, config, &text).await?;
    }
    Ok(result)
}

/// Opens the store and drives the scheduler loop (or a single `--once` cycle).
///
/// Cycles are strictly serialized: each runs to completion before the next
/// tick is honored, so the store only ever sees one writer.
pub async fn run(config: &AppConfig) -> Result<(), CycleError> {
    let store = SqliteStore::open(&config.db_path)?;
    let client = Client::builder()
        .timeout(config.http_timeout)
        .user_agent(concat!("asu-notifier/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(FetchError::Http)?;

    if config.once {
        return run_cycle(&client, config, &store).await.map(|_| ());
    }

    let mut ticker = interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match run_cycle(&client, config, &store).await {
            Ok(result) if result.first_run => {
                info!(records = result.new_records.len(), "first population complete");
            }
            Ok(result) if !result.new_records.is_empty() => {
                info!(new = result.new_records.len(), "notified new advisories");
            }
            Ok(_) => {}
            // Failed cycles yield no observable effect; the next tick retries.
            Err(err) => error!(error = %err, "cycle failed"),
        }
    }
}
