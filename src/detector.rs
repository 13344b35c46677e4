//! Hash-gated change detection against the persisted advisory history.

use std::collections::HashSet;
use std::error::Error;
use std::fmt;

use chrono::{DateTime, FixedOffset};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::normalizer::UpdateRecord;
use crate::store::{HistoryStore, StoreError, SyncRun};

/// Outcome of one detection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionResult {
    /// True when the store was empty and the whole table was backfilled.
    pub first_run: bool,
    /// Records absent from history before this pass, discovery order.
    pub new_records: Vec<UpdateRecord>,
}

impl DetectionResult {
    fn empty() -> Self {
        Self {
            first_run: false,
            new_records: Vec::new(),
        }
    }

    /// True when this pass produced nothing to notify about.
    pub fn is_unchanged(&self) -> bool {
        !self.first_run && self.new_records.is_empty()
    }
}

/// Errors surfaced while detecting and persisting changes.
#[derive(Debug)]
pub enum DetectError {
    /// The history store failed; nothing was committed.
    Store(StoreError),
}

impl fmt::Display for DetectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(err) => write!(f, "history store failure: {err}"),
        }
    }
}

impl Error for DetectError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
        }
    }
}

impl From<StoreError> for DetectError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

/// Computes the lowercase hex SHA-256 of the raw fetched payload.
pub fn content_hash(payload: &[u8]) -> String {
    use fmt::Write;
    let digest = Sha256::digest(payload);
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// Change detector; the only writer of the history store.
pub struct ChangeDetector<'a, S: HistoryStore> {
    store: &'a S,
}

impl<'a, S: HistoryStore> ChangeDetector<'a, S> {
    /// Wraps the store the detector drives.
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Diffs freshly parsed records against history.
    ///
    /// `observed` is the local fetch timestamp; `published` carries the
    /// server's publish timestamp (`Last-Modified`) when available, used
    /// only to flag republished-but-unchanged content.
    ///
    /// Exactly one of three things happens: a first-run backfill of every
    /// record, a short-circuit on an unchanged payload hash (no writes), or
    /// an atomic append of the new sync run plus the key-level delta.
    pub fn detect(
        &self,
        payload: &[u8],
        records: &[UpdateRecord],
        observed: DateTime<FixedOffset>,
        published: Option<DateTime<FixedOffset>>,
    ) -> Result<DetectionResult, DetectError> {
        let hash = content_hash(payload);

        let last = self.store.last_run()?;
        let Some(last) = last else {
            return self.first_population(hash, records, observed);
        };

        if last.content_hash == hash {
            info!("No updates available.");
            if let Some(published) = published {
                // Vendor re-served identical content under a newer timestamp.
                if published > last.timestamp {
                    warn!(
                        stored = %last.timestamp.to_rfc3339(),
                        published = %published.to_rfc3339(),
                        "content republished unchanged; suppressing notification"
                    );
                }
            }
            return Ok(DetectionResult::empty());
        }

        let history: HashSet<UpdateRecord> = self.store.all_records()?.into_iter().collect();
        let delta = dedup_new(records, &history);

        let message = format!("'{hash}' update.");
        let run = SyncRun::new(observed, hash, message.clone());
        self.store.append(&run, &delta)?;
        info!(new = delta.len(), "{message}");

        Ok(DetectionResult {
            first_run: false,
            new_records: delta,
        })
    }

    fn first_population(
        &self,
        hash: String,
        records: &[UpdateRecord],
        observed: DateTime<FixedOffset>,
    ) -> Result<DetectionResult, DetectError> {
        let backfill = dedup_new(records, &HashSet::new());
        let message = "First database population.".to_string();
        let run = SyncRun::new(observed, hash, message.clone());
        self.store.append(&run, &backfill)?;
        info!(records = backfill.len(), "{message}");

        Ok(DetectionResult {
            first_run: true,
            new_records: backfill,
        })
    }
}

/// Keeps records absent from `history`, collapsing intra-fetch duplicates
/// by natural key while preserving discovery order.
fn dedup_new(records: &[UpdateRecord], history: &HashSet<UpdateRecord>) -> Vec<UpdateRecord> {
    let mut seen: HashSet<&UpdateRecord> = HashSet::new();
    let mut delta = Vec::new();
    for record in records {
        if history.contains(record) {
            continue;
        }
        if seen.insert(record) {
            delta.push(record.clone());
        }
    }
    delta
}
