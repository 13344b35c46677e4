#![warn(missing_docs)]
//! Core library for the Apple security-advisory notifier.
//!
//! The pipeline is fetch → normalize → detect → format → dispatch; the
//! change-detection engine in [`detector`] is the only writer of the
//! append-only [`store`].

pub mod config;
pub mod detector;
pub mod message;
pub mod normalizer;
pub mod runtime;
pub mod scrape;
pub mod store;
pub mod telegram;

pub use config::{AppConfig, Cli, ConfigError};
pub use detector::{content_hash, ChangeDetector, DetectError, DetectionResult};
pub use message::{escape, format_message};
pub use normalizer::{
    normalize_rows, parse_update_date, NormalizeError, RawRow, UpdateDate, UpdateRecord,
};
pub use runtime::{run, run_cycle, CycleError};
pub use scrape::{extract_rows, fetch_advisories, FetchError, FetchedTable};
pub use store::{HistoryStore, MemoryStore, SqliteStore, StoreError, SyncRun};
pub use telegram::{send_message, DispatchError};
