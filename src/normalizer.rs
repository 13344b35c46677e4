//! Advisory row normalization: raw table cells into typed update records.

use std::error::Error;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Vendor boilerplate appended to products without published CVE entries.
const CVE_BOILERPLATE: &str = "Esta actualización no tiene ninguna entrada de CVE publicada.";

/// Literal marker the vendor uses for software bundled with the device.
const PREINSTALLED_TOKEN: &str = "Preinstalado";

/// Spanish month names in calendar order (enero = 1).
const MONTHS: [&str; 12] = [
    "enero",
    "febrero",
    "marzo",
    "abril",
    "mayo",
    "junio",
    "julio",
    "agosto",
    "septiembre",
    "octubre",
    "noviembre",
    "diciembre",
];

/// One advisory table row as extracted from the page, header excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// Cell texts in column order: product, target, date.
    pub cells: Vec<String>,
    /// Advisory detail URL from the product cell, when present.
    pub link: Option<String>,
}

impl RawRow {
    /// Builds a raw row from cell texts and an optional link.
    pub fn new(cells: Vec<String>, link: Option<String>) -> Self {
        Self { cells, link }
    }
}

/// Release date of an advisory row.
///
/// The vendor publishes localized calendar dates, a "bundled with the
/// device" sentinel, and occasionally free text. All three compare and
/// persist as their storage string, so the natural key stays stable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateDate {
    /// A parsed calendar date.
    Day(NaiveDate),
    /// The vendor's preinstalled sentinel, stored verbatim.
    Preinstalled(String),
    /// Unrecognized date text passed through unchanged.
    Raw(String),
}

impl UpdateDate {
    /// Storage form: ISO `YYYY-MM-DD` for calendar dates, literal text otherwise.
    pub fn storage(&self) -> String {
        match self {
            Self::Day(date) => date.format("%Y-%m-%d").to_string(),
            Self::Preinstalled(text) | Self::Raw(text) => text.clone(),
        }
    }

    /// Reconstructs an [`UpdateDate`] from its storage form.
    pub fn from_storage(text: &str) -> Self {
        if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            return Self::Day(date);
        }
        if text.eq_ignore_ascii_case(PREINSTALLED_TOKEN) {
            return Self::Preinstalled(text.to_string());
        }
        Self::Raw(text.to_string())
    }

    /// Display form used in notifications: `DD/MM/YYYY` or the literal text.
    pub fn display(&self) -> String {
        match self {
            Self::Day(date) => date.format("%d/%m/%Y").to_string(),
            Self::Preinstalled(text) | Self::Raw(text) => text.clone(),
        }
    }
}

impl fmt::Display for UpdateDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage())
    }
}

/// One normalized advisory entry.
///
/// Equality over all four fields is the natural key used for dedup;
/// sentinel and raw dates compare as literal strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpdateRecord {
    /// Release date, sentinel, or raw date text.
    pub date: UpdateDate,
    /// Cleaned product display name.
    pub product: String,
    /// Affected platform/version string.
    pub target: String,
    /// Advisory detail URL; `None` when the vendor links nothing.
    pub link: Option<String>,
}

impl UpdateRecord {
    /// Builds a record from already-normalized fields.
    pub fn new(date: UpdateDate, product: String, target: String, link: Option<String>) -> Self {
        Self {
            date,
            product,
            target,
            link,
        }
    }
}

/// Errors surfaced while normalizing advisory rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    /// A row did not carry the three expected cells; the table shape is broken.
    MalformedRow {
        /// Zero-based row index within the fetched table.
        index: usize,
        /// Number of cells the row actually had.
        cells: usize,
    },
}

impl fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedRow { index, cells } => write!(
                f,
                "malformed advisory row {index}: expected 3 cells, found {cells}"
            ),
        }
    }
}

impl Error for NormalizeError {}

/// Normalizes fetched rows into update records, preserving source order.
///
/// A row with fewer than three cells aborts the batch. Date text that
/// matches neither the localized pattern nor the preinstalled sentinel is
/// carried through verbatim and logged as an anomaly.
pub fn normalize_rows(rows: &[RawRow]) -> Result<Vec<UpdateRecord>, NormalizeError> {
    let mut records = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        if row.cells.len() < 3 {
            return Err(NormalizeError::MalformedRow {
                index,
                cells: row.cells.len(),
            });
        }

        let product = clean_product(&row.cells[0]);
        let target = clean_text(&row.cells[1]);
        let date_text = clean_text(&row.cells[2]);
        let date = parse_update_date(&date_text);
        if matches!(date, UpdateDate::Raw(_)) {
            warn!(row = index, text = %date_text, "unrecognized date text passed through");
        }

        let link = row
            .link
            .as_deref()
            .map(str::trim)
            .filter(|href| !href.is_empty())
            .map(str::to_string);

        records.push(UpdateRecord::new(date, product, target, link));
    }
    Ok(records)
}

/// Classifies cleaned date text as calendar date, sentinel, or raw.
pub fn parse_update_date(text: &str) -> UpdateDate {
    if text.eq_ignore_ascii_case(PREINSTALLED_TOKEN) {
        return UpdateDate::Preinstalled(text.to_string());
    }
    match parse_spanish_date(text) {
        Some(date) => UpdateDate::Day(date),
        None => UpdateDate::Raw(text.to_string()),
    }
}

/// Parses `<day> de <month> de <year>` with Spanish month names.
fn parse_spanish_date(text: &str) -> Option<NaiveDate> {
    let mut parts = text.split_whitespace();
    let day: u32 = parts.next()?.parse().ok()?;
    if parts.next()? != "de" {
        return None;
    }
    let month_name = parts.next()?.to_lowercase();
    if parts.next()? != "de" {
        return None;
    }
    let year: i32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }

    let month = MONTHS.iter().position(|name| *name == month_name)? as u32 + 1;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn clean_product(raw: &str) -> String {
    let stripped = raw.replace(CVE_BOILERPLATE, "");
    clean_text(&stripped)
}

/// Strips non-breaking spaces and newlines, collapses runs of whitespace.
fn clean_text(raw: &str) -> String {
    let mut buf = String::with_capacity(raw.len());
    let mut last_space = false;
    for ch in raw.chars() {
        if ch.is_whitespace() || ch == '\u{a0}' {
            if !last_space && !buf.is_empty() {
                buf.push(' ');
            }
            last_space = true;
        } else {
            buf.push(ch);
            last_space = false;
        }
    }
    buf.trim().to_string()
}
