//! Advisory page retrieval and table extraction.

use std::error::Error;
use std::fmt;

use chrono::{DateTime, FixedOffset};
use reqwest::header::LAST_MODIFIED;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::normalizer::RawRow;

/// Raw payload plus the extracted advisory rows for one fetch.
#[derive(Debug, Clone)]
pub struct FetchedTable {
    /// Raw response body bytes, hashed by the change detector.
    pub payload: Vec<u8>,
    /// Table rows oldest first, header excluded.
    pub rows: Vec<RawRow>,
    /// Server publish timestamp (`Last-Modified`), when provided.
    pub published: Option<DateTime<FixedOffset>>,
}

/// Errors surfaced while fetching or dissecting the advisory page.
#[derive(Debug)]
pub enum FetchError {
    /// Transport-level failure (DNS, TLS, timeout, ...).
    Http(reqwest::Error),
    /// The server answered with a non-success status.
    Status(u16),
    /// The advisory table was missing from the document.
    TableNotFound,
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(err) => write!(f, "advisory fetch failed: {err}"),
            Self::Status(code) => write!(f, "advisory fetch returned status {code}"),
            Self::TableNotFound => write!(f, "advisory table not found in page"),
        }
    }
}

impl Error for FetchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Http(err) => Some(err),
            Self::Status(_) | Self::TableNotFound => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err)
    }
}

/// Fetches the advisory page and extracts its update table.
pub async fn fetch_advisories(client: &Client, url: &str) -> Result<FetchedTable, FetchError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
    }

    let published = response
        .headers()
        .get(LAST_MODIFIED)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| DateTime::parse_from_rfc2822(value).ok());

    let payload = response.bytes().await?.to_vec();
    let rows = extract_rows(&String::from_utf8_lossy(&payload))?;
    debug!(rows = rows.len(), "advisory table extracted");

    Ok(FetchedTable {
        payload,
        rows,
        published,
    })
}

/// Pulls advisory rows out of the page markup, oldest first.
///
/// The vendor wraps the table in `div#tableWraper`; a bare `table` is the
/// fallback when that container is renamed. The header row is skipped and
/// the first cell's anchor becomes the row link. The page lists newest
/// advisories at the top, so the extracted rows are reversed: discovery
/// order, and therefore history insertion order, is oldest first.
pub fn extract_rows(html: &str) -> Result<Vec<RawRow>, FetchError> {
    let document = Html::parse_document(html);
    let wrapper = Selector::parse("div#tableWraper tr").expect("wrapper selector");
    let fallback = Selector::parse("table tr").expect("table selector");
    let cell = Selector::parse("td").expect("cell selector");
    let anchor = Selector::parse("a[href]").expect("anchor selector");

    let mut elements: Vec<ElementRef<'_>> = document.select(&wrapper).collect();
    if elements.is_empty() {
        elements = document.select(&fallback).collect();
    }
    if elements.is_empty() {
        return Err(FetchError::TableNotFound);
    }

    let mut rows = Vec::new();
    for tr in elements {
        let cells: Vec<String> = tr.select(&cell).map(|td| cell_text(&td)).collect();
        if cells.is_empty() {
            // Header rows use <th>; structural rows carry no cells at all.
            continue;
        }
        let link = tr
            .select(&cell)
            .next()
            .and_then(|td| td.select(&anchor).next())
            .and_then(|a| a.value().attr("href"))
            .map(str::to_string);
        rows.push(RawRow::new(cells, link));
    }
    rows.reverse();
    Ok(rows)
}

fn cell_text(td: &ElementRef<'_>) -> String {
    let mut text = String::new();
    for piece in td.text() {
        text.push_str(piece);
    }
    text
}
