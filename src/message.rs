//! Notification text rendering with Telegram MarkdownV2 escaping.

use crate::normalizer::{UpdateDate, UpdateRecord};

/// Header for the first-run "recent updates" window.
const HEADER_RECENT: &str = "*Últimas actualizaciones de Apple\\.*";
/// Header for incremental deltas.
const HEADER_NEW: &str = "*Nuevas actualizaciones de Apple\\.*";

/// Characters MarkdownV2 reserves; each is backslash-escaped exactly once.
const RESERVED: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

/// Escapes one interpolated field for MarkdownV2 in a single pass.
///
/// Operates character by character, so a reserved character is never
/// re-escaped within the same formatting pass.
pub fn escape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for ch in field.chars() {
        if RESERVED.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Escapes a URL for use inside a MarkdownV2 link target.
fn escape_link(url: &str) -> String {
    let mut out = String::with_capacity(url.len());
    for ch in url.chars() {
        if ch == ')' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Renders the notification body for a detection outcome.
///
/// Incremental mode emits exactly `records`; first-run mode narrows to the
/// recent window capped at `recent_cap` records counted in whole distinct
/// dates. Both modes present newest-first. Returns `None` when there is
/// nothing to say (no message beats an empty broadcast).
pub fn format_message(
    records: &[UpdateRecord],
    first_run: bool,
    recent_cap: usize,
) -> Option<String> {
    let selected: Vec<&UpdateRecord> = if first_run {
        recent_window(records, recent_cap)
    } else {
        newest_first(records)
    };
    if selected.is_empty() {
        return None;
    }

    let header = if first_run { HEADER_RECENT } else { HEADER_NEW };
    let mut message = String::from(header);
    message.push_str("\n\n");
    for record in selected {
        message.push_str(&format_line(record));
        message.push('\n');
    }
    Some(message)
}

/// One record per line: `_date_ - product - target`, product hyperlinked
/// when a link exists and italicized otherwise. Absent fields are omitted.
fn format_line(record: &UpdateRecord) -> String {
    let date = escape(&record.date.display());
    let product = escape(&record.product);
    let target = escape(&record.target);

    let mut line = format!("_{date}_");
    match &record.link {
        Some(link) => {
            line.push_str(&format!(" \\- [{product}]({})", escape_link(link)));
        }
        None => {
            line.push_str(&format!(" \\- _{product}_"));
        }
    }
    line.push_str(&format!(" \\- {target}"));
    line
}

/// Reverses discovery order so the newest entries lead the message.
fn newest_first(records: &[UpdateRecord]) -> Vec<&UpdateRecord> {
    records.iter().rev().collect()
}

/// Picks the first-run window: whole date groups, newest date first, while
/// the cumulative record count stays within `cap`.
///
/// A date is either fully included or fully excluded; the newest group is
/// always included so a nonempty history never renders an empty window.
fn recent_window(records: &[UpdateRecord], cap: usize) -> Vec<&UpdateRecord> {
    let mut groups: Vec<(String, Vec<&UpdateRecord>)> = Vec::new();
    for record in newest_first(records) {
        let key = record.date.storage();
        match groups.last_mut() {
            Some((last_key, group)) if *last_key == key => group.push(record),
            _ => groups.push((key, vec![record])),
        }
    }

    let mut window = Vec::new();
    for (index, (_, group)) in groups.into_iter().enumerate() {
        let would_be = window.len() + group.len();
        if index > 0 && would_be > cap {
            break;
        }
        window.extend(group);
        if window.len() >= cap {
            break;
        }
    }
    window
}
