//! End-to-end detection cycles over the HTML fixture, without the network.

use chrono::{DateTime, FixedOffset, TimeZone};

use asu_notifier::{
    content_hash, extract_rows, format_message, normalize_rows, ChangeDetector, HistoryStore,
    SqliteStore, UpdateDate,
};

const PAGE: &str = include_str!("fixtures/advisories.html");

fn observed(hour: u32) -> DateTime<FixedOffset> {
    FixedOffset::west_opt(4 * 3600)
        .unwrap()
        .with_ymd_and_hms(2024, 3, 8, hour, 0, 0)
        .unwrap()
}

#[test]
fn first_population_backfills_and_reports_recent() {
    let store = SqliteStore::open_in_memory().expect("open");
    let rows = extract_rows(PAGE).expect("rows");
    let records = normalize_rows(&rows).expect("normalize");
    assert_eq!(records.len(), 3);

    let detector = ChangeDetector::new(&store);
    let result = detector
        .detect(PAGE.as_bytes(), &records, observed(1), None)
        .expect("detect");

    assert!(result.first_run);
    assert_eq!(result.new_records.len(), 3);
    assert_eq!(store.all_records().expect("records").len(), 3);

    let run = store.last_run().expect("last_run").expect("run");
    assert_eq!(run.content_hash, content_hash(PAGE.as_bytes()));
    assert_eq!(run.message, "First database population.");

    // First run renders as the recent window, not as "new".
    let text = format_message(&result.new_records, result.first_run, 5).expect("message");
    assert!(text.starts_with("*Últimas actualizaciones de Apple\\.*"));
    assert!(text.contains("[macOS Sonoma 14\\.4](https://support.apple.com/es-cl/HT214081)"));
    assert!(text.contains("_Preinstalado_"));
}

#[test]
fn identical_payload_is_an_empty_cycle() {
    let store = SqliteStore::open_in_memory().expect("open");
    let rows = extract_rows(PAGE).expect("rows");
    let records = normalize_rows(&rows).expect("normalize");
    let detector = ChangeDetector::new(&store);

    detector
        .detect(PAGE.as_bytes(), &records, observed(1), None)
        .expect("first run");
    let result = detector
        .detect(PAGE.as_bytes(), &records, observed(2), None)
        .expect("second run");

    assert!(result.is_unchanged());
    assert_eq!(store.all_records().expect("records").len(), 3);
    // No second run row was written, so the stored hash is unchanged.
    let run = store.last_run().expect("last_run").expect("run");
    assert_eq!(run.timestamp, observed(1));
}

#[test]
fn new_row_in_changed_payload_is_the_only_delta() {
    let store = SqliteStore::open_in_memory().expect("open");
    let detector = ChangeDetector::new(&store);

    let rows = extract_rows(PAGE).expect("rows");
    let records = normalize_rows(&rows).expect("normalize");
    detector
        .detect(PAGE.as_bytes(), &records, observed(1), None)
        .expect("first run");

    // Vendor prepends a fresh advisory row.
    let updated_page = PAGE.replace(
        "<tr>\n          <td><a href=\"https://support.apple.com/es-cl/HT214081\">",
        "<tr>\n          <td><a href=\"https://support.apple.com/es-cl/HT214095\">visionOS 1.1</a></td>\n          <td>Apple Vision Pro</td>\n          <td>8 de marzo de 2024</td>\n        </tr>\n        <tr>\n          <td><a href=\"https://support.apple.com/es-cl/HT214081\">",
    );
    assert_ne!(updated_page, PAGE);

    let rows = extract_rows(&updated_page).expect("rows");
    let records = normalize_rows(&rows).expect("normalize");
    assert_eq!(records.len(), 4);

    let result = detector
        .detect(updated_page.as_bytes(), &records, observed(2), None)
        .expect("incremental");

    assert!(!result.first_run);
    assert_eq!(result.new_records.len(), 1);
    assert_eq!(result.new_records[0].product, "visionOS 1.1");
    assert_eq!(
        result.new_records[0].date,
        UpdateDate::from_storage("2024-03-08")
    );

    // History now holds all four rows under the new hash.
    assert_eq!(store.all_records().expect("records").len(), 4);
    let run = store.last_run().expect("last_run").expect("run");
    assert_eq!(run.content_hash, content_hash(updated_page.as_bytes()));

    let text = format_message(&result.new_records, result.first_run, 5).expect("message");
    assert!(text.starts_with("*Nuevas actualizaciones de Apple\\.*"));
    assert!(text.contains("_08/03/2024_"));
    assert!(!text.contains("Safari"));
}

#[test]
fn fixture_cleanup_matches_vendor_quirks() {
    let rows = extract_rows(PAGE).expect("rows");
    let records = normalize_rows(&rows).expect("normalize");

    // The page lists newest first, so the bottom row comes out first.
    // Boilerplate phrase and non-breaking space are stripped from the product.
    assert_eq!(records[0].product, "iOS 17");
    assert_eq!(
        records[0].date,
        UpdateDate::Preinstalled("Preinstalado".to_string())
    );
    assert_eq!(records[0].link, None);

    assert_eq!(records[2].date.storage(), "2024-03-07");
    assert_eq!(
        records[1].link.as_deref(),
        Some("https://support.apple.com/es-cl/HT214086")
    );
}

/// Builds a newest-at-top advisory page with one row per given day of
/// March 2024, matching the vendor's ordering.
fn page_with_days(days: &[u32]) -> String {
    let months = [
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
    let mut page = String::from(
        "<html><body><div id=\"tableWraper\"><table>\n\
         <tr><th>Nombre</th><th>Dirigido a</th><th>Fecha</th></tr>\n",
    );
    let mut sorted: Vec<u32> = days.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    for day in sorted {
        page.push_str(&format!(
            "<tr><td>producto{day}</td><td>macOS</td><td>{day} de {} de 2024</td></tr>\n",
            months[2]
        ));
    }
    page.push_str("</table></div></body></html>");
    page
}

#[test]
fn first_run_window_prefers_newest_dates_from_a_real_page() {
    let page = page_with_days(&[1, 2, 3, 4, 5, 6, 7, 8]);
    let store = SqliteStore::open_in_memory().expect("open");
    let detector = ChangeDetector::new(&store);

    let rows = extract_rows(&page).expect("rows");
    let records = normalize_rows(&rows).expect("normalize");
    let result = detector
        .detect(page.as_bytes(), &records, observed(1), None)
        .expect("first run");
    assert!(result.first_run);

    // History holds the backfill oldest first.
    let stored = store.all_records().expect("records");
    assert_eq!(stored[0].product, "producto1");
    assert_eq!(stored[7].product, "producto8");

    let text = format_message(&result.new_records, result.first_run, 5).expect("message");
    for day in 4..=8 {
        assert!(text.contains(&format!("producto{day}")), "day {day} in window");
    }
    for day in 1..=3 {
        assert!(!text.contains(&format!("producto{day}")), "day {day} excluded");
    }
    // Lines run newest first.
    let newest = text.find("08/03/2024").expect("newest line");
    let oldest = text.find("04/03/2024").expect("oldest line");
    assert!(newest < oldest);
}

#[test]
fn incremental_delta_from_a_real_page_renders_newest_first() {
    let store = SqliteStore::open_in_memory().expect("open");
    let detector = ChangeDetector::new(&store);

    let first = page_with_days(&[8]);
    let rows = extract_rows(&first).expect("rows");
    let records = normalize_rows(&rows).expect("normalize");
    detector
        .detect(first.as_bytes(), &records, observed(1), None)
        .expect("first run");

    // Two advisories land at once, newest at the top of the page.
    let second = page_with_days(&[8, 9, 10]);
    let rows = extract_rows(&second).expect("rows");
    let records = normalize_rows(&rows).expect("normalize");
    let result = detector
        .detect(second.as_bytes(), &records, observed(2), None)
        .expect("incremental");

    let products: Vec<_> = result
        .new_records
        .iter()
        .map(|r| r.product.as_str())
        .collect();
    assert_eq!(products, vec!["producto9", "producto10"]);

    let text = format_message(&result.new_records, result.first_run, 5).expect("message");
    let day10 = text.find("10/03/2024").expect("day 10 line");
    let day9 = text.find("09/03/2024").expect("day 9 line");
    assert!(day10 < day9, "newest delta line leads the message");
}
