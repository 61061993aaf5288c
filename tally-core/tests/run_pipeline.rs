use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tally_core::{CursorError, HeaderError, Tracker, TrackerConfig, TrackerError};
use tally_notify::{AlertDispatcher, DispatchError};
use tally_source::{Clock, ManualClock, MetricSource, SourceError};
use tally_store::{Grid, InMemoryLedger};

const CONFIG: &str = r#"
source:
  base_url: https://pages.example.invalid
ledger:
  backend: file
  path: unused.json
"#;

/// Serves a fixed page per key and counts every request.
#[derive(Default)]
struct PageMap {
    pages: HashMap<String, String>,
    calls: Mutex<Vec<String>>,
}

impl PageMap {
    fn with(pairs: &[(&str, &str)]) -> Self {
        Self {
            pages: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl MetricSource for PageMap {
    async fn fetch_page(&self, key: &str) -> Result<String, SourceError> {
        self.calls.lock().unwrap().push(key.to_string());
        self.pages
            .get(key)
            .cloned()
            .ok_or_else(|| SourceError::new("not found"))
    }
}

#[derive(Default)]
struct Recorder {
    messages: Mutex<Vec<String>>,
}

#[async_trait]
impl AlertDispatcher for Recorder {
    async fn dispatch(&self, message: &str) -> Result<(), DispatchError> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

struct Refusing;

#[async_trait]
impl AlertDispatcher for Refusing {
    async fn dispatch(&self, _message: &str) -> Result<(), DispatchError> {
        Err(DispatchError::Status(403))
    }
}

struct Harness {
    tracker: Tracker,
    ledger: Arc<InMemoryLedger>,
    source: Arc<PageMap>,
    clock: Arc<ManualClock>,
    recorder: Arc<Recorder>,
}

fn harness(ledger: InMemoryLedger, source: PageMap) -> Harness {
    let config = TrackerConfig::from_yaml_str(CONFIG).unwrap();
    config.validate().unwrap();
    let ledger = Arc::new(ledger);
    let source = Arc::new(source);
    let clock = Arc::new(ManualClock::new());
    let recorder = Arc::new(Recorder::default());
    let tracker = Tracker::new(
        Arc::new(config),
        ledger.clone(),
        source.clone(),
        clock.clone(),
        recorder.clone(),
    );
    Harness {
        tracker,
        ledger,
        source,
        clock,
        recorder,
    }
}

fn header() -> Vec<Vec<&'static str>> {
    vec![
        vec!["date", "Alpha", "", "Beta", ""],
        vec!["", "_a", "", "_b", ""],
    ]
}

fn grid_with(data: &[&[&'static str]]) -> Grid {
    let mut rows = header();
    rows.extend(data.iter().map(|r| r.to_vec()));
    Grid::from_rows(rows)
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, d).unwrap()
}

#[tokio::test]
async fn first_run_writes_one_row_and_nothing_else() {
    let h = harness(
        InMemoryLedger::with_grid(grid_with(&[])),
        PageMap::with(&[("_a", "<p>친구 100</p>"), ("_b", "<p>친구 1.2만</p>")]),
    );

    let summary = h.tracker.run(day(15)).await.unwrap();

    assert_eq!(summary.row, 3);
    assert_eq!(summary.collected, 2);
    assert!(summary.analysis.is_none());
    assert!(summary.report.is_none());
    assert_eq!(h.ledger.read_count(), 2);
    assert_eq!(h.ledger.write_batches().await.len(), 1);
    assert_eq!(h.ledger.cell(3, 1).await.as_deref(), Some("2026-01-15"));
    assert_eq!(h.ledger.cell(3, 2).await.as_deref(), Some("100"));
    assert_eq!(h.ledger.cell(3, 4).await.as_deref(), Some("12000"));
    assert!(h.recorder.messages.lock().unwrap().is_empty());
}

#[tokio::test]
async fn second_run_writes_deltas_next_to_values() {
    let h = harness(
        InMemoryLedger::with_grid(grid_with(&[&["2026-01-15", "100", "", "200", ""]])),
        PageMap::with(&[("_a", "친구 150"), ("_b", "친구 190")]),
    );

    let summary = h.tracker.run(day(16)).await.unwrap();

    assert_eq!(summary.row, 4);
    assert_eq!(h.ledger.read_count(), 3);
    let batches = h.ledger.write_batches().await;
    assert_eq!(batches.len(), 2);
    assert!(batches[1].iter().all(|c| c.row == 4 && c.col % 2 == 1));
    assert_eq!(h.ledger.cell(4, 3).await.as_deref(), Some("50"));
    assert_eq!(h.ledger.cell(4, 5).await.as_deref(), Some("-10"));
    // earlier rows are never touched
    assert_eq!(h.ledger.cell(3, 3).await, None);

    let sent = h.recorder.messages.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(Some(&sent[0]), summary.report.as_ref());
    assert!(sent[0].contains("Alpha +50 (100 -> 150)"), "{}", sent[0]);
}

#[tokio::test]
async fn timed_out_entity_is_left_out_of_every_ranking() {
    let h = harness(
        InMemoryLedger::with_grid(grid_with(&[&["2026-01-15", "100", "", "0", ""]])),
        PageMap::with(&[("_a", "친구 150"), ("_b", "<p>temporarily unavailable</p>")]),
    );

    let summary = h.tracker.run(day(16)).await.unwrap();

    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].key, "_b");
    let analysis = summary.analysis.unwrap();
    let top: Vec<(&str, i64)> = analysis
        .top_delta
        .iter()
        .map(|d| (d.entity.key.as_str(), d.delta))
        .collect();
    assert_eq!(top, vec![("_a", 50)]);
    assert!(analysis.top_rate.iter().all(|d| d.entity.key != "_b"));
    assert!(analysis.alerts.iter().all(|a| a.entity.key != "_b"));
    assert_eq!(h.ledger.cell(4, 4).await, None);
    assert_eq!(h.ledger.cell(4, 5).await, None);

    let report = summary.report.unwrap();
    assert!(report.contains("Not collected"), "{report}");
    assert!(report.contains("Beta (_b)"), "{report}");
    assert!(h.clock.now() >= Duration::from_secs(120));
}

#[tokio::test]
async fn gap_in_date_column_aborts_before_fetching() {
    let h = harness(
        InMemoryLedger::with_grid(grid_with(&[
            &["2026-01-13", "1", "", "1", ""],
            &["", "", "", "", ""],
            &["2026-01-15", "1", "", "1", ""],
        ])),
        PageMap::with(&[("_a", "친구 1"), ("_b", "친구 1")]),
    );

    let err = h.tracker.run(day(16)).await.unwrap_err();

    assert!(matches!(
        err,
        TrackerError::Cursor(CursorError::Gap {
            empty_row: 4,
            filled_row: 5
        })
    ));
    assert_eq!(h.source.calls(), 0);
    assert!(h.ledger.write_batches().await.is_empty());
}

#[tokio::test]
async fn malformed_header_aborts_before_fetching() {
    let grid = Grid::from_rows(vec![vec!["date", "Alpha", "", "Beta"], vec!["", "_a"]]);
    let h = harness(InMemoryLedger::with_grid(grid), PageMap::default());

    let err = h.tracker.run(day(16)).await.unwrap_err();

    assert!(matches!(
        err,
        TrackerError::Header(HeaderError::MissingKey { col: 4, .. })
    ));
    assert_eq!(h.source.calls(), 0);
}

#[tokio::test]
async fn dispatch_failure_does_not_fail_the_run() {
    let config = TrackerConfig::from_yaml_str(CONFIG).unwrap();
    let ledger = Arc::new(InMemoryLedger::with_grid(grid_with(&[&[
        "2026-01-15",
        "100",
        "",
        "200",
        "",
    ]])));
    let tracker = Tracker::new(
        Arc::new(config),
        ledger.clone(),
        Arc::new(PageMap::with(&[("_a", "친구 101"), ("_b", "친구 202")])),
        Arc::new(ManualClock::new()),
        Arc::new(Refusing),
    );

    let summary = tracker.run(day(16)).await.unwrap();

    assert!(summary.report.is_some());
    assert_eq!(ledger.cell(4, 3).await.as_deref(), Some("1"));
}

#[tokio::test]
async fn failed_row_write_is_fatal() {
    let h = harness(
        InMemoryLedger::read_only(grid_with(&[&["2026-01-15", "100", "", "200", ""]])),
        PageMap::with(&[("_a", "친구 150"), ("_b", "친구 190")]),
    );

    let err = h.tracker.run(day(16)).await.unwrap_err();

    assert!(matches!(err, TrackerError::Ledger { phase: "row write", .. }));
    assert!(h.recorder.messages.lock().unwrap().is_empty());
}

#[tokio::test]
async fn latest_report_is_read_only_and_repeatable() {
    let h = harness(
        InMemoryLedger::with_grid(grid_with(&[
            &["2026-01-15", "100", "", "200", ""],
            &["2026-01-16", "150", "50", "", ""],
        ])),
        PageMap::default(),
    );

    let first = h.tracker.latest_report().await.unwrap().unwrap();
    let second = h.tracker.latest_report().await.unwrap().unwrap();

    assert_eq!(first, second);
    assert!(first.starts_with("Friend count report for 2026-01-16"), "{first}");
    assert!(first.contains("Alpha +50"), "{first}");
    assert!(first.contains("Beta (_b): no value recorded"), "{first}");
    assert!(h.ledger.write_batches().await.is_empty());
    assert_eq!(h.ledger.read_count(), 6);
    assert_eq!(h.source.calls(), 0);
}

#[tokio::test]
async fn latest_report_needs_two_rows() {
    let h = harness(
        InMemoryLedger::with_grid(grid_with(&[&["2026-01-15", "100", "", "200", ""]])),
        PageMap::default(),
    );
    assert_eq!(h.tracker.latest_report().await.unwrap(), None);
}

#[tokio::test]
async fn earlier_date_than_last_row_is_rejected() {
    let h = harness(
        InMemoryLedger::with_grid(grid_with(&[&["2026-01-15", "100", "", "200", ""]])),
        PageMap::with(&[("_a", "친구 150"), ("_b", "친구 190")]),
    );

    let err = h.tracker.run(day(14)).await.unwrap_err();
    assert!(matches!(err, TrackerError::OutOfOrder { row: 3, .. }));
    assert_eq!(h.source.calls(), 0);

    // same day again is allowed and appends
    let summary = h.tracker.run(day(15)).await.unwrap();
    assert_eq!(summary.row, 4);
}

#[tokio::test]
async fn pacing_sleeps_only_between_entities() {
    let grid = Grid::from_rows(vec![
        vec!["date", "A", "", "B", "", "C"],
        vec!["", "_a", "", "_b", "", "_c"],
    ]);
    let h = harness(
        InMemoryLedger::with_grid(grid),
        PageMap::with(&[("_a", "친구 1"), ("_b", "친구 2"), ("_c", "친구 3")]),
    );

    h.tracker.run(day(15)).await.unwrap();

    assert_eq!(h.clock.sleeps(), vec![Duration::from_secs(1); 2]);
    assert_eq!(h.source.calls(), 3);
}

#[tokio::test]
async fn init_writes_header_once() {
    let h = harness(InMemoryLedger::new(), PageMap::default());
    let named = vec![
        ("_a".to_string(), "Alpha".to_string()),
        ("_b".to_string(), "Beta".to_string()),
    ];

    h.tracker.init_header(&named).await.unwrap();
    let entities = h.tracker.entities().await.unwrap();
    assert_eq!(entities.len(), 2);
    assert_eq!(entities[1].value_col, 4);
    assert_eq!(h.tracker.cursor().await.unwrap().next_row, 3);

    let err = h.tracker.init_header(&named).await.unwrap_err();
    assert!(matches!(err, TrackerError::AlreadyInitialized { entities: 2 }));
}

#[tokio::test]
async fn stored_delta_drives_the_dispatched_swing_alert() {
    let h = harness(
        InMemoryLedger::with_grid(grid_with(&[
            &["2026-01-15", "100", "", "200", ""],
            &["2026-01-16", "150", "50", "210", "10"],
        ])),
        PageMap::with(&[("_a", "친구 235"), ("_b", "친구 221")]),
    );

    let summary = h.tracker.run(day(17)).await.unwrap();

    let alerts = &summary.analysis.as_ref().unwrap().alerts;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].entity.key, "_a");
    assert_eq!((alerts[0].previous_delta, alerts[0].current_delta), (50, 85));

    let sent = h.recorder.messages.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("Delta swings of 30% or more"), "{}", sent[0]);
    assert!(sent[0].contains("Alpha: +85 after +50 (swing 70.0%)"), "{}", sent[0]);
    assert!(!sent[0].contains("Beta: +11"), "{}", sent[0]);

    assert_eq!(h.ledger.cell(5, 3).await.as_deref(), Some("85"));
    assert_eq!(h.ledger.cell(5, 5).await.as_deref(), Some("11"));
    assert_eq!(h.ledger.cell(4, 3).await.as_deref(), Some("50"));
    let batches = h.ledger.write_batches().await;
    assert!(batches.iter().flatten().all(|c| c.row == 5));
}
