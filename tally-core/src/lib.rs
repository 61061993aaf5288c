use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tally_analytics::{analyze, Analysis, StoredRow};
use tally_notify::{dispatcher_for, render, AlertDispatcher, DispatchError, Report};
use tally_source::{Clock, HttpPageSource, MetricSource, RetryingFetcher, TokioClock};
use tally_store::{Ledger, LedgerError};
use tally_types::{cell_at, FetchFailure, Observations, TrackedEntity};
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

pub mod config;
pub use config::{open_ledger, ConfigError, LedgerConfig, TrackerConfig};

pub mod header;
pub use header::{header_writes, parse_header, HeaderError};

pub mod cursor;
pub use cursor::{Cursor, CursorError};

pub mod collector;
pub use collector::{Collection, Collector};

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("ledger header: {0}")]
    Header(#[from] HeaderError),
    #[error("ledger cursor: {0}")]
    Cursor(#[from] CursorError),
    #[error("ledger {phase} failed: {source}")]
    Ledger {
        phase: &'static str,
        source: LedgerError,
    },
    #[error("ledger header already names {entities} entities")]
    AlreadyInitialized { entities: usize },
    #[error("run date {today} is before the last recorded date {last} in row {row}")]
    OutOfOrder {
        today: NaiveDate,
        last: NaiveDate,
        row: u32,
    },
}

fn ledger_phase(phase: &'static str) -> impl FnOnce(LedgerError) -> TrackerError {
    move |source| TrackerError::Ledger { phase, source }
}

/// What one run did.
#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub row: u32,
    pub date: String,
    pub collected: usize,
    pub failures: Vec<FetchFailure>,
    /// `None` on the very first data row.
    pub analysis: Option<Analysis>,
    pub report: Option<String>,
}

/// Wires the ledger, source, clock and dispatcher together and sequences a run.
pub struct Tracker {
    config: Arc<TrackerConfig>,
    ledger: Arc<dyn Ledger>,
    collector: Collector,
    dispatcher: Arc<dyn AlertDispatcher>,
}

impl Tracker {
    pub fn new(
        config: Arc<TrackerConfig>,
        ledger: Arc<dyn Ledger>,
        source: Arc<dyn MetricSource>,
        clock: Arc<dyn Clock>,
        dispatcher: Arc<dyn AlertDispatcher>,
    ) -> Self {
        let fetcher = RetryingFetcher::new(source, clock, config.timing.retry_policy());
        let collector = Collector::new(fetcher, config.timing.pacing());
        Self {
            config,
            ledger,
            collector,
            dispatcher,
        }
    }

    /// Build the production collaborators named by `config`.
    pub fn from_config(config: TrackerConfig) -> Result<Self, TrackerError> {
        let ledger = open_ledger(&config.ledger, |name| std::env::var(name).ok())?;
        let source = HttpPageSource::new(
            config.source.base_url.clone(),
            &config.source.user_agent,
            Duration::from_secs(config.source.request_timeout_secs),
        )
        .map_err(|e| ConfigError::Setup(e.to_string()))?;
        let dispatcher =
            dispatcher_for(config.alert.as_ref()).map_err(|e| ConfigError::Setup(e.to_string()))?;
        Ok(Self::new(
            Arc::new(config),
            ledger,
            Arc::new(source),
            Arc::new(TokioClock::new()),
            dispatcher,
        ))
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Tracked entities from the ledger header, in one read.
    pub async fn entities(&self) -> Result<Vec<TrackedEntity>, TrackerError> {
        let (first, last) = self.config.layout.header_span();
        let rows = self
            .ledger
            .read_rows(first, last)
            .await
            .map_err(ledger_phase("header read"))?;
        Ok(parse_header(&rows, &self.config.layout)?)
    }

    /// Next row to write, from one read of the date column.
    pub async fn cursor(&self) -> Result<Cursor, TrackerError> {
        Ok(self.locate().await?.0)
    }

    async fn locate(&self) -> Result<(Cursor, Vec<String>), TrackerError> {
        let dates = self
            .ledger
            .read_column(self.config.layout.date_col)
            .await
            .map_err(ledger_phase("date column read"))?;
        let cursor = Cursor::from_column(&dates, self.config.layout.data_start_row)?;
        Ok((cursor, dates))
    }

    /// Collect today's row, write its deltas and deliver the report.
    pub async fn run(&self, today: NaiveDate) -> Result<RunSummary, TrackerError> {
        let span = tracing::info_span!("run", run_id = %Uuid::new_v4(), %today);
        self.run_once(today).instrument(span).await
    }

    async fn run_once(&self, today: NaiveDate) -> Result<RunSummary, TrackerError> {
        let entities = self.entities().await?;
        let (cursor, dates) = self.locate().await?;
        if let Some(previous) = cursor.previous_row {
            self.check_order(today, previous, cell_at(&dates, previous))?;
        }
        let date = self.format_date(today)?;
        tracing::info!(row = cursor.next_row, entities = entities.len(), %date, "collecting");

        let collection = self
            .collector
            .collect_and_write(
                self.ledger.as_ref(),
                &self.config.layout,
                cursor.next_row,
                &date,
                &entities,
            )
            .await
            .map_err(ledger_phase("row write"))?;

        let Some(previous) = cursor.previous_row else {
            tracing::info!(row = collection.row, "first data row; nothing to compare");
            return Ok(RunSummary {
                row: collection.row,
                date,
                collected: collection.observations.len(),
                failures: collection.failures,
                analysis: None,
                report: None,
            });
        };

        let analysis = self
            .analyze_row(&entities, previous, collection.row, &collection.observations)
            .await?;
        let report = render(&Report {
            date: &date,
            analysis: &analysis,
            failures: &collection.failures,
            alert_threshold: self.config.analytics.alert_threshold,
            top_n: self.config.analytics.top_n,
        });
        if let Err(e) = self.deliver(&report).await {
            tracing::warn!(error = %e, "report dispatch failed; ledger is already written");
        }

        Ok(RunSummary {
            row: collection.row,
            date,
            collected: collection.observations.len(),
            failures: collection.failures,
            analysis: Some(analysis),
            report: Some(report),
        })
    }

    /// Compare `current` with the stored `previous_row` and write deltas to `row`.
    /// One read, and one write only when there is at least one delta.
    pub async fn analyze_row(
        &self,
        entities: &[TrackedEntity],
        previous_row: u32,
        row: u32,
        current: &Observations,
    ) -> Result<Analysis, TrackerError> {
        let cells = self
            .ledger
            .read_row(previous_row)
            .await
            .map_err(ledger_phase("previous row read"))?;
        let previous = StoredRow::from_cells(previous_row, &cells, entities);
        let analysis = analyze(entities, current, &previous, &self.config.analytics);

        let writes = analysis.delta_writes(row);
        if !writes.is_empty() {
            self.ledger
                .write_cells(writes)
                .await
                .map_err(ledger_phase("delta write"))?;
        }
        tracing::info!(
            row,
            deltas = analysis.deltas.len(),
            alerts = analysis.alerts.len(),
            "deltas written"
        );
        Ok(analysis)
    }

    /// Recompute the report for the last recorded row without writing anything.
    /// `None` until the ledger holds two data rows.
    pub async fn latest_report(&self) -> Result<Option<String>, TrackerError> {
        let entities = self.entities().await?;
        let cursor = self.cursor().await?;
        let Some(last) = cursor.previous_row else {
            return Ok(None);
        };
        if last <= self.config.layout.data_start_row {
            return Ok(None);
        }

        let rows = self
            .ledger
            .read_rows(last - 1, last)
            .await
            .map_err(ledger_phase("row read"))?;
        let (previous_cells, current_cells) = match rows.as_slice() {
            [p, c] => (p, c),
            _ => return Err(ledger_phase("row read")(LedgerError::new("short row read"))),
        };
        let previous = StoredRow::from_cells(last - 1, previous_cells, &entities);
        let current = StoredRow::from_cells(last, current_cells, &entities);
        let analysis = analyze(&entities, &current.values, &previous, &self.config.analytics);

        let failures: Vec<FetchFailure> = entities
            .iter()
            .filter(|e| !current.values.contains_key(&e.value_col))
            .map(|e| FetchFailure {
                key: e.key.clone(),
                name: e.name.clone(),
                reason: "no value recorded".into(),
            })
            .collect();
        let date = cell_at(current_cells, self.config.layout.date_col);
        Ok(Some(render(&Report {
            date,
            analysis: &analysis,
            failures: &failures,
            alert_threshold: self.config.analytics.alert_threshold,
            top_n: self.config.analytics.top_n,
        })))
    }

    /// Write a header naming `entities` into a ledger that has none yet.
    pub async fn init_header(&self, entities: &[(String, String)]) -> Result<(), TrackerError> {
        match self.entities().await {
            Ok(existing) => {
                return Err(TrackerError::AlreadyInitialized {
                    entities: existing.len(),
                })
            }
            Err(TrackerError::Header(HeaderError::NoEntities { .. })) => {}
            Err(e) => return Err(e),
        }
        let cells = header_writes(&self.config.layout, entities);
        self.ledger
            .write_cells(cells)
            .await
            .map_err(ledger_phase("header write"))?;
        tracing::info!(entities = entities.len(), "ledger header written");
        Ok(())
    }

    pub async fn deliver(&self, report: &str) -> Result<(), DispatchError> {
        self.dispatcher.dispatch(report).await
    }

    fn format_date(&self, day: NaiveDate) -> Result<String, TrackerError> {
        let mut out = String::new();
        write!(out, "{}", day.format(&self.config.date_format)).map_err(|_| {
            ConfigError::Invalid(format!("date_format `{}`", self.config.date_format))
        })?;
        Ok(out)
    }

    fn check_order(&self, today: NaiveDate, row: u32, raw: &str) -> Result<(), TrackerError> {
        let Ok(last) = NaiveDate::parse_from_str(raw, &self.config.date_format) else {
            tracing::warn!(row, raw, "last recorded date unreadable; ordering not checked");
            return Ok(());
        };
        if today < last {
            return Err(TrackerError::OutOfOrder { today, last, row });
        }
        if today == last {
            tracing::info!(row, %last, "same-day rerun; appending another row");
        }
        Ok(())
    }
}
