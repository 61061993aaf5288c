use std::time::Duration;

use tally_source::RetryingFetcher;
use tally_store::{Ledger, LedgerError};
use tally_types::{CellWrite, FetchFailure, LedgerLayout, Observations, TrackedEntity};

/// Result of one collection pass over every tracked entity.
#[derive(Clone, Debug, PartialEq)]
pub struct Collection {
    pub row: u32,
    pub date: String,
    pub observations: Observations,
    pub failures: Vec<FetchFailure>,
}

/// Walks the entity list sequentially: fetch with retry, pause, next.
pub struct Collector {
    fetcher: RetryingFetcher,
    pacing: Duration,
}

impl Collector {
    pub fn new(fetcher: RetryingFetcher, pacing: Duration) -> Self {
        Self { fetcher, pacing }
    }

    /// Fetch every entity, then write the date and all values to `row` in one
    /// request. An entity that never yields a value leaves its cell blank.
    pub async fn collect_and_write(
        &self,
        ledger: &dyn Ledger,
        layout: &LedgerLayout,
        row: u32,
        date: &str,
        entities: &[TrackedEntity],
    ) -> Result<Collection, LedgerError> {
        let mut observations = Observations::new();
        let mut failures = Vec::new();

        for (i, entity) in entities.iter().enumerate() {
            if i > 0 && !self.pacing.is_zero() {
                self.fetcher.clock().sleep(self.pacing).await;
            }
            match self.fetcher.fetch(&entity.key).await {
                Ok(fetched) => {
                    tracing::info!(
                        key = %entity.key,
                        value = fetched.value,
                        attempts = fetched.attempts,
                        elapsed_ms = fetched.elapsed.as_millis() as u64,
                        "collected"
                    );
                    observations.insert(entity.value_col, fetched.value);
                }
                Err(timeout) => {
                    tracing::warn!(key = %entity.key, error = %timeout, "entity not collected");
                    failures.push(FetchFailure {
                        key: entity.key.clone(),
                        name: entity.name.clone(),
                        reason: timeout.to_string(),
                    });
                }
            }
        }

        let mut cells = Vec::with_capacity(observations.len() + 1);
        cells.push(CellWrite::text(row, layout.date_col, date));
        cells.extend(
            observations
                .iter()
                .map(|(&col, &value)| CellWrite::integer(row, col, value)),
        );
        ledger.write_cells(cells).await?;

        tracing::info!(
            row,
            collected = observations.len(),
            failed = failures.len(),
            "row written"
        );
        Ok(Collection {
            row,
            date: date.to_string(),
            observations,
            failures,
        })
    }
}
