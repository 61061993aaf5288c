use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use tally_types::{cell_at, parse_count, CellWrite, Observations, TrackedEntity};

/// Ranking and alerting knobs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalyticsConfig {
    /// Length of each ranking list.
    pub top_n: usize,
    /// Inclusive volatility ratio at which an entity is flagged.
    pub alert_threshold: f64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            top_n: 5,
            alert_threshold: 0.30,
        }
    }
}

/// Values and deltas already stored in one ledger row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StoredRow {
    pub values: Observations,
    /// Deltas keyed by the entity's value column, not the delta column.
    pub deltas: Observations,
}

impl StoredRow {
    /// Parse a bulk-read row. Blank cells are absent; malformed cells are
    /// absent too and logged.
    pub fn from_cells(row: u32, cells: &[String], entities: &[TrackedEntity]) -> Self {
        let mut stored = Self::default();
        for entity in entities {
            if let Some(v) = parse_cell(row, cells, entity.value_col, &entity.key) {
                stored.values.insert(entity.value_col, v);
            }
            if let Some(d) = parse_cell(row, cells, entity.delta_col(), &entity.key) {
                stored.deltas.insert(entity.value_col, d);
            }
        }
        stored
    }
}

fn parse_cell(row: u32, cells: &[String], col: u32, key: &str) -> Option<i64> {
    let raw = cell_at(cells, col);
    if raw.is_empty() {
        return None;
    }
    let parsed = parse_count(raw);
    if parsed.is_none() {
        tracing::warn!(row, col, key, raw, "malformed ledger cell treated as absent");
    }
    parsed
}

/// Period-over-period change for one entity.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityDelta {
    pub entity: TrackedEntity,
    pub previous: i64,
    pub current: i64,
    pub delta: i64,
    /// `delta / previous`; `None` when the previous value is not positive.
    pub rate: Option<f64>,
}

/// Relative change between two consecutive deltas.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum VolatilityRatio {
    Finite(f64),
    /// Movement away from a flat (zero) previous delta.
    Unbounded,
}

impl VolatilityRatio {
    pub fn meets(&self, threshold: f64) -> bool {
        match self {
            VolatilityRatio::Unbounded => true,
            VolatilityRatio::Finite(r) => *r >= threshold,
        }
    }

    /// Unbounded ranks above every finite ratio.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (VolatilityRatio::Unbounded, VolatilityRatio::Unbounded) => Ordering::Equal,
            (VolatilityRatio::Unbounded, VolatilityRatio::Finite(_)) => Ordering::Greater,
            (VolatilityRatio::Finite(_), VolatilityRatio::Unbounded) => Ordering::Less,
            (VolatilityRatio::Finite(a), VolatilityRatio::Finite(b)) => a.total_cmp(b),
        }
    }
}

impl PartialOrd for VolatilityRatio {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.rank_cmp(other))
    }
}

impl fmt::Display for VolatilityRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolatilityRatio::Unbounded => f.write_str("∞"),
            VolatilityRatio::Finite(r) => write!(f, "{:.1}%", r * 100.0),
        }
    }
}

pub fn volatility_ratio(previous_delta: i64, current_delta: i64) -> VolatilityRatio {
    if previous_delta == 0 {
        return if current_delta == 0 {
            VolatilityRatio::Finite(0.0)
        } else {
            VolatilityRatio::Unbounded
        };
    }
    let change = (i128::from(current_delta) - i128::from(previous_delta)).abs();
    let base = i128::from(previous_delta).abs();
    VolatilityRatio::Finite(change as f64 / base as f64)
}

#[derive(Clone, Debug, PartialEq)]
pub struct VolatilityAlert {
    pub entity: TrackedEntity,
    pub previous_delta: i64,
    pub current_delta: i64,
    pub ratio: VolatilityRatio,
}

/// Everything derived from one current/previous row pair.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Analysis {
    /// Every computed delta, in entity order.
    pub deltas: Vec<EntityDelta>,
    pub top_delta: Vec<EntityDelta>,
    pub top_rate: Vec<EntityDelta>,
    pub alerts: Vec<VolatilityAlert>,
}

impl Analysis {
    /// Delta cells for `row`; nothing outside that row is ever targeted.
    pub fn delta_writes(&self, row: u32) -> Vec<CellWrite> {
        self.deltas
            .iter()
            .map(|d| CellWrite::integer(row, d.entity.delta_col(), d.delta))
            .collect()
    }
}

/// Compare the current observations with the previous row.
///
/// Entities lacking either value are skipped entirely. Entities whose previous
/// delta is unknown still get a delta and rate but cannot raise an alert.
pub fn analyze(
    entities: &[TrackedEntity],
    current: &Observations,
    previous: &StoredRow,
    config: &AnalyticsConfig,
) -> Analysis {
    let mut analysis = Analysis::default();

    for entity in entities {
        let col = entity.value_col;
        let (Some(&cur), Some(&prev)) = (current.get(&col), previous.values.get(&col)) else {
            continue;
        };
        let Some(delta) = cur.checked_sub(prev) else {
            tracing::warn!(key = %entity.key, cur, prev, "delta overflows; entity skipped");
            continue;
        };
        let rate = (prev > 0).then(|| delta as f64 / prev as f64);

        if let Some(&prev_delta) = previous.deltas.get(&col) {
            let ratio = volatility_ratio(prev_delta, delta);
            if ratio.meets(config.alert_threshold) {
                analysis.alerts.push(VolatilityAlert {
                    entity: entity.clone(),
                    previous_delta: prev_delta,
                    current_delta: delta,
                    ratio,
                });
            }
        }

        analysis.deltas.push(EntityDelta {
            entity: entity.clone(),
            previous: prev,
            current: cur,
            delta,
            rate,
        });
    }

    let mut by_delta = analysis.deltas.clone();
    by_delta.sort_by(|a, b| b.delta.cmp(&a.delta));
    by_delta.truncate(config.top_n);
    analysis.top_delta = by_delta;

    let mut by_rate: Vec<EntityDelta> = analysis
        .deltas
        .iter()
        .filter(|d| d.rate.is_some())
        .cloned()
        .collect();
    by_rate.sort_by(|a, b| {
        let (ra, rb) = (a.rate.unwrap_or_default(), b.rate.unwrap_or_default());
        rb.total_cmp(&ra)
    });
    by_rate.truncate(config.top_n);
    analysis.top_rate = by_rate;

    analysis.alerts.sort_by(|a, b| b.ratio.rank_cmp(&a.ratio));

    analysis
}
