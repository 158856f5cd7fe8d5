//! Anchor dates: the data-derived "today" of each fact table.
//!
//! Fact tables refresh on independent schedules, so relative windows ("last 30 days") are
//! measured back from the most recent populated date of the fact itself rather than from the
//! wall clock. A fact whose anchor column holds no dates has no anchor; the resolver reports
//! [`EngineError::NoAnchor`] and leaves the choice of a fallback window to the caller (see
//! [`DateWindow::last_full_calendar_month`]).
use crate::backend::TableBackend;
use crate::cancel::CancelToken;
use crate::error::{EngineError, EngineResult};
use crate::filter::Predicate;
use crate::schema::SchemaRegistry;
use crate::value::Value;
use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Windows reported by [`AnchorProfile::recent_counts`].
pub const RECENT_WINDOWS: [u64; 3] = [7, 30, 90];

/// An inclusive date range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// `[anchor - days, anchor]`.
    pub fn relative(anchor: NaiveDate, days: u64) -> Self {
        Self::shifted(anchor, days, 0)
    }

    /// `[anchor - offset_days - days, anchor - offset_days]`, e.g. the 30 days before the
    /// current 30-day window with `offset_days = 31`.
    pub fn shifted(anchor: NaiveDate, days: u64, offset_days: u64) -> Self {
        let end = anchor
            .checked_sub_days(Days::new(offset_days))
            .unwrap_or(NaiveDate::MIN);
        let start = end.checked_sub_days(Days::new(days)).unwrap_or(NaiveDate::MIN);
        Self { start, end }
    }

    /// The last calendar month that ended before `reference`.
    pub fn last_full_calendar_month(reference: NaiveDate) -> Self {
        let first_of_month = reference.with_day(1).unwrap_or(reference);
        let end = first_of_month.pred_opt().unwrap_or(NaiveDate::MIN);
        let start = end.with_day(1).unwrap_or(end);
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Number of calendar days covered, counting both ends.
    pub fn len_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn predicate(&self) -> Predicate {
        Predicate::between(self.start, self.end)
    }
}

/// Freshness summary of one fact date column.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AnchorProfile {
    pub table: String,
    pub column: String,
    pub min: Option<NaiveDate>,
    pub max: Option<NaiveDate>,
    /// Same as `max`; `None` when the column holds no dates.
    pub anchor: Option<NaiveDate>,
    pub non_blank: usize,
    pub total_rows: usize,
    /// Rows inside `[anchor - N, anchor]` for each `N` in [`RECENT_WINDOWS`].
    pub recent_counts: BTreeMap<u64, usize>,
}

/// Per-fact anchor dates, computed once per model snapshot for facts that declare an anchor
/// column. Other columns are scanned on demand.
#[derive(Clone, Debug, Default)]
pub struct AnchorResolver {
    declared: BTreeMap<String, (String, Option<NaiveDate>)>,
}

impl AnchorResolver {
    pub(crate) fn build(
        schema: &SchemaRegistry,
        tables: &HashMap<String, Arc<dyn TableBackend>>,
    ) -> EngineResult<Self> {
        let mut declared = BTreeMap::new();
        let never = CancelToken::new();
        for fact in schema.facts() {
            let Some(column) = fact.anchor_column() else {
                continue;
            };
            let data = tables
                .get(fact.name())
                .ok_or_else(|| EngineError::UnknownTable(fact.name().to_string()))?;
            let anchor = scan_max(data.as_ref(), fact.name(), column, &never)?;
            match anchor {
                Some(date) => log::info!("anchor date for {}[{}] is {date}", fact.name(), column),
                None => log::warn!("{}[{}] holds no dates; no anchor", fact.name(), column),
            }
            declared.insert(fact.name().to_string(), (column.to_string(), anchor));
        }
        Ok(Self { declared })
    }

    /// The anchor column a fact declares, if any.
    pub fn declared_column(&self, table: &str) -> Option<&str> {
        self.declared.get(table).map(|(c, _)| c.as_str())
    }

    /// `max` of the non-blank dates in `table[column]`.
    pub(crate) fn anchor(
        &self,
        table: &str,
        column: &str,
        data: &dyn TableBackend,
        cancel: &CancelToken,
    ) -> EngineResult<NaiveDate> {
        let anchor = match self.declared.get(table) {
            Some((declared, anchor)) if declared == column => *anchor,
            _ => scan_max(data, table, column, cancel)?,
        };
        anchor.ok_or_else(|| EngineError::NoAnchor {
            table: table.to_string(),
            column: column.to_string(),
        })
    }

    pub(crate) fn profile(
        &self,
        table: &str,
        column: &str,
        data: &dyn TableBackend,
        cancel: &CancelToken,
    ) -> EngineResult<AnchorProfile> {
        let idx = column_idx(data, table, column)?;
        let mut min: Option<NaiveDate> = None;
        let mut max: Option<NaiveDate> = None;
        let mut dates = Vec::new();
        for row in 0..data.row_count() {
            cancel.check_row(row)?;
            if let Some(date) = data.value_by_idx(row, idx).and_then(|v| v.as_date()) {
                min = Some(min.map_or(date, |m| m.min(date)));
                max = Some(max.map_or(date, |m| m.max(date)));
                dates.push(date);
            }
        }

        let recent_counts = match max {
            Some(anchor) => RECENT_WINDOWS
                .iter()
                .map(|&days| {
                    let window = DateWindow::relative(anchor, days);
                    (days, dates.iter().filter(|d| window.contains(**d)).count())
                })
                .collect(),
            None => BTreeMap::new(),
        };

        Ok(AnchorProfile {
            table: table.to_string(),
            column: column.to_string(),
            min,
            max,
            anchor: max,
            non_blank: dates.len(),
            total_rows: data.row_count(),
            recent_counts,
        })
    }
}

fn column_idx(data: &dyn TableBackend, table: &str, column: &str) -> EngineResult<usize> {
    data.column_index(column)
        .ok_or_else(|| EngineError::UnknownColumn {
            table: table.to_string(),
            column: column.to_string(),
        })
}

fn scan_max(
    data: &dyn TableBackend,
    table: &str,
    column: &str,
    cancel: &CancelToken,
) -> EngineResult<Option<NaiveDate>> {
    let idx = column_idx(data, table, column)?;
    let mut max = None;
    for row in 0..data.row_count() {
        cancel.check_row(row)?;
        if let Some(Value::Date(date)) = data.value_by_idx(row, idx) {
            max = Some(max.map_or(date, |m: NaiveDate| m.max(date)));
        }
    }
    Ok(max)
}
