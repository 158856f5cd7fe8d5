//! Referential integrity diagnostics for declared relationships.
//!
//! Reports are advisory. Null and orphaned foreign keys stay in every query and behave as a
//! blank dimension member; this pass only counts them.
use crate::backend::TableBackend;
use crate::cancel::CancelToken;
use crate::error::{EngineError, EngineResult};
use crate::relationship::{RelationshipGraph, RelationshipId};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Green,
    Yellow,
    Red,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Green => "GREEN",
            Severity::Yellow => "YELLOW",
            Severity::Red => "RED",
        })
    }
}

/// Grading cut-offs. A relationship is RED when key coverage drops below `red_coverage` or the
/// null ratio exceeds `red_null_ratio`, YELLOW on the looser pair, GREEN otherwise.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityThresholds {
    pub red_coverage: f64,
    pub red_null_ratio: f64,
    pub yellow_coverage: f64,
    pub yellow_null_ratio: f64,
}

impl Default for IntegrityThresholds {
    fn default() -> Self {
        Self {
            red_coverage: 0.95,
            red_null_ratio: 0.05,
            yellow_coverage: 0.98,
            yellow_null_ratio: 0.02,
        }
    }
}

impl IntegrityThresholds {
    pub fn grade(&self, coverage: Option<f64>, null_ratio: f64) -> Severity {
        let coverage = coverage.unwrap_or(1.0);
        if coverage < self.red_coverage || null_ratio > self.red_null_ratio {
            Severity::Red
        } else if coverage < self.yellow_coverage || null_ratio > self.yellow_null_ratio {
            Severity::Yellow
        } else {
            Severity::Green
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IntegrityReport {
    pub relationship: RelationshipId,
    pub fact: String,
    pub fact_column: String,
    pub dimension: String,
    pub dimension_column: String,
    pub total_rows: usize,
    /// Rows whose foreign key is blank.
    pub null_count: usize,
    /// Rows whose non-blank foreign key matches no dimension row.
    pub orphan_count: usize,
    /// Distinct non-blank foreign key values.
    pub distinct_keys: usize,
    pub orphan_distinct_keys: usize,
    pub null_ratio: f64,
    /// `1 - orphan_distinct_keys / distinct_keys`; `None` when the fact holds no keys.
    pub coverage: Option<f64>,
    pub severity: Severity,
}

/// Read-only scanner over a model snapshot.
pub struct IntegrityChecker<'a> {
    graph: &'a RelationshipGraph,
    tables: &'a HashMap<String, Arc<dyn TableBackend>>,
    thresholds: IntegrityThresholds,
}

impl<'a> IntegrityChecker<'a> {
    pub(crate) fn new(
        graph: &'a RelationshipGraph,
        tables: &'a HashMap<String, Arc<dyn TableBackend>>,
        thresholds: IntegrityThresholds,
    ) -> Self {
        Self {
            graph,
            tables,
            thresholds,
        }
    }

    /// One report per relationship declared on `fact`, in declaration order.
    pub fn check_fact(
        &self,
        fact: &str,
        cancel: &CancelToken,
    ) -> EngineResult<Vec<IntegrityReport>> {
        if !self.tables.contains_key(fact) {
            return Err(EngineError::UnknownTable(fact.to_string()));
        }
        self.graph
            .relationships_for_fact(fact)
            .map(|rel| self.check(fact, &rel.id, cancel))
            .collect()
    }

    pub fn check(
        &self,
        fact: &str,
        relationship: &RelationshipId,
        cancel: &CancelToken,
    ) -> EngineResult<IntegrityReport> {
        let edge = self
            .graph
            .edge_by_id(relationship)
            .ok_or_else(|| EngineError::UnknownRelationship(relationship.to_string()))?;
        if edge.rel.fact != fact {
            return Err(EngineError::RelationshipMismatch {
                relationship: relationship.to_string(),
                fact: fact.to_string(),
                dimension: edge.rel.dimension.clone(),
            });
        }
        let data = self
            .tables
            .get(fact)
            .ok_or_else(|| EngineError::UnknownTable(fact.to_string()))?;

        let total_rows = data.row_count();
        let mut null_count = 0;
        let mut orphan_count = 0;
        let mut keys: HashSet<Value> = HashSet::new();
        let mut orphan_keys: HashSet<Value> = HashSet::new();
        for row in 0..total_rows {
            cancel.check_row(row)?;
            let key = data.value_by_idx(row, edge.fact_idx).unwrap_or_default();
            if key.is_blank() {
                null_count += 1;
                continue;
            }
            if edge.lookup(&key).is_none() {
                orphan_count += 1;
                orphan_keys.insert(key.clone());
            }
            keys.insert(key);
        }

        let null_ratio = if total_rows == 0 {
            0.0
        } else {
            null_count as f64 / total_rows as f64
        };
        let coverage = (!keys.is_empty())
            .then(|| 1.0 - orphan_keys.len() as f64 / keys.len() as f64);
        let severity = self.thresholds.grade(coverage, null_ratio);
        if severity == Severity::Red {
            log::warn!(
                "relationship {} is RED: {null_count} null and {orphan_count} orphaned keys in {total_rows} rows",
                edge.rel
            );
        }

        Ok(IntegrityReport {
            relationship: edge.rel.id.clone(),
            fact: edge.rel.fact.clone(),
            fact_column: edge.rel.fact_column.clone(),
            dimension: edge.rel.dimension.clone(),
            dimension_column: edge.rel.dimension_column.clone(),
            total_rows,
            null_count,
            orphan_count,
            distinct_keys: keys.len(),
            orphan_distinct_keys: orphan_keys.len(),
            null_ratio,
            coverage,
            severity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grades_by_coverage_then_nulls() {
        let t = IntegrityThresholds::default();
        assert_eq!(t.grade(Some(1.0), 0.0), Severity::Green);
        assert_eq!(t.grade(None, 0.0), Severity::Green);
        assert_eq!(t.grade(Some(0.97), 0.0), Severity::Yellow);
        assert_eq!(t.grade(Some(1.0), 0.03), Severity::Yellow);
        assert_eq!(t.grade(Some(0.90), 0.0), Severity::Red);
        assert_eq!(t.grade(Some(1.0), 0.06), Severity::Red);
    }

    #[test]
    fn thresholds_deserialize_with_defaults() {
        let t: IntegrityThresholds = serde_json::from_str(r#"{"red_coverage": 0.5}"#).unwrap();
        assert_eq!(t.red_coverage, 0.5);
        assert_eq!(t.yellow_coverage, 0.98);
    }
}
