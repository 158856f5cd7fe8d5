//! Grouped (tabular) measure evaluation.
use crate::engine::Evaluator;
use crate::error::{EngineError, EngineResult};
use crate::filter::{ColumnRef, FilterContext, Predicate};
use crate::value::Value;
use serde::Serialize;
use std::collections::BTreeSet;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Rows of `(group values..., measure value)`, sorted by the group values.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GroupedResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl GroupedResult {
    /// The measure value of the row whose group values equal `key`.
    pub fn value_for(&self, key: &[Value]) -> Option<&Value> {
        let width = self.columns.len().checked_sub(1)?;
        self.rows
            .iter()
            .find(|row| row.len() == width + 1 && row[..width] == *key)
            .and_then(|row| row.last())
    }
}

/// Evaluate `measure` once per distinct combination of `group_by` values present in the rows of
/// the measure's primary table admitted by `ctx`.
///
/// The primary table is the first table the measure scans. Grouping columns on a dimension are
/// read through the join edge selected by `ctx`; fact rows without a matching dimension row group
/// under [`Value::Blank`]. Each row's value is computed under `ctx` narrowed to the row's group
/// values, so filtered and windowed sub-measures see the same context they would in a scalar
/// query.
pub fn evaluate_grouped(
    evaluator: &Evaluator<'_>,
    measure: &str,
    group_by: &[ColumnRef],
    ctx: &FilterContext,
) -> EngineResult<GroupedResult> {
    let model = evaluator.model();
    let definition = model.measures().get(measure)?;

    let mut columns: Vec<String> = group_by.iter().map(ToString::to_string).collect();
    columns.push(definition.name.clone());

    if group_by.is_empty() {
        let value = evaluator.evaluate_expr(&definition.expression, ctx)?;
        return Ok(GroupedResult {
            columns,
            rows: vec![vec![value]],
        });
    }

    let primary = model
        .measures()
        .primary_table(&definition.expression)
        .or_else(|| group_by.first().map(|c| c.table.as_str()))
        .ok_or_else(|| EngineError::InvalidMeasure {
            measure: definition.name.clone(),
            reason: "grouped evaluation needs a measure that scans a table".to_string(),
        })?;

    let readers = group_by
        .iter()
        .map(|column| evaluator.column_reader(primary, column, ctx))
        .collect::<EngineResult<Vec<_>>>()?;
    let keys: BTreeSet<Vec<Value>> = evaluator
        .resolve_rows(primary, ctx)?
        .into_iter()
        .map(|row| readers.iter().map(|r| r.read(row)).collect())
        .collect();
    log::debug!(
        "grouping {} by {} columns over {primary}: {} groups",
        definition.name,
        group_by.len(),
        keys.len()
    );

    let keys: Vec<Vec<Value>> = keys.into_iter().collect();
    let evaluate_key = |key: &Vec<Value>| -> EngineResult<Vec<Value>> {
        let narrowed = group_by
            .iter()
            .zip(key)
            .fold(ctx.clone(), |acc, (column, value)| {
                acc.with(column.clone(), Predicate::equals(value.clone()))
            });
        let value = evaluator.evaluate_expr(&definition.expression, &narrowed)?;
        let mut row = key.clone();
        row.push(value);
        Ok(row)
    };

    #[cfg(feature = "parallel")]
    let rows = keys
        .par_iter()
        .map(evaluate_key)
        .collect::<EngineResult<Vec<_>>>()?;
    #[cfg(not(feature = "parallel"))]
    let rows = keys
        .iter()
        .map(evaluate_key)
        .collect::<EngineResult<Vec<_>>>()?;

    Ok(GroupedResult { columns, rows })
}
