//! Measure evaluation over a model snapshot.
//!
//! Each node of a measure tree is evaluated against a [`FilterContext`]. Leaf aggregations scan
//! the table they name, restricted to the rows admitted by the context:
//!
//! 1. Predicates on the scanned table's own columns are tested directly.
//! 2. Predicates on a dimension joined from the scanned fact are first resolved to an allowed
//!    row mask over the dimension, then tested through the join edge picked by the relationship
//!    graph (honouring the relationships selected in the context).
//! 3. Predicates on tables that the scanned table does not join (another fact, an unrelated
//!    dimension) do not apply.
//!
//! Fact rows whose foreign key is blank or matches no dimension row belong to a virtual blank
//! member of that dimension: they pass a dimension filter only when every predicate on that
//! dimension admits [`Value::Blank`].
use crate::anchor::DateWindow;
use crate::backend::TableBackend;
use crate::cancel::CancelToken;
use crate::error::{EngineError, EngineResult};
use crate::filter::{ColumnRef, FilterContext, Predicate};
use crate::measure::MeasureExpr;
use crate::model::DataModel;
use crate::relationship::Edge;
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Evaluates measures against one model snapshot for one query.
#[derive(Clone, Copy)]
pub struct Evaluator<'a> {
    model: &'a DataModel,
    cancel: &'a CancelToken,
}

/// Dimension filter resolved for one scan: the allowed dimension rows plus whether the virtual
/// blank member is allowed.
struct JoinFilter<'a> {
    edge: &'a Edge,
    allowed: Vec<bool>,
    blank_member: bool,
}

impl JoinFilter<'_> {
    fn admits(&self, fact: &dyn TableBackend, row: usize) -> bool {
        let key = fact.value_by_idx(row, self.edge.fact_idx).unwrap_or_default();
        match self.edge.lookup(&key) {
            Some(dim_row) => self.allowed.get(dim_row).copied().unwrap_or(false),
            None => self.blank_member,
        }
    }
}

/// How a grouping column is read from the rows of a primary table.
pub(crate) enum ColumnReader<'a> {
    Local {
        data: &'a dyn TableBackend,
        idx: usize,
    },
    Joined {
        fact: &'a dyn TableBackend,
        edge: &'a Edge,
        dimension: &'a dyn TableBackend,
        idx: usize,
    },
}

impl ColumnReader<'_> {
    pub(crate) fn read(&self, row: usize) -> Value {
        match self {
            ColumnReader::Local { data, idx } => data.value_by_idx(row, *idx).unwrap_or_default(),
            ColumnReader::Joined {
                fact,
                edge,
                dimension,
                idx,
            } => {
                let key = fact.value_by_idx(row, edge.fact_idx).unwrap_or_default();
                edge.lookup(&key)
                    .and_then(|dim_row| dimension.value_by_idx(dim_row, *idx))
                    .unwrap_or_default()
            }
        }
    }
}

impl<'a> Evaluator<'a> {
    pub fn new(model: &'a DataModel, cancel: &'a CancelToken) -> Self {
        Self { model, cancel }
    }

    pub fn model(&self) -> &'a DataModel {
        self.model
    }

    pub fn cancel_token(&self) -> &'a CancelToken {
        self.cancel
    }

    /// Evaluate a registered measure.
    pub fn evaluate(&self, measure: &str, ctx: &FilterContext) -> EngineResult<Value> {
        let measure = self.model.measures().get(measure)?;
        self.evaluate_expr(&measure.expression, ctx)
    }

    pub fn evaluate_expr(&self, expr: &MeasureExpr, ctx: &FilterContext) -> EngineResult<Value> {
        self.cancel.check()?;
        match expr {
            MeasureExpr::CountRows { table } => {
                Ok(Value::from(self.resolve_rows(table, ctx)?.len()))
            }
            MeasureExpr::Count { column } => {
                let count = self
                    .column_values(column, ctx)?
                    .iter()
                    .filter(|v| !v.is_blank())
                    .count();
                Ok(Value::from(count))
            }
            MeasureExpr::CountDistinct { column } => {
                let distinct: HashSet<Value> = self
                    .column_values(column, ctx)?
                    .into_iter()
                    .filter(|v| !v.is_blank())
                    .collect();
                Ok(Value::from(distinct.len()))
            }
            MeasureExpr::Sum { column } => {
                let numbers = numbers(self.column_values(column, ctx)?);
                if numbers.is_empty() {
                    Ok(Value::Blank)
                } else {
                    Ok(Value::number(numbers.iter().sum()))
                }
            }
            MeasureExpr::Average { column } => {
                let numbers = numbers(self.column_values(column, ctx)?);
                if numbers.is_empty() {
                    Ok(Value::Blank)
                } else {
                    Ok(Value::number(
                        numbers.iter().sum::<f64>() / numbers.len() as f64,
                    ))
                }
            }
            MeasureExpr::Min { column } => Ok(self
                .column_values(column, ctx)?
                .into_iter()
                .filter(|v| !v.is_blank())
                .min()
                .unwrap_or_default()),
            MeasureExpr::Max { column } => Ok(self
                .column_values(column, ctx)?
                .into_iter()
                .filter(|v| !v.is_blank())
                .max()
                .unwrap_or_default()),
            MeasureExpr::Percentile { column, fraction } => {
                self.percentile(column, *fraction, ctx)
            }
            MeasureExpr::Median { column } => self.percentile(column, 0.5, ctx),
            MeasureExpr::Filtered { base, filters } => {
                let narrowed = ctx.clone().with_filters(filters);
                self.evaluate_expr(base, &narrowed)
            }
            MeasureExpr::Ratio {
                numerator,
                denominator,
            } => {
                let numerator = self.evaluate_expr(numerator, ctx)?;
                let denominator = self.evaluate_expr(denominator, ctx)?;
                Ok(ratio(&numerator, &denominator))
            }
            MeasureExpr::Measure(name) => self.evaluate(name, ctx),
            MeasureExpr::Literal(n) => Ok(Value::number(*n)),
            MeasureExpr::Add(a, b) => self.arithmetic(a, b, ctx, |x, y| x + y),
            MeasureExpr::Subtract(a, b) => self.arithmetic(a, b, ctx, |x, y| x - y),
            MeasureExpr::Multiply(a, b) => self.arithmetic(a, b, ctx, |x, y| x * y),
            MeasureExpr::Window {
                base,
                table,
                column,
                days,
                offset_days,
            } => {
                let column = match column {
                    Some(column) => column.as_str(),
                    None => self
                        .model
                        .anchors()
                        .declared_column(table)
                        .ok_or_else(|| EngineError::NoAnchorColumn {
                            table: table.clone(),
                        })?,
                };
                let anchor = match self.model.anchor_date_with(table, column, self.cancel) {
                    Ok(anchor) => anchor,
                    Err(EngineError::NoAnchor { .. }) => {
                        log::debug!("{table}[{column}] has no anchor; window is blank");
                        return Ok(Value::Blank);
                    }
                    Err(err) => return Err(err),
                };
                let window = DateWindow::shifted(anchor, *days, *offset_days);
                let narrowed = ctx.clone().with_window(table, column, window);
                self.evaluate_expr(base, &narrowed)
            }
            MeasureExpr::UseRelationship { relationship, base } => {
                if self.model.graph().relationship(relationship).is_none() {
                    return Err(EngineError::UnknownRelationship(relationship.to_string()));
                }
                let narrowed = ctx.clone().with_relationship(relationship.clone());
                self.evaluate_expr(base, &narrowed)
            }
        }
    }

    fn arithmetic(
        &self,
        a: &MeasureExpr,
        b: &MeasureExpr,
        ctx: &FilterContext,
        op: impl Fn(f64, f64) -> f64,
    ) -> EngineResult<Value> {
        let a = self.evaluate_expr(a, ctx)?;
        let b = self.evaluate_expr(b, ctx)?;
        Ok(match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => Value::number(op(a, b)),
            _ => Value::Blank,
        })
    }

    fn percentile(
        &self,
        column: &ColumnRef,
        fraction: f64,
        ctx: &FilterContext,
    ) -> EngineResult<Value> {
        let mut values: Vec<Value> = self
            .column_values(column, ctx)?
            .into_iter()
            .filter(|v| !v.is_blank())
            .collect();
        if values.is_empty() {
            return Ok(Value::Blank);
        }
        values.sort();
        let position = percentile_position(values.len(), fraction);
        Ok(values.swap_remove(position - 1))
    }

    /// Values of `column` on the rows of its table admitted by `ctx`.
    pub fn column_values(
        &self,
        column: &ColumnRef,
        ctx: &FilterContext,
    ) -> EngineResult<Vec<Value>> {
        let data = self.model.table_data(&column.table)?;
        let idx = column_index(data, column)?;
        Ok(self
            .resolve_rows(&column.table, ctx)?
            .into_iter()
            .map(|row| data.value_by_idx(row, idx).unwrap_or_default())
            .collect())
    }

    pub fn count_rows(&self, table: &str, ctx: &FilterContext) -> EngineResult<usize> {
        Ok(self.resolve_rows(table, ctx)?.len())
    }

    /// Rows of `table` admitted by `ctx`, ascending.
    pub fn resolve_rows(&self, table: &str, ctx: &FilterContext) -> EngineResult<Vec<usize>> {
        let schema = self
            .model
            .schema()
            .table(table)
            .ok_or_else(|| EngineError::UnknownTable(table.to_string()))?;
        let data = self.model.table_data(table)?;
        if ctx.is_unsatisfiable() {
            return Ok(Vec::new());
        }

        let mut local: Vec<(usize, &Predicate)> = Vec::new();
        let mut by_dimension: BTreeMap<&str, Vec<(&ColumnRef, &Predicate)>> = BTreeMap::new();
        for (column, predicate) in ctx.predicates() {
            if column.table == table {
                local.push((column_index(data, column)?, predicate));
            } else if schema.is_fact() && self.model.graph().connects(table, &column.table) {
                by_dimension
                    .entry(column.table.as_str())
                    .or_default()
                    .push((column, predicate));
            } else {
                log::debug!("filter on {column} does not reach {table}; ignored");
            }
        }

        let joins = by_dimension
            .into_iter()
            .map(|(dimension, predicates)| self.join_filter(table, dimension, &predicates, ctx))
            .collect::<EngineResult<Vec<_>>>()?;

        let mut rows = Vec::new();
        for row in 0..data.row_count() {
            self.cancel.check_row(row)?;
            let local_ok = local.iter().all(|(idx, predicate)| {
                predicate.matches(&data.value_by_idx(row, *idx).unwrap_or_default())
            });
            if local_ok && joins.iter().all(|join| join.admits(data, row)) {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// The edge used to join `fact` to `dimension` under `ctx`.
    pub(crate) fn join_edge(
        &self,
        fact: &str,
        dimension: &str,
        ctx: &FilterContext,
    ) -> EngineResult<&'a Edge> {
        let graph = self.model.graph();
        let idx = graph.resolve_edge_idx(fact, dimension, ctx.relationships())?;
        let edge = graph.edge(idx);
        log::debug!("joining {fact} to {dimension} through {}", edge.rel.id);
        Ok(edge)
    }

    fn join_filter(
        &self,
        fact: &str,
        dimension: &str,
        predicates: &[(&ColumnRef, &Predicate)],
        ctx: &FilterContext,
    ) -> EngineResult<JoinFilter<'a>> {
        let edge = self.join_edge(fact, dimension, ctx)?;
        let data = self.model.table_data(dimension)?;
        let columns = predicates
            .iter()
            .map(|(column, predicate)| -> EngineResult<_> {
                Ok((column_index(data, column)?, *predicate))
            })
            .collect::<EngineResult<Vec<_>>>()?;

        let allowed = (0..data.row_count())
            .map(|row| {
                columns.iter().all(|(idx, predicate)| {
                    predicate.matches(&data.value_by_idx(row, *idx).unwrap_or_default())
                })
            })
            .collect();
        let blank_member = columns
            .iter()
            .all(|(_, predicate)| predicate.matches(&Value::Blank));
        Ok(JoinFilter {
            edge,
            allowed,
            blank_member,
        })
    }

    /// Reader for `column` on rows of `primary`: either a local column or a dimension column
    /// reached through the join edge selected by `ctx`.
    pub(crate) fn column_reader(
        &self,
        primary: &str,
        column: &ColumnRef,
        ctx: &FilterContext,
    ) -> EngineResult<ColumnReader<'a>> {
        let data = self.model.table_data(primary)?;
        if column.table == primary {
            return Ok(ColumnReader::Local {
                data,
                idx: column_index(data, column)?,
            });
        }
        let edge = self.join_edge(primary, &column.table, ctx)?;
        let dimension = self.model.table_data(&column.table)?;
        Ok(ColumnReader::Joined {
            fact: data,
            edge,
            dimension,
            idx: column_index(dimension, column)?,
        })
    }

    /// Distinct values of `column` over the rows of `primary` admitted by `ctx`, ascending.
    /// Orphaned and null foreign keys contribute [`Value::Blank`].
    pub fn distinct_values(
        &self,
        primary: &str,
        column: &ColumnRef,
        ctx: &FilterContext,
    ) -> EngineResult<Vec<Value>> {
        let reader = self.column_reader(primary, column, ctx)?;
        let values: BTreeSet<Value> = self
            .resolve_rows(primary, ctx)?
            .into_iter()
            .map(|row| reader.read(row))
            .collect();
        Ok(values.into_iter().collect())
    }
}

fn column_index(data: &dyn TableBackend, column: &ColumnRef) -> EngineResult<usize> {
    data.column_index(&column.column)
        .ok_or_else(|| EngineError::UnknownColumn {
            table: column.table.clone(),
            column: column.column.clone(),
        })
}

fn numbers(values: Vec<Value>) -> Vec<f64> {
    values.iter().filter_map(Value::as_f64).collect()
}

/// 1-indexed position of the inclusive percentile in a sorted sample of `n > 0` values:
/// `ceil(n * fraction)` clamped to `[1, n]`.
pub fn percentile_position(n: usize, fraction: f64) -> usize {
    // Absorb float noise such as 0.7 * 10 = 7.000000000000001.
    let raw = (n as f64 * fraction - 1e-9).ceil();
    (raw.max(1.0) as usize).min(n.max(1))
}

/// `numerator / denominator`, blank when either side is blank or non-numeric or the denominator
/// is zero.
pub fn ratio(numerator: &Value, denominator: &Value) -> Value {
    match (numerator.as_f64(), denominator.as_f64()) {
        (Some(_), Some(d)) if d == 0.0 => Value::Blank,
        (Some(n), Some(d)) => Value::number(n / d),
        _ => Value::Blank,
    }
}
