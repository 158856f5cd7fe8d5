//! Measure definitions and the registry that validates them at load time.
//!
//! Measures are expression trees. Nested references by name are resolved against the registry,
//! which rejects unknown names and cyclic definitions before any query runs.
use crate::error::{EngineError, EngineResult};
use crate::filter::{ColumnFilter, ColumnRef};
use crate::relationship::RelationshipId;
use crate::schema::{ColumnType, SchemaRegistry};
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasureExpr {
    /// Rows of `table` under the current context.
    CountRows { table: String },
    /// Non-blank values.
    Count { column: ColumnRef },
    /// Distinct non-blank values.
    CountDistinct { column: ColumnRef },
    Sum { column: ColumnRef },
    Average { column: ColumnRef },
    Min { column: ColumnRef },
    Max { column: ColumnRef },
    /// Inclusive percentile: the value at 1-indexed position `ceil(n * fraction)`.
    Percentile { column: ColumnRef, fraction: f64 },
    Median { column: ColumnRef },
    /// Evaluate `base` under the outer context narrowed by `filters`.
    Filtered {
        base: Box<MeasureExpr>,
        filters: Vec<ColumnFilter>,
    },
    /// Both sides are evaluated under the same context. A blank numerator, or a blank or zero
    /// denominator, gives blank.
    Ratio {
        numerator: Box<MeasureExpr>,
        denominator: Box<MeasureExpr>,
    },
    /// Reference to another registered measure.
    Measure(String),
    Literal(f64),
    Add(Box<MeasureExpr>, Box<MeasureExpr>),
    Subtract(Box<MeasureExpr>, Box<MeasureExpr>),
    Multiply(Box<MeasureExpr>, Box<MeasureExpr>),
    /// Evaluate `base` within `[anchor - offset_days - days, anchor - offset_days]`, where the
    /// anchor is the latest date in `table[column]`. `column` defaults to the table's declared
    /// anchor column. No anchor gives blank.
    Window {
        base: Box<MeasureExpr>,
        table: String,
        #[serde(default)]
        column: Option<String>,
        days: u64,
        #[serde(default)]
        offset_days: u64,
    },
    /// Evaluate `base` with `relationship` selected for its (fact, dimension) pair.
    UseRelationship {
        relationship: RelationshipId,
        base: Box<MeasureExpr>,
    },
}

impl MeasureExpr {
    pub fn count_rows(table: impl Into<String>) -> Self {
        MeasureExpr::CountRows {
            table: table.into(),
        }
    }

    pub fn count(table: &str, column: &str) -> Self {
        MeasureExpr::Count {
            column: ColumnRef::new(table, column),
        }
    }

    pub fn count_distinct(table: &str, column: &str) -> Self {
        MeasureExpr::CountDistinct {
            column: ColumnRef::new(table, column),
        }
    }

    pub fn sum(table: &str, column: &str) -> Self {
        MeasureExpr::Sum {
            column: ColumnRef::new(table, column),
        }
    }

    pub fn average(table: &str, column: &str) -> Self {
        MeasureExpr::Average {
            column: ColumnRef::new(table, column),
        }
    }

    pub fn percentile(table: &str, column: &str, fraction: f64) -> Self {
        MeasureExpr::Percentile {
            column: ColumnRef::new(table, column),
            fraction,
        }
    }

    pub fn measure(name: impl Into<String>) -> Self {
        MeasureExpr::Measure(name.into())
    }

    pub fn filtered(base: MeasureExpr, filters: Vec<ColumnFilter>) -> Self {
        MeasureExpr::Filtered {
            base: Box::new(base),
            filters,
        }
    }

    pub fn ratio(numerator: MeasureExpr, denominator: MeasureExpr) -> Self {
        MeasureExpr::Ratio {
            numerator: Box::new(numerator),
            denominator: Box::new(denominator),
        }
    }

    pub fn window(base: MeasureExpr, table: impl Into<String>, days: u64) -> Self {
        MeasureExpr::Window {
            base: Box::new(base),
            table: table.into(),
            column: None,
            days,
            offset_days: 0,
        }
    }

    pub fn use_relationship(relationship: impl Into<RelationshipId>, base: MeasureExpr) -> Self {
        MeasureExpr::UseRelationship {
            relationship: relationship.into(),
            base: Box::new(base),
        }
    }

    /// Direct children, left to right.
    pub fn children(&self) -> Vec<&MeasureExpr> {
        match self {
            MeasureExpr::Filtered { base, .. }
            | MeasureExpr::Window { base, .. }
            | MeasureExpr::UseRelationship { base, .. } => vec![base.as_ref()],
            MeasureExpr::Ratio {
                numerator,
                denominator,
            } => vec![numerator.as_ref(), denominator.as_ref()],
            MeasureExpr::Add(a, b) | MeasureExpr::Subtract(a, b) | MeasureExpr::Multiply(a, b) => {
                vec![a.as_ref(), b.as_ref()]
            }
            _ => Vec::new(),
        }
    }

    /// Column aggregated by a leaf node.
    pub fn aggregated_column(&self) -> Option<&ColumnRef> {
        match self {
            MeasureExpr::Count { column }
            | MeasureExpr::CountDistinct { column }
            | MeasureExpr::Sum { column }
            | MeasureExpr::Average { column }
            | MeasureExpr::Min { column }
            | MeasureExpr::Max { column }
            | MeasureExpr::Percentile { column, .. }
            | MeasureExpr::Median { column } => Some(column),
            _ => None,
        }
    }

    /// Table scanned by a leaf node.
    pub fn scanned_table(&self) -> Option<&str> {
        match self {
            MeasureExpr::CountRows { table } => Some(table),
            other => other.aggregated_column().map(|c| c.table.as_str()),
        }
    }

    /// First table scanned in a left-to-right walk of this tree, not following measure
    /// references.
    pub fn first_table(&self) -> Option<&str> {
        self.scanned_table()
            .or_else(|| self.children().into_iter().find_map(MeasureExpr::first_table))
    }

    fn walk<'a>(&'a self, f: &mut impl FnMut(&'a MeasureExpr)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    fn contains(&self, pred: impl Fn(&MeasureExpr) -> bool) -> bool {
        let mut found = false;
        self.walk(&mut |node| found |= pred(node));
        found
    }
}

/// Declared return type of a measure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasureKind {
    Count,
    Sum,
    Ratio,
    Average,
    Percentile,
    RatioOfSums,
    Number,
}

impl MeasureKind {
    pub fn infer(expr: &MeasureExpr) -> Self {
        match expr {
            MeasureExpr::CountRows { .. }
            | MeasureExpr::Count { .. }
            | MeasureExpr::CountDistinct { .. } => MeasureKind::Count,
            MeasureExpr::Sum { .. } => MeasureKind::Sum,
            MeasureExpr::Average { .. } => MeasureKind::Average,
            MeasureExpr::Percentile { .. } | MeasureExpr::Median { .. } => MeasureKind::Percentile,
            MeasureExpr::Ratio {
                numerator,
                denominator,
            } => {
                if Self::infer(numerator) == MeasureKind::Sum
                    && Self::infer(denominator) == MeasureKind::Sum
                {
                    MeasureKind::RatioOfSums
                } else {
                    MeasureKind::Ratio
                }
            }
            MeasureExpr::Filtered { base, .. }
            | MeasureExpr::Window { base, .. }
            | MeasureExpr::UseRelationship { base, .. } => Self::infer(base),
            _ => MeasureKind::Number,
        }
    }
}

/// Catalog grouping used when listing measures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasureCategory {
    Aggregation,
    Counting,
    Statistical,
    Filtered,
    TimeIntelligence,
    Calculation,
}

impl fmt::Display for MeasureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MeasureCategory::Aggregation => "aggregation",
            MeasureCategory::Counting => "counting",
            MeasureCategory::Statistical => "statistical",
            MeasureCategory::Filtered => "filtered",
            MeasureCategory::TimeIntelligence => "time-intelligence",
            MeasureCategory::Calculation => "calculation",
        })
    }
}

/// Names a measure's expression refers to directly.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MeasureDependencies {
    pub measures: BTreeSet<String>,
    pub columns: BTreeSet<ColumnRef>,
    pub tables: BTreeSet<String>,
    pub relationships: BTreeSet<RelationshipId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Measure {
    pub name: String,
    /// Inferred from the expression when omitted.
    #[serde(default)]
    pub kind: Option<MeasureKind>,
    pub expression: MeasureExpr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Measure {
    pub fn new(name: impl Into<String>, expression: MeasureExpr) -> Self {
        Self {
            name: normalize_measure_name(&name.into()).to_string(),
            kind: None,
            expression,
            description: None,
        }
    }

    pub fn with_kind(mut self, kind: MeasureKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn kind(&self) -> MeasureKind {
        self.kind
            .unwrap_or_else(|| MeasureKind::infer(&self.expression))
    }

    pub fn category(&self) -> MeasureCategory {
        let expr = &self.expression;
        if expr.contains(|n| matches!(n, MeasureExpr::Window { .. })) {
            return MeasureCategory::TimeIntelligence;
        }
        match expr {
            MeasureExpr::Filtered { .. } | MeasureExpr::UseRelationship { .. } => {
                MeasureCategory::Filtered
            }
            MeasureExpr::CountRows { .. }
            | MeasureExpr::Count { .. }
            | MeasureExpr::CountDistinct { .. } => MeasureCategory::Counting,
            MeasureExpr::Sum { .. }
            | MeasureExpr::Average { .. }
            | MeasureExpr::Min { .. }
            | MeasureExpr::Max { .. } => MeasureCategory::Aggregation,
            MeasureExpr::Percentile { .. } | MeasureExpr::Median { .. } => {
                MeasureCategory::Statistical
            }
            _ => MeasureCategory::Calculation,
        }
    }

    pub fn dependencies(&self) -> MeasureDependencies {
        let mut deps = MeasureDependencies::default();
        self.expression.walk(&mut |node| match node {
            MeasureExpr::Measure(name) => {
                deps.measures
                    .insert(normalize_measure_name(name).to_string());
            }
            MeasureExpr::CountRows { table } | MeasureExpr::Window { table, .. } => {
                deps.tables.insert(table.clone());
                if let MeasureExpr::Window {
                    column: Some(column),
                    ..
                } = node
                {
                    deps.columns.insert(ColumnRef::new(table.clone(), column.clone()));
                }
            }
            MeasureExpr::Filtered { filters, .. } => {
                for f in filters {
                    deps.tables.insert(f.column.table.clone());
                    deps.columns.insert(f.column.clone());
                }
            }
            MeasureExpr::UseRelationship { relationship, .. } => {
                deps.relationships.insert(relationship.clone());
            }
            other => {
                if let Some(column) = other.aggregated_column() {
                    deps.tables.insert(column.table.clone());
                    deps.columns.insert(column.clone());
                }
            }
        });
        deps
    }
}

/// Accept `[Measure]` as well as `Measure`.
pub(crate) fn normalize_measure_name(name: &str) -> &str {
    let trimmed = name.trim();
    trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(trimmed)
}

/// Validated measure definitions, acyclic by construction.
#[derive(Clone, Debug, Default)]
pub struct MeasureRegistry {
    measures: BTreeMap<String, Measure>,
    /// Dependencies before dependents.
    order: Vec<String>,
}

impl MeasureRegistry {
    pub fn build(
        measures: impl IntoIterator<Item = Measure>,
        schema: &SchemaRegistry,
    ) -> EngineResult<Self> {
        let mut by_name = BTreeMap::new();
        for measure in measures {
            let name = normalize_measure_name(&measure.name).to_string();
            if by_name.contains_key(&name) {
                return Err(EngineError::DuplicateMeasure(name));
            }
            by_name.insert(name, measure);
        }

        let relationships: HashSet<&RelationshipId> = schema
            .facts()
            .flat_map(|f| f.foreign_keys().iter().map(|fk| &fk.name))
            .collect();
        for (name, measure) in &by_name {
            validate_expr(name, &measure.expression, schema, &relationships)?;
            for dep in measure.dependencies().measures {
                if !by_name.contains_key(&dep) {
                    return Err(EngineError::UnknownMeasure(dep));
                }
            }
        }

        let order = dependency_order(&by_name)?;
        log::debug!("registered {} measures", by_name.len());
        Ok(Self {
            measures: by_name,
            order,
        })
    }

    pub fn get(&self, name: &str) -> EngineResult<&Measure> {
        self.measures
            .get(normalize_measure_name(name))
            .ok_or_else(|| EngineError::UnknownMeasure(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.measures.contains_key(normalize_measure_name(name))
    }

    pub fn len(&self) -> usize {
        self.measures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measures.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Measure> {
        self.measures.values()
    }

    /// Measure names with every dependency listed before its dependents.
    pub fn dependency_order(&self) -> &[String] {
        &self.order
    }

    /// Follow measure references until the first scanned table.
    pub(crate) fn primary_table<'a>(&'a self, expr: &'a MeasureExpr) -> Option<&'a str> {
        let mut seen = HashSet::new();
        self.primary_table_inner(expr, &mut seen)
    }

    fn primary_table_inner<'a>(
        &'a self,
        expr: &'a MeasureExpr,
        seen: &mut HashSet<&'a str>,
    ) -> Option<&'a str> {
        if let Some(table) = expr.scanned_table() {
            return Some(table);
        }
        if let MeasureExpr::Measure(name) = expr {
            let measure = self.measures.get(normalize_measure_name(name))?;
            if !seen.insert(measure.name.as_str()) {
                return None;
            }
            return self.primary_table_inner(&measure.expression, seen);
        }
        expr.children()
            .into_iter()
            .find_map(|child| self.primary_table_inner(child, seen))
    }

    /// Denominator of the ratio `expr` evaluates, kept inside the filters, windows and
    /// relationship selections wrapped around the ratio. `None` when `expr` is not a ratio.
    pub(crate) fn ratio_denominator(&self, expr: &MeasureExpr) -> Option<MeasureExpr> {
        let mut seen = HashSet::new();
        self.ratio_denominator_inner(expr, &mut seen)
    }

    fn ratio_denominator_inner<'a>(
        &'a self,
        expr: &'a MeasureExpr,
        seen: &mut HashSet<&'a str>,
    ) -> Option<MeasureExpr> {
        match expr {
            MeasureExpr::Ratio { denominator, .. } => Some(denominator.as_ref().clone()),
            MeasureExpr::Measure(name) => {
                let measure = self.measures.get(normalize_measure_name(name))?;
                if !seen.insert(measure.name.as_str()) {
                    return None;
                }
                self.ratio_denominator_inner(&measure.expression, seen)
            }
            MeasureExpr::Filtered { base, filters } => self
                .ratio_denominator_inner(base, seen)
                .map(|inner| MeasureExpr::filtered(inner, filters.clone())),
            MeasureExpr::UseRelationship { relationship, base } => self
                .ratio_denominator_inner(base, seen)
                .map(|inner| MeasureExpr::use_relationship(relationship.clone(), inner)),
            MeasureExpr::Window {
                base,
                table,
                column,
                days,
                offset_days,
            } => self
                .ratio_denominator_inner(base, seen)
                .map(|inner| MeasureExpr::Window {
                    base: Box::new(inner),
                    table: table.clone(),
                    column: column.clone(),
                    days: *days,
                    offset_days: *offset_days,
                }),
            _ => None,
        }
    }
}

fn invalid(measure: &str, reason: impl Into<String>) -> EngineError {
    EngineError::InvalidMeasure {
        measure: measure.to_string(),
        reason: reason.into(),
    }
}

fn validate_expr(
    measure: &str,
    expr: &MeasureExpr,
    schema: &SchemaRegistry,
    relationships: &HashSet<&RelationshipId>,
) -> EngineResult<()> {
    let check_column = |column: &ColumnRef| -> EngineResult<ColumnType> {
        if schema.table(&column.table).is_none() {
            return Err(invalid(measure, format!("unknown table {}", column.table)));
        }
        schema
            .column(&column.table, &column.column)
            .map(|c| c.column_type)
            .ok_or_else(|| invalid(measure, format!("unknown column {column}")))
    };

    match expr {
        MeasureExpr::CountRows { table } => {
            if schema.table(table).is_none() {
                return Err(invalid(measure, format!("unknown table {table}")));
            }
        }
        MeasureExpr::Sum { column } | MeasureExpr::Average { column } => {
            if check_column(column)? != ColumnType::Number {
                return Err(invalid(measure, format!("{column} is not a number column")));
            }
        }
        MeasureExpr::Percentile { column, fraction } => {
            check_column(column)?;
            if !(0.0..=1.0).contains(fraction) {
                return Err(invalid(
                    measure,
                    format!("percentile fraction {fraction} is outside [0, 1]"),
                ));
            }
        }
        MeasureExpr::Filtered { filters, .. } => {
            for f in filters {
                check_column(&f.column)?;
            }
        }
        MeasureExpr::Literal(v) if !v.is_finite() => {
            return Err(invalid(measure, "literal must be finite"));
        }
        MeasureExpr::Window { table, column, .. } => {
            let Some(schema_table) = schema.table(table) else {
                return Err(invalid(measure, format!("unknown table {table}")));
            };
            let column = match column {
                Some(column) => column.as_str(),
                None => schema_table.anchor_column().ok_or_else(|| {
                    invalid(measure, format!("{table} declares no anchor column"))
                })?,
            };
            if check_column(&ColumnRef::new(table.clone(), column))? != ColumnType::Date {
                return Err(invalid(measure, format!("{table}[{column}] is not a date column")));
            }
        }
        MeasureExpr::UseRelationship { relationship, .. } => {
            if !relationships.contains(relationship) {
                return Err(EngineError::UnknownRelationship(relationship.to_string()));
            }
        }
        other => {
            if let Some(column) = other.aggregated_column() {
                check_column(column)?;
            }
        }
    }

    for child in expr.children() {
        validate_expr(measure, child, schema, relationships)?;
    }
    Ok(())
}

fn dependency_order(measures: &BTreeMap<String, Measure>) -> EngineResult<Vec<String>> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let nodes: HashMap<&str, NodeIndex> = measures
        .keys()
        .map(|name| (name.as_str(), graph.add_node(name.as_str())))
        .collect();

    // Edge dependency -> dependent.
    for (name, measure) in measures {
        for dep in measure.dependencies().measures {
            if let (Some(&from), Some(&to)) = (nodes.get(dep.as_str()), nodes.get(name.as_str())) {
                graph.add_edge(from, to, ());
            }
        }
    }

    for scc in tarjan_scc(&graph) {
        let is_cycle = scc.len() > 1
            || graph
                .edges_connecting(scc[0], scc[0])
                .next()
                .is_some();
        if is_cycle {
            let mut cycle: Vec<String> = scc.iter().map(|&idx| graph[idx].to_string()).collect();
            cycle.sort();
            if let Some(first) = cycle.first().cloned() {
                cycle.push(first);
            }
            return Err(EngineError::CyclicMeasure { cycle });
        }
    }

    let sorted = toposort(&graph, None).map_err(|cycle| EngineError::CyclicMeasure {
        cycle: vec![graph[cycle.node_id()].to_string()],
    })?;
    Ok(sorted.into_iter().map(|idx| graph[idx].to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Predicate;
    use crate::schema::{ColumnDef, TableSchema};

    fn schema() -> SchemaRegistry {
        let mut schema = SchemaRegistry::new();
        schema
            .register(
                TableSchema::fact(
                    "Survey",
                    vec![ColumnDef::number("CsatScore"), ColumnDef::date("SurveyDate")],
                )
                .with_anchor_column("SurveyDate"),
            )
            .unwrap();
        schema
    }

    fn dsat() -> Measure {
        Measure::new(
            "# DSAT",
            MeasureExpr::filtered(
                MeasureExpr::count("Survey", "CsatScore"),
                vec![ColumnFilter::new(
                    ColumnRef::new("Survey", "CsatScore"),
                    Predicate::at_most(2),
                )],
            ),
        )
    }

    #[test]
    fn rejects_cycles_through_references() {
        let a = Measure::new("A", MeasureExpr::measure("B"));
        let b = Measure::new(
            "B",
            MeasureExpr::ratio(MeasureExpr::measure("[A]"), MeasureExpr::Literal(2.0)),
        );
        let err = MeasureRegistry::build([a, b], &schema()).unwrap_err();
        match err {
            EngineError::CyclicMeasure { cycle } => assert_eq!(cycle, vec!["A", "B", "A"]),
            other => panic!("expected cycle, got {other:?}"),
        }

        let selfish = Measure::new("S", MeasureExpr::measure("S"));
        assert!(matches!(
            MeasureRegistry::build([selfish], &schema()),
            Err(EngineError::CyclicMeasure { .. })
        ));
    }

    #[test]
    fn rejects_unknown_references_and_columns() {
        let m = Measure::new("M", MeasureExpr::measure("Nope"));
        assert!(matches!(
            MeasureRegistry::build([m], &schema()),
            Err(EngineError::UnknownMeasure(name)) if name == "Nope"
        ));

        let m = Measure::new("M", MeasureExpr::sum("Survey", "Missing"));
        assert!(matches!(
            MeasureRegistry::build([m], &schema()),
            Err(EngineError::InvalidMeasure { .. })
        ));

        let m = Measure::new("M", MeasureExpr::percentile("Survey", "CsatScore", 1.5));
        assert!(matches!(
            MeasureRegistry::build([m], &schema()),
            Err(EngineError::InvalidMeasure { .. })
        ));
    }

    #[test]
    fn dependency_order_lists_dependencies_first() {
        let responses = Measure::new(
            "# CSAT Response",
            MeasureExpr::count("Survey", "CsatScore"),
        );
        let pct = Measure::new(
            "% DSAT",
            MeasureExpr::ratio(
                MeasureExpr::measure("# DSAT"),
                MeasureExpr::measure("# CSAT Response"),
            ),
        );
        let registry = MeasureRegistry::build([pct, responses, dsat()], &schema()).unwrap();
        let order = registry.dependency_order();
        let pos = |n: &str| order.iter().position(|m| m == n).unwrap();
        assert!(pos("# DSAT") < pos("% DSAT"));
        assert!(pos("# CSAT Response") < pos("% DSAT"));
        assert_eq!(registry.get("[% DSAT]").unwrap().kind(), MeasureKind::Ratio);
    }

    #[test]
    fn ratio_denominator_follows_references_and_wrappers() {
        let responses = Measure::new(
            "# CSAT Response",
            MeasureExpr::count("Survey", "CsatScore"),
        );
        let pct = Measure::new(
            "% DSAT",
            MeasureExpr::ratio(
                MeasureExpr::measure("# DSAT"),
                MeasureExpr::measure("# CSAT Response"),
            ),
        );
        let registry = MeasureRegistry::build([pct, responses, dsat()], &schema()).unwrap();

        assert_eq!(
            registry.ratio_denominator(&MeasureExpr::measure("% DSAT")),
            Some(MeasureExpr::measure("# CSAT Response"))
        );
        let recent = MeasureExpr::window(MeasureExpr::measure("% DSAT"), "Survey", 7);
        assert_eq!(
            registry.ratio_denominator(&recent),
            Some(MeasureExpr::window(
                MeasureExpr::measure("# CSAT Response"),
                "Survey",
                7
            ))
        );
        assert_eq!(registry.ratio_denominator(&MeasureExpr::measure("# DSAT")), None);
    }

    #[test]
    fn classifies_measures() {
        assert_eq!(dsat().category(), MeasureCategory::Filtered);
        assert_eq!(dsat().kind(), MeasureKind::Count);
        let recent = Measure::new(
            "Recent",
            MeasureExpr::window(MeasureExpr::count_rows("Survey"), "Survey", 30),
        );
        assert_eq!(recent.category(), MeasureCategory::TimeIntelligence);
        let median = Measure::new(
            "Median",
            MeasureExpr::Median {
                column: ColumnRef::new("Survey", "CsatScore"),
            },
        );
        assert_eq!(median.category(), MeasureCategory::Statistical);
        assert_eq!(median.kind(), MeasureKind::Percentile);

        let deps = dsat().dependencies();
        assert_eq!(deps.columns.len(), 1);
        assert!(deps.tables.contains("Survey"));
    }

    #[test]
    fn expressions_deserialize_from_json() {
        let json = r##"{
            "ratio": {
                "numerator": {"measure": "# DSAT"},
                "denominator": {"count": {"column": "Survey[CsatScore]"}}
            }
        }"##;
        let expr: MeasureExpr = serde_json::from_str(json).unwrap();
        assert_eq!(
            expr,
            MeasureExpr::ratio(
                MeasureExpr::measure("# DSAT"),
                MeasureExpr::count("Survey", "CsatScore"),
            )
        );
    }
}
