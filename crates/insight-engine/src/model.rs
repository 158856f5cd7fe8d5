use crate::anchor::{AnchorProfile, AnchorResolver};
use crate::backend::TableBackend;
use crate::cancel::CancelToken;
use crate::drill::{drill, Deviation, DrillConfig, DrillOutcome, DrillPath};
use crate::engine::Evaluator;
use crate::error::{EngineError, EngineResult, SchemaError};
use crate::filter::{ColumnRef, FilterContext};
use crate::grouped::{evaluate_grouped, GroupedResult};
use crate::integrity::{IntegrityChecker, IntegrityReport, IntegrityThresholds};
use crate::measure::{Measure, MeasureCategory, MeasureKind, MeasureRegistry};
use crate::relationship::{AmbiguousPair, Relationship, RelationshipGraph, RelationshipId};
use crate::schema::{SchemaRegistry, TableSchema};
use crate::value::Value;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Collects table declarations, their data and measure definitions, and validates them into an
/// immutable [`DataModel`].
#[derive(Default)]
pub struct ModelBuilder {
    schema: SchemaRegistry,
    tables: HashMap<String, Arc<dyn TableBackend>>,
    measures: Vec<Measure>,
    thresholds: IntegrityThresholds,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(
        &mut self,
        schema: TableSchema,
        data: impl TableBackend + 'static,
    ) -> EngineResult<()> {
        self.add_shared_table(schema, Arc::new(data))
    }

    pub fn add_shared_table(
        &mut self,
        schema: TableSchema,
        data: Arc<dyn TableBackend>,
    ) -> EngineResult<()> {
        let name = schema.name().to_string();
        self.schema.register(schema)?;
        self.tables.insert(name, data);
        Ok(())
    }

    pub fn add_measure(&mut self, measure: Measure) -> EngineResult<()> {
        if self.measures.iter().any(|m| m.name == measure.name) {
            return Err(EngineError::DuplicateMeasure(measure.name));
        }
        self.measures.push(measure);
        Ok(())
    }

    pub fn with_integrity_thresholds(mut self, thresholds: IntegrityThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn set_integrity_thresholds(&mut self, thresholds: IntegrityThresholds) {
        self.thresholds = thresholds;
    }

    /// Validate everything and build the snapshot. Any structural problem (declarations that
    /// disagree with each other or with the data, ambiguous or cyclic measures) fails the load.
    pub fn build(self) -> EngineResult<DataModel> {
        let ModelBuilder {
            schema,
            tables,
            measures,
            thresholds,
        } = self;

        schema.validate()?;
        for table in schema.tables() {
            let data = tables
                .get(table.name())
                .ok_or_else(|| SchemaError::MissingTableData(table.name().to_string()))?;
            validate_table_data(table, data.as_ref())?;
        }

        let graph = RelationshipGraph::build(&schema, &tables)?;
        let measures = MeasureRegistry::build(measures, &schema)?;
        let anchors = AnchorResolver::build(&schema, &tables)?;

        let mut model = DataModel {
            schema,
            tables,
            graph,
            measures,
            anchors,
            thresholds,
            load_reports: Vec::new(),
        };

        let cancel = CancelToken::new();
        let facts: Vec<String> = model.schema.facts().map(|f| f.name().to_string()).collect();
        let mut reports = Vec::new();
        for fact in &facts {
            reports.extend(model.check_integrity_with(fact, &cancel)?);
        }
        model.load_reports = reports;

        log::info!(
            "model loaded: {} facts, {} dimensions, {} relationships, {} measures",
            facts.len(),
            model.schema.dimensions().count(),
            model.graph.relationships().count(),
            model.measures.len()
        );
        Ok(model)
    }
}

fn validate_table_data(schema: &TableSchema, data: &dyn TableBackend) -> Result<(), SchemaError> {
    let declared: HashSet<&str> = schema.columns().iter().map(|c| c.name.as_str()).collect();
    let provided: HashSet<&str> = data.columns().iter().map(String::as_str).collect();
    if declared != provided {
        return Err(SchemaError::ColumnMismatch {
            table: schema.name().to_string(),
            expected: schema.column_names(),
            actual: data.columns().to_vec(),
        });
    }

    for column in schema.columns() {
        let idx = data
            .column_index(&column.name)
            .ok_or_else(|| SchemaError::UnknownColumn {
                table: schema.name().to_string(),
                column: column.name.clone(),
            })?;
        let mut seen: HashSet<Value> = HashSet::new();
        for row in 0..data.row_count() {
            let value = data.value_by_idx(row, idx).unwrap_or_default();
            if value.is_blank() {
                if !column.nullable {
                    return Err(SchemaError::NullInNonNullable {
                        table: schema.name().to_string(),
                        column: column.name.clone(),
                        row,
                    });
                }
                continue;
            }
            if !column.column_type.accepts(&value) {
                return Err(SchemaError::TypeMismatch {
                    table: schema.name().to_string(),
                    column: column.name.clone(),
                    expected: column.column_type,
                    actual: value.type_name(),
                    row,
                });
            }
            if column.unique && !seen.insert(value.clone()) {
                return Err(SchemaError::NonUniqueColumn {
                    table: schema.name().to_string(),
                    column: column.name.clone(),
                    value,
                });
            }
        }
    }
    Ok(())
}

/// An immutable, validated star-schema snapshot. Shared by reference between concurrent queries.
pub struct DataModel {
    schema: SchemaRegistry,
    tables: HashMap<String, Arc<dyn TableBackend>>,
    graph: RelationshipGraph,
    measures: MeasureRegistry,
    anchors: AnchorResolver,
    thresholds: IntegrityThresholds,
    load_reports: Vec<IntegrityReport>,
}

impl std::fmt::Debug for DataModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataModel")
            .field("tables", &self.schema.tables().map(TableSchema::name).collect::<Vec<_>>())
            .field("relationships", &self.graph.relationships().count())
            .field("measures", &self.measures.len())
            .finish()
    }
}

impl DataModel {
    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    pub fn graph(&self) -> &RelationshipGraph {
        &self.graph
    }

    pub fn measures(&self) -> &MeasureRegistry {
        &self.measures
    }

    pub fn anchors(&self) -> &AnchorResolver {
        &self.anchors
    }

    pub fn table_data(&self, name: &str) -> EngineResult<&dyn TableBackend> {
        self.tables
            .get(name)
            .map(|t| t.as_ref())
            .ok_or_else(|| EngineError::UnknownTable(name.to_string()))
    }

    pub fn evaluator<'a>(&'a self, cancel: &'a CancelToken) -> Evaluator<'a> {
        Evaluator::new(self, cancel)
    }

    /// Evaluate a registered measure. Sparse data gives [`Value::Blank`].
    pub fn evaluate(&self, measure: &str, ctx: &FilterContext) -> EngineResult<Value> {
        self.evaluate_with(measure, ctx, &CancelToken::new())
    }

    pub fn evaluate_with(
        &self,
        measure: &str,
        ctx: &FilterContext,
        cancel: &CancelToken,
    ) -> EngineResult<Value> {
        self.evaluator(cancel).evaluate(measure, ctx)
    }

    pub fn evaluate_grouped(
        &self,
        measure: &str,
        group_by: &[ColumnRef],
        ctx: &FilterContext,
    ) -> EngineResult<GroupedResult> {
        self.evaluate_grouped_with(measure, group_by, ctx, &CancelToken::new())
    }

    pub fn evaluate_grouped_with(
        &self,
        measure: &str,
        group_by: &[ColumnRef],
        ctx: &FilterContext,
        cancel: &CancelToken,
    ) -> EngineResult<GroupedResult> {
        evaluate_grouped(&self.evaluator(cancel), measure, group_by, ctx)
    }

    pub fn drill(
        &self,
        measure: &str,
        baseline: &FilterContext,
        path: &DrillPath,
        deviation: &Deviation,
        config: &DrillConfig,
    ) -> EngineResult<DrillOutcome> {
        self.drill_with(measure, baseline, path, deviation, config, &CancelToken::new())
    }

    pub fn drill_with(
        &self,
        measure: &str,
        baseline: &FilterContext,
        path: &DrillPath,
        deviation: &Deviation,
        config: &DrillConfig,
        cancel: &CancelToken,
    ) -> EngineResult<DrillOutcome> {
        drill(&self.evaluator(cancel), measure, baseline, path, deviation, config)
    }

    pub fn resolve_join_path(
        &self,
        fact: &str,
        dimension: &str,
        selector: Option<&RelationshipId>,
    ) -> EngineResult<&Relationship> {
        self.graph.resolve_join_path(fact, dimension, selector)
    }

    /// One report per relationship declared on `fact`.
    pub fn check_integrity(&self, fact: &str) -> EngineResult<Vec<IntegrityReport>> {
        self.check_integrity_with(fact, &CancelToken::new())
    }

    pub fn check_integrity_with(
        &self,
        fact: &str,
        cancel: &CancelToken,
    ) -> EngineResult<Vec<IntegrityReport>> {
        self.integrity_checker().check_fact(fact, cancel)
    }

    pub fn check_relationship(
        &self,
        fact: &str,
        relationship: &RelationshipId,
        cancel: &CancelToken,
    ) -> EngineResult<IntegrityReport> {
        self.integrity_checker().check(fact, relationship, cancel)
    }

    /// Reports computed when the model was built.
    pub fn integrity_on_load(&self) -> &[IntegrityReport] {
        &self.load_reports
    }

    fn integrity_checker(&self) -> IntegrityChecker<'_> {
        IntegrityChecker::new(&self.graph, &self.tables, self.thresholds)
    }

    /// Anchor of a fact's declared anchor column.
    pub fn anchor_date(&self, fact: &str) -> EngineResult<NaiveDate> {
        let column = self.declared_anchor_column(fact)?;
        self.anchor_date_for(fact, column)
    }

    /// Latest non-blank date in `table[column]`, or [`EngineError::NoAnchor`].
    pub fn anchor_date_for(&self, table: &str, column: &str) -> EngineResult<NaiveDate> {
        self.anchor_date_with(table, column, &CancelToken::new())
    }

    pub(crate) fn anchor_date_with(
        &self,
        table: &str,
        column: &str,
        cancel: &CancelToken,
    ) -> EngineResult<NaiveDate> {
        let data = self.table_data(table)?;
        self.anchors.anchor(table, column, data, cancel)
    }

    pub fn anchor_profile(&self, table: &str, column: Option<&str>) -> EngineResult<AnchorProfile> {
        let column = match column {
            Some(column) => column,
            None => self.declared_anchor_column(table)?,
        };
        let data = self.table_data(table)?;
        self.anchors
            .profile(table, column, data, &CancelToken::new())
    }

    fn declared_anchor_column(&self, table: &str) -> EngineResult<&str> {
        let schema = self
            .schema
            .table(table)
            .ok_or_else(|| EngineError::UnknownTable(table.to_string()))?;
        schema
            .anchor_column()
            .ok_or_else(|| EngineError::NoAnchorColumn {
                table: table.to_string(),
            })
    }

    /// Summary of the star schema: facts with their joins and anchors, dimensions, measures and
    /// ambiguous pairs.
    pub fn describe(&self) -> ModelSummary {
        let facts = self
            .schema
            .facts()
            .map(|fact| FactSummary {
                name: fact.name().to_string(),
                row_count: self.tables.get(fact.name()).map_or(0, |t| t.row_count()),
                relationships: self
                    .graph
                    .relationships_for_fact(fact.name())
                    .cloned()
                    .collect(),
                dimensions: self
                    .graph
                    .dimensions_of(fact.name())
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                anchor_column: fact.anchor_column().map(str::to_string),
                anchor: fact
                    .anchor_column()
                    .and_then(|c| self.anchor_date_for(fact.name(), c).ok()),
            })
            .collect();
        let dimensions = self
            .schema
            .dimensions()
            .map(|dim| DimensionSummary {
                name: dim.name().to_string(),
                row_count: self.tables.get(dim.name()).map_or(0, |t| t.row_count()),
                primary_key: dim.primary_key().unwrap_or_default().to_string(),
            })
            .collect();
        let measures = self
            .measures
            .iter()
            .map(|m| MeasureSummary {
                name: m.name.clone(),
                kind: m.kind(),
                category: m.category(),
                description: m.description.clone(),
            })
            .collect();

        ModelSummary {
            facts,
            dimensions,
            measures,
            ambiguous: self.graph.ambiguous_pairs(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModelSummary {
    pub facts: Vec<FactSummary>,
    pub dimensions: Vec<DimensionSummary>,
    pub measures: Vec<MeasureSummary>,
    pub ambiguous: Vec<AmbiguousPair>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FactSummary {
    pub name: String,
    pub row_count: usize,
    pub relationships: Vec<Relationship>,
    pub dimensions: Vec<String>,
    pub anchor_column: Option<String>,
    pub anchor: Option<NaiveDate>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DimensionSummary {
    pub name: String,
    pub row_count: usize,
    pub primary_key: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MeasureSummary {
    pub name: String,
    pub kind: MeasureKind,
    pub category: MeasureCategory,
    pub description: Option<String>,
}
