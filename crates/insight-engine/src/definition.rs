//! JSON model definitions.
//!
//! A definition declares dimensions, facts, named relationships and measures. Table data is
//! either inline (`rows`) or supplied by the host through a loader, typically from the `source`
//! path of each table.
use crate::backend::{Table, TableBackend};
use crate::error::{EngineError, EngineResult, SchemaError};
use crate::integrity::IntegrityThresholds;
use crate::measure::Measure;
use crate::model::{DataModel, ModelBuilder};
use crate::relationship::RelationshipId;
use crate::schema::{ColumnDef, ForeignKey, TableSchema};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDefinition {
    #[serde(default)]
    pub dimensions: Vec<DimensionDef>,
    #[serde(default)]
    pub facts: Vec<FactDef>,
    #[serde(default)]
    pub relationships: Vec<RelationshipDef>,
    #[serde(default)]
    pub measures: Vec<Measure>,
    #[serde(default)]
    pub integrity: IntegrityThresholds,
}

/// Columns and data shared by dimension and fact declarations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Where the host should load the data from. Relative paths are relative to the definition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    /// Inline data, one array per row in column declaration order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Vec<Value>>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DimensionDef {
    #[serde(flatten)]
    pub table: TableDef,
    pub primary_key: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FactDef {
    #[serde(flatten)]
    pub table: TableDef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_column: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelationshipDef {
    pub name: RelationshipId,
    pub fact: String,
    pub column: String,
    pub dimension: String,
    pub dimension_column: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl TableDef {
    /// Build the table from inline rows, coercing each cell to its column type.
    pub fn inline_table(&self) -> Result<Option<Table>, SchemaError> {
        let Some(rows) = &self.rows else {
            return Ok(None);
        };
        let mut table = Table::new(self.name.clone(), self.column_names());
        for (row_idx, row) in rows.iter().enumerate() {
            if row.len() != self.columns.len() {
                return Err(SchemaError::SchemaMismatch {
                    table: self.name.clone(),
                    expected: self.columns.len(),
                    actual: row.len(),
                });
            }
            let coerced = self
                .columns
                .iter()
                .zip(row)
                .map(|(column, value)| {
                    column
                        .column_type
                        .coerce(value.clone())
                        .ok_or_else(|| SchemaError::TypeMismatch {
                            table: self.name.clone(),
                            column: column.name.clone(),
                            expected: column.column_type,
                            actual: value.type_name(),
                            row: row_idx,
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            table.push_row(coerced)?;
        }
        Ok(Some(table))
    }

    /// Build the table from text records (CSV and similar) whose columns are named by `header`.
    /// Header columns that are not declared are skipped; declared columns missing from the header
    /// are an error.
    pub fn table_from_text_rows<R, S>(
        &self,
        header: &[String],
        records: impl IntoIterator<Item = R>,
    ) -> Result<Table, SchemaError>
    where
        R: AsRef<[S]>,
        S: AsRef<str>,
    {
        let positions = self
            .columns
            .iter()
            .map(|column| {
                header
                    .iter()
                    .position(|h| h.trim() == column.name)
                    .ok_or_else(|| SchemaError::ColumnMismatch {
                        table: self.name.clone(),
                        expected: self.column_names(),
                        actual: header.to_vec(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut table = Table::new(self.name.clone(), self.column_names());
        for (row_idx, record) in records.into_iter().enumerate() {
            let record = record.as_ref();
            let mut row = Vec::with_capacity(self.columns.len());
            for (column, &pos) in self.columns.iter().zip(&positions) {
                let raw = record.get(pos).map(|s| s.as_ref()).unwrap_or("");
                let value = column.column_type.parse_text(raw).ok_or_else(|| {
                    SchemaError::TypeMismatch {
                        table: self.name.clone(),
                        column: column.name.clone(),
                        expected: column.column_type,
                        actual: "Text",
                        row: row_idx,
                    }
                })?;
                row.push(value);
            }
            table.push_row(row)?;
        }
        Ok(table)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

impl ModelDefinition {
    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        serde_json::from_str(json).map_err(|err| EngineError::InvalidDefinition(err.to_string()))
    }

    pub fn from_reader(reader: impl Read) -> EngineResult<Self> {
        serde_json::from_reader(reader)
            .map_err(|err| EngineError::InvalidDefinition(err.to_string()))
    }

    /// Every table declaration, dimensions first.
    pub fn tables(&self) -> impl Iterator<Item = &TableDef> {
        self.dimensions
            .iter()
            .map(|d| &d.table)
            .chain(self.facts.iter().map(|f| &f.table))
    }

    /// Build a model whose tables all carry inline rows.
    pub fn build_inline(&self) -> EngineResult<DataModel> {
        self.build_with(|table| {
            let data = table
                .inline_table()?
                .ok_or_else(|| SchemaError::MissingTableData(table.name.clone()))?;
            Ok::<_, EngineError>(Arc::new(data) as Arc<dyn TableBackend>)
        })
    }

    /// Build a model, asking `load` for the data of every table without inline rows.
    pub fn build_with<E>(
        &self,
        mut load: impl FnMut(&TableDef) -> Result<Arc<dyn TableBackend>, E>,
    ) -> Result<DataModel, E>
    where
        E: From<EngineError>,
    {
        let mut builder = ModelBuilder::new().with_integrity_thresholds(self.integrity);

        let mut data_for = |table: &TableDef| -> Result<Arc<dyn TableBackend>, E> {
            match table.inline_table().map_err(EngineError::from)? {
                Some(inline) => Ok(Arc::new(inline)),
                None => load(table),
            }
        };

        for dim in &self.dimensions {
            let schema = TableSchema::dimension(
                dim.table.name.clone(),
                dim.table.columns.clone(),
                dim.primary_key.clone(),
            );
            builder.add_shared_table(schema, data_for(&dim.table)?)?;
        }

        for fact in &self.facts {
            let mut schema = TableSchema::fact(fact.table.name.clone(), fact.table.columns.clone());
            if let Some(anchor) = &fact.anchor_column {
                schema = schema.with_anchor_column(anchor.clone());
            }
            for rel in self.relationships.iter().filter(|r| r.fact == fact.table.name) {
                let mut fk = ForeignKey::new(
                    rel.name.clone(),
                    rel.column.clone(),
                    rel.dimension.clone(),
                    rel.dimension_column.clone(),
                );
                if !rel.active {
                    fk = fk.inactive();
                }
                schema = schema.with_foreign_key(fk);
            }
            builder.add_shared_table(schema, data_for(&fact.table)?)?;
        }

        for rel in &self.relationships {
            if !self.facts.iter().any(|f| f.table.name == rel.fact) {
                return Err(EngineError::from(SchemaError::UnknownTable(rel.fact.clone())).into());
            }
        }

        for measure in &self.measures {
            builder.add_measure(measure.clone())?;
        }

        Ok(builder.build()?)
    }
}
