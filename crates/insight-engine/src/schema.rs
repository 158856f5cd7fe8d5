//! Schema registry: table and column declarations for dimensions and facts.
//!
//! The registry only checks declarations against each other (names, key columns, anchor
//! columns). Checks that need the data itself (uniqueness, nullability, cell types) run when a
//! [`crate::ModelBuilder`] pairs each schema with its table data.
use crate::error::SchemaError;
use crate::relationship::RelationshipId;
use crate::value::Value;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// Surrogate or natural join key. Integral numbers or text.
    Key,
    Text,
    Date,
    /// Numeric measure input.
    Number,
}

impl ColumnType {
    /// Whether `value` can be stored in a column of this type. Blank is always accepted here;
    /// nullability is checked separately.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Blank) => true,
            (ColumnType::Key, Value::Number(n)) => n.fract() == 0.0,
            (ColumnType::Key, Value::Text(_)) => true,
            (ColumnType::Text, Value::Text(_)) => true,
            (ColumnType::Date, Value::Date(_)) => true,
            (ColumnType::Number, Value::Number(_)) => true,
            _ => false,
        }
    }

    /// Convert a loosely typed value (JSON, CSV) into this column's representation.
    pub fn coerce(self, value: Value) -> Option<Value> {
        match (self, value) {
            (ColumnType::Date, Value::Text(s)) => parse_date(&s).map(Value::Date),
            (ColumnType::Text, Value::Number(n)) => Some(Value::from(Value::Number(n).to_string())),
            (ColumnType::Number, Value::Boolean(b)) => Some(Value::from(if b { 1 } else { 0 })),
            (ty, value) => ty.accepts(&value).then_some(value),
        }
    }

    /// Parse a raw text cell. Empty cells are blank.
    pub fn parse_text(self, raw: &str) -> Option<Value> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Some(Value::Blank);
        }
        match self {
            ColumnType::Text => Some(Value::from(raw)),
            ColumnType::Date => parse_date(raw).map(Value::Date),
            ColumnType::Number => raw.parse::<f64>().ok().map(Value::number),
            ColumnType::Key => Some(match raw.parse::<i64>() {
                Ok(n) => Value::from(n),
                Err(_) => Value::from(raw),
            }),
        }
    }

    /// Whether a relationship may join a column of this type to a column of `other`.
    ///
    /// Key cells that look like integers load as numbers, so a key column never joins a text
    /// column: `"1"` would be `Number(1)` on one side and `Text("1")` on the other.
    pub fn joins_with(self, other: ColumnType) -> bool {
        use ColumnType::*;
        matches!(
            (self, other),
            (Key, Key)
                | (Key, Number)
                | (Number, Key)
                | (Number, Number)
                | (Text, Text)
                | (Date, Date)
        )
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    // Accept datetime-ish exports ("2024-05-01T00:00:00") by keeping the date prefix.
    let date_part = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub unique: bool,
}

fn default_true() -> bool {
    true
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            unique: false,
        }
    }

    pub fn key(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Key)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Text)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Date)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Number)
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A fact column joining many-to-one into a dimension column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Relationship name; must be unique across the model.
    pub name: RelationshipId,
    pub column: String,
    pub dimension: String,
    pub dimension_column: String,
    /// Declared default edge. Only informational when the (fact, dimension) pair has more than
    /// one edge: ambiguous pairs always need an explicit selection.
    #[serde(default = "default_true")]
    pub active: bool,
}

impl ForeignKey {
    pub fn new(
        name: impl Into<RelationshipId>,
        column: impl Into<String>,
        dimension: impl Into<String>,
        dimension_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            dimension: dimension.into(),
            dimension_column: dimension_column.into(),
            active: true,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TableKind {
    Dimension {
        primary_key: String,
    },
    Fact {
        foreign_keys: Vec<ForeignKey>,
        anchor_column: Option<String>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct TableSchema {
    name: String,
    columns: Vec<ColumnDef>,
    kind: TableKind,
}

impl TableSchema {
    /// Declare a dimension. The primary key column is forced unique and non-null.
    pub fn dimension(
        name: impl Into<String>,
        columns: Vec<ColumnDef>,
        primary_key: impl Into<String>,
    ) -> Self {
        let primary_key = primary_key.into();
        let columns = columns
            .into_iter()
            .map(|c| {
                if c.name == primary_key {
                    c.not_null().unique()
                } else {
                    c
                }
            })
            .collect();
        Self {
            name: name.into(),
            columns,
            kind: TableKind::Dimension { primary_key },
        }
    }

    pub fn fact(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            columns,
            kind: TableKind::Fact {
                foreign_keys: Vec::new(),
                anchor_column: None,
            },
        }
    }

    /// Add a foreign key. No-op on dimensions; snowflaked dimensions are not modelled.
    pub fn with_foreign_key(mut self, foreign_key: ForeignKey) -> Self {
        if let TableKind::Fact { foreign_keys, .. } = &mut self.kind {
            foreign_keys.push(foreign_key);
        }
        self
    }

    pub fn with_anchor_column(mut self, column: impl Into<String>) -> Self {
        if let TableKind::Fact { anchor_column, .. } = &mut self.kind {
            *anchor_column = Some(column.into());
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn kind(&self) -> &TableKind {
        &self.kind
    }

    pub fn is_fact(&self) -> bool {
        matches!(self.kind, TableKind::Fact { .. })
    }

    pub fn is_dimension(&self) -> bool {
        matches!(self.kind, TableKind::Dimension { .. })
    }

    pub fn column(&self, name: &str) -> Option<(usize, &ColumnDef)> {
        self.columns.iter().enumerate().find(|(_, c)| c.name == name)
    }

    pub fn primary_key(&self) -> Option<&str> {
        match &self.kind {
            TableKind::Dimension { primary_key } => Some(primary_key),
            TableKind::Fact { .. } => None,
        }
    }

    pub fn foreign_keys(&self) -> &[ForeignKey] {
        match &self.kind {
            TableKind::Fact { foreign_keys, .. } => foreign_keys,
            TableKind::Dimension { .. } => &[],
        }
    }

    pub fn anchor_column(&self) -> Option<&str> {
        match &self.kind {
            TableKind::Fact { anchor_column, .. } => anchor_column.as_deref(),
            TableKind::Dimension { .. } => None,
        }
    }

    fn unknown_column(&self, column: &str) -> SchemaError {
        SchemaError::UnknownColumn {
            table: self.name.clone(),
            column: column.to_string(),
        }
    }

    /// Checks that only need this table's own declaration.
    fn validate_local(&self) -> Result<(), SchemaError> {
        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(SchemaError::DuplicateColumn {
                    table: self.name.clone(),
                    column: column.name.clone(),
                });
            }
        }

        match &self.kind {
            TableKind::Dimension { primary_key } => {
                if self.column(primary_key).is_none() {
                    return Err(SchemaError::MissingPrimaryKey {
                        table: self.name.clone(),
                        column: primary_key.clone(),
                    });
                }
            }
            TableKind::Fact {
                foreign_keys,
                anchor_column,
            } => {
                for fk in foreign_keys {
                    if self.column(&fk.column).is_none() {
                        return Err(self.unknown_column(&fk.column));
                    }
                }
                if let Some(anchor) = anchor_column {
                    let (_, def) = self.column(anchor).ok_or_else(|| self.unknown_column(anchor))?;
                    if def.column_type != ColumnType::Date {
                        return Err(SchemaError::AnchorNotDate {
                            table: self.name.clone(),
                            column: anchor.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// All table declarations of a model, keyed by table name.
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    tables: BTreeMap<String, TableSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: TableSchema) -> Result<(), SchemaError> {
        if self.tables.contains_key(schema.name()) {
            return Err(SchemaError::DuplicateTable {
                table: schema.name().to_string(),
            });
        }
        schema.validate_local()?;
        self.tables.insert(schema.name().to_string(), schema);
        Ok(())
    }

    /// Cross-table checks: every foreign key names a registered dimension column with a
    /// compatible type, and relationship names are unique.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut names = HashSet::new();
        for fact in self.facts() {
            for fk in fact.foreign_keys() {
                if !names.insert(fk.name.clone()) {
                    return Err(SchemaError::DuplicateRelationship(fk.name.to_string()));
                }
                let dimension = self
                    .tables
                    .get(&fk.dimension)
                    .ok_or_else(|| SchemaError::UnknownTable(fk.dimension.clone()))?;
                if !dimension.is_dimension() {
                    return Err(SchemaError::NotADimension {
                        relationship: fk.name.to_string(),
                        table: fk.dimension.clone(),
                    });
                }
                let (_, target) = dimension
                    .column(&fk.dimension_column)
                    .ok_or_else(|| dimension.unknown_column(&fk.dimension_column))?;
                if !target.unique || target.nullable {
                    return Err(SchemaError::JoinTargetNotUnique {
                        relationship: fk.name.to_string(),
                        table: fk.dimension.clone(),
                        column: fk.dimension_column.clone(),
                    });
                }
                let (_, source) = fact
                    .column(&fk.column)
                    .ok_or_else(|| fact.unknown_column(&fk.column))?;
                if !source.column_type.joins_with(target.column_type) {
                    return Err(SchemaError::RelationshipJoinColumnTypeMismatch {
                        relationship: fk.name.to_string(),
                        fact: fact.name().to_string(),
                        fact_column: fk.column.clone(),
                        fact_type: source.column_type,
                        dimension: fk.dimension.clone(),
                        dimension_column: fk.dimension_column.clone(),
                        dimension_type: target.column_type,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    pub fn facts(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values().filter(|t| t.is_fact())
    }

    pub fn dimensions(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values().filter(|t| t.is_dimension())
    }

    pub fn column(&self, table: &str, column: &str) -> Option<&ColumnDef> {
        self.tables.get(table)?.column(column).map(|(_, c)| c)
    }
}
