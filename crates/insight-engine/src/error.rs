use crate::schema::ColumnType;
use crate::value::Value;

pub type EngineResult<T> = Result<T, EngineError>;

/// Load-time structural errors. Any of these blocks the model from loading.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("duplicate table: {table}")]
    DuplicateTable { table: String },

    #[error("duplicate column {table}[{column}]")]
    DuplicateColumn { table: String, column: String },

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("unknown column {table}[{column}]")]
    UnknownColumn { table: String, column: String },

    #[error("dimension {table} declares primary key {column}, which is not one of its columns")]
    MissingPrimaryKey { table: String, column: String },

    #[error("{table}[{column}] is declared unique but {value} appears more than once")]
    NonUniqueColumn {
        table: String,
        column: String,
        value: Value,
    },

    #[error("{table}[{column}] is declared non-null but row {row} is blank")]
    NullInNonNullable {
        table: String,
        column: String,
        row: usize,
    },

    #[error("{table}[{column}] expects {expected:?} values, row {row} holds a {actual}")]
    TypeMismatch {
        table: String,
        column: String,
        expected: ColumnType,
        actual: &'static str,
        row: usize,
    },

    #[error("column mismatch for {table}: declared {expected:?}, data provides {actual:?}")]
    ColumnMismatch {
        table: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("schema mismatch for {table}: expected {expected} values, got {actual}")]
    SchemaMismatch {
        table: String,
        expected: usize,
        actual: usize,
    },

    #[error("missing data for table {0}")]
    MissingTableData(String),

    #[error("duplicate relationship: {0}")]
    DuplicateRelationship(String),

    #[error("relationship {relationship} targets {table}, which is not a dimension")]
    NotADimension { relationship: String, table: String },

    #[error(
        "relationship {relationship} joins to {table}[{column}], which must be declared unique and non-null"
    )]
    JoinTargetNotUnique {
        relationship: String,
        table: String,
        column: String,
    },

    #[error(
        "relationship {relationship} join columns have incompatible types: {fact}[{fact_column}] ({fact_type:?}) vs {dimension}[{dimension_column}] ({dimension_type:?})"
    )]
    RelationshipJoinColumnTypeMismatch {
        relationship: String,
        fact: String,
        fact_column: String,
        fact_type: ColumnType,
        dimension: String,
        dimension_column: String,
        dimension_type: ColumnType,
    },

    #[error("anchor column {table}[{column}] must be a date column")]
    AnchorNotDate { table: String, column: String },
}

/// Query- and registration-time errors.
///
/// Data sparsity (no anchor inside a window measure, empty row sets, zero denominators) is not
/// an error: it is reported as [`Value::Blank`]. [`EngineError::NoAnchor`] only surfaces from
/// direct anchor lookups so callers can pick their own fallback window.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(
        "ambiguous join from {fact} to {dimension}; select one of: {}",
        .candidates.join(", ")
    )]
    AmbiguousJoin {
        fact: String,
        dimension: String,
        candidates: Vec<String>,
    },

    #[error("no relationship from {fact} to {dimension}")]
    NoRelationship { fact: String, dimension: String },

    #[error("unknown relationship: {0}")]
    UnknownRelationship(String),

    #[error("relationship {relationship} does not join {fact} to {dimension}")]
    RelationshipMismatch {
        relationship: String,
        fact: String,
        dimension: String,
    },

    #[error("unknown measure: {0}")]
    UnknownMeasure(String),

    #[error("duplicate measure: {0}")]
    DuplicateMeasure(String),

    #[error("cyclic measure definition: {}", .cycle.join(" -> "))]
    CyclicMeasure { cycle: Vec<String> },

    #[error("invalid measure {measure}: {reason}")]
    InvalidMeasure { measure: String, reason: String },

    #[error("no anchor date: {table}[{column}] has no non-blank values")]
    NoAnchor { table: String, column: String },

    #[error("{table} declares no anchor column")]
    NoAnchorColumn { table: String },

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("unknown column {table}[{column}]")]
    UnknownColumn { table: String, column: String },

    #[error("invalid model definition: {0}")]
    InvalidDefinition(String),

    #[error("evaluation cancelled")]
    Cancelled,
}
