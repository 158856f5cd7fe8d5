//! Measure evaluation and root-cause drill-down over read-only star-schema models.
mod anchor;
mod backend;
mod cancel;
mod definition;
mod drill;
mod engine;
mod error;
mod filter;
mod grouped;
mod integrity;
mod measure;
mod model;
mod relationship;
mod schema;
mod store;
mod value;

pub use crate::anchor::{AnchorProfile, AnchorResolver, DateWindow, RECENT_WINDOWS};
pub use crate::backend::{Table, TableBackend};
pub use crate::cancel::CancelToken;
pub use crate::definition::{DimensionDef, FactDef, ModelDefinition, RelationshipDef, TableDef};
pub use crate::drill::{Deviation, DrillConfig, DrillOutcome, DrillPath, DrillStep, Termination};
pub use crate::engine::{percentile_position, ratio, Evaluator};
pub use crate::error::{EngineError, EngineResult, SchemaError};
pub use crate::filter::{ColumnFilter, ColumnRef, FilterContext, Predicate, RangeBound};
pub use crate::grouped::GroupedResult;
pub use crate::integrity::{IntegrityChecker, IntegrityReport, IntegrityThresholds, Severity};
pub use crate::measure::{
    Measure, MeasureCategory, MeasureDependencies, MeasureExpr, MeasureKind, MeasureRegistry,
};
pub use crate::model::{
    DataModel, DimensionSummary, FactSummary, MeasureSummary, ModelBuilder, ModelSummary,
};
pub use crate::relationship::{AmbiguousPair, Relationship, RelationshipGraph, RelationshipId};
pub use crate::schema::{ColumnDef, ColumnType, ForeignKey, SchemaRegistry, TableKind, TableSchema};
pub use crate::store::ModelStore;
pub use crate::value::Value;
