//! Many-to-one relationship graph from facts to dimensions.
//!
//! A fact may reach the same dimension through more than one foreign key (for example a queue
//! dimension joined on both a surrogate key and a natural id). Such (fact, dimension) pairs are
//! *ambiguous*: the graph refuses to pick an edge on its own, because the choice would depend
//! on declaration order and make the same query return different numbers across loads.
//! Queries that touch an ambiguous pair must select the edge explicitly, either with
//! [`crate::FilterContext::with_relationship`] or a `UseRelationship` measure node.
//!
//! Filters only flow from a dimension to the facts that join it. A fact-side filter never
//! reaches another fact through a shared dimension.
use crate::backend::TableBackend;
use crate::error::{EngineError, EngineResult, SchemaError};
use crate::schema::SchemaRegistry;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Name of a declared relationship.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationshipId(String);

impl RelationshipId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelationshipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RelationshipId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RelationshipId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&RelationshipId> for RelationshipId {
    fn from(value: &RelationshipId) -> Self {
        value.clone()
    }
}

/// `fact[fact_column]` → `dimension[dimension_column]`, always many-to-one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Relationship {
    pub id: RelationshipId,
    pub fact: String,
    pub fact_column: String,
    pub dimension: String,
    pub dimension_column: String,
    pub active: bool,
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}[{}] -> {}[{}])",
            self.id, self.fact, self.fact_column, self.dimension, self.dimension_column
        )
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Edge {
    pub(crate) rel: Relationship,
    pub(crate) fact_idx: usize,
    /// Dimension key value → dimension row.
    pub(crate) to_index: HashMap<Value, usize>,
}

impl Edge {
    pub(crate) fn lookup(&self, key: &Value) -> Option<usize> {
        if key.is_blank() {
            return None;
        }
        self.to_index.get(key).copied()
    }
}

/// An ambiguous (fact, dimension) pair and the edges that compete for it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AmbiguousPair {
    pub fact: String,
    pub dimension: String,
    pub candidates: Vec<Relationship>,
}

#[derive(Clone, Debug, Default)]
pub struct RelationshipGraph {
    edges: Vec<Edge>,
    by_id: HashMap<RelationshipId, usize>,
    by_pair: BTreeMap<(String, String), Vec<usize>>,
}

impl RelationshipGraph {
    /// Build the graph from the foreign keys declared on every fact, indexing each join target
    /// column. Target columns must hold unique, non-blank keys.
    pub(crate) fn build(
        schema: &SchemaRegistry,
        tables: &HashMap<String, Arc<dyn TableBackend>>,
    ) -> Result<Self, SchemaError> {
        let mut graph = RelationshipGraph::default();
        for fact in schema.facts() {
            for fk in fact.foreign_keys() {
                let dimension = tables
                    .get(&fk.dimension)
                    .ok_or_else(|| SchemaError::MissingTableData(fk.dimension.clone()))?;
                let fact_data = tables
                    .get(fact.name())
                    .ok_or_else(|| SchemaError::MissingTableData(fact.name().to_string()))?;
                let fact_idx = fact_data.column_index(&fk.column).ok_or_else(|| {
                    SchemaError::UnknownColumn {
                        table: fact.name().to_string(),
                        column: fk.column.clone(),
                    }
                })?;
                let dimension_idx =
                    dimension
                        .column_index(&fk.dimension_column)
                        .ok_or_else(|| SchemaError::UnknownColumn {
                            table: fk.dimension.clone(),
                            column: fk.dimension_column.clone(),
                        })?;

                let mut to_index = HashMap::with_capacity(dimension.row_count());
                for row in 0..dimension.row_count() {
                    let value = dimension
                        .value_by_idx(row, dimension_idx)
                        .unwrap_or(Value::Blank);
                    if value.is_blank() {
                        return Err(SchemaError::NullInNonNullable {
                            table: fk.dimension.clone(),
                            column: fk.dimension_column.clone(),
                            row,
                        });
                    }
                    if to_index.insert(value.clone(), row).is_some() {
                        return Err(SchemaError::NonUniqueColumn {
                            table: fk.dimension.clone(),
                            column: fk.dimension_column.clone(),
                            value,
                        });
                    }
                }

                let idx = graph.edges.len();
                if graph.by_id.insert(fk.name.clone(), idx).is_some() {
                    return Err(SchemaError::DuplicateRelationship(fk.name.to_string()));
                }
                graph
                    .by_pair
                    .entry((fact.name().to_string(), fk.dimension.clone()))
                    .or_default()
                    .push(idx);
                graph.edges.push(Edge {
                    rel: Relationship {
                        id: fk.name.clone(),
                        fact: fact.name().to_string(),
                        fact_column: fk.column.clone(),
                        dimension: fk.dimension.clone(),
                        dimension_column: fk.dimension_column.clone(),
                        active: fk.active,
                    },
                    fact_idx,
                    to_index,
                });
            }
        }

        for pair in graph.ambiguous_pairs() {
            log::info!(
                "{} reaches {} through {} relationships; queries must select one",
                pair.fact,
                pair.dimension,
                pair.candidates.len()
            );
        }
        Ok(graph)
    }

    pub fn relationship(&self, id: &RelationshipId) -> Option<&Relationship> {
        self.by_id.get(id).map(|&idx| &self.edges[idx].rel)
    }

    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.edges.iter().map(|e| &e.rel)
    }

    /// Relationships declared on `fact`, in declaration order.
    pub fn relationships_for_fact<'a>(
        &'a self,
        fact: &'a str,
    ) -> impl Iterator<Item = &'a Relationship> + 'a {
        self.edges
            .iter()
            .map(|e| &e.rel)
            .filter(move |rel| rel.fact == fact)
    }

    pub fn is_ambiguous(&self, fact: &str, dimension: &str) -> bool {
        self.candidates(fact, dimension).len() > 1
    }

    pub fn connects(&self, fact: &str, dimension: &str) -> bool {
        !self.candidates(fact, dimension).is_empty()
    }

    pub fn ambiguous_pairs(&self) -> Vec<AmbiguousPair> {
        self.by_pair
            .iter()
            .filter(|(_, idxs)| idxs.len() > 1)
            .map(|((fact, dimension), idxs)| AmbiguousPair {
                fact: fact.clone(),
                dimension: dimension.clone(),
                candidates: idxs.iter().map(|&i| self.edges[i].rel.clone()).collect(),
            })
            .collect()
    }

    /// The default edge for an unambiguous pair.
    pub fn active_relationship_for(
        &self,
        fact: &str,
        dimension: &str,
    ) -> EngineResult<&Relationship> {
        self.resolve_join_path(fact, dimension, None)
    }

    /// Resolve the edge joining `fact` to `dimension`.
    ///
    /// With a `selector`, it must name one of the pair's edges. Without one, the pair must have
    /// exactly one edge; ambiguous pairs fail with [`EngineError::AmbiguousJoin`].
    pub fn resolve_join_path(
        &self,
        fact: &str,
        dimension: &str,
        selector: Option<&RelationshipId>,
    ) -> EngineResult<&Relationship> {
        let selected: BTreeSet<RelationshipId> = selector.into_iter().cloned().collect();
        let idx = self.resolve_edge_idx(fact, dimension, &selected)?;
        if let Some(id) = selector {
            if self.edges[idx].rel.id != *id {
                return Err(EngineError::RelationshipMismatch {
                    relationship: id.to_string(),
                    fact: fact.to_string(),
                    dimension: dimension.to_string(),
                });
            }
        }
        Ok(&self.edges[idx].rel)
    }

    /// Unambiguous edges of `fact`, ordered by dimension name. Ambiguous pairs are left out:
    /// their edge is chosen per query.
    pub fn resolution_order(&self, fact: &str) -> Vec<&Relationship> {
        self.by_pair
            .iter()
            .filter(|((f, _), idxs)| f == fact && idxs.len() == 1)
            .map(|(_, idxs)| &self.edges[idxs[0]].rel)
            .collect()
    }

    /// Dimensions reachable from `fact`, sorted.
    pub fn dimensions_of(&self, fact: &str) -> Vec<&str> {
        self.by_pair
            .keys()
            .filter(|(f, _)| f == fact)
            .map(|(_, d)| d.as_str())
            .collect()
    }

    fn candidates(&self, fact: &str, dimension: &str) -> &[usize] {
        self.by_pair
            .get(&(fact.to_string(), dimension.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn edge(&self, idx: usize) -> &Edge {
        &self.edges[idx]
    }

    pub(crate) fn edge_by_id(&self, id: &RelationshipId) -> Option<&Edge> {
        self.by_id.get(id).map(|&idx| &self.edges[idx])
    }

    /// Pick the edge for a pair given the relationships selected in a filter context.
    pub(crate) fn resolve_edge_idx(
        &self,
        fact: &str,
        dimension: &str,
        selected: &BTreeSet<RelationshipId>,
    ) -> EngineResult<usize> {
        for id in selected {
            if !self.by_id.contains_key(id) {
                return Err(EngineError::UnknownRelationship(id.to_string()));
            }
        }
        let candidates = self.candidates(fact, dimension);
        let chosen: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&idx| selected.contains(&self.edges[idx].rel.id))
            .collect();

        match (candidates.len(), chosen.as_slice()) {
            (0, _) => Err(EngineError::NoRelationship {
                fact: fact.to_string(),
                dimension: dimension.to_string(),
            }),
            (_, [idx]) => Ok(*idx),
            (1, []) => Ok(candidates[0]),
            (_, []) => Err(self.ambiguity(fact, dimension, candidates)),
            (_, many) => Err(self.ambiguity(fact, dimension, many)),
        }
    }

    fn ambiguity(&self, fact: &str, dimension: &str, idxs: &[usize]) -> EngineError {
        EngineError::AmbiguousJoin {
            fact: fact.to_string(),
            dimension: dimension.to_string(),
            candidates: idxs
                .iter()
                .map(|&i| self.edges[i].rel.to_string())
                .collect(),
        }
    }
}
