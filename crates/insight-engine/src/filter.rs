//! Filter contexts: the evaluation state threaded through measure resolution.
//!
//! A [`FilterContext`] maps `Table[Column]` to a [`Predicate`] and carries the set of
//! relationships explicitly selected for ambiguous joins. Contexts are values: narrowing one
//! (for `Filtered` measure nodes, drill steps or grouped rows) produces a new context and never
//! changes the one it was derived from, so sibling sub-expressions cannot observe each other's
//! filters.
use crate::anchor::DateWindow;
use crate::relationship::RelationshipId;
use crate::value::Value;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A `Table[Column]` reference.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Parse `Table[Column]` or `Table.Column`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Some(stripped) = s.strip_suffix(']') {
            let (table, column) = stripped.split_once('[')?;
            let table = table.trim().trim_matches('\'');
            if table.is_empty() || column.is_empty() {
                return None;
            }
            return Some(Self::new(table, column));
        }
        let (table, column) = s.split_once('.')?;
        if table.is_empty() || column.is_empty() {
            return None;
        }
        Some(Self::new(table, column))
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.table, self.column)
    }
}

impl Serialize for ColumnRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ColumnRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Parts { table: String, column: String },
        }

        match Repr::deserialize(deserializer)? {
            Repr::Text(s) => ColumnRef::parse(&s).ok_or_else(|| {
                serde::de::Error::custom(format!("expected Table[Column], got {s:?}"))
            }),
            Repr::Parts { table, column } => Ok(ColumnRef::new(table, column)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeBound {
    pub value: Value,
    #[serde(default = "inclusive_default")]
    pub inclusive: bool,
}

fn inclusive_default() -> bool {
    true
}

impl RangeBound {
    pub fn inclusive(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            inclusive: true,
        }
    }

    pub fn exclusive(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            inclusive: false,
        }
    }
}

/// An allowed-value predicate on one column.
///
/// Range bounds only compare values of the same kind (numbers with numbers, dates with dates),
/// and blanks never satisfy a range. `Equals(Blank)` is how callers select rows with a missing
/// value, including fact rows whose foreign key has no matching dimension row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    All,
    Equals {
        value: Value,
    },
    In {
        values: BTreeSet<Value>,
    },
    Range {
        #[serde(default)]
        lower: Option<RangeBound>,
        #[serde(default)]
        upper: Option<RangeBound>,
    },
}

impl Predicate {
    pub fn equals(value: impl Into<Value>) -> Self {
        Predicate::Equals {
            value: value.into(),
        }
    }

    pub fn one_of(values: impl IntoIterator<Item = Value>) -> Self {
        Predicate::In {
            values: values.into_iter().collect(),
        }
        .normalized()
    }

    pub fn none() -> Self {
        Predicate::In {
            values: BTreeSet::new(),
        }
    }

    pub fn range(lower: Option<RangeBound>, upper: Option<RangeBound>) -> Self {
        Predicate::Range { lower, upper }.normalized()
    }

    pub fn at_most(value: impl Into<Value>) -> Self {
        Self::range(None, Some(RangeBound::inclusive(value)))
    }

    pub fn at_least(value: impl Into<Value>) -> Self {
        Self::range(Some(RangeBound::inclusive(value)), None)
    }

    pub fn less_than(value: impl Into<Value>) -> Self {
        Self::range(None, Some(RangeBound::exclusive(value)))
    }

    pub fn greater_than(value: impl Into<Value>) -> Self {
        Self::range(Some(RangeBound::exclusive(value)), None)
    }

    pub fn between(lower: impl Into<Value>, upper: impl Into<Value>) -> Self {
        Self::range(
            Some(RangeBound::inclusive(lower)),
            Some(RangeBound::inclusive(upper)),
        )
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Predicate::All => true,
            Predicate::Equals { value: expected } => expected == value,
            Predicate::In { values } => values.contains(value),
            Predicate::Range { lower, upper } => {
                if value.is_blank() {
                    return false;
                }
                let lower_ok = lower.as_ref().map_or(true, |b| {
                    same_kind(&b.value, value)
                        && if b.inclusive {
                            value >= &b.value
                        } else {
                            value > &b.value
                        }
                });
                let upper_ok = upper.as_ref().map_or(true, |b| {
                    same_kind(&b.value, value)
                        && if b.inclusive {
                            value <= &b.value
                        } else {
                            value < &b.value
                        }
                });
                lower_ok && upper_ok
            }
        }
    }

    /// True when no value can satisfy the predicate.
    pub fn is_empty(&self) -> bool {
        match self {
            Predicate::In { values } => values.is_empty(),
            Predicate::Range {
                lower: Some(lo),
                upper: Some(hi),
            } => {
                !same_kind(&lo.value, &hi.value)
                    || lo.value > hi.value
                    || (lo.value == hi.value && !(lo.inclusive && hi.inclusive))
            }
            _ => false,
        }
    }

    /// Conjunction of two predicates on the same column.
    pub fn intersect(&self, other: &Predicate) -> Predicate {
        match (self, other) {
            (Predicate::All, p) | (p, Predicate::All) => p.clone(),
            (Predicate::Equals { value }, p) | (p, Predicate::Equals { value }) => {
                if p.matches(value) {
                    Predicate::equals(value.clone())
                } else {
                    Predicate::none()
                }
            }
            (Predicate::In { values }, p) | (p, Predicate::In { values }) => {
                Predicate::one_of(values.iter().filter(|v| p.matches(v)).cloned())
            }
            (
                Predicate::Range {
                    lower: lo_a,
                    upper: hi_a,
                },
                Predicate::Range {
                    lower: lo_b,
                    upper: hi_b,
                },
            ) => {
                let lower = match tighter(lo_a, lo_b, true) {
                    Ok(bound) => bound,
                    Err(()) => return Predicate::none(),
                };
                let upper = match tighter(hi_a, hi_b, false) {
                    Ok(bound) => bound,
                    Err(()) => return Predicate::none(),
                };
                Predicate::range(lower, upper)
            }
        }
    }

    fn normalized(self) -> Self {
        match self {
            Predicate::In { values } if values.len() == 1 => {
                let value = values.into_iter().next().unwrap_or_default();
                Predicate::Equals { value }
            }
            p if p.is_empty() => Predicate::none(),
            p => p,
        }
    }
}

fn same_kind(a: &Value, b: &Value) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

/// Pick the more restrictive of two bounds. `Err` when the bounds compare different kinds of
/// values, which no single value can satisfy.
fn tighter(
    a: &Option<RangeBound>,
    b: &Option<RangeBound>,
    is_lower: bool,
) -> Result<Option<RangeBound>, ()> {
    match (a, b) {
        (None, x) | (x, None) => Ok(x.clone()),
        (Some(a), Some(b)) => {
            if !same_kind(&a.value, &b.value) {
                return Err(());
            }
            let pick = match a.value.cmp(&b.value) {
                std::cmp::Ordering::Equal => RangeBound {
                    value: a.value.clone(),
                    inclusive: a.inclusive && b.inclusive,
                },
                std::cmp::Ordering::Greater if is_lower => a.clone(),
                std::cmp::Ordering::Less if !is_lower => a.clone(),
                _ => b.clone(),
            };
            Ok(Some(pick))
        }
    }
}

/// One `column ∈ predicate` filter, as declared in measure definitions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnFilter {
    pub column: ColumnRef,
    #[serde(flatten)]
    pub predicate: Predicate,
}

impl ColumnFilter {
    pub fn new(column: ColumnRef, predicate: Predicate) -> Self {
        Self { column, predicate }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterContext {
    #[serde(default, with = "predicate_map")]
    predicates: BTreeMap<ColumnRef, Predicate>,
    #[serde(default)]
    relationships: BTreeSet<RelationshipId>,
}

impl FilterContext {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty() && self.relationships.is_empty()
    }

    /// Intersect `predicate` into the filter on `column`.
    pub fn with(mut self, column: ColumnRef, predicate: Predicate) -> Self {
        self.restrict(column, predicate);
        self
    }

    pub fn with_column_equals(self, table: &str, column: &str, value: impl Into<Value>) -> Self {
        self.with(ColumnRef::new(table, column), Predicate::equals(value))
    }

    pub fn with_column_in(
        self,
        table: &str,
        column: &str,
        values: impl IntoIterator<Item = Value>,
    ) -> Self {
        self.with(ColumnRef::new(table, column), Predicate::one_of(values))
    }

    pub fn with_window(self, table: &str, column: &str, window: DateWindow) -> Self {
        self.with(ColumnRef::new(table, column), window.predicate())
    }

    /// Select `relationship` for its (fact, dimension) pair.
    pub fn with_relationship(mut self, relationship: impl Into<RelationshipId>) -> Self {
        self.relationships.insert(relationship.into());
        self
    }

    pub fn with_filters<'a>(self, filters: impl IntoIterator<Item = &'a ColumnFilter>) -> Self {
        filters.into_iter().fold(self, |ctx, f| {
            ctx.with(f.column.clone(), f.predicate.clone())
        })
    }

    /// Conjunction of two contexts.
    pub fn intersect(&self, other: &FilterContext) -> FilterContext {
        let mut out = self.clone();
        for (column, predicate) in &other.predicates {
            out.restrict(column.clone(), predicate.clone());
        }
        out.relationships
            .extend(other.relationships.iter().cloned());
        out
    }

    pub fn predicate(&self, column: &ColumnRef) -> Option<&Predicate> {
        self.predicates.get(column)
    }

    pub fn predicates(&self) -> impl Iterator<Item = (&ColumnRef, &Predicate)> {
        self.predicates.iter()
    }

    pub fn relationships(&self) -> &BTreeSet<RelationshipId> {
        &self.relationships
    }

    /// True when some column filter admits no value; such a context selects no rows.
    pub fn is_unsatisfiable(&self) -> bool {
        self.predicates.values().any(Predicate::is_empty)
    }

    fn restrict(&mut self, column: ColumnRef, predicate: Predicate) {
        let merged = match self.predicates.get(&column) {
            Some(existing) => existing.intersect(&predicate),
            None => predicate,
        };
        if merged == Predicate::All {
            self.predicates.remove(&column);
        } else {
            self.predicates.insert(column, merged);
        }
    }
}

/// JSON object keys must be strings, so predicates serialize as a list of column filters.
mod predicate_map {
    use super::{ColumnFilter, ColumnRef, Predicate};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<ColumnRef, Predicate>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let filters: Vec<ColumnFilter> = map
            .iter()
            .map(|(c, p)| ColumnFilter::new(c.clone(), p.clone()))
            .collect();
        filters.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<ColumnRef, Predicate>, D::Error> {
        let filters = Vec::<ColumnFilter>::deserialize(deserializer)?;
        let mut map: BTreeMap<ColumnRef, Predicate> = BTreeMap::new();
        for f in filters {
            let merged = match map.get(&f.column) {
                Some(existing) => existing.intersect(&f.predicate),
                None => f.predicate,
            };
            map.insert(f.column, merged);
        }
        Ok(map)
    }
}
