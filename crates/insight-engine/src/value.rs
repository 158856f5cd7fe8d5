use chrono::NaiveDate;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// A scalar cell value or measure result.
///
/// [`Value::Blank`] is the single "no value" marker. Null foreign keys, aggregations over an
/// empty row set, ratios with a zero denominator and windows without an anchor all collapse into
/// it, so composed measures (ratios of ratios, window differences) never need per-node handling
/// of sparse data.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Value {
    #[default]
    Blank,
    Boolean(bool),
    Number(OrderedFloat<f64>),
    Text(Arc<str>),
    Date(NaiveDate),
}

impl Value {
    /// Build a numeric value, mapping non-finite results (NaN, ±inf) to [`Value::Blank`].
    pub fn number(n: f64) -> Self {
        if n.is_finite() {
            Value::Number(OrderedFloat(n))
        } else {
            Value::Blank
        }
    }

    pub fn text(s: impl AsRef<str>) -> Self {
        Value::Text(Arc::from(s.as_ref()))
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Value::Blank)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(n.0),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Name of the variant, used in type-mismatch errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Blank => "Blank",
            Value::Boolean(_) => "Boolean",
            Value::Number(_) => "Number",
            Value::Text(_) => "Text",
            Value::Date(_) => "Date",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Blank => 0,
            Value::Boolean(_) => 1,
            Value::Number(_) => 2,
            Value::Text(_) => 3,
            Value::Date(_) => 4,
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Blank, Value::Blank) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.as_ref().cmp(b.as_ref()),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Blank => f.write_str("(blank)"),
            Value::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{:.0}", n.0),
            Value::Number(n) => write!(f, "{}", n.0),
            Value::Text(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(OrderedFloat(value as f64))
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(OrderedFloat(f64::from(value)))
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Number(OrderedFloat(value as f64))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(Arc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(Arc::from(value))
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Blank, Into::into)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Blank => serializer.serialize_none(),
            Value::Boolean(b) => serializer.serialize_bool(*b),
            Value::Number(n) => serializer.serialize_f64(n.0),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Date(d) => serializer.collect_str(&d.format("%Y-%m-%d")),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl<'de> Deserialize<'de> for Value {
    /// JSON strings always deserialize as text; columns typed as dates coerce them at load time
    /// (see [`crate::ColumnType::coerce`]).
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<RawValue>::deserialize(deserializer)?;
        Ok(match raw {
            None | Some(RawValue::Null) => Value::Blank,
            Some(RawValue::Bool(b)) => Value::Boolean(b),
            Some(RawValue::Int(i)) => Value::from(i),
            Some(RawValue::Float(f)) => Value::number(f),
            Some(RawValue::Text(s)) => Value::from(s),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_ranks_variants_before_payloads() {
        let mut values = vec![
            Value::from("b"),
            Value::from(3.0),
            Value::Blank,
            Value::from(true),
            Value::from(-1),
            Value::from("a"),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                Value::Blank,
                Value::from(true),
                Value::from(-1),
                Value::from(3.0),
                Value::from("a"),
                Value::from("b"),
            ]
        );
    }

    #[test]
    fn non_finite_numbers_collapse_to_blank() {
        assert_eq!(Value::number(f64::NAN), Value::Blank);
        assert_eq!(Value::number(f64::INFINITY), Value::Blank);
        assert_eq!(Value::from(0.0 / 0.0), Value::Blank);
    }

    #[test]
    fn json_round_trip_keeps_blank_as_null() {
        let json = serde_json::to_string(&vec![Value::Blank, Value::from(2), Value::from("x")])
            .unwrap();
        assert_eq!(json, r#"[null,2.0,"x"]"#);
        let back: Vec<Value> = serde_json::from_str("[null, 2, \"x\", true]").unwrap();
        assert_eq!(
            back,
            vec![Value::Blank, Value::from(2), Value::from("x"), Value::from(true)]
        );
    }

    #[test]
    fn dates_display_and_serialize_as_iso() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(Value::from(d).to_string(), "2024-03-09");
        assert_eq!(serde_json::to_string(&Value::from(d)).unwrap(), "\"2024-03-09\"");
    }
}
