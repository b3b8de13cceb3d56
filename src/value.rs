//! Dynamic field values extracted by the model.
//!
//! Extraction has no fixed schema: a tax form page may yield a flat map of
//! line items, a nested map per section, or arrays of quarterly payments.
//! [`FieldValue`] is a tagged variant over the JSON shapes the model can
//! return. Mappings keep the model's key order so the compiled document reads
//! in the same order as the source page.

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::{Number, Value};

/// One extracted value.
///
/// `Number`, `Text`, `Mapping` and `Sequence` are what the prompt contract
/// asks for. `Flag` and `Null` exist because the model is not bound by that
/// contract; they are kept as-is and flagged by the field audit rather than
/// rewritten.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(Number),
    Text(String),
    Flag(bool),
    Null,
    Mapping(Vec<(String, FieldValue)>),
    Sequence(Vec<FieldValue>),
}

impl FieldValue {
    /// Look up a key in a mapping. Returns `None` for non-mappings.
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        match self {
            FieldValue::Mapping(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Top-level keys of a mapping, in model order.
    pub fn keys(&self) -> Vec<&str> {
        match self {
            FieldValue::Mapping(entries) => entries.iter().map(|(k, _)| k.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_mapping(&self) -> bool {
        matches!(self, FieldValue::Mapping(_))
    }

    /// Count of leaf values (numbers, strings, flags, nulls) in the tree.
    pub fn leaf_count(&self) -> usize {
        match self {
            FieldValue::Mapping(entries) => entries.iter().map(|(_, v)| v.leaf_count()).sum(),
            FieldValue::Sequence(items) => items.iter().map(FieldValue::leaf_count).sum(),
            _ => 1,
        }
    }

    /// Visit every leaf with its dotted path (`section.field[2]`).
    pub fn walk_leaves<'a>(&'a self, f: &mut dyn FnMut(&str, &'a FieldValue)) {
        self.walk_inner(&mut String::new(), f);
    }

    fn walk_inner<'a>(&'a self, path: &mut String, f: &mut dyn FnMut(&str, &'a FieldValue)) {
        match self {
            FieldValue::Mapping(entries) => {
                for (k, v) in entries {
                    let len = path.len();
                    if !path.is_empty() {
                        path.push('.');
                    }
                    path.push_str(k);
                    v.walk_inner(path, f);
                    path.truncate(len);
                }
            }
            FieldValue::Sequence(items) => {
                for (i, v) in items.iter().enumerate() {
                    let len = path.len();
                    path.push_str(&format!("[{i}]"));
                    v.walk_inner(path, f);
                    path.truncate(len);
                }
            }
            leaf => f(path.as_str(), leaf),
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Flag(b),
            Value::Number(n) => FieldValue::Number(n),
            Value::String(s) => FieldValue::Text(s),
            Value::Array(items) => FieldValue::Sequence(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                FieldValue::Mapping(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<&FieldValue> for Value {
    fn from(value: &FieldValue) -> Self {
        match value {
            FieldValue::Null => Value::Null,
            FieldValue::Flag(b) => Value::Bool(*b),
            FieldValue::Number(n) => Value::Number(n.clone()),
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Sequence(items) => Value::Array(items.iter().map(Into::into).collect()),
            FieldValue::Mapping(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Null => serializer.serialize_unit(),
            FieldValue::Flag(b) => serializer.serialize_bool(*b),
            FieldValue::Number(n) => n.serialize(serializer),
            FieldValue::Text(s) => serializer.serialize_str(s),
            FieldValue::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            FieldValue::Mapping(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn conversion_keeps_key_order() {
        let v: Value =
            serde_json::from_str(r#"{"wages": 1, "interest": 2, "dividends": 3}"#).unwrap();
        let fv = FieldValue::from(v);
        assert_eq!(fv.keys(), vec!["wages", "interest", "dividends"]);
        assert_eq!(
            serde_json::to_string(&fv).unwrap(),
            r#"{"wages":1,"interest":2,"dividends":3}"#
        );
    }

    #[test]
    fn numbers_are_echoed_unchanged() {
        let fv = FieldValue::from(json!({"refund": 1234, "rate": 22.5}));
        assert_eq!(fv.get("refund").and_then(FieldValue::as_f64), Some(1234.0));
        assert_eq!(fv.get("rate").and_then(FieldValue::as_f64), Some(22.5));
    }

    #[test]
    fn walk_leaves_reports_dotted_paths() {
        let fv = FieldValue::from(json!({
            "federal": {"agi": 100, "quarters": [1, 2]},
            "note": ""
        }));
        let mut paths = Vec::new();
        fv.walk_leaves(&mut |p, _| paths.push(p.to_string()));
        assert_eq!(
            paths,
            vec!["federal.agi", "federal.quarters[0]", "federal.quarters[1]", "note"]
        );
        assert_eq!(fv.leaf_count(), 4);
    }

    #[test]
    fn back_to_value_is_structural() {
        let original = json!({"a": [true, null, "x"], "b": {"c": -1}});
        let fv = FieldValue::from(original.clone());
        assert_eq!(Value::from(&fv), original);
    }
}
