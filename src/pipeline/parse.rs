//! Strict response parsing and the field audit.
//!
//! The model is told to answer with raw JSON and nothing else, so the raw
//! response text goes straight to `serde_json`: no fence stripping, no
//! trimming of commentary, no numeric fix-ups. Anything that does not parse
//! is a [`UnitError::ResponseParse`].
//!
//! After a successful parse the audit walks every leaf and records contract
//! violations (JSON `null` where `""` was required, numbers sent as strings).
//! The audit only reports; the extracted values are returned untouched.

use crate::error::UnitError;
use crate::output::{FieldAudit, Origin};
use crate::value::FieldValue;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// `1234`, `1,234.50`, `-12`, `(1,234)`, `$950`, `22%`.
static NUMBER_LIKE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\(?-?\$?(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?\)?%?$")
        .expect("NUMBER_LIKE regex is valid")
});

/// Parse a raw model response into fields plus an audit.
pub fn parse_response(origin: Origin, raw: &str) -> Result<(FieldValue, FieldAudit), UnitError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| UnitError::ResponseParse {
        origin,
        detail: e.to_string(),
        line: e.line(),
        column: e.column(),
    })?;

    if !(value.is_object() || value.is_array()) {
        return Err(UnitError::ResponseParse {
            origin,
            detail: format!("expected a JSON object or array, got {}", json_type(&value)),
            line: 1,
            column: 1,
        });
    }

    let fields = FieldValue::from(value);
    let audit = audit_fields(&fields);
    Ok((fields, audit))
}

/// Report leaves that break the output contract.
pub fn audit_fields(fields: &FieldValue) -> FieldAudit {
    let mut audit = FieldAudit::default();
    fields.walk_leaves(&mut |path, leaf| match leaf {
        FieldValue::Null => audit.null_fields.push(path.to_string()),
        FieldValue::Text(s) if is_number_like(s) => audit.numeric_strings.push(path.to_string()),
        _ => {}
    });
    audit
}

/// Whether a string would have been better sent as a JSON number.
pub fn is_number_like(s: &str) -> bool {
    NUMBER_LIKE.is_match(s.trim())
}

/// Keys of `expected` that are missing from the top level of `fields`.
///
/// Used to check a response against a reference field set, e.g. the labels
/// printed on a known form.
pub fn missing_fields<'a>(fields: &FieldValue, expected: &[&'a str]) -> Vec<&'a str> {
    expected
        .iter()
        .copied()
        .filter(|k| fields.get(k).is_none())
        .collect()
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: Origin = Origin::Page { file: 1, page: 1 };

    #[test]
    fn not_json_is_parse_error() {
        let err = parse_response(ORIGIN, "not json").unwrap_err();
        match err {
            UnitError::ResponseParse { origin, line, .. } => {
                assert_eq!(origin, ORIGIN);
                assert_eq!(line, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fenced_json_is_not_unwrapped() {
        let raw = "```json\n{\"a\": 1}\n```";
        assert!(matches!(
            parse_response(ORIGIN, raw),
            Err(UnitError::ResponseParse { .. })
        ));
    }

    #[test]
    fn scalar_json_is_rejected() {
        let err = parse_response(ORIGIN, "42").unwrap_err();
        assert!(err.to_string().contains("a number"));
    }

    #[test]
    fn empty_object_is_valid() {
        let (fields, audit) = parse_response(ORIGIN, "{}").unwrap();
        assert_eq!(fields, FieldValue::Mapping(vec![]));
        assert!(audit.is_clean());
    }

    #[test]
    fn audit_flags_nulls_and_numeric_strings_without_changing_them() {
        let raw = r#"{"box1": "1,234", "box2": null, "box3": 12, "payer": "ACME", "zip": ""}"#;
        let (fields, audit) = parse_response(ORIGIN, raw).unwrap();
        assert_eq!(audit.null_fields, vec!["box2"]);
        assert_eq!(audit.numeric_strings, vec!["box1"]);
        assert_eq!(fields.get("box1").and_then(FieldValue::as_str), Some("1,234"));
        assert_eq!(fields.get("box2"), Some(&FieldValue::Null));
    }

    #[test]
    fn number_like_patterns() {
        for s in ["1234", "1,234", "(1,234)", "-12.50", "$950", "22%", " 7 "] {
            assert!(is_number_like(s), "{s}");
        }
        for s in ["", "ACME", "12a", "1,23", "Box 1"] {
            assert!(!is_number_like(s), "{s}");
        }
    }

    #[test]
    fn missing_fields_against_reference() {
        let (fields, _) = parse_response(ORIGIN, r#"{"Box 1": 10, "Box 1a": ""}"#).unwrap();
        assert_eq!(
            missing_fields(&fields, &["Box 1", "Box 1a", "Box 1b"]),
            vec!["Box 1b"]
        );
    }
}
