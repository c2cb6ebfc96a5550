//! Flattening of nested upstream JSON into scalar columns

use crate::error::NormalizationError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Separator between parent and child keys: `{"a": {"b": 1}}` becomes `a_b`
pub const KEY_SEPARATOR: &str = "_";

/// A single column value after flattening
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Numeric view; text is parsed leniently (`"$1,850+/mo"` -> 1850.0)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) if f.is_finite() => Some(*f),
            Scalar::Text(s) => parse_number(s),
            _ => None,
        }
    }

    /// Text view of identifiers, which upstream sends as either numbers or strings
    pub fn as_text(&self) -> Option<String> {
        match self {
            Scalar::Text(s) => {
                let s = s.trim();
                (!s.is_empty()).then(|| s.to_string())
            },
            Scalar::Int(i) => Some(i.to_string()),
            Scalar::Float(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 => {
                Some(format!("{}", *f as i64))
            },
            _ => None,
        }
    }
}

impl From<&Value> for Scalar {
    /// Non-scalar values are JSON-encoded as text
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Scalar::Null,
            Value::Bool(b) => Scalar::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Scalar::Int(i),
                None => n.as_f64().map_or(Scalar::Null, Scalar::Float),
            },
            Value::String(s) => Scalar::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => Scalar::Text(value.to_string()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => f.write_str("null"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Float(v) => write!(f, "{v}"),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

/// One flattened upstream object
pub type FlatRecord = BTreeMap<String, Scalar>;

/// Flatten a JSON object. Nested objects are joined with `_`, arrays are
/// JSON-encoded, so every value in the result is a scalar.
pub fn flatten(value: &Value) -> Result<FlatRecord, NormalizationError> {
    let object = value.as_object().ok_or(NormalizationError::NotAnObject)?;
    let mut out = FlatRecord::new();
    flatten_into(&mut out, None, object);
    Ok(out)
}

fn flatten_into(out: &mut FlatRecord, prefix: Option<&str>, object: &Map<String, Value>) {
    for (key, value) in object {
        let column = match prefix {
            Some(prefix) => format!("{prefix}{KEY_SEPARATOR}{key}"),
            None => key.clone(),
        };
        match value {
            Value::Object(child) => flatten_into(out, Some(&column), child),
            other => {
                if let Some(previous) = out.insert(column.clone(), Scalar::from(other)) {
                    debug!(%column, %previous, "flattened column collision, later value kept");
                }
            },
        }
    }
}

/// Parse numeric text as listings present it: `"$1,850+"`, `"2,100/mo"`, `" 3.5 "`
pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_suffix("/mo").unwrap_or(trimmed);
    let cleaned: String = trimmed
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | '+') && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Remove `key` and read it as a number. Absent and null are `None`.
pub(crate) fn take_number(
    record: &mut FlatRecord,
    key: &str,
    field: &'static str,
) -> Result<Option<f64>, NormalizationError> {
    match record.remove(key) {
        None | Some(Scalar::Null) => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or_else(|| NormalizationError::invalid(field, value)),
    }
}

/// Remove `key` and read it as non-empty text
pub(crate) fn take_text(record: &mut FlatRecord, key: &str) -> Option<String> {
    record.remove(key).and_then(|v| v.as_text())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_nested_objects() {
        let flat = flatten(&json!({
            "zpid": 42,
            "listingSubType": {"is_FSBA": true, "details": {"open": false}},
            "price": 325000.5,
            "address": "1 Main St",
        }))
        .unwrap();

        assert_eq!(flat["zpid"], Scalar::Int(42));
        assert_eq!(flat["listingSubType_is_FSBA"], Scalar::Bool(true));
        assert_eq!(flat["listingSubType_details_open"], Scalar::Bool(false));
        assert_eq!(flat["price"], Scalar::Float(325000.5));
        assert!(!flat.contains_key("listingSubType"));
    }

    #[test]
    fn test_arrays_become_json_text() {
        let flat = flatten(&json!({"photos": [{"url": "a"}, {"url": "b"}], "tags": []})).unwrap();
        assert_eq!(
            flat["photos"],
            Scalar::Text(r#"[{"url":"a"},{"url":"b"}]"#.to_string())
        );
        assert_eq!(flat["tags"], Scalar::Text("[]".to_string()));
    }

    #[test]
    fn test_colliding_columns_keep_one_value() {
        let flat = flatten(&json!({"a_b": 1, "a": {"b": 2}, "c": 3})).unwrap();
        assert_eq!(flat.len(), 2);
        assert!(matches!(flat["a_b"], Scalar::Int(1) | Scalar::Int(2)));
        assert_eq!(flat["c"], Scalar::Int(3));
    }

    #[test]
    fn test_flatten_rejects_non_objects() {
        assert_eq!(flatten(&json!([1, 2])), Err(NormalizationError::NotAnObject));
        assert_eq!(flatten(&json!("zpid")), Err(NormalizationError::NotAnObject));
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("$1,850+"), Some(1850.0));
        assert_eq!(parse_number("$2,100/mo"), Some(2100.0));
        assert_eq!(parse_number(" 3.5 "), Some(3.5));
        assert_eq!(parse_number("-86.78"), Some(-86.78));
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("Contact"), None);
        assert_eq!(parse_number("NaN"), None);
    }

    #[test]
    fn test_scalar_text_view() {
        assert_eq!(Scalar::Int(555).as_text().as_deref(), Some("555"));
        assert_eq!(Scalar::Float(555.0).as_text().as_deref(), Some("555"));
        assert_eq!(Scalar::Text(" 555 ".into()).as_text().as_deref(), Some("555"));
        assert_eq!(Scalar::Text("".into()).as_text(), None);
        assert_eq!(Scalar::Bool(true).as_text(), None);
    }

    #[test]
    fn test_scalar_serializes_untagged() {
        let record: FlatRecord = [
            ("a".to_string(), Scalar::Null),
            ("b".to_string(), Scalar::Int(3)),
            ("c".to_string(), Scalar::Text("x".into())),
        ]
        .into_iter()
        .collect();
        let encoded = serde_json::to_string(&record).unwrap();
        assert_eq!(encoded, r#"{"a":null,"b":3,"c":"x"}"#);

        let decoded: FlatRecord = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, record);
    }
}
