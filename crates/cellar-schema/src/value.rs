use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage kind of a schema attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    String,
    Integer,
    Double,
    Boolean,
    Date,
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeKind::String => write!(f, "string"),
            AttributeKind::Integer => write!(f, "integer"),
            AttributeKind::Double => write!(f, "double"),
            AttributeKind::Boolean => write!(f, "boolean"),
            AttributeKind::Date => write!(f, "date"),
        }
    }
}

/// A typed attribute value held by a managed object.
///
/// Serialized as `{"type": "<kind>", "value": ...}` so the on-disk form is
/// self-describing; dates are RFC 3339 strings in UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum AttributeValue {
    String(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
    Date(DateTime<Utc>),
}

impl AttributeValue {
    pub fn kind(&self) -> AttributeKind {
        match self {
            AttributeValue::String(_) => AttributeKind::String,
            AttributeValue::Integer(_) => AttributeKind::Integer,
            AttributeValue::Double(_) => AttributeKind::Double,
            AttributeValue::Boolean(_) => AttributeKind::Boolean,
            AttributeValue::Date(_) => AttributeKind::Date,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            AttributeValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Convert a TOML default into a value of `kind`.
    ///
    /// Integers widen to doubles and non-finite floats are refused. Dates have
    /// no TOML default form.
    pub(crate) fn from_toml(kind: AttributeKind, raw: &toml::Value) -> Option<Self> {
        match (kind, raw) {
            (AttributeKind::String, toml::Value::String(s)) => Some(Self::String(s.clone())),
            (AttributeKind::Integer, toml::Value::Integer(i)) => Some(Self::Integer(*i)),
            (AttributeKind::Double, toml::Value::Float(f)) if f.is_finite() => {
                Some(Self::Double(*f))
            }
            (AttributeKind::Double, toml::Value::Integer(i)) => Some(Self::Double(*i as f64)),
            (AttributeKind::Boolean, toml::Value::Boolean(b)) => Some(Self::Boolean(*b)),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(s) => write!(f, "{s:?}"),
            AttributeValue::Integer(i) => write!(f, "{i}"),
            AttributeValue::Double(d) => write!(f, "{d}"),
            AttributeValue::Boolean(b) => write!(f, "{b}"),
            AttributeValue::Date(d) => write!(f, "{}", d.to_rfc3339()),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for AttributeValue {
    fn from(d: f64) -> Self {
        Self::Double(d)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<DateTime<Utc>> for AttributeValue {
    fn from(d: DateTime<Utc>) -> Self {
        Self::Date(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(AttributeValue::from("x").kind(), AttributeKind::String);
        assert_eq!(AttributeValue::from(3_i64).kind(), AttributeKind::Integer);
        assert_eq!(AttributeValue::from(1.5).kind(), AttributeKind::Double);
        assert_eq!(AttributeValue::from(true).kind(), AttributeKind::Boolean);
        let date = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(AttributeValue::from(date).kind(), AttributeKind::Date);
    }

    #[test]
    fn json_form_is_tagged() {
        let v = AttributeValue::from("Buy milk");
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"type":"string","value":"Buy milk"}"#);

        let date = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let json = serde_json::to_string(&AttributeValue::Date(date)).unwrap();
        assert!(json.contains(r#""type":"date""#));
        assert!(json.contains("2024-01-01T00:00:00Z"));
        let back: AttributeValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_date(), Some(date));
    }

    #[test]
    fn toml_defaults_convert_per_kind() {
        let int = toml::Value::Integer(4);
        assert_eq!(
            AttributeValue::from_toml(AttributeKind::Integer, &int),
            Some(AttributeValue::Integer(4))
        );
        assert_eq!(
            AttributeValue::from_toml(AttributeKind::Double, &int),
            Some(AttributeValue::Double(4.0))
        );
        assert_eq!(AttributeValue::from_toml(AttributeKind::String, &int), None);
        let s = toml::Value::String("2024-01-01".to_owned());
        assert_eq!(AttributeValue::from_toml(AttributeKind::Date, &s), None);
    }

    #[test]
    fn accessors_return_none_for_other_kinds() {
        let v = AttributeValue::from(7_i64);
        assert_eq!(v.as_i64(), Some(7));
        assert_eq!(v.as_str(), None);
        assert_eq!(v.as_bool(), None);
        assert_eq!(v.as_f64(), None);
        assert_eq!(v.as_date(), None);
    }

    #[test]
    fn kind_display_is_lowercase() {
        assert_eq!(AttributeKind::Boolean.to_string(), "boolean");
        assert_eq!(AttributeKind::Date.to_string(), "date");
    }
}
