//! Firestore's tagged value representation.
//!
//! Every value on the wire is a JSON object with exactly one key naming its
//! type (`stringValue`, `integerValue`, `mapValue`, ...). [`Value`] is the
//! closed set of those kinds; [`Value::to_json`] and [`Value::from_json`] are
//! the only places that know the wire shape.

use super::resource::Reference;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value as JsonValue};
use std::collections::BTreeMap;
use thiserror::Error;

const NULL_VALUE: &str = "nullValue";
const BOOLEAN_VALUE: &str = "booleanValue";
const INTEGER_VALUE: &str = "integerValue";
const DOUBLE_VALUE: &str = "doubleValue";
const TIMESTAMP_VALUE: &str = "timestampValue";
const STRING_VALUE: &str = "stringValue";
const BYTES_VALUE: &str = "bytesValue";
const REFERENCE_VALUE: &str = "referenceValue";
const GEO_POINT_VALUE: &str = "geoPointValue";
const ARRAY_VALUE: &str = "arrayValue";
const MAP_VALUE: &str = "mapValue";

/// Errors raised while decoding Firestore values into native types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// The encoded value was not a JSON object.
    #[error("expected a tagged value object, found {0}")]
    NotAnObject(&'static str),
    /// The object carried no type tag.
    #[error("value has no type tag")]
    MissingTag,
    /// The object carried more than one key.
    #[error("value has more than one type tag: {0:?}")]
    MultipleTags(Vec<String>),
    /// The single key is not a known Firestore type tag.
    #[error("unknown value tag `{0}`")]
    UnknownTag(String),
    /// The tag was recognised but its payload had the wrong shape.
    #[error("invalid {tag} payload: {reason}")]
    InvalidPayload { tag: &'static str, reason: String },
    /// A reference path did not have the `projects/{p}/databases/{d}/documents/{path}` shape.
    #[error("invalid document reference `{path}`: {reason}")]
    InvalidReference { path: String, reason: String },
    /// A value of one kind was found where another was expected.
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    /// A required record field was absent.
    #[error("missing field `{0}`")]
    MissingField(String),
    /// Decoding a named record field failed.
    #[error("field `{name}`: {source}")]
    Field {
        name: String,
        #[source]
        source: Box<DecodeError>,
    },
}

impl DecodeError {
    pub(crate) fn invalid(tag: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            tag,
            reason: reason.into(),
        }
    }

    pub(crate) fn in_field(self, name: &str) -> Self {
        Self::Field {
            name: name.to_string(),
            source: Box::new(self),
        }
    }
}

/// A geographic point, in degrees.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct GeoPoint {
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A single Firestore value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Timestamp(DateTime<Utc>),
    String(String),
    Bytes(Vec<u8>),
    Reference(Reference),
    GeoPoint(GeoPoint),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Human readable name of the value kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Double(_) => "double",
            Value::Timestamp(_) => "timestamp",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Reference(_) => "reference",
            Value::GeoPoint(_) => "geo point",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Encodes the value into its tagged JSON form.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => json!({ NULL_VALUE: null }),
            Value::Boolean(b) => json!({ BOOLEAN_VALUE: b }),
            // Integers travel as decimal strings so 64-bit values survive JSON number parsing.
            Value::Integer(i) => json!({ INTEGER_VALUE: i.to_string() }),
            Value::Double(d) => json!({ DOUBLE_VALUE: encode_double(*d) }),
            Value::Timestamp(t) => json!({ TIMESTAMP_VALUE: encode_timestamp(t) }),
            Value::String(s) => json!({ STRING_VALUE: s }),
            Value::Bytes(b) => json!({ BYTES_VALUE: STANDARD.encode(b) }),
            Value::Reference(r) => json!({ REFERENCE_VALUE: r.name() }),
            Value::GeoPoint(gp) => json!({
                GEO_POINT_VALUE: { "latitude": gp.latitude, "longitude": gp.longitude }
            }),
            Value::Array(values) => {
                let values: Vec<JsonValue> = values.iter().map(Value::to_json).collect();
                json!({ ARRAY_VALUE: { "values": values } })
            }
            Value::Map(fields) => json!({ MAP_VALUE: { "fields": encode_fields(fields) } }),
        }
    }

    /// Decodes a tagged JSON value.
    ///
    /// The object must carry exactly one key and that key must be a known tag.
    pub fn from_json(json: &JsonValue) -> Result<Value, DecodeError> {
        let object = json
            .as_object()
            .ok_or_else(|| DecodeError::NotAnObject(json_kind(json)))?;

        let mut entries = object.iter();
        let (tag, payload) = match (entries.next(), entries.next()) {
            (None, _) => return Err(DecodeError::MissingTag),
            (Some(entry), None) => entry,
            (Some(_), Some(_)) => {
                return Err(DecodeError::MultipleTags(object.keys().cloned().collect()))
            }
        };

        match tag.as_str() {
            NULL_VALUE => match payload {
                JsonValue::Null => Ok(Value::Null),
                // proto3 JSON also renders the NullValue enum by name.
                JsonValue::String(s) if s == "NULL_VALUE" => Ok(Value::Null),
                other => Err(DecodeError::invalid(
                    NULL_VALUE,
                    format!("expected null, found {}", json_kind(other)),
                )),
            },
            BOOLEAN_VALUE => payload
                .as_bool()
                .map(Value::Boolean)
                .ok_or_else(|| DecodeError::invalid(BOOLEAN_VALUE, "expected a boolean")),
            INTEGER_VALUE => decode_integer(payload).map(Value::Integer),
            DOUBLE_VALUE => decode_double(payload).map(Value::Double),
            TIMESTAMP_VALUE => {
                let s = payload
                    .as_str()
                    .ok_or_else(|| DecodeError::invalid(TIMESTAMP_VALUE, "expected a string"))?;
                decode_timestamp(s).map(Value::Timestamp)
            }
            STRING_VALUE => payload
                .as_str()
                .map(|s| Value::String(s.to_string()))
                .ok_or_else(|| DecodeError::invalid(STRING_VALUE, "expected a string")),
            BYTES_VALUE => {
                let s = payload
                    .as_str()
                    .ok_or_else(|| DecodeError::invalid(BYTES_VALUE, "expected a string"))?;
                STANDARD
                    .decode(s)
                    .map(Value::Bytes)
                    .map_err(|e| DecodeError::invalid(BYTES_VALUE, e.to_string()))
            }
            REFERENCE_VALUE => {
                let s = payload
                    .as_str()
                    .ok_or_else(|| DecodeError::invalid(REFERENCE_VALUE, "expected a string"))?;
                Reference::parse(s).map(Value::Reference)
            }
            GEO_POINT_VALUE => GeoPoint::deserialize(payload)
                .map(Value::GeoPoint)
                .map_err(|e| DecodeError::invalid(GEO_POINT_VALUE, e.to_string())),
            ARRAY_VALUE => {
                let values = match nested(payload, ARRAY_VALUE, "values")? {
                    None => Vec::new(),
                    Some(JsonValue::Array(values)) => values
                        .iter()
                        .map(Value::from_json)
                        .collect::<Result<Vec<_>, _>>()?,
                    Some(other) => {
                        return Err(DecodeError::invalid(
                            ARRAY_VALUE,
                            format!("`values` must be an array, found {}", json_kind(other)),
                        ))
                    }
                };
                Ok(Value::Array(values))
            }
            MAP_VALUE => {
                let fields = match nested(payload, MAP_VALUE, "fields")? {
                    None => BTreeMap::new(),
                    Some(JsonValue::Object(fields)) => decode_fields(fields)?,
                    Some(other) => {
                        return Err(DecodeError::invalid(
                            MAP_VALUE,
                            format!("`fields` must be an object, found {}", json_kind(other)),
                        ))
                    }
                };
                Ok(Value::Map(fields))
            }
            other => Err(DecodeError::UnknownTag(other.to_string())),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = JsonValue::deserialize(deserializer)?;
        Value::from_json(&json).map_err(D::Error::custom)
    }
}

/// Encodes a field map as a JSON object of tagged values.
pub(crate) fn encode_fields(fields: &BTreeMap<String, Value>) -> Map<String, JsonValue> {
    fields
        .iter()
        .map(|(name, value)| (name.clone(), value.to_json()))
        .collect()
}

/// Decodes a JSON object of tagged values into a field map.
pub(crate) fn decode_fields(
    fields: &Map<String, JsonValue>,
) -> Result<BTreeMap<String, Value>, DecodeError> {
    fields
        .iter()
        .map(|(name, json)| {
            Value::from_json(json)
                .map(|value| (name.clone(), value))
                .map_err(|e| e.in_field(name))
        })
        .collect()
}

fn nested<'a>(
    payload: &'a JsonValue,
    tag: &'static str,
    key: &str,
) -> Result<Option<&'a JsonValue>, DecodeError> {
    let object = payload
        .as_object()
        .ok_or_else(|| DecodeError::invalid(tag, "expected an object"))?;
    Ok(object.get(key))
}

fn decode_integer(payload: &JsonValue) -> Result<i64, DecodeError> {
    match payload {
        JsonValue::String(s) => s
            .parse::<i64>()
            .map_err(|e| DecodeError::invalid(INTEGER_VALUE, format!("`{}`: {}", s, e))),
        JsonValue::Number(n) => n
            .as_i64()
            .ok_or_else(|| DecodeError::invalid(INTEGER_VALUE, format!("`{}` is not an i64", n))),
        other => Err(DecodeError::invalid(
            INTEGER_VALUE,
            format!("expected a decimal string, found {}", json_kind(other)),
        )),
    }
}

fn encode_double(d: f64) -> JsonValue {
    match serde_json::Number::from_f64(d) {
        Some(n) => JsonValue::Number(n),
        None if d.is_nan() => JsonValue::String("NaN".into()),
        None if d.is_sign_positive() => JsonValue::String("Infinity".into()),
        None => JsonValue::String("-Infinity".into()),
    }
}

fn decode_double(payload: &JsonValue) -> Result<f64, DecodeError> {
    match payload {
        JsonValue::Number(n) => n
            .as_f64()
            .ok_or_else(|| DecodeError::invalid(DOUBLE_VALUE, format!("`{}` is not an f64", n))),
        JsonValue::String(s) => match s.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            _ => Err(DecodeError::invalid(DOUBLE_VALUE, format!("`{}`", s))),
        },
        other => Err(DecodeError::invalid(
            DOUBLE_VALUE,
            format!("expected a number, found {}", json_kind(other)),
        )),
    }
}

pub(crate) fn encode_timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub(crate) fn decode_timestamp(s: &str) -> Result<DateTime<Utc>, DecodeError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DecodeError::invalid(TIMESTAMP_VALUE, format!("`{}`: {}", s, e)))
}

fn json_kind(json: &JsonValue) -> &'static str {
    match json {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn round_trip(value: Value) {
        let encoded = value.to_json();
        assert_eq!(Value::from_json(&encoded).unwrap(), value, "{}", encoded);
    }

    #[test]
    fn test_scalar_round_trips() {
        round_trip(Value::Null);
        round_trip(Value::Boolean(false));
        round_trip(Value::Integer(i64::MAX));
        round_trip(Value::Integer(i64::MIN));
        round_trip(Value::Double(-12.5));
        round_trip(Value::String("Ada".into()));
        round_trip(Value::Bytes(vec![0, 159, 146, 150]));
        round_trip(Value::GeoPoint(GeoPoint::new(51.5, -0.12)));
        round_trip(Value::Timestamp(
            Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()
                + chrono::Duration::nanoseconds(123_456_789),
        ));
        round_trip(Value::Reference(
            Reference::parse("projects/p1/databases/(default)/documents/a/b").unwrap(),
        ));
    }

    #[test]
    fn test_nested_round_trip() {
        let mut inner = BTreeMap::new();
        inner.insert("tags".to_string(), Value::Array(vec![Value::String("x".into()), Value::Null]));
        inner.insert("count".to_string(), Value::Integer(3));
        round_trip(Value::Map(inner));
        round_trip(Value::Array(vec![Value::Map(BTreeMap::new()), Value::Array(vec![])]));
    }

    #[test]
    fn test_integer_is_encoded_as_string() {
        assert_eq!(
            Value::Integer(9_007_199_254_740_993).to_json(),
            json!({ "integerValue": "9007199254740993" })
        );
    }

    #[test]
    fn test_integer_overflow_is_an_error() {
        let err = Value::from_json(&json!({ "integerValue": "9223372036854775808" })).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidPayload { tag: "integerValue", .. }));

        let err = Value::from_json(&json!({ "integerValue": "abc" })).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidPayload { tag: "integerValue", .. }));
    }

    #[test]
    fn test_non_finite_doubles() {
        assert_eq!(Value::Double(f64::INFINITY).to_json(), json!({ "doubleValue": "Infinity" }));
        let decoded = Value::from_json(&json!({ "doubleValue": "NaN" })).unwrap();
        assert!(matches!(decoded, Value::Double(d) if d.is_nan()));
        round_trip(Value::Double(f64::NEG_INFINITY));
    }

    #[test]
    fn test_tag_count_is_enforced() {
        assert_eq!(Value::from_json(&json!({})), Err(DecodeError::MissingTag));
        assert!(matches!(
            Value::from_json(&json!({ "stringValue": "a", "booleanValue": true })),
            Err(DecodeError::MultipleTags(_))
        ));
        assert_eq!(
            Value::from_json(&json!({ "fooValue": 1 })),
            Err(DecodeError::UnknownTag("fooValue".into()))
        );
        assert_eq!(Value::from_json(&json!("raw")), Err(DecodeError::NotAnObject("string")));
    }

    #[test]
    fn test_empty_composites_from_server() {
        assert_eq!(
            Value::from_json(&json!({ "mapValue": {} })).unwrap(),
            Value::Map(BTreeMap::new())
        );
        assert_eq!(
            Value::from_json(&json!({ "arrayValue": {} })).unwrap(),
            Value::Array(vec![])
        );
        assert_eq!(
            Value::from_json(&json!({ "geoPointValue": { "latitude": 10.0 } })).unwrap(),
            Value::GeoPoint(GeoPoint::new(10.0, 0.0))
        );
    }

    #[test]
    fn test_nested_error_names_the_field() {
        let err = Value::from_json(&json!({
            "mapValue": { "fields": { "age": { "integerValue": "x" } } }
        }))
        .unwrap_err();
        assert!(matches!(err, DecodeError::Field { ref name, .. } if name == "age"));
    }

    #[test]
    fn test_reference_with_short_path_fails() {
        let err = Value::from_json(&json!({ "referenceValue": "projects/p/databases/d" })).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidReference { .. }));
    }
}
