//! Conversions between native Rust types and Firestore [`Value`]s.
//!
//! [`ToValue`] and [`FromValue`] cover the scalar, nullable and composite
//! types. A document's fields are a [`Fields`] collection; user types become
//! documents by implementing [`FirestoreRecord`].

use super::resource::Reference;
use super::value::{decode_fields, encode_fields, DecodeError, GeoPoint, Value};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::ser::Error as _;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};

/// Converts a Rust value into a Firestore value.
pub trait ToValue {
    fn to_value(&self) -> Value;
}

/// Converts a Firestore value into a Rust value.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, DecodeError>;

    /// Called when a record field is absent. Only nullable types accept this.
    fn from_missing(name: &str) -> Result<Self, DecodeError> {
        Err(DecodeError::MissingField(name.to_string()))
    }
}

/// A type stored as the fields of a Firestore document.
pub trait FirestoreRecord: Sized {
    fn to_fields(&self) -> Fields;
    fn from_fields(fields: &Fields) -> Result<Self, DecodeError>;
}

/// Raw binary data, stored as `bytesValue`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Blob(pub Vec<u8>);

fn mismatch(expected: &'static str, found: &Value) -> DecodeError {
    DecodeError::TypeMismatch {
        expected,
        found: found.kind(),
    }
}

impl ToValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        Ok(value.clone())
    }
}

impl<T: ToValue + ?Sized> ToValue for &T {
    fn to_value(&self) -> Value {
        (**self).to_value()
    }
}

impl ToValue for str {
    fn to_value(&self) -> Value {
        Value::String(self.to_string())
    }
}

impl ToValue for String {
    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::String(s) => Ok(s.clone()),
            other => Err(mismatch("string", other)),
        }
    }
}

impl ToValue for bool {
    fn to_value(&self) -> Value {
        Value::Boolean(*self)
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Boolean(b) => Ok(*b),
            other => Err(mismatch("boolean", other)),
        }
    }
}

macro_rules! integer_value {
    ($($t:ty),*) => {
        $(
            impl ToValue for $t {
                fn to_value(&self) -> Value {
                    Value::Integer(i64::from(*self))
                }
            }

            impl FromValue for $t {
                fn from_value(value: &Value) -> Result<Self, DecodeError> {
                    match value {
                        Value::Integer(i) => <$t>::try_from(*i).map_err(|_| {
                            DecodeError::invalid(
                                "integerValue",
                                format!("{} does not fit in {}", i, stringify!($t)),
                            )
                        }),
                        other => Err(mismatch("integer", other)),
                    }
                }
            }
        )*
    };
}

integer_value!(i8, i16, i32, i64, u8, u16, u32);

impl ToValue for f64 {
    fn to_value(&self) -> Value {
        Value::Double(*self)
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Double(d) => Ok(*d),
            // Other clients may store whole numbers in a double field as integers.
            Value::Integer(i) => Ok(*i as f64),
            other => Err(mismatch("double", other)),
        }
    }
}

impl ToValue for f32 {
    fn to_value(&self) -> Value {
        Value::Double(f64::from(*self))
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        f64::from_value(value).map(|d| d as f32)
    }
}

impl ToValue for DateTime<Utc> {
    fn to_value(&self) -> Value {
        Value::Timestamp(*self)
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Timestamp(t) => Ok(*t),
            other => Err(mismatch("timestamp", other)),
        }
    }
}

impl ToValue for GeoPoint {
    fn to_value(&self) -> Value {
        Value::GeoPoint(*self)
    }
}

impl FromValue for GeoPoint {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::GeoPoint(gp) => Ok(*gp),
            other => Err(mismatch("geo point", other)),
        }
    }
}

impl ToValue for Reference {
    fn to_value(&self) -> Value {
        Value::Reference(self.clone())
    }
}

impl FromValue for Reference {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Reference(r) => Ok(r.clone()),
            other => Err(mismatch("reference", other)),
        }
    }
}

impl ToValue for Blob {
    fn to_value(&self) -> Value {
        Value::Bytes(self.0.clone())
    }
}

impl FromValue for Blob {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Bytes(b) => Ok(Blob(b.clone())),
            other => Err(mismatch("bytes", other)),
        }
    }
}

/// `None` is written as an explicit `nullValue`, not as an absent field.
impl<T: ToValue> ToValue for Option<T> {
    fn to_value(&self) -> Value {
        match self {
            Some(inner) => inner.to_value(),
            None => Value::Null,
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        // Null wins even when the inner type could decode it.
        if value.is_null() {
            return Ok(None);
        }
        T::from_value(value).map(Some)
    }

    fn from_missing(_name: &str) -> Result<Self, DecodeError> {
        Ok(None)
    }
}

impl<T: ToValue> ToValue for [T] {
    fn to_value(&self) -> Value {
        Value::Array(self.iter().map(ToValue::to_value).collect())
    }
}

impl<T: ToValue> ToValue for Vec<T> {
    fn to_value(&self) -> Value {
        self.as_slice().to_value()
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Array(values) => values.iter().map(T::from_value).collect(),
            other => Err(mismatch("array", other)),
        }
    }
}

impl<T: ToValue> ToValue for BTreeMap<String, T> {
    fn to_value(&self) -> Value {
        Value::Map(
            self.iter()
                .map(|(k, v)| (k.clone(), v.to_value()))
                .collect(),
        )
    }
}

impl<T: FromValue> FromValue for BTreeMap<String, T> {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Map(fields) => fields
                .iter()
                .map(|(k, v)| {
                    T::from_value(v)
                        .map(|v| (k.clone(), v))
                        .map_err(|e| e.in_field(k))
                })
                .collect(),
            other => Err(mismatch("map", other)),
        }
    }
}

impl<T: ToValue> ToValue for HashMap<String, T> {
    fn to_value(&self) -> Value {
        Value::Map(
            self.iter()
                .map(|(k, v)| (k.clone(), v.to_value()))
                .collect(),
        )
    }
}

impl<T: FromValue> FromValue for HashMap<String, T> {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        BTreeMap::<String, T>::from_value(value).map(|map| map.into_iter().collect())
    }
}

/// The fields of a document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Fields(BTreeMap<String, Value>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`Fields::insert`].
    pub fn with(mut self, name: impl Into<String>, value: impl ToValue) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl ToValue) {
        self.0.insert(name.into(), value.to_value());
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    /// Decodes a single field, reporting which field failed.
    pub fn get<T: FromValue>(&self, name: &str) -> Result<T, DecodeError> {
        match self.0.get(name) {
            Some(value) => T::from_value(value).map_err(|e| e.in_field(name)),
            None => T::from_missing(name),
        }
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }

    /// Encodes the fields as the `fields` object of a document body.
    pub fn to_json(&self) -> Map<String, JsonValue> {
        encode_fields(&self.0)
    }

    pub fn from_json(fields: &Map<String, JsonValue>) -> Result<Self, DecodeError> {
        decode_fields(fields).map(Self)
    }

    /// Builds fields from any serializable struct through `serde_json`.
    ///
    /// Plain JSON has no timestamp, reference or geo point types, so those
    /// arrive as strings and maps. Implement [`FirestoreRecord`] when that
    /// fidelity matters.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        match serde_json::to_value(value)? {
            JsonValue::Object(map) => map
                .into_iter()
                .map(|(k, v)| Ok((k, from_plain_json(v)?)))
                .collect::<Result<BTreeMap<_, _>, serde_json::Error>>()
                .map(Self),
            _ => Err(serde_json::Error::custom(
                "Can only store objects as documents",
            )),
        }
    }

    /// Deserializes the fields into any `DeserializeOwned` type through `serde_json`.
    pub fn deserialize_into<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let map = self
            .0
            .iter()
            .map(|(k, v)| (k.clone(), to_plain_json(v)))
            .collect();
        serde_json::from_value(JsonValue::Object(map))
    }
}

impl FromIterator<(String, Value)> for Fields {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<BTreeMap<String, Value>> for Fields {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

impl FirestoreRecord for Fields {
    fn to_fields(&self) -> Fields {
        self.clone()
    }

    fn from_fields(fields: &Fields) -> Result<Self, DecodeError> {
        Ok(fields.clone())
    }
}

impl ToValue for Fields {
    fn to_value(&self) -> Value {
        Value::Map(self.0.clone())
    }
}

impl FromValue for Fields {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Map(fields) => Ok(Self(fields.clone())),
            other => Err(mismatch("map", other)),
        }
    }
}

fn from_plain_json(value: JsonValue) -> Result<Value, serde_json::Error> {
    Ok(match value {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Boolean(b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else if n.is_u64() {
                return Err(serde_json::Error::custom(format!(
                    "integer {} does not fit in a 64-bit signed integerValue",
                    n
                )));
            } else {
                Value::Double(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        JsonValue::String(s) => Value::String(s),
        JsonValue::Array(a) => Value::Array(
            a.into_iter()
                .map(from_plain_json)
                .collect::<Result<_, _>>()?,
        ),
        JsonValue::Object(o) => Value::Map(
            o.into_iter()
                .map(|(k, v)| Ok((k, from_plain_json(v)?)))
                .collect::<Result<_, serde_json::Error>>()?,
        ),
    })
}

fn to_plain_json(value: &Value) -> JsonValue {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde_json::json;

    match value {
        Value::Null => JsonValue::Null,
        Value::Boolean(b) => JsonValue::Bool(*b),
        Value::Integer(i) => JsonValue::Number((*i).into()),
        Value::Double(d) => serde_json::Number::from_f64(*d)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Value::Timestamp(t) => JsonValue::String(super::value::encode_timestamp(t)),
        Value::String(s) => JsonValue::String(s.clone()),
        Value::Bytes(b) => JsonValue::String(STANDARD.encode(b)),
        Value::Reference(r) => JsonValue::String(r.name()),
        Value::GeoPoint(gp) => json!({ "latitude": gp.latitude, "longitude": gp.longitude }),
        Value::Array(values) => JsonValue::Array(values.iter().map(to_plain_json).collect()),
        Value::Map(fields) => JsonValue::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), to_plain_json(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq)]
    struct User {
        name: String,
        age: i64,
        nickname: Option<String>,
        home: GeoPoint,
        joined: DateTime<Utc>,
        manager: Option<Reference>,
        tags: Vec<String>,
    }

    impl FirestoreRecord for User {
        fn to_fields(&self) -> Fields {
            Fields::new()
                .with("name", &self.name)
                .with("age", self.age)
                .with("nickname", &self.nickname)
                .with("home", self.home)
                .with("joined", self.joined)
                .with("manager", &self.manager)
                .with("tags", &self.tags)
        }

        fn from_fields(fields: &Fields) -> Result<Self, DecodeError> {
            Ok(Self {
                name: fields.get("name")?,
                age: fields.get("age")?,
                nickname: fields.get("nickname")?,
                home: fields.get("home")?,
                joined: fields.get("joined")?,
                manager: fields.get("manager")?,
                tags: fields.get("tags")?,
            })
        }
    }

    fn ada() -> User {
        User {
            name: "Ada".into(),
            age: 36,
            nickname: None,
            home: GeoPoint::new(51.5, -0.12),
            joined: Utc.with_ymd_and_hms(1843, 7, 1, 12, 0, 0).unwrap(),
            manager: Some(Reference::new("p", "(default)", "users/babbage").unwrap()),
            tags: vec!["math".into(), "engines".into()],
        }
    }

    #[test]
    fn test_record_round_trip_through_json() {
        let user = ada();
        let json = user.to_fields().to_json();
        assert_eq!(json["age"], json!({ "integerValue": "36" }));
        assert_eq!(json["nickname"], json!({ "nullValue": null }));
        assert_eq!(json["joined"], json!({ "timestampValue": "1843-07-01T12:00:00Z" }));
        assert_eq!(
            json["manager"],
            json!({ "referenceValue": "projects/p/databases/(default)/documents/users/babbage" })
        );

        let decoded = User::from_fields(&Fields::from_json(&json).unwrap()).unwrap();
        assert_eq!(decoded, user);
    }

    #[test]
    fn test_null_takes_precedence_over_inner_decoder() {
        let fields = Fields::new().with("payload", Value::Null);
        // `Value` itself would accept null, but the nullable wrapper sees it first.
        let decoded: Option<Value> = fields.get("payload").unwrap();
        assert_eq!(decoded, None);

        let fields = Fields::new().with("payload", "x");
        let decoded: Option<Value> = fields.get("payload").unwrap();
        assert_eq!(decoded, Some(Value::String("x".into())));
    }

    #[test]
    fn test_missing_fields() {
        let fields = Fields::new();
        assert_eq!(fields.get::<Option<String>>("nickname").unwrap(), None);
        assert_eq!(
            fields.get::<String>("name").unwrap_err(),
            DecodeError::MissingField("name".into())
        );
    }

    #[test]
    fn test_type_mismatch_names_field() {
        let fields = Fields::new().with("age", "thirty");
        let err = fields.get::<i64>("age").unwrap_err();
        assert_eq!(err.to_string(), "field `age`: expected integer, found string");
    }

    #[test]
    fn test_narrow_integer_out_of_range() {
        let fields = Fields::new().with("small", 300i64);
        assert!(fields.get::<u8>("small").is_err());
        assert_eq!(fields.get::<i32>("small").unwrap(), 300);
    }

    #[test]
    fn test_maps_and_blobs() {
        let mut scores = HashMap::new();
        scores.insert("a".to_string(), 1i64);
        scores.insert("b".to_string(), 2i64);
        let fields = Fields::new()
            .with("scores", &scores)
            .with("raw", Blob(vec![1, 2, 3]));

        let json = fields.to_json();
        assert_eq!(json["raw"], json!({ "bytesValue": "AQID" }));

        let decoded = Fields::from_json(&json).unwrap();
        assert_eq!(decoded.get::<HashMap<String, i64>>("scores").unwrap(), scores);
        assert_eq!(decoded.get::<Blob>("raw").unwrap(), Blob(vec![1, 2, 3]));
    }

    #[test]
    fn test_serde_bridge() {
        #[derive(Serialize, Deserialize, Debug, PartialEq)]
        struct Profile {
            name: String,
            age: i32,
            score: f64,
            bio: Option<String>,
        }

        let profile = Profile {
            name: "Alice".into(),
            age: 30,
            score: 9.5,
            bio: None,
        };
        let fields = Fields::from_serialize(&profile).unwrap();
        assert_eq!(fields.value("age"), Some(&Value::Integer(30)));
        assert_eq!(fields.value("score"), Some(&Value::Double(9.5)));
        assert_eq!(fields.value("bio"), Some(&Value::Null));
        assert_eq!(fields.deserialize_into::<Profile>().unwrap(), profile);

        assert!(Fields::from_serialize(&vec![1, 2]).is_err());
    }

    #[test]
    fn test_serde_bridge_rejects_unsigned_overflow() {
        #[derive(Serialize)]
        struct Counter {
            hits: u64,
        }

        let err = Fields::from_serialize(&Counter { hits: u64::MAX }).unwrap_err();
        assert!(err.to_string().contains("18446744073709551615"), "{}", err);

        let fields = Fields::from_serialize(&Counter { hits: i64::MAX as u64 }).unwrap();
        assert_eq!(fields.value("hits"), Some(&Value::Integer(i64::MAX)));
    }
}
