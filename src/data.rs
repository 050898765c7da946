//! Decoded property values.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::codec::Codec;
use crate::error::Error;
use crate::resource::Instance;

/// A property value as the application sees it.
///
/// Raw JSON stays raw unless its schema says otherwise: `$date` objects
/// become [`Data::Date`], `$ref`/`$uri` objects become [`Data::Resource`],
/// arrays of typed items become [`Data::List`], and `additionalProperties`
/// maps become [`Data::Map`].
#[derive(Debug, Clone)]
pub enum Data {
    Json(Value),
    Date(DateTime<Utc>),
    Resource(Instance),
    List(Vec<Data>),
    Map(BTreeMap<String, Data>),
}

impl Data {
    pub const NULL: Data = Data::Json(Value::Null);

    pub fn is_null(&self) -> bool {
        matches!(self, Data::Json(Value::Null))
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Data::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_json().and_then(Value::as_str)
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_json().and_then(Value::as_i64)
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_json().and_then(Value::as_f64)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_json().and_then(Value::as_bool)
    }

    pub fn as_date(&self) -> Option<&DateTime<Utc>> {
        match self {
            Data::Date(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Data::Resource(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Data]> {
        match self {
            Data::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Data>> {
        match self {
            Data::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Look up a key in an object-like value.
    pub fn get(&self, key: &str) -> Option<Data> {
        match self {
            Data::Map(map) => map.get(key).cloned(),
            Data::Json(Value::Object(obj)) => obj.get(key).cloned().map(Data::Json),
            _ => None,
        }
    }

    /// Keys of an object-like value.
    pub fn keys(&self) -> Vec<String> {
        match self {
            Data::Map(map) => map.keys().cloned().collect(),
            Data::Json(Value::Object(obj)) => obj.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Whether this value is shaped like a JSON object.
    pub fn is_object_like(&self) -> bool {
        matches!(self, Data::Map(_) | Data::Json(Value::Object(_)))
    }

    /// Encode for the wire.
    ///
    /// Timestamps and resources use the extension encodings
    /// (`{"$date": ms}`, `{"$ref": uri}`).
    ///
    /// # Errors
    ///
    /// Returns `Error::UnsavedReference` for a resource without a URI.
    pub fn to_json(&self) -> Result<Value, Error> {
        match self {
            Data::Json(v) => Ok(v.clone()),
            Data::Date(_) => Codec::Date.encode(self),
            Data::Resource(_) => Codec::Reference.encode(self),
            Data::List(items) => items
                .iter()
                .map(Data::to_json)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Data::Map(map) => {
                let mut obj = Map::new();
                for (k, v) in map {
                    obj.insert(k.clone(), v.to_json()?);
                }
                Ok(Value::Object(obj))
            }
        }
    }
}

impl PartialEq for Data {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Data::Json(a), Data::Json(b)) => a == b,
            (Data::Date(a), Data::Date(b)) => a == b,
            (Data::Resource(a), Data::Resource(b)) => a == b,
            (Data::List(a), Data::List(b)) => a == b,
            (Data::Map(a), Data::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl Default for Data {
    fn default() -> Self {
        Data::NULL
    }
}

impl From<Value> for Data {
    fn from(v: Value) -> Self {
        Data::Json(v)
    }
}

impl From<&str> for Data {
    fn from(v: &str) -> Self {
        Data::Json(Value::String(v.to_string()))
    }
}

impl From<String> for Data {
    fn from(v: String) -> Self {
        Data::Json(Value::String(v))
    }
}

impl From<i64> for Data {
    fn from(v: i64) -> Self {
        Data::Json(Value::from(v))
    }
}

impl From<i32> for Data {
    fn from(v: i32) -> Self {
        Data::Json(Value::from(v))
    }
}

impl From<u64> for Data {
    fn from(v: u64) -> Self {
        Data::Json(Value::from(v))
    }
}

impl From<f64> for Data {
    fn from(v: f64) -> Self {
        Data::Json(Value::from(v))
    }
}

impl From<bool> for Data {
    fn from(v: bool) -> Self {
        Data::Json(Value::Bool(v))
    }
}

impl From<DateTime<Utc>> for Data {
    fn from(v: DateTime<Utc>) -> Self {
        Data::Date(v)
    }
}

impl From<Instance> for Data {
    fn from(v: Instance) -> Self {
        Data::Resource(v)
    }
}

impl From<&Instance> for Data {
    fn from(v: &Instance) -> Self {
        Data::Resource(v.clone())
    }
}

impl From<Vec<Data>> for Data {
    fn from(v: Vec<Data>) -> Self {
        Data::List(v)
    }
}

impl From<BTreeMap<String, Data>> for Data {
    fn from(v: BTreeMap<String, Data>) -> Self {
        Data::Map(v)
    }
}

impl<T: Into<Data>> From<Option<T>> for Data {
    fn from(v: Option<T>) -> Self {
        v.map_or(Data::NULL, Into::into)
    }
}
