//! Extension codecs: `{"$date": ms}` and `{"$ref": uri}`.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::client::Client;
use crate::data::Data;
use crate::error::Error;
use crate::types::{DATE, REF};

/// A reserved single-key object shape with its own encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// `{"$date": <epoch milliseconds>}` ⇄ UTC timestamp.
    Date,
    /// `{"$ref": "<uri>"}` ⇄ live resource instance.
    Reference,
}

impl Codec {
    /// Codec for a property name, if it is one of the reserved keys.
    pub fn for_key(key: &str) -> Option<Self> {
        match key {
            DATE => Some(Codec::Date),
            REF => Some(Codec::Reference),
            _ => None,
        }
    }

    /// Codec tagged by a set of declared property names.
    pub fn for_keys<'a>(mut keys: impl Iterator<Item = &'a String>) -> Option<Self> {
        keys.find_map(|k| Codec::for_key(k))
    }

    pub fn key(&self) -> &'static str {
        match self {
            Codec::Date => DATE,
            Codec::Reference => REF,
        }
    }

    /// Whether `raw` is this codec's wire shape.
    pub fn matches(&self, raw: &Value) -> bool {
        raw.get(self.key()).is_some()
    }

    /// Whether `data` can be encoded by this codec.
    pub fn accepts(&self, data: &Data) -> bool {
        match (self, data) {
            (Codec::Date, Data::Date(_)) | (Codec::Reference, Data::Resource(_)) => true,
            (_, Data::Json(raw)) => self.matches(raw),
            _ => false,
        }
    }

    /// Encode a value into the wire shape.
    ///
    /// Values that are already in wire shape pass through.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if `data` is not something this codec
    /// encodes, or `Error::UnsavedReference` for a resource without a URI.
    pub fn encode(&self, data: &Data) -> Result<Value, Error> {
        match data {
            Data::Json(raw) if self.matches(raw) => Ok(raw.clone()),
            Data::Date(_) | Data::Resource(_) => {
                let mut obj = Map::new();
                obj.insert(self.key().to_string(), self.encode_inner(data)?);
                Ok(Value::Object(obj))
            }
            _ => Err(self.unencodable()),
        }
    }

    /// Encode the value that sits under this codec's key.
    ///
    /// Used when the key itself is a property of an enclosing object, so
    /// the wrapper is already there. Plain JSON passes through untouched.
    ///
    /// # Errors
    ///
    /// Same as [`Codec::encode`].
    pub fn encode_inner(&self, data: &Data) -> Result<Value, Error> {
        match (self, data) {
            (Codec::Date, Data::Date(t)) => Ok(Value::from(t.timestamp_millis())),
            (Codec::Reference, Data::Resource(instance)) => match instance.uri() {
                Some(uri) => Ok(Value::from(uri)),
                None => Err(Error::UnsavedReference {
                    resource: instance.resource_type().name().to_string(),
                }),
            },
            (_, Data::Json(raw)) => Ok(raw.clone()),
            _ => Err(self.unencodable()),
        }
    }

    fn unencodable(&self) -> Error {
        Error::invalid(
            "",
            format!("expected a value encodable as {{\"{}\": ...}}", self.key()),
        )
    }

    /// Decode the wire shape.
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` for a malformed payload, or whatever the
    /// client raises resolving a reference.
    pub fn decode(&self, raw: &Value, client: &Client) -> Result<Data, Error> {
        match self {
            Codec::Date => {
                let millis = raw.get(DATE).and_then(Value::as_i64).ok_or_else(|| Error::Decode {
                    message: format!("expected integer milliseconds in {raw}"),
                })?;
                decode_date(millis).map(Data::Date)
            }
            Codec::Reference => {
                let uri = raw.get(REF).and_then(Value::as_str).ok_or_else(|| Error::Decode {
                    message: format!("expected string reference in {raw}"),
                })?;
                client.instance(uri).map(Data::Resource)
            }
        }
    }
}

/// Epoch milliseconds to a UTC timestamp.
///
/// # Errors
///
/// Returns `Error::Decode` when the value is outside chrono's range.
pub fn decode_date(millis: i64) -> Result<DateTime<Utc>, Error> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| Error::Decode {
        message: format!("timestamp {millis} out of range"),
    })
}

/// Whether `obj` is exactly one reserved key in wire shape.
pub fn single_key_codec(obj: &Map<String, Value>) -> Option<Codec> {
    if obj.len() == 1 {
        obj.keys().next().and_then(|k| Codec::for_key(k))
    } else {
        None
    }
}
