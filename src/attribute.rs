//! Attribute types: what a schema property definition means at runtime.
//!
//! An [`AttributeType`] is parsed once from a bundled (ref-free) schema
//! fragment and then used in both directions:
//!
//! - [`serialize`](AttributeType::serialize) turns an application value into
//!   wire JSON and checks it against the fragment;
//! - [`resolve`](AttributeType::resolve) turns stored wire JSON into an
//!   application value, dereferencing `$ref`/`$date`/`$uri` shapes.
//!
//! # Dispatch
//!
//! | Fragment | Kind |
//! |----------|------|
//! | has `properties` | `Object` |
//! | has `items` | `Array` |
//! | has `oneOf` | `OneOf` |
//! | has `anyOf` | `AnyOf` |
//! | `type` lists all six JSON types | `Any` |
//! | `additionalProperties` is a schema | `Map` |
//! | has `type` | `Scalar` |
//! | anything else | `Any` |
//!
//! # oneOf / anyOf
//!
//! Alternatives are tried in declared order and the first that accepts the
//! value wins. Schemas with overlapping alternatives must list the most
//! specific one first.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use crate::client::Client;
use crate::codec::Codec;
use crate::data::Data;
use crate::error::Error;
use crate::types::{
    JsonType, ADDITIONAL_PROPERTIES, ANY_OF, DEFAULT, DESCRIPTION, ITEMS, ONE_OF, PROPERTIES,
    READ_ONLY, REQUIRED, RESERVED_SIGIL, URI,
};
use crate::validator::validate_against_schema;

/// Runtime behavior of one schema fragment.
#[derive(Debug, Clone)]
pub struct AttributeType {
    kind: AttributeKind,
    types: Vec<JsonType>,
    definition: Value,
    read_only: bool,
    description: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AttributeKind {
    Scalar,
    Object {
        properties: BTreeMap<String, AttributeType>,
        required: BTreeSet<String>,
        additional: bool,
        codec: Option<Codec>,
    },
    Array {
        items: Box<AttributeType>,
    },
    OneOf(Vec<AttributeType>),
    AnyOf(Vec<AttributeType>),
    Map {
        values: Box<AttributeType>,
    },
    Any,
}

impl AttributeType {
    /// Build from a bundled schema fragment.
    pub fn parse(definition: &Value) -> Self {
        let read_only = definition
            .get(READ_ONLY)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let description = definition
            .get(DESCRIPTION)
            .and_then(Value::as_str)
            .map(String::from);
        let mut types = JsonType::declared(definition);

        let kind = if let Some(props) = definition.get(PROPERTIES).and_then(Value::as_object) {
            let properties: BTreeMap<String, AttributeType> = props
                .iter()
                .map(|(name, prop)| (name.clone(), AttributeType::parse(prop)))
                .collect();
            let required = required_set(definition);
            let additional = definition
                .get(ADDITIONAL_PROPERTIES)
                .is_some_and(is_truthy);
            let codec = Codec::for_keys(properties.keys());
            if types.is_empty() {
                types.push(JsonType::Object);
            }
            AttributeKind::Object {
                properties,
                required,
                additional,
                codec,
            }
        } else if let Some(items) = definition.get(ITEMS) {
            if types.is_empty() {
                types.push(JsonType::Array);
            }
            AttributeKind::Array {
                items: Box::new(AttributeType::parse(items)),
            }
        } else if let Some(alternatives) = definition.get(ONE_OF).and_then(Value::as_array) {
            AttributeKind::OneOf(alternatives.iter().map(AttributeType::parse).collect())
        } else if let Some(alternatives) = definition.get(ANY_OF).and_then(Value::as_array) {
            AttributeKind::AnyOf(alternatives.iter().map(AttributeType::parse).collect())
        } else if JsonType::ALL.iter().all(|t| types.contains(t)) {
            AttributeKind::Any
        } else if let Some(values) = definition
            .get(ADDITIONAL_PROPERTIES)
            .filter(|v| v.is_object())
        {
            if types.is_empty() {
                types.push(JsonType::Object);
            }
            AttributeKind::Map {
                values: Box::new(AttributeType::parse(values)),
            }
        } else if !types.is_empty() {
            AttributeKind::Scalar
        } else {
            AttributeKind::Any
        };

        Self {
            kind,
            types,
            definition: definition.clone(),
            read_only,
            description,
        }
    }

    pub fn kind(&self) -> &AttributeKind {
        &self.kind
    }

    pub fn definition(&self) -> &Value {
        &self.definition
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Declared JSON types; for unions, the types of all alternatives.
    pub fn types(&self) -> Vec<JsonType> {
        match &self.kind {
            AttributeKind::OneOf(alts) | AttributeKind::AnyOf(alts) => {
                let mut all = Vec::new();
                for t in alts.iter().flat_map(AttributeType::types) {
                    if !all.contains(&t) {
                        all.push(t);
                    }
                }
                all
            }
            _ => self.types.clone(),
        }
    }

    /// Short human-readable summary, e.g. `string`, `array<object>`, `oneOf<string|null>`.
    pub fn summary(&self) -> String {
        let names = |types: Vec<JsonType>| {
            types
                .iter()
                .map(JsonType::as_str)
                .collect::<Vec<_>>()
                .join("|")
        };
        match &self.kind {
            AttributeKind::Scalar => names(self.types.clone()),
            AttributeKind::Object { codec: Some(Codec::Date), .. } => "date".to_string(),
            AttributeKind::Object {
                codec: Some(Codec::Reference),
                ..
            } => "reference".to_string(),
            AttributeKind::Object { .. } => "object".to_string(),
            AttributeKind::Array { items } => format!("array<{}>", items.summary()),
            AttributeKind::OneOf(_) => format!("oneOf<{}>", names(self.types())),
            AttributeKind::AnyOf(_) => format!("anyOf<{}>", names(self.types())),
            AttributeKind::Map { values } => format!("map<{}>", values.summary()),
            AttributeKind::Any => "any".to_string(),
        }
    }

    /// Stand-in for a required value that was not supplied.
    ///
    /// `null` for read-only or nullable types, `{}` for objects, `[]` for
    /// arrays, otherwise the declared default (or `null`).
    pub fn empty_value(&self) -> Value {
        let types = self.types();
        if self.read_only || types.contains(&JsonType::Null) {
            Value::Null
        } else if matches!(
            self.kind,
            AttributeKind::Object { .. } | AttributeKind::Map { .. }
        ) || types.first() == Some(&JsonType::Object)
        {
            Value::Object(Map::new())
        } else if matches!(self.kind, AttributeKind::Array { .. })
            || types.first() == Some(&JsonType::Array)
        {
            Value::Array(Vec::new())
        } else {
            self.definition.get(DEFAULT).cloned().unwrap_or(Value::Null)
        }
    }

    /// Whether the runtime shape of `data` fits this type.
    pub fn accepts(&self, data: &Data) -> bool {
        match &self.kind {
            AttributeKind::Any => true,
            AttributeKind::Object { codec: Some(c), .. } => c.accepts(data),
            AttributeKind::Object { .. } => {
                data.is_object_like() || matches!(data, Data::Resource(_))
            }
            AttributeKind::Map { .. } => data.is_object_like(),
            AttributeKind::Array { .. } => {
                matches!(data, Data::List(_) | Data::Json(Value::Array(_)))
            }
            AttributeKind::OneOf(alts) | AttributeKind::AnyOf(alts) => {
                alts.iter().any(|a| a.accepts(data))
            }
            AttributeKind::Scalar => match data {
                Data::Json(raw) => self.types.iter().any(|t| t.matches(raw)),
                _ => false,
            },
        }
    }

    /// Whether stored wire JSON fits this type.
    pub fn matches_raw(&self, raw: &Value) -> bool {
        match &self.kind {
            AttributeKind::Any => true,
            AttributeKind::Object { codec: Some(c), .. } => c.matches(raw),
            AttributeKind::Object { .. } | AttributeKind::Map { .. } => raw.is_object(),
            AttributeKind::Array { .. } => raw.is_array(),
            AttributeKind::OneOf(alts) | AttributeKind::AnyOf(alts) => {
                alts.iter().any(|a| a.matches_raw(raw))
            }
            AttributeKind::Scalar => self.types.iter().any(|t| t.matches(raw)),
        }
    }

    /// Serialize an application value for the wire.
    ///
    /// A null value becomes [`empty_value`](Self::empty_value) when
    /// `required`, otherwise `null`; substituted empty values are not
    /// validated.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` when the value does not conform to the
    /// fragment, `Error::OneOfResolution` when no `oneOf` alternative takes a
    /// required value.
    pub fn serialize(&self, value: &Data, required: bool) -> Result<Value, Error> {
        if value.is_null() {
            return Ok(if required {
                self.empty_value()
            } else {
                Value::Null
            });
        }

        let serialized = match &self.kind {
            AttributeKind::OneOf(alts) => {
                let mut errors = Vec::new();
                for alt in alts {
                    match try_alternative(alt, value, required) {
                        Ok(v) => return Ok(v),
                        Err(e) => errors.push(e),
                    }
                }
                return if required {
                    Err(Error::OneOfResolution { errors })
                } else {
                    Ok(Value::Null)
                };
            }
            AttributeKind::AnyOf(alts) => {
                return Ok(alts
                    .iter()
                    .find_map(|alt| try_alternative(alt, value, required).ok())
                    .unwrap_or(Value::Null));
            }
            AttributeKind::Object {
                codec: Some(codec), ..
            } => codec.encode(value)?,
            AttributeKind::Object {
                properties,
                required: required_props,
                additional,
                ..
            } => match value {
                Data::Resource(instance) => serialize_object(
                    &Data::Json(instance.to_json()),
                    properties,
                    required_props,
                    *additional,
                )?,
                other => serialize_object(other, properties, required_props, *additional)?,
            },
            AttributeKind::Array { items } => {
                let elements = match value {
                    Data::List(list) => list.clone(),
                    Data::Json(Value::Array(arr)) => arr.iter().cloned().map(Data::Json).collect(),
                    other => return Err(self.type_mismatch(other)),
                };
                Value::Array(
                    elements
                        .iter()
                        .map(|e| items.serialize(e, false))
                        .collect::<Result<Vec<_>, _>>()?,
                )
            }
            AttributeKind::Map { values } => {
                if !value.is_object_like() {
                    return Err(self.type_mismatch(value));
                }
                let mut obj = Map::new();
                for key in value.keys() {
                    let v = value.get(&key).unwrap_or_default();
                    obj.insert(key, values.serialize(&v, false)?);
                }
                Value::Object(obj)
            }
            AttributeKind::Scalar => match value {
                Data::Json(raw) => coerce_scalar(raw, &self.types),
                other => return Err(self.type_mismatch(other)),
            },
            AttributeKind::Any => value.to_json()?,
        };

        validate_against_schema(&self.definition, &serialized)?;
        Ok(serialized)
    }

    /// Resolve stored wire JSON into an application value.
    ///
    /// # Errors
    ///
    /// Fails when a `$date` is malformed or a `$ref` names an unknown
    /// resource.
    pub fn resolve(&self, raw: &Value, client: &Client) -> Result<Data, Error> {
        if raw.is_null() {
            let empty = self.empty_value();
            return Ok(match (&self.kind, empty) {
                (AttributeKind::Array { .. }, Value::Array(_)) => Data::List(Vec::new()),
                (_, empty) => Data::Json(empty),
            });
        }

        match &self.kind {
            AttributeKind::Array { items } => match raw {
                Value::Array(arr) => arr
                    .iter()
                    .map(|e| items.resolve(e, client))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Data::List),
                other => Ok(Data::Json(other.clone())),
            },
            AttributeKind::Object {
                codec: Some(codec), ..
            } if codec.matches(raw) => codec.decode(raw, client),
            AttributeKind::Object { properties, .. }
                if properties.contains_key(URI) && raw.get(URI).is_some() =>
            {
                client.resolve_element(raw)
            }
            AttributeKind::Map { values } => match raw {
                Value::Object(obj) => {
                    let mut map = BTreeMap::new();
                    for (k, v) in obj {
                        map.insert(k.clone(), values.resolve(v, client)?);
                    }
                    Ok(Data::Map(map))
                }
                other => Ok(Data::Json(other.clone())),
            },
            AttributeKind::OneOf(alts) | AttributeKind::AnyOf(alts) => {
                match alts.iter().find(|a| a.matches_raw(raw)) {
                    Some(alt) => alt.resolve(raw, client),
                    None => Ok(Data::Json(raw.clone())),
                }
            }
            _ => Ok(Data::Json(raw.clone())),
        }
    }

    fn type_mismatch(&self, value: &Data) -> Error {
        let actual = match value {
            Data::Json(raw) => crate::types::json_type_name(raw),
            Data::Date(_) => "date",
            Data::Resource(_) => "resource",
            Data::List(_) => "list",
            Data::Map(_) => "map",
        };
        Error::invalid("", format!("expected {}, got {actual}", self.summary()))
    }
}

fn try_alternative(alt: &AttributeType, value: &Data, required: bool) -> Result<Value, Error> {
    if alt.accepts(value) {
        alt.serialize(value, required)
    } else {
        Err(alt.type_mismatch(value))
    }
}

fn serialize_object(
    value: &Data,
    properties: &BTreeMap<String, AttributeType>,
    required: &BTreeSet<String>,
    additional: bool,
) -> Result<Value, Error> {
    if !value.is_object_like() {
        return Err(Error::invalid("", "expected object"));
    }

    let keys: Vec<String> = if additional {
        value.keys()
    } else {
        properties.keys().cloned().collect()
    };

    let mut obj = Map::new();
    for key in keys {
        let raw = value.get(&key).unwrap_or_default();
        let serialized = if key.starts_with(RESERVED_SIGIL) {
            match Codec::for_key(&key) {
                Some(codec) => codec.encode_inner(&raw)?,
                None => raw.to_json()?,
            }
        } else if let Some(attr) = properties.get(&key) {
            attr.serialize(&raw, required.contains(&key))
                .map_err(|e| prefix_path(e, &key))?
        } else {
            raw.to_json()?
        };

        if !serialized.is_null() {
            obj.insert(key, serialized);
        }
    }
    Ok(Value::Object(obj))
}

/// Convert to the first declared type where the conversion is lossless.
fn coerce_scalar(raw: &Value, types: &[JsonType]) -> Value {
    match (types.first(), raw) {
        (Some(JsonType::Integer), Value::Number(n)) if !n.is_i64() && !n.is_u64() => n
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
            .map_or_else(|| raw.clone(), |f| Value::from(f as i64)),
        _ => raw.clone(),
    }
}

fn prefix_path(err: Error, key: &str) -> Error {
    match err {
        Error::Validation { errors } => Error::Validation {
            errors: errors
                .into_iter()
                .map(|mut e| {
                    e.path = format!("/{key}{}", e.path);
                    e
                })
                .collect(),
        },
        other => other,
    }
}

fn required_set(definition: &Value) -> BTreeSet<String> {
    definition
        .get(REQUIRED)
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Object(obj) => !obj.is_empty(),
        _ => true,
    }
}
