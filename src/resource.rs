//! Resource types and their instances.
//!
//! A [`ResourceType`] is the runtime descriptor built from one resource
//! schema: its property types and its links, split into class-scoped
//! (`create`, `instances`) and instance-scoped (`self`, `update`, ...).
//!
//! An [`Instance`] is one resource, identified by its `$uri`. Instances
//! obtained through the same [`Client`] for the same URI are the same
//! object: the client keeps an identity map.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::attribute::AttributeType;
use crate::client::{Client, ClientInner};
use crate::collection::LazyCollection;
use crate::data::Data;
use crate::error::Error;
use crate::link::Link;
use crate::loader::SchemaResolver;
use crate::naming::{attribute_name, type_name};
use crate::proxy::{Binding, LinkProxy};
use crate::types::{LINKS, PROPERTIES, REQUIRED, RESERVED_SIGIL, URI};

/// Relation names the instance lifecycle relies on.
pub const SELF_REL: &str = "self";
pub const CREATE_REL: &str = "create";
pub const UPDATE_REL: &str = "update";
pub const DESTROY_REL: &str = "destroy";
pub const INSTANCES_REL: &str = "instances";

/// Descriptor of one resource: properties and links.
#[derive(Clone)]
pub struct ResourceType {
    inner: Arc<ResourceTypeInner>,
}

struct ResourceTypeInner {
    client: Weak<ClientInner>,
    name: String,
    type_name: String,
    description: Option<String>,
    schema_ref: String,
    schema: Value,
    bundled: Value,
    properties: BTreeMap<String, AttributeType>,
    required: BTreeSet<String>,
    class_links: Vec<Arc<Link>>,
    instance_links: Vec<Arc<Link>>,
}

impl ResourceType {
    /// Build the descriptor for resource `name` from its schema document.
    ///
    /// # Errors
    ///
    /// Fails when a `$ref` in the schema cannot be resolved or a link is
    /// malformed.
    pub(crate) fn factory(
        client: Weak<ClientInner>,
        name: &str,
        description: Option<String>,
        schema_ref: &str,
        schema: &Value,
        resolver: &SchemaResolver,
    ) -> Result<Self, Error> {
        let bundled = resolver.bundle(schema, schema_ref)?;

        let properties: BTreeMap<String, AttributeType> = bundled
            .get(PROPERTIES)
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(k, v)| (k.clone(), AttributeType::parse(v)))
                    .collect()
            })
            .unwrap_or_default();

        let required = bundled
            .get(REQUIRED)
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let mut class_links = Vec::new();
        let mut instance_links = Vec::new();
        for definition in schema
            .get(LINKS)
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let link = Arc::new(Link::from_schema(definition, resolver, schema_ref)?);
            if link.is_instance_scoped() {
                instance_links.push(link);
            } else {
                class_links.push(link);
            }
        }

        debug!(
            resource = name,
            properties = properties.len(),
            class_links = class_links.len(),
            instance_links = instance_links.len(),
            "registered resource type"
        );

        Ok(Self {
            inner: Arc::new(ResourceTypeInner {
                client,
                name: name.to_string(),
                type_name: type_name(name),
                description,
                schema_ref: schema_ref.to_string(),
                schema: schema.clone(),
                bundled,
                properties,
                required,
                class_links,
                instance_links,
            }),
        })
    }

    /// Name as it appears in the root schema, e.g. `user`.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// UpperCamelCase name, e.g. `User`.
    pub fn type_name(&self) -> &str {
        &self.inner.type_name
    }

    pub fn description(&self) -> Option<&str> {
        self.inner.description.as_deref()
    }

    /// Reference of the schema document, e.g. `/user/schema#`.
    pub fn schema_ref(&self) -> &str {
        &self.inner.schema_ref
    }

    /// The schema document as served.
    pub fn schema(&self) -> &Value {
        &self.inner.schema
    }

    /// The schema with every `$ref` inlined and `links` removed.
    pub fn bundled_schema(&self) -> &Value {
        &self.inner.bundled
    }

    pub fn property(&self, name: &str) -> Option<&AttributeType> {
        self.inner.properties.get(name)
    }

    pub fn properties(&self) -> &BTreeMap<String, AttributeType> {
        &self.inner.properties
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.inner.required.contains(name)
    }

    /// All links, class-scoped first.
    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.inner
            .class_links
            .iter()
            .chain(&self.inner.instance_links)
            .map(Arc::as_ref)
    }

    /// A link bound to this type, by declared or snake_case relation name.
    ///
    /// Instance-scoped links can be called this way when their placeholders
    /// are given as parameters.
    pub fn link(&self, rel: &str) -> Result<LinkProxy, Error> {
        self.find_link(&self.inner.class_links, rel)
            .or_else(|| self.find_link(&self.inner.instance_links, rel))
            .map(|link| LinkProxy::new(link, Binding::Resource(self.clone())))
            .ok_or_else(|| self.unknown_link(rel))
    }

    fn find_link(&self, links: &[Arc<Link>], rel: &str) -> Option<Arc<Link>> {
        links
            .iter()
            .find(|l| l.rel() == rel || l.name() == attribute_name(rel))
            .cloned()
    }

    fn unknown_link(&self, rel: &str) -> Error {
        Error::UnknownLink {
            resource: self.inner.type_name.clone(),
            rel: rel.to_string(),
        }
    }

    /// The owning client.
    ///
    /// # Errors
    ///
    /// Returns `Error::ClientDropped` once the client is gone.
    pub fn client(&self) -> Result<Client, Error> {
        self.inner
            .client
            .upgrade()
            .map(Client::from_inner)
            .ok_or(Error::ClientDropped)
    }

    /// A new, unsaved instance.
    pub fn build(&self) -> Instance {
        Instance::new(self.clone(), None, Some(Map::new()))
    }

    /// Load the instance with identifier `id` through the `self` link.
    pub fn fetch(&self, id: impl fmt::Display) -> Result<Instance, Error> {
        let link = self
            .find_link(&self.inner.instance_links, SELF_REL)
            .ok_or_else(|| self.unknown_link(SELF_REL))?;
        let values: BTreeMap<String, String> = link
            .route()
            .keys()
            .iter()
            .map(|k| (k.clone(), id.to_string()))
            .collect();
        let uri = link.route().expand(&values)?;

        let instance = self.client()?.instance(&uri)?;
        instance.refresh()?;
        Ok(instance)
    }

    /// The `instances` collection.
    pub fn instances(&self) -> Result<LazyCollection, Error> {
        self.link(INSTANCES_REL)?.collection()
    }
}

impl PartialEq for ResourceType {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceType")
            .field("name", &self.inner.name)
            .field("schema_ref", &self.inner.schema_ref)
            .finish()
    }
}

/// One resource.
///
/// Raw properties are kept as received and decoded on read. An instance
/// known only by URI fetches itself the first time a property is read.
#[derive(Clone)]
pub struct Instance {
    inner: Arc<InstanceInner>,
}

struct InstanceInner {
    resource: ResourceType,
    state: Mutex<InstanceState>,
}

#[derive(Default)]
struct InstanceState {
    id: Option<String>,
    uri: Option<String>,
    raw: Map<String, Value>,
    loaded: bool,
    extra: BTreeMap<String, Data>,
}

/// Final path segment of a URI.
pub fn id_from_uri(uri: &str) -> Option<String> {
    uri.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(String::from)
}

impl Instance {
    pub(crate) fn new(
        resource: ResourceType,
        uri: Option<String>,
        raw: Option<Map<String, Value>>,
    ) -> Self {
        let loaded = raw.is_some();
        let raw = raw.unwrap_or_default();
        let uri = uri.or_else(|| raw.get(URI).and_then(Value::as_str).map(String::from));
        Self {
            inner: Arc::new(InstanceInner {
                resource,
                state: Mutex::new(InstanceState {
                    id: uri.as_deref().and_then(id_from_uri),
                    uri,
                    raw,
                    loaded,
                    extra: BTreeMap::new(),
                }),
            }),
        }
    }

    pub fn resource_type(&self) -> &ResourceType {
        &self.inner.resource
    }

    /// Whether both handles are the same object, not just the same URI.
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Identifier: the last segment of the URI. Set once.
    pub fn id(&self) -> Option<String> {
        self.inner.state.lock().id.clone()
    }

    pub fn uri(&self) -> Option<String> {
        self.inner.state.lock().uri.clone()
    }

    /// Whether properties have been received from the server or set locally.
    pub fn is_loaded(&self) -> bool {
        self.inner.state.lock().loaded
    }

    /// Stored wire value of a property, without fetching.
    pub fn raw_property(&self, name: &str) -> Option<Value> {
        self.inner.state.lock().raw.get(name).cloned()
    }

    /// All stored wire values, without fetching.
    pub fn raw(&self) -> Map<String, Value> {
        self.inner.state.lock().raw.clone()
    }

    /// Writable properties: what `create` and `update` send.
    ///
    /// `$`-prefixed keys and read-only properties are left out.
    pub fn to_json(&self) -> Value {
        let resource = self.resource_type();
        let state = self.inner.state.lock();
        Value::Object(
            state
                .raw
                .iter()
                .filter(|(k, _)| !k.starts_with(RESERVED_SIGIL))
                .filter(|(k, _)| !resource.property(k).is_some_and(AttributeType::is_read_only))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Read a property.
    ///
    /// Declared properties are decoded through their type, fetching the
    /// instance first if only its URI is known. Other names come from
    /// values set locally, then from raw properties.
    ///
    /// # Errors
    ///
    /// `Error::UnknownProperty` for a name that is neither declared nor set,
    /// or whatever fetching or decoding raises.
    pub fn get(&self, name: &str) -> Result<Data, Error> {
        let resource = self.resource_type();
        if let Some(attribute) = resource.property(name) {
            self.materialize()?;
            let raw = self.raw_property(name).unwrap_or(Value::Null);
            return attribute.resolve(&raw, &resource.client()?);
        }

        let state = self.inner.state.lock();
        if let Some(value) = state.extra.get(name) {
            return Ok(value.clone());
        }
        state
            .raw
            .get(name)
            .cloned()
            .map(Data::Json)
            .ok_or_else(|| Error::UnknownProperty {
                resource: resource.type_name().to_string(),
                property: name.to_string(),
            })
    }

    /// Write a property.
    ///
    /// Declared properties are serialized and validated first; nothing is
    /// stored if that fails. Undeclared names are kept locally and never
    /// sent.
    ///
    /// # Errors
    ///
    /// `Error::ReservedProperty` for `$`-prefixed names,
    /// `Error::ReadOnlyProperty`, or the serialization failure.
    pub fn set(&self, name: &str, value: impl Into<Data>) -> Result<(), Error> {
        if name.starts_with(RESERVED_SIGIL) {
            return Err(Error::ReservedProperty {
                property: name.to_string(),
            });
        }

        let resource = self.resource_type();
        let value = value.into();
        let Some(attribute) = resource.property(name) else {
            self.inner.state.lock().extra.insert(name.to_string(), value);
            return Ok(());
        };

        if attribute.is_read_only() {
            return Err(Error::ReadOnlyProperty {
                resource: resource.type_name().to_string(),
                property: name.to_string(),
            });
        }

        let serialized = attribute.serialize(&value, resource.is_required(name))?;
        let mut state = self.inner.state.lock();
        if serialized.is_null() {
            state.raw.remove(name);
        } else {
            state.raw.insert(name.to_string(), serialized);
        }
        Ok(())
    }

    /// Fetch through `self` if only the URI is known.
    fn materialize(&self) -> Result<(), Error> {
        let needs_fetch = {
            let state = self.inner.state.lock();
            !state.loaded && state.uri.is_some()
        };
        if needs_fetch {
            self.refresh()?;
        }
        Ok(())
    }

    /// Create (no identifier yet) or update (PATCH) on the server.
    ///
    /// A create adopts the response, including its `$uri`, and enters the
    /// instance into the client's identity map. An update merges the
    /// response into the current state.
    pub fn save(&self) -> Result<(), Error> {
        let body = self.to_json();
        if self.id().is_none() {
            let reply = self.resource_type().link(CREATE_REL)?.invoke_raw(Some(body))?;
            let created = into_object(reply.value, &reply.url)?;
            let uri = created.get(URI).and_then(Value::as_str).map(String::from);
            {
                let mut state = self.inner.state.lock();
                if let Some(uri) = &uri {
                    state.id = id_from_uri(uri);
                    state.uri = Some(uri.clone());
                }
                state.raw = created;
                state.loaded = true;
            }
            if uri.is_some() {
                self.resource_type().client()?.register(self);
            }
        } else {
            let reply = self.link(UPDATE_REL)?.invoke_raw(Some(body))?;
            if reply.value.is_some() {
                let updated = into_object(reply.value, &reply.url)?;
                self.merge(updated);
            }
        }
        Ok(())
    }

    /// Replace the raw state with a fresh `self` fetch.
    pub fn refresh(&self) -> Result<(), Error> {
        let reply = self.link(SELF_REL)?.invoke_raw(None)?;
        let fresh = into_object(reply.value, &reply.url)?;
        let mut state = self.inner.state.lock();
        state.raw = fresh;
        state.loaded = true;
        Ok(())
    }

    /// Delete on the server and leave the identity map.
    pub fn destroy(&self) -> Result<(), Error> {
        self.link(DESTROY_REL)?.invoke_raw(None)?;
        if let Some(uri) = self.uri() {
            self.resource_type().client()?.forget(&uri);
        }
        Ok(())
    }

    /// A link bound to this instance.
    ///
    /// Falls back to class-scoped links, bound to the resource type.
    pub fn link(&self, rel: &str) -> Result<LinkProxy, Error> {
        let resource = self.resource_type();
        match resource.find_link(&resource.inner.instance_links, rel) {
            Some(link) => Ok(LinkProxy::new(link, Binding::Instance(self.clone()))),
            None => resource.link(rel),
        }
    }

    /// Overwrite raw properties with those in `fields`.
    pub(crate) fn merge(&self, fields: Map<String, Value>) {
        let mut state = self.inner.state.lock();
        for (k, v) in fields {
            state.raw.insert(k, v);
        }
        state.loaded = true;
    }
}

fn into_object(value: Option<Value>, url: &str) -> Result<Map<String, Value>, Error> {
    match value {
        Some(Value::Object(obj)) => Ok(obj),
        other => Err(Error::InvalidResponse {
            url: url.to_string(),
            message: format!(
                "expected a JSON object, got {}",
                other.as_ref().map_or("nothing", crate::types::json_type_name)
            ),
        }),
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        match (self.uri(), other.uri()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("resource", &self.inner.resource.name())
            .field("uri", &self.uri())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_last_uri_segment() {
        assert_eq!(id_from_uri("/user/123"), Some("123".to_string()));
        assert_eq!(id_from_uri("/api/v1/user/abc/"), Some("abc".to_string()));
        assert_eq!(id_from_uri(""), None);
    }
}
