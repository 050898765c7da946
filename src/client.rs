//! The client: schema bootstrap, resource registry and identity map.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::codec::{single_key_codec, Codec};
use crate::data::Data;
use crate::error::Error;
use crate::loader::SchemaResolver;
use crate::resource::{Instance, ResourceType};
use crate::transport::{HttpRequest, HttpResponse, Transport};
use crate::types::{ClientOptions, DEFINITIONS, DESCRIPTION, PAGINATION, PROPERTIES, REF, URI};

#[cfg(feature = "remote")]
use crate::transport::HttpTransport;

/// Whether `raw` points at a resource: an object with `$uri`, or a `$ref`.
pub fn is_reference(raw: &Value) -> bool {
    match raw {
        Value::Object(obj) => {
            obj.get(URI).is_some_and(Value::is_string)
                || obj.get(REF).is_some_and(Value::is_string)
        }
        _ => false,
    }
}

/// Split a resource URI into `(resource name, id)`: its last two segments.
pub fn parse_uri(uri: &str) -> Option<(&str, &str)> {
    let mut segments = uri.trim_end_matches('/').rsplit('/');
    let id = segments.next().filter(|s| !s.is_empty())?;
    let name = segments.next().filter(|s| !s.is_empty())?;
    Some((name, id))
}

/// Client for one API.
///
/// Cheap to clone; clones share the schema cache, the resource types and
/// the identity map.
#[derive(Clone)]
pub struct Client(Arc<ClientInner>);

pub(crate) struct ClientInner {
    options: ClientOptions,
    transport: Arc<dyn Transport>,
    resolver: SchemaResolver,
    root: Value,
    resources: RwLock<BTreeMap<String, ResourceType>>,
    identity: RwLock<HashMap<String, Instance>>,
}

impl Client {
    /// Connect over HTTP and build every resource type the root schema lists.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if the HTTP client cannot be built, and
    /// `Error::Schema` if the root schema or a resource schema cannot be
    /// fetched or resolved.
    #[cfg(feature = "remote")]
    pub fn connect(options: ClientOptions) -> Result<Self, Error> {
        let transport = HttpTransport::new(&options)?;
        Self::with_transport(options, Arc::new(transport))
    }

    /// Like [`connect`](Self::connect), over any transport.
    pub fn with_transport(
        options: ClientOptions,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, Error> {
        let resolver = SchemaResolver::new(options.base_url.clone(), Arc::clone(&transport));
        let root_ref = format!("{}#", options.schema_path);
        let root = resolver.document(&root_ref)?;

        let inner = Arc::new(ClientInner {
            options,
            transport,
            resolver,
            root: Value::clone(&root),
            resources: RwLock::new(BTreeMap::new()),
            identity: RwLock::new(HashMap::new()),
        });

        if let Some(entries) = root.get(PROPERTIES).and_then(Value::as_object) {
            for (name, entry) in entries {
                let Some(schema_ref) = entry.get(REF).and_then(Value::as_str) else {
                    continue;
                };
                let schema = inner.resolver.document(schema_ref)?;
                let description = entry
                    .get(DESCRIPTION)
                    .and_then(Value::as_str)
                    .map(String::from);
                let resource = ResourceType::factory(
                    Arc::downgrade(&inner),
                    name,
                    description,
                    schema_ref,
                    &schema,
                    &inner.resolver,
                )?;
                inner.resources.write().insert(name.clone(), resource);
            }
        }

        debug!(
            base_url = %inner.options.base_url,
            resources = inner.resources.read().len(),
            "client ready"
        );
        Ok(Client(inner))
    }

    pub(crate) fn from_inner(inner: Arc<ClientInner>) -> Self {
        Client(inner)
    }

    pub fn options(&self) -> &ClientOptions {
        &self.0.options
    }

    pub fn base_url(&self) -> &str {
        &self.0.options.base_url
    }

    /// The root schema document.
    pub fn root_schema(&self) -> &Value {
        &self.0.root
    }

    pub fn resolver(&self) -> &SchemaResolver {
        &self.0.resolver
    }

    /// A resource type by schema name (`user`) or type name (`User`).
    pub fn resource(&self, name: &str) -> Result<ResourceType, Error> {
        let resources = self.0.resources.read();
        resources
            .get(name)
            .or_else(|| resources.values().find(|r| r.type_name() == name))
            .cloned()
            .ok_or_else(|| Error::UnknownResource {
                name: name.to_string(),
            })
    }

    /// All resource types, by name.
    pub fn resources(&self) -> Vec<ResourceType> {
        self.0.resources.read().values().cloned().collect()
    }

    /// The instance for `uri`, from the identity map or newly registered.
    ///
    /// A new instance holds only its URI and fetches itself on first read.
    ///
    /// # Errors
    ///
    /// `Error::Decode` if the URI has no `/<resource>/<id>` tail,
    /// `Error::UnknownResource` if the resource is not registered.
    pub fn instance(&self, uri: &str) -> Result<Instance, Error> {
        if let Some(instance) = self.0.identity.read().get(uri) {
            debug!(%uri, "identity map hit");
            return Ok(instance.clone());
        }

        let (name, _) = parse_uri(uri).ok_or_else(|| Error::Decode {
            message: format!("not a resource URI: {uri}"),
        })?;
        let resource = self.resource(name)?;

        let mut identity = self.0.identity.write();
        let instance = identity
            .entry(uri.to_string())
            .or_insert_with(|| {
                debug!(%uri, "identity map insert");
                Instance::new(resource, Some(uri.to_string()), None)
            })
            .clone();
        Ok(instance)
    }

    /// Decode a raw value that may reference a resource.
    ///
    /// `{"$uri": ..., fields...}` and `{"$ref": ..., fields...}` resolve to
    /// the identity-mapped instance, with any fields beside the reference
    /// merged into it. A lone `{"$date": ms}` becomes a timestamp. Anything
    /// else is returned as JSON.
    pub fn resolve_element(&self, raw: &Value) -> Result<Data, Error> {
        let Value::Object(obj) = raw else {
            return Ok(Data::Json(raw.clone()));
        };

        if let Some(Codec::Date) = single_key_codec(obj) {
            return Codec::Date.decode(raw, self);
        }

        let uri = obj
            .get(URI)
            .or_else(|| obj.get(REF))
            .and_then(Value::as_str);
        let Some(uri) = uri else {
            return Ok(Data::Json(raw.clone()));
        };

        let instance = self.instance(uri)?;
        let fields: Map<String, Value> = obj
            .iter()
            .filter(|(k, _)| k.as_str() != REF)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if fields.keys().any(|k| k != URI) {
            instance.merge(fields);
        }
        Ok(Data::Resource(instance))
    }

    /// Resolve a `$ref` with the root schema as context.
    pub fn resolve_schema(&self, reference: &str) -> Result<Value, Error> {
        Ok(self.0.resolver.resolve(reference, Some(&self.0.root))?)
    }

    /// Reference of the root schema's pagination definition.
    pub fn pagination_ref(&self) -> String {
        format!(
            "{}#/{DEFINITIONS}/{PAGINATION}",
            self.0.options.schema_path
        )
    }

    /// Number of instances in the identity map.
    pub fn identity_map_len(&self) -> usize {
        self.0.identity.read().len()
    }

    pub(crate) fn send(&self, request: &HttpRequest) -> Result<HttpResponse, Error> {
        debug!(method = %request.method, url = %request.url, "sending request");
        let response = self.0.transport.send(request)?;
        debug!(
            method = %request.method,
            url = %request.url,
            status = response.status,
            "received response"
        );
        Ok(response)
    }

    /// Enter a freshly created instance into the identity map.
    pub(crate) fn register(&self, instance: &Instance) {
        let Some(uri) = instance.uri() else {
            return;
        };
        let previous = self.0.identity.write().insert(uri.clone(), instance.clone());
        match previous {
            Some(previous) if !previous.ptr_eq(instance) => {
                warn!(%uri, "identity map entry replaced");
            }
            None => debug!(%uri, "identity map insert"),
            _ => {}
        }
    }

    pub(crate) fn forget(&self, uri: &str) {
        if self.0.identity.write().remove(uri).is_some() {
            debug!(%uri, "identity map remove");
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.0.options.base_url)
            .field("resources", &self.0.resources.read().keys().collect::<Vec<_>>())
            .field("instances", &self.0.identity.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_uri_takes_last_two_segments() {
        assert_eq!(parse_uri("/user/123"), Some(("user", "123")));
        assert_eq!(parse_uri("/api/v1/user/abc"), Some(("user", "abc")));
        assert_eq!(parse_uri("/user/123/"), Some(("user", "123")));
        assert_eq!(parse_uri("123"), None);
    }

    #[test]
    fn reference_shapes() {
        assert!(is_reference(&json!({"$uri": "/user/1", "name": "x"})));
        assert!(is_reference(&json!({"$ref": "/user/1"})));
        assert!(!is_reference(&json!({"$date": 0})));
        assert!(!is_reference(&json!({"$uri": 1})));
        assert!(!is_reference(&json!("/user/1")));
    }
}
