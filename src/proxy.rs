//! Links bound to a receiver.
//!
//! A [`LinkProxy`] pairs a [`Link`] with what it is called on (a resource
//! type or an instance) plus any parameters applied so far. Proxies are
//! values: [`param`](LinkProxy::param) returns a new proxy and leaves the
//! original untouched, so a base query can be reused.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::attribute::{AttributeKind, AttributeType};
use crate::client::{is_reference, Client};
use crate::collection::LazyCollection;
use crate::data::Data;
use crate::error::Error;
use crate::link::{Link, OutputKind, Reply};
use crate::pagination::PageRef;
use crate::resource::{Instance, ResourceType};
use crate::types::{PAGE, PER_PAGE};

/// What a link is called on.
#[derive(Debug, Clone)]
pub enum Binding {
    /// The resource type itself (`create`, `instances`).
    Resource(ResourceType),
    /// One instance (`self`, `update`, `destroy`).
    Instance(Instance),
}

impl Binding {
    pub fn resource_type(&self) -> &ResourceType {
        match self {
            Binding::Resource(resource) => resource,
            Binding::Instance(instance) => instance.resource_type(),
        }
    }

    /// Values for the route placeholders.
    ///
    /// An instance supplies `id` from its URI and other keys from its raw
    /// properties. Parameters fill whatever is left.
    fn route_values(
        &self,
        link: &Link,
        params: &BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, String>, Error> {
        let mut values = BTreeMap::new();
        for key in link.route().keys() {
            let value = match self {
                Binding::Instance(instance) if key == "id" => instance.id(),
                Binding::Instance(instance) => instance.raw_property(key).map(|v| placeholder(&v)),
                Binding::Resource(_) => None,
            }
            .or_else(|| params.get(key).map(placeholder));

            match value {
                Some(value) => {
                    values.insert(key.clone(), value);
                }
                None if matches!(self, Binding::Resource(_)) => {
                    return Err(Error::usage(format!(
                        "link '{}' of {} needs an instance (or a '{key}' parameter)",
                        link.rel(),
                        self.resource_type().name()
                    )));
                }
                None => {
                    return Err(Error::UnsavedReference {
                        resource: self.resource_type().name().to_string(),
                    });
                }
            }
        }
        Ok(values)
    }
}

fn placeholder(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Result of calling a link.
#[derive(Debug, Clone)]
pub enum Outcome {
    Void,
    Value(Data),
    Collection(LazyCollection),
}

impl Outcome {
    pub fn is_void(&self) -> bool {
        matches!(self, Outcome::Void)
    }

    pub fn into_data(self) -> Option<Data> {
        match self {
            Outcome::Value(data) => Some(data),
            _ => None,
        }
    }

    pub fn into_instance(self) -> Option<Instance> {
        match self {
            Outcome::Value(Data::Resource(instance)) => Some(instance),
            _ => None,
        }
    }

    pub fn into_collection(self) -> Option<LazyCollection> {
        match self {
            Outcome::Collection(collection) => Some(collection),
            _ => None,
        }
    }
}

/// A link bound to a receiver, with accumulated parameters.
#[derive(Debug, Clone)]
pub struct LinkProxy {
    link: Arc<Link>,
    binding: Binding,
    params: BTreeMap<String, Value>,
}

impl LinkProxy {
    pub(crate) fn new(link: Arc<Link>, binding: Binding) -> Self {
        Self {
            link,
            binding,
            params: BTreeMap::new(),
        }
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    pub fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }

    pub fn output_kind(&self) -> OutputKind {
        self.link.output_kind()
    }

    /// A new proxy with `name` set; `null` removes it.
    ///
    /// The value is serialized through the input schema's type for `name`
    /// when one is declared.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` when the value does not fit that type.
    pub fn param(&self, name: &str, value: impl Into<Data>) -> Result<LinkProxy, Error> {
        let value = value.into();
        let encoded = match self.link.input_property(name) {
            Some(attr) => attr.serialize(&value, false)?,
            None => value.to_json()?,
        };

        let mut proxy = self.clone();
        if encoded.is_null() {
            proxy.params.remove(name);
        } else {
            proxy.params.insert(name.to_string(), encoded);
        }
        Ok(proxy)
    }

    pub fn per_page(&self, per_page: usize) -> Result<LinkProxy, Error> {
        self.param(PER_PAGE, per_page as u64)
    }

    pub fn page(&self, page: usize) -> Result<LinkProxy, Error> {
        self.param(PAGE, page as u64)
    }

    pub(crate) fn with_page(&self, page: PageRef) -> LinkProxy {
        let mut proxy = self.clone();
        proxy.params.insert(PAGE.to_string(), Value::from(page.page));
        proxy.params.insert(PER_PAGE.to_string(), Value::from(page.per_page));
        proxy
    }

    /// Call without a body.
    pub fn call(&self) -> Result<Outcome, Error> {
        self.call_with(Data::NULL)
    }

    /// Call with a body. Instances are sent as their writable properties.
    ///
    /// Collection links return a [`LazyCollection`] without fetching.
    ///
    /// # Errors
    ///
    /// Anything [`Link::invoke`] raises, plus decoding failures.
    pub fn call_with(&self, body: impl Into<Data>) -> Result<Outcome, Error> {
        match self.link.output_kind() {
            OutputKind::Collection => Ok(Outcome::Collection(LazyCollection::new(self.clone()))),
            OutputKind::Void => {
                self.invoke_raw(encode_body(body.into())?)?;
                Ok(Outcome::Void)
            }
            OutputKind::Instance => {
                let reply = self.invoke_raw(encode_body(body.into())?)?;
                match reply.value {
                    None | Some(Value::Null) => Ok(Outcome::Void),
                    Some(value) => self.decode(&value).map(Outcome::Value),
                }
            }
        }
    }

    /// The collection this link returns.
    ///
    /// # Errors
    ///
    /// Returns `Error::Usage` if the link does not return a collection.
    pub fn collection(&self) -> Result<LazyCollection, Error> {
        match self.link.output_kind() {
            OutputKind::Collection => Ok(LazyCollection::new(self.clone())),
            kind => Err(Error::usage(format!(
                "link '{}' returns {kind:?}, not a collection",
                self.link.rel()
            ))),
        }
    }

    pub(crate) fn client(&self) -> Result<Client, Error> {
        self.binding.resource_type().client()
    }

    /// Expand, build, validate and send; no decoding.
    pub(crate) fn invoke_raw(&self, body: Option<Value>) -> Result<Reply, Error> {
        let resource = self.binding.resource_type();
        let client = resource.client()?;
        let values = self.binding.route_values(&self.link, &self.params)?;
        let path = self.link.route().expand(&values)?;
        let request = self
            .link
            .build_request(client.base_url(), &path, body, &self.params)?;
        self.link
            .invoke(&client, request, Some(resource.bundled_schema()))
    }

    fn decode(&self, value: &Value) -> Result<Data, Error> {
        let client = self.client()?;
        let attribute = self.link.target_schema().attribute();
        match value {
            Value::Array(elements) => {
                let items = attribute.and_then(|a| match a.kind() {
                    AttributeKind::Array { items } => Some(items.as_ref()),
                    _ => None,
                });
                elements
                    .iter()
                    .map(|e| decode_element(&client, e, items))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Data::List)
            }
            other => decode_element(&client, other, attribute),
        }
    }
}

/// Decode one response element: references through the client, everything
/// else through its schema type when known.
pub(crate) fn decode_element(
    client: &Client,
    raw: &Value,
    attribute: Option<&AttributeType>,
) -> Result<Data, Error> {
    if is_reference(raw) {
        client.resolve_element(raw)
    } else if let Some(attribute) = attribute {
        attribute.resolve(raw, client)
    } else {
        Ok(Data::Json(raw.clone()))
    }
}

fn encode_body(body: Data) -> Result<Option<Value>, Error> {
    Ok(match body {
        Data::Resource(instance) => Some(instance.to_json()),
        other if other.is_null() => None,
        other => Some(other.to_json()?),
    })
}
