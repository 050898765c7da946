//! Hyper-schema links: route templates, request construction and invocation.
//!
//! A [`Link`] is parsed once per `links` entry of a resource schema. What a
//! call returns ([`OutputKind`]) is decided here from the `targetSchema`
//! shape; binding a link to a receiver happens in [`crate::proxy`].

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::debug;

use crate::attribute::AttributeType;
use crate::client::Client;
use crate::error::{Error, HttpStatusError};
use crate::loader::SchemaResolver;
use crate::naming::attribute_name;
use crate::transport::{HttpRequest, HttpResponse};
use crate::types::{
    JsonType, Method, DESCRIPTION, HREF, ITEMS, METHOD, PAGE, PER_PAGE, PROPERTIES, REF, REL,
    REQUIRED, SCHEMA, TARGET_SCHEMA,
};
use crate::validator::validate_against_schema;

/// URL template of a link, e.g. `/user/{id}/friends`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    template: String,
    keys: Vec<String>,
}

impl Route {
    pub fn parse(template: impl Into<String>) -> Self {
        let template = template.into();
        let mut keys = Vec::new();
        let mut rest = template.as_str();
        while let Some(start) = rest.find('{') {
            let after = &rest[start + 1..];
            match after.find('}') {
                Some(end) => {
                    let key = &after[..end];
                    if !key.is_empty() && !keys.iter().any(|k| k == key) {
                        keys.push(key.to_string());
                    }
                    rest = &after[end + 1..];
                }
                None => break,
            }
        }
        Self { template, keys }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Placeholder names in order of first appearance.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// A route is instance-scoped when it has any placeholder.
    pub fn is_instance_scoped(&self) -> bool {
        !self.keys.is_empty()
    }

    /// Substitute every placeholder. A trailing slash is stripped.
    ///
    /// # Errors
    ///
    /// Returns `Error::Usage` naming the first placeholder without a value.
    pub fn expand(&self, values: &BTreeMap<String, String>) -> Result<String, Error> {
        let mut path = self.template.clone();
        for key in &self.keys {
            let value = values.get(key).ok_or_else(|| {
                Error::usage(format!(
                    "route {} needs a value for {{{key}}}",
                    self.template
                ))
            })?;
            path = path.replace(&format!("{{{key}}}"), value);
        }
        if path.len() > 1 && path.ends_with('/') {
            path.pop();
        }
        Ok(path)
    }
}

/// Where a link's input or output schema comes from.
#[derive(Debug, Clone)]
pub enum SchemaSource {
    /// No schema declared.
    None,
    /// `{"$ref": "#"}`: the schema of the resource the link is bound to,
    /// looked up when the link is called.
    OwnResource,
    /// Any other schema, with its refs inlined.
    Inline {
        schema: Value,
        attribute: AttributeType,
    },
}

impl SchemaSource {
    /// Parse a link's `schema` or `targetSchema`.
    ///
    /// # Errors
    ///
    /// Fails when a `$ref` inside the schema cannot be resolved.
    pub fn parse(
        definition: Option<&Value>,
        resolver: &SchemaResolver,
        context: &str,
    ) -> Result<Self, Error> {
        let Some(definition) = definition else {
            return Ok(SchemaSource::None);
        };
        match definition.as_object() {
            Some(obj) if obj.is_empty() => Ok(SchemaSource::None),
            Some(obj) if obj.len() == 1 && obj.get(REF).and_then(Value::as_str) == Some("#") => {
                Ok(SchemaSource::OwnResource)
            }
            _ => {
                let schema = resolver.bundle_fragment(definition, context)?;
                let attribute = AttributeType::parse(&schema);
                Ok(SchemaSource::Inline { schema, attribute })
            }
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, SchemaSource::None)
    }

    /// The concrete schema, given the bound resource's own schema.
    pub fn schema<'a>(&'a self, own: Option<&'a Value>) -> Option<&'a Value> {
        match self {
            SchemaSource::None => None,
            SchemaSource::OwnResource => own,
            SchemaSource::Inline { schema, .. } => Some(schema),
        }
    }

    pub fn attribute(&self) -> Option<&AttributeType> {
        match self {
            SchemaSource::Inline { attribute, .. } => Some(attribute),
            _ => None,
        }
    }
}

/// What calling a link yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// Nothing: no target schema, or a `null` one.
    Void,
    /// A single decoded value (usually a resource instance).
    Instance,
    /// A paginated [`LazyCollection`](crate::LazyCollection).
    Collection,
}

impl OutputKind {
    pub fn from_target(target: &SchemaSource) -> Self {
        match target {
            SchemaSource::None => OutputKind::Void,
            SchemaSource::OwnResource => OutputKind::Instance,
            SchemaSource::Inline { schema, .. } => {
                let types = JsonType::declared(schema);
                if types.contains(&JsonType::Array)
                    || (types.is_empty() && schema.get(ITEMS).is_some())
                {
                    OutputKind::Collection
                } else if !types.is_empty() && types.iter().all(|t| *t == JsonType::Null) {
                    OutputKind::Void
                } else {
                    OutputKind::Instance
                }
            }
        }
    }
}

/// Successful response of a link call.
#[derive(Debug, Clone)]
pub struct Reply {
    pub url: String,
    pub response: HttpResponse,
    /// Parsed body; `None` for an empty body.
    pub value: Option<Value>,
}

/// One entry of a resource schema's `links` array.
#[derive(Debug, Clone)]
pub struct Link {
    rel: String,
    name: String,
    method: Method,
    route: Route,
    description: Option<String>,
    schema: SchemaSource,
    target_schema: SchemaSource,
    output: OutputKind,
}

impl Link {
    /// Parse a link definition taken from the schema document `context`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` when `rel` or `href` is missing, the method is
    /// unknown, or a schema ref cannot be resolved.
    pub fn from_schema(
        definition: &Value,
        resolver: &SchemaResolver,
        context: &str,
    ) -> Result<Self, Error> {
        let invalid = |message: String| {
            Error::Schema(crate::error::SchemaResolutionError::InvalidSchema { message })
        };

        let rel = definition
            .get(REL)
            .and_then(Value::as_str)
            .ok_or_else(|| invalid(format!("link without rel in {context}")))?;
        let href = definition
            .get(HREF)
            .and_then(Value::as_str)
            .ok_or_else(|| invalid(format!("link '{rel}' without href in {context}")))?;
        let method = match definition.get(METHOD).and_then(Value::as_str) {
            Some(m) => Method::parse(m)
                .ok_or_else(|| invalid(format!("link '{rel}' has unknown method {m}")))?,
            None => Method::default(),
        };

        let schema = SchemaSource::parse(definition.get(SCHEMA), resolver, context)?;
        let target_schema = SchemaSource::parse(definition.get(TARGET_SCHEMA), resolver, context)?;
        let output = OutputKind::from_target(&target_schema);

        Ok(Self {
            rel: rel.to_string(),
            name: attribute_name(rel),
            method,
            route: Route::parse(href),
            description: definition
                .get(DESCRIPTION)
                .and_then(Value::as_str)
                .map(String::from),
            schema,
            target_schema,
            output,
        })
    }

    /// Relation name as declared.
    pub fn rel(&self) -> &str {
        &self.rel
    }

    /// Relation name in snake_case.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn schema(&self) -> &SchemaSource {
        &self.schema
    }

    pub fn target_schema(&self) -> &SchemaSource {
        &self.target_schema
    }

    pub fn output_kind(&self) -> OutputKind {
        self.output
    }

    pub fn is_instance_scoped(&self) -> bool {
        self.route.is_instance_scoped()
    }

    /// Whether the input schema takes `page` and `per_page`.
    pub fn is_paginated(&self) -> bool {
        self.input_properties()
            .is_some_and(|p| p.contains_key(PAGE) && p.contains_key(PER_PAGE))
    }

    /// Type of a named parameter, when the input schema declares it.
    pub fn input_property(&self, name: &str) -> Option<AttributeType> {
        self.input_properties()
            .and_then(|props| props.get(name))
            .map(AttributeType::parse)
    }

    fn input_properties(&self) -> Option<&Map<String, Value>> {
        self.schema
            .schema(None)
            .and_then(|s| s.get(PROPERTIES))
            .and_then(Value::as_object)
    }

    /// Build the request for an already-expanded path.
    ///
    /// Query methods send each named parameter JSON-encoded; body methods
    /// merge the parameters into the body object.
    ///
    /// # Errors
    ///
    /// Returns `Error::Usage` when parameters accompany a non-object body.
    pub fn build_request(
        &self,
        base_url: &str,
        path: &str,
        body: Option<Value>,
        params: &BTreeMap<String, Value>,
    ) -> Result<HttpRequest, Error> {
        let url = format!("{base_url}{path}");
        let params = params
            .iter()
            .filter(|(k, _)| !self.route.keys().contains(*k));

        if self.method.uses_query() {
            let query = params
                .map(|(k, v)| {
                    serde_json::to_string(v)
                        .map(|encoded| (k.clone(), encoded))
                        .map_err(|e| Error::Decode {
                            message: e.to_string(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(HttpRequest {
                method: self.method,
                url,
                query,
                body: body.filter(|b| !b.is_null()),
            });
        }

        let body = match body.unwrap_or(Value::Null) {
            Value::Null => Value::Object(params.map(|(k, v)| (k.clone(), v.clone())).collect()),
            Value::Object(mut obj) => {
                for (k, v) in params {
                    obj.entry(k.clone()).or_insert_with(|| v.clone());
                }
                Value::Object(obj)
            }
            other => {
                if params.count() > 0 {
                    return Err(Error::usage(format!(
                        "link '{}' cannot merge parameters into a non-object body",
                        self.rel
                    )));
                }
                other
            }
        };

        Ok(HttpRequest {
            method: self.method,
            url,
            query: Vec::new(),
            body: Some(body),
        })
    }

    /// Validate what will be sent against the input schema.
    ///
    /// For `PATCH` against the resource's own schema, `required` is ignored:
    /// an update sends only the properties it knows.
    pub fn validate_input(&self, request: &HttpRequest, own: Option<&Value>) -> Result<(), Error> {
        let Some(schema) = self.schema.schema(own) else {
            return Ok(());
        };

        let payload = match &request.body {
            Some(body) => body.clone(),
            None => self.query_payload(request)?,
        };

        if self.method == Method::Patch && matches!(self.schema, SchemaSource::OwnResource) {
            let mut relaxed = schema.clone();
            if let Value::Object(obj) = &mut relaxed {
                obj.remove(REQUIRED);
            }
            return validate_against_schema(&relaxed, &payload);
        }
        validate_against_schema(schema, &payload)
    }

    fn query_payload(&self, request: &HttpRequest) -> Result<Value, Error> {
        let mut obj = Map::new();
        for (k, encoded) in &request.query {
            let value = serde_json::from_str(encoded).map_err(|e| Error::Decode {
                message: format!("query parameter {k}: {e}"),
            })?;
            obj.insert(k.clone(), value);
        }
        Ok(Value::Object(obj))
    }

    /// Send a request built for this link and check the reply.
    ///
    /// Input is validated before sending. The status check precedes any
    /// output validation.
    ///
    /// # Errors
    ///
    /// `Error::Validation` for bad input or output, `Error::Http` for a
    /// non-2xx status, `Error::Transport` when nothing came back, and
    /// `Error::InvalidResponse` for a body that is not JSON.
    pub fn invoke(
        &self,
        client: &Client,
        request: HttpRequest,
        own: Option<&Value>,
    ) -> Result<Reply, Error> {
        self.validate_input(&request, own)?;

        let response = client.send(&request)?;
        let url = request.url;
        if !response.is_success() {
            debug!(rel = %self.rel, status = response.status, "link call failed");
            return Err(HttpStatusError::from_status(response.status, url, response.body).into());
        }

        let value = if response.body.trim().is_empty() {
            None
        } else {
            let value: Value =
                serde_json::from_str(&response.body).map_err(|e| Error::InvalidResponse {
                    url: url.clone(),
                    message: e.to_string(),
                })?;
            Some(value)
        };

        if let (Some(value), Some(schema)) = (&value, self.target_schema.schema(own)) {
            validate_against_schema(schema, value)?;
        }

        Ok(Reply {
            url,
            response,
            value,
        })
    }
}
