//! Schema loading and `$ref` resolution.
//!
//! Schema documents are fetched through the transport on first use and kept
//! for the lifetime of the resolver, keyed by their document URL with a
//! trailing `#` (`/user/schema#`).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{HttpStatusError, SchemaResolutionError};
use crate::transport::{HttpRequest, Transport};
use crate::types::{LINKS, META_SCHEMA, REF};

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Split a reference into its document and fragment parts.
///
/// `"/user/schema#/definitions/x"` gives `("/user/schema", "/definitions/x")`;
/// a reference without `#` is all document.
pub fn split_reference(reference: &str) -> (&str, &str) {
    match reference.find('#') {
        Some(idx) => (&reference[..idx], &reference[idx + 1..]),
        None => (reference, ""),
    }
}

/// Navigate a JSON Pointer fragment (e.g., "#/definitions/foo" or "/properties/bar").
///
/// Returns the value at the given JSON Pointer path within the schema.
pub fn navigate_fragment(schema: &Value, fragment: &str) -> Result<Value, SchemaResolutionError> {
    let path = fragment.trim_start_matches('#').trim_start_matches('/');
    if path.is_empty() {
        return Ok(schema.clone());
    }

    let mut current = schema;
    for part in path.split('/') {
        // Unescape JSON Pointer encoding (~1 = /, ~0 = ~)
        let key = part.replace("~1", "/").replace("~0", "~");
        let next = match current {
            Value::Array(arr) => key.parse::<usize>().ok().and_then(|i| arr.get(i)),
            other => other.get(&key),
        };
        current = next.ok_or_else(|| SchemaResolutionError::MissingFragment {
            reference: format!("#{}", fragment.trim_start_matches('#')),
        })?;
    }
    Ok(current.clone())
}

/// Fetches, caches and dereferences schema documents.
pub struct SchemaResolver {
    base_url: String,
    transport: Arc<dyn Transport>,
    cache: RwLock<HashMap<String, Arc<Value>>>,
}

impl std::fmt::Debug for SchemaResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaResolver")
            .field("base_url", &self.base_url)
            .field("cached", &self.cache.read().len())
            .finish()
    }
}

impl SchemaResolver {
    pub fn new(base_url: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            base_url: base_url.into(),
            transport,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Cache key of the document a reference points into.
    pub fn document_key(reference: &str) -> String {
        let (document, _) = split_reference(reference);
        format!("{document}#")
    }

    /// Absolute URL of a document reference.
    pub fn url_for(&self, document: &str) -> String {
        if is_url(document) {
            document.to_string()
        } else {
            format!("{}{}", self.base_url, document)
        }
    }

    /// Whether the document behind `reference` has been fetched.
    pub fn is_cached(&self, reference: &str) -> bool {
        self.cache
            .read()
            .contains_key(&Self::document_key(reference))
    }

    /// Number of cached documents.
    pub fn cached_documents(&self) -> usize {
        self.cache.read().len()
    }

    /// Fetch-or-reuse the document a reference points into.
    ///
    /// # Errors
    ///
    /// Returns `SchemaResolutionError::Http` for a non-2xx response,
    /// `Transport` if the request could not be sent, and `InvalidJson` if
    /// the body is not JSON.
    pub fn document(&self, reference: &str) -> Result<Arc<Value>, SchemaResolutionError> {
        let key = Self::document_key(reference);
        if let Some(doc) = self.cache.read().get(&key) {
            debug!(document = %key, "schema cache hit");
            return Ok(Arc::clone(doc));
        }

        let (document, _) = split_reference(reference);
        let url = self.url_for(document);
        debug!(%url, "fetching schema");

        let response = self.transport.send(&HttpRequest::get(&url))?;
        if !response.is_success() {
            return Err(SchemaResolutionError::Http {
                source: HttpStatusError::from_status(response.status, &url, response.body),
                url,
            });
        }

        let value: Value = serde_json::from_str(&response.body)
            .map_err(|source| SchemaResolutionError::InvalidJson {
                url: url.clone(),
                source,
            })?;

        // Another caller may have fetched it meanwhile; first write wins.
        let mut cache = self.cache.write();
        let doc = cache.entry(key).or_insert_with(|| Arc::new(value));
        Ok(Arc::clone(doc))
    }

    /// Resolve a `$ref` string.
    ///
    /// - `"#"` is the context document itself.
    /// - `"#/section/name"` navigates the context document.
    /// - `"<document>#/section/name"` fetches or reuses `<document>` first.
    ///
    /// # Errors
    ///
    /// Fails when the document cannot be fetched, the fragment does not
    /// exist, or a local reference has no context.
    pub fn resolve(
        &self,
        reference: &str,
        context: Option<&Value>,
    ) -> Result<Value, SchemaResolutionError> {
        let (document, fragment) = split_reference(reference);
        if document.is_empty() {
            let context = context.ok_or_else(|| SchemaResolutionError::MissingContext {
                reference: reference.to_string(),
            })?;
            return navigate_fragment(context, fragment);
        }

        let doc = self.document(reference)?;
        navigate_fragment(&doc, fragment)
    }

    /// Inline every `$ref` reachable from `schema`.
    ///
    /// `context` is the document `schema` was taken from; local refs
    /// (`#/...`, `#`) resolve against it. A ref that is already being
    /// inlined further up (a recursive type) is replaced by the empty
    /// schema `{}`. `links` arrays and `$schema` markers are dropped: they
    /// are hyper-schema metadata, not validation keywords.
    ///
    /// # Errors
    ///
    /// Fails when a referenced document or fragment cannot be resolved.
    pub fn bundle(&self, schema: &Value, context: &str) -> Result<Value, SchemaResolutionError> {
        let mut bundled = schema.clone();
        let mut visiting = HashSet::new();
        visiting.insert(Self::document_key(context));
        self.bundle_inner(&mut bundled, context, &mut visiting)?;
        Ok(bundled)
    }

    /// Inline refs of a fragment that is not itself a whole document.
    ///
    /// Unlike [`bundle`](Self::bundle), `"#"` inside the fragment inlines the
    /// context document once instead of counting as recursion.
    pub fn bundle_fragment(
        &self,
        fragment: &Value,
        context: &str,
    ) -> Result<Value, SchemaResolutionError> {
        let mut bundled = fragment.clone();
        self.bundle_inner(&mut bundled, context, &mut HashSet::new())?;
        Ok(bundled)
    }

    fn bundle_inner(
        &self,
        schema: &mut Value,
        context: &str,
        visiting: &mut HashSet<String>,
    ) -> Result<(), SchemaResolutionError> {
        match schema {
            Value::Object(obj) => {
                // A property named `links` holds a schema object, not an array.
                if obj.get(LINKS).is_some_and(Value::is_array) {
                    obj.remove(LINKS);
                }
                if obj.get(META_SCHEMA).is_some_and(Value::is_string) {
                    obj.remove(META_SCHEMA);
                }

                if let Some(ref_val) = obj.get(REF).and_then(|v| v.as_str()).map(String::from) {
                    let (document, fragment) = split_reference(&ref_val);
                    let document = if document.is_empty() {
                        split_reference(context).0.to_string()
                    } else {
                        document.to_string()
                    };
                    let visit_key = format!("{document}#{fragment}");

                    obj.remove(REF);
                    if visiting.contains(&visit_key) {
                        // Recursive type: stop expanding.
                        return Ok(());
                    }

                    let loaded = self.document(&document)?;
                    let mut target = navigate_fragment(&loaded, fragment)?;

                    visiting.insert(visit_key.clone());
                    self.bundle_inner(&mut target, &document, visiting)?;
                    visiting.remove(&visit_key);

                    if let Value::Object(ref_obj) = target {
                        merge_missing(obj, ref_obj);
                    }
                    // Siblings of $ref may hold refs of their own.
                    for value in obj.values_mut() {
                        self.bundle_inner(value, context, visiting)?;
                    }
                    return Ok(());
                }

                for value in obj.values_mut() {
                    self.bundle_inner(value, context, visiting)?;
                }
            }
            Value::Array(arr) => {
                for item in arr {
                    self.bundle_inner(item, context, visiting)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn merge_missing(obj: &mut Map<String, Value>, from: Map<String, Value>) {
    for (k, v) in from {
        obj.entry(k).or_insert(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::HttpResponse;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Serves fixed documents by path and counts requests.
    struct Documents {
        docs: HashMap<String, Value>,
        requests: Mutex<Vec<String>>,
    }

    impl Documents {
        fn new(docs: &[(&str, Value)]) -> Arc<Self> {
            Arc::new(Self {
                docs: docs
                    .iter()
                    .map(|(k, v)| (format!("http://api{k}"), v.clone()))
                    .collect(),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    impl Transport for Documents {
        fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.requests.lock().push(request.url.clone());
            Ok(match self.docs.get(&request.url) {
                Some(doc) => HttpResponse {
                    status: 200,
                    headers: Vec::new(),
                    body: doc.to_string(),
                },
                None => HttpResponse {
                    status: 404,
                    headers: Vec::new(),
                    body: "not found".into(),
                },
            })
        }
    }

    fn resolver(docs: &Arc<Documents>) -> SchemaResolver {
        SchemaResolver::new("http://api", Arc::clone(docs) as Arc<dyn Transport>)
    }

    #[test]
    fn split_reference_parts() {
        assert_eq!(
            split_reference("/user/schema#/definitions/x"),
            ("/user/schema", "/definitions/x")
        );
        assert_eq!(split_reference("#"), ("", ""));
        assert_eq!(split_reference("/user/schema"), ("/user/schema", ""));
    }

    #[test]
    fn navigate_fragment_nested() {
        let schema = json!({"definitions": {"a/b": {"type": "string"}, "list": [1, 2]}});
        assert_eq!(
            navigate_fragment(&schema, "#/definitions/a~1b").unwrap(),
            json!({"type": "string"})
        );
        assert_eq!(
            navigate_fragment(&schema, "/definitions/list/1").unwrap(),
            json!(2)
        );
        assert_eq!(navigate_fragment(&schema, "#").unwrap(), schema);
        assert!(matches!(
            navigate_fragment(&schema, "#/definitions/missing"),
            Err(SchemaResolutionError::MissingFragment { .. })
        ));
    }

    #[test]
    fn hash_resolves_to_context() {
        let docs = Documents::new(&[]);
        let context = json!({"type": "object"});
        let resolved = resolver(&docs).resolve("#", Some(&context)).unwrap();
        assert_eq!(resolved, context);
        assert!(docs.requests.lock().is_empty());
    }

    #[test]
    fn local_ref_without_context_fails() {
        let docs = Documents::new(&[]);
        assert!(matches!(
            resolver(&docs).resolve("#/definitions/x", None),
            Err(SchemaResolutionError::MissingContext { .. })
        ));
    }

    #[test]
    fn document_is_fetched_once() {
        let docs = Documents::new(&[(
            "/schema",
            json!({"definitions": {"_pagination": {"type": "object"}}}),
        )]);
        let resolver = resolver(&docs);

        let first = resolver
            .resolve("/schema#/definitions/_pagination", None)
            .unwrap();
        let second = resolver
            .resolve("/schema#/definitions/_pagination", None)
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(docs.requests.lock().len(), 1);
        assert!(resolver.is_cached("/schema#"));
    }

    #[test]
    fn missing_document_is_http_error() {
        let docs = Documents::new(&[]);
        let result = resolver(&docs).document("/nope/schema#");
        assert!(matches!(
            result,
            Err(SchemaResolutionError::Http { ref source, .. }) if source.status() == 404
        ));
    }

    #[test]
    fn bundle_inlines_cross_document_refs() {
        let docs = Documents::new(&[(
            "/schema",
            json!({"definitions": {"name": {"type": "string", "minLength": 1}}}),
        )]);
        let schema = json!({
            "type": "object",
            "properties": {
                "name": {"$ref": "/schema#/definitions/name", "description": "Name"}
            },
            "links": [{"rel": "self", "href": "/user/{id}"}]
        });

        let bundled = resolver(&docs).bundle(&schema, "/user/schema#").unwrap();

        assert_eq!(
            bundled["properties"]["name"],
            json!({"type": "string", "minLength": 1, "description": "Name"})
        );
        assert!(bundled.get("links").is_none());
    }

    #[test]
    fn bundle_stops_at_recursion() {
        let docs = Documents::new(&[(
            "/node/schema",
            json!({
                "type": "object",
                "properties": {"parent": {"$ref": "#"}, "name": {"type": "string"}}
            }),
        )]);
        let resolver = resolver(&docs);
        let doc = resolver.document("/node/schema#").unwrap();

        let bundled = resolver.bundle(&doc, "/node/schema#").unwrap();
        assert_eq!(bundled["properties"]["parent"], json!({}));

        // A fragment pointing at the document inlines it once.
        let fragment = json!({"type": "array", "items": {"$ref": "#"}});
        let bundled = resolver.bundle_fragment(&fragment, "/node/schema#").unwrap();
        assert_eq!(bundled["items"]["properties"]["name"], json!({"type": "string"}));
        assert_eq!(bundled["items"]["properties"]["parent"], json!({}));
    }
}
