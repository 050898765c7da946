//! Core types for Potion schema handling.

use std::fmt;
use std::time::Duration;

use serde_json::Value;

/// Default location of the root schema, relative to the base URL.
pub const DEFAULT_SCHEMA_PATH: &str = "/schema";

/// Default timeout for HTTP requests (10 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Name of the pagination definition in the root schema.
pub const PAGINATION: &str = "_pagination";

// Schema keywords.
pub const PROPERTIES: &str = "properties";
pub const DEFINITIONS: &str = "definitions";
pub const REF: &str = "$ref";
pub const URI: &str = "$uri";
pub const DATE: &str = "$date";
pub const DESCRIPTION: &str = "description";
pub const LINKS: &str = "links";
pub const HREF: &str = "href";
pub const METHOD: &str = "method";
pub const REL: &str = "rel";
pub const SCHEMA: &str = "schema";
pub const TARGET_SCHEMA: &str = "targetSchema";
pub const TYPE: &str = "type";
pub const ITEMS: &str = "items";
pub const ADDITIONAL_PROPERTIES: &str = "additionalProperties";
pub const READ_ONLY: &str = "readOnly";
pub const ONE_OF: &str = "oneOf";
pub const ANY_OF: &str = "anyOf";
pub const DEFAULT: &str = "default";
pub const REQUIRED: &str = "required";
pub const META_SCHEMA: &str = "$schema";

/// Prefix reserved for wire-protocol metadata keys (`$uri`, `$ref`, `$date`).
pub const RESERVED_SIGIL: char = '$';

/// Pagination query parameters.
pub const PAGE: &str = "page";
pub const PER_PAGE: &str = "per_page";

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A JSON Schema primitive type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JsonType {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array,
    Object,
}

impl JsonType {
    /// The six types that, declared together, mean "anything goes".
    pub const ALL: [JsonType; 6] = [
        JsonType::Null,
        JsonType::String,
        JsonType::Number,
        JsonType::Boolean,
        JsonType::Object,
        JsonType::Array,
    ];

    /// Parse a type name from a schema `type` keyword.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "null" => Some(JsonType::Null),
            "boolean" => Some(JsonType::Boolean),
            "integer" => Some(JsonType::Integer),
            "number" => Some(JsonType::Number),
            "string" => Some(JsonType::String),
            "array" => Some(JsonType::Array),
            "object" => Some(JsonType::Object),
            _ => None,
        }
    }

    /// Read the `type` keyword of a schema fragment (string or array form).
    pub fn declared(schema: &Value) -> Vec<JsonType> {
        match schema.get(TYPE) {
            Some(Value::String(s)) => JsonType::parse(s).into_iter().collect(),
            Some(Value::Array(arr)) => arr
                .iter()
                .filter_map(|v| v.as_str().and_then(JsonType::parse))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Whether `value` is an instance of this type.
    ///
    /// Integers are numbers; a float without fractional part is an integer.
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (JsonType::Null, Value::Null)
            | (JsonType::Boolean, Value::Bool(_))
            | (JsonType::Number, Value::Number(_))
            | (JsonType::String, Value::String(_))
            | (JsonType::Array, Value::Array(_))
            | (JsonType::Object, Value::Object(_)) => true,
            (JsonType::Integer, Value::Number(n)) => {
                n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JsonType::Null => "null",
            JsonType::Boolean => "boolean",
            JsonType::Integer => "integer",
            JsonType::Number => "number",
            JsonType::String => "string",
            JsonType::Array => "array",
            JsonType::Object => "object",
        }
    }
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP method of a schema link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Parse a method name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "PATCH" => Some(Method::Patch),
            "DELETE" => Some(Method::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Whether named parameters travel in the query string rather than the body.
    pub fn uses_query(&self) -> bool {
        matches!(self, Method::Get | Method::Delete)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for connecting a client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// API root, without trailing slash.
    pub base_url: String,
    /// Path of the root schema, relative to `base_url`.
    pub schema_path: String,
    /// Extra headers sent with every request (e.g. authorization).
    pub headers: Vec<(String, String)>,
    /// Per-request timeout for the default transport.
    pub timeout: Duration,
}

impl ClientOptions {
    /// Create options for the API at `base_url`.
    ///
    /// A trailing slash is trimmed so that schema paths and link routes,
    /// which always start with `/`, can be appended directly.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            schema_path: DEFAULT_SCHEMA_PATH.to_string(),
            headers: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the root schema path.
    pub fn schema_path(mut self, path: impl Into<String>) -> Self {
        self.schema_path = path.into();
        self
    }

    /// Add a header forwarded on every request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
