//! Error types for schema resolution, validation and link calls.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Boxed source error carried by transport failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Connection-level failure reported by a [`Transport`](crate::Transport).
#[derive(Debug, Error)]
#[error("request to {url} failed: {message}")]
pub struct TransportError {
    pub url: String,
    pub message: String,
    #[source]
    pub source: Option<BoxError>,
}

impl TransportError {
    pub fn new(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Non-2xx response from the API.
#[derive(Debug, Error)]
pub enum HttpStatusError {
    #[error("Bad Request (400) from {url}: {body}")]
    BadRequest { url: String, body: String },

    #[error("Not Found (404) from {url}: {body}")]
    NotFound { url: String, body: String },

    #[error("Conflict (409) from {url}: {body}")]
    Conflict { url: String, body: String },

    #[error("Internal Server Error (500) from {url}: {body}")]
    InternalServerError { url: String, body: String },

    #[error("HTTP {status} from {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },
}

impl HttpStatusError {
    /// Map a status code to its error kind.
    pub fn from_status(status: u16, url: impl Into<String>, body: impl Into<String>) -> Self {
        let url = url.into();
        let body = body.into();
        match status {
            400 => Self::BadRequest { url, body },
            404 => Self::NotFound { url, body },
            409 => Self::Conflict { url, body },
            500 => Self::InternalServerError { url, body },
            status => Self::Status { status, url, body },
        }
    }

    /// The HTTP status code.
    pub fn status(&self) -> u16 {
        match self {
            Self::BadRequest { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::InternalServerError { .. } => 500,
            Self::Status { status, .. } => *status,
        }
    }

    /// The raw response body.
    pub fn body(&self) -> &str {
        match self {
            Self::BadRequest { body, .. }
            | Self::NotFound { body, .. }
            | Self::Conflict { body, .. }
            | Self::InternalServerError { body, .. }
            | Self::Status { body, .. } => body,
        }
    }
}

/// Errors while fetching schema documents or following `$ref` pointers.
#[derive(Debug, Error)]
pub enum SchemaResolutionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to fetch schema {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: HttpStatusError,
    },

    #[error("invalid JSON in schema {url}: {source}")]
    InvalidJson {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("fragment not found: {reference}")]
    MissingFragment { reference: String },

    #[error("cannot resolve {reference}: no context document")]
    MissingContext { reference: String },

    #[error("invalid schema: {message}")]
    InvalidSchema { message: String },
}

/// Single validation error with path context.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SchemaError {
    /// JSON Pointer (RFC 6901) to the invalid field.
    pub path: String,
    /// Human-readable error message.
    pub message: String,
}

impl SchemaError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Schema(#[from] SchemaResolutionError),

    #[error(transparent)]
    Http(#[from] HttpStatusError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("validation failed with {} error(s): {}", errors.len(), join(errors))]
    Validation { errors: Vec<SchemaError> },

    #[error("no oneOf alternative accepted the value: {}", join(errors))]
    OneOfResolution { errors: Vec<Error> },

    #[error("index {index} out of range for collection of {total}")]
    IndexOutOfRange { index: usize, total: usize },

    #[error("property '{property}' of {resource} is read-only")]
    ReadOnlyProperty { resource: String, property: String },

    #[error("property '{property}' is reserved: '$' keys are wire-protocol metadata")]
    ReservedProperty { property: String },

    #[error("{resource} has no property '{property}'")]
    UnknownProperty { resource: String, property: String },

    #[error("unknown resource '{name}'")]
    UnknownResource { name: String },

    #[error("{resource} has no link '{rel}'")]
    UnknownLink { resource: String, rel: String },

    #[error("cannot reference an unsaved {resource} instance")]
    UnsavedReference { resource: String },

    #[error("invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },

    #[error("cannot decode value: {message}")]
    Decode { message: String },

    #[error("{message}")]
    Usage { message: String },

    #[error("the client owning this resource has been dropped")]
    ClientDropped,
}

impl Error {
    pub(crate) fn usage(message: impl Into<String>) -> Self {
        Error::Usage {
            message: message.into(),
        }
    }

    pub(crate) fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            errors: vec![SchemaError::new(path, message)],
        }
    }

    /// The HTTP status behind this error, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Error::Http(e) => Some(e.status()),
            Error::Schema(SchemaResolutionError::Http { source, .. }) => Some(source.status()),
            _ => None,
        }
    }

    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Validation { .. } | Error::OneOfResolution { .. } => 1,
            Error::Http(_)
            | Error::Transport(_)
            | Error::Schema(SchemaResolutionError::Http { .. })
            | Error::Schema(SchemaResolutionError::Transport(_)) => 3,
            _ => 2,
        }
    }
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
