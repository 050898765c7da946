//! Potion Client
//!
//! A schema-driven client for REST APIs that publish a JSON Hyper-Schema in
//! the Potion convention.
//!
//! The client fetches the root schema, follows each resource's `$ref` to its
//! own schema, and builds a [`ResourceType`] per resource at runtime: typed
//! property access through [`AttributeType`], and the schema's `links` as
//! callable [`LinkProxy`] values. Nothing resource-specific is written ahead
//! of time.
//!
//! # Example
//!
//! ```no_run
//! use potion_client::{Client, ClientOptions};
//!
//! # fn main() -> Result<(), potion_client::Error> {
//! let client = Client::connect(ClientOptions::new("http://localhost:5000"))?;
//! let user = client.resource("User")?;
//!
//! let foo = user.fetch(123)?;
//! println!("{:?}", foo.get("name")?.as_str());
//!
//! let created = user.build();
//! created.set("name", "bar")?;
//! created.save()?;
//!
//! let page = user.instances()?.per_page(20)?;
//! for item in page.iter().take(5) {
//!     println!("{:?}", item?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Wire extensions
//!
//! | Shape | Decoded as |
//! |-------|------------|
//! | `{"$date": <epoch ms>}` | [`Data::Date`] |
//! | `{"$ref": "/user/1"}` | [`Data::Resource`] (identity-mapped) |
//! | `{"$uri": "/user/1", ...}` | [`Data::Resource`] with its fields |
//!
//! # Links
//!
//! | `targetSchema` | Call returns |
//! |----------------|--------------|
//! | none, or `type: null` | [`Outcome::Void`] |
//! | `type: array` (or only `items`) | [`Outcome::Collection`] |
//! | `$ref: "#"`, object, scalar | [`Outcome::Value`] |

mod attribute;
mod client;
mod codec;
mod collection;
mod data;
mod error;
mod link;
mod loader;
mod naming;
mod pagination;
mod proxy;
mod resource;
mod transport;
mod types;
mod validator;

pub use attribute::{AttributeKind, AttributeType};
pub use client::{is_reference, parse_uri, Client};
pub use codec::{decode_date, Codec};
pub use collection::{CollectionIter, LazyCollection};
pub use data::Data;
pub use error::{
    BoxError, Error, HttpStatusError, Result, SchemaError, SchemaResolutionError, TransportError,
};
pub use link::{Link, OutputKind, Reply, Route, SchemaSource};
pub use loader::{navigate_fragment, split_reference, SchemaResolver};
pub use naming::{attribute_name, type_name};
pub use pagination::{page_ref, parse_link_header, total_count, PageLinks, PageRef};
pub use proxy::{Binding, LinkProxy, Outcome};
pub use resource::{id_from_uri, Instance, ResourceType};
pub use transport::{HttpRequest, HttpResponse, Transport};
pub use types::{ClientOptions, JsonType, Method, DEFAULT_SCHEMA_PATH, DEFAULT_TIMEOUT};
pub use validator::validate_against_schema;

#[cfg(feature = "remote")]
pub use transport::HttpTransport;
