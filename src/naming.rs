//! Names for generated resource types and link accessors.

use heck::{ToSnakeCase, ToUpperCamelCase};

/// Type name of a resource.
///
/// `"user"` → `"User"`, `"foo_with_mapped_biz"` → `"FooWithMappedBiz"`.
pub fn type_name(name: &str) -> String {
    name.to_upper_camel_case()
}

/// Accessor name of a link relation or property: `"readAttr3"` → `"read_attr3"`.
pub fn attribute_name(name: &str) -> String {
    name.to_snake_case()
}
