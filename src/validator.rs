//! Structural validation of values against schema fragments.

use serde_json::Value;

use crate::error::{Error, SchemaError, SchemaResolutionError};

/// Validate a value against an already-bundled schema fragment.
///
/// Potion publishes draft-04 hyper-schemas, so fragments are compiled as
/// draft 4 regardless of any `$schema` they carry. Formats are annotations
/// only: `$uri` values are relative references, not absolute URIs.
///
/// # Errors
///
/// Returns `Error::Validation` listing every violation, or
/// `Error::Schema` if the fragment itself does not compile.
pub fn validate_against_schema(schema: &Value, value: &Value) -> Result<(), Error> {
    let mut schema = schema.clone();
    if let Value::Object(map) = &mut schema {
        map.remove("$schema");
    }

    let validator = jsonschema::options()
        .with_draft(jsonschema::Draft::Draft4)
        .should_validate_formats(false)
        .build(&schema)
        .map_err(|e| {
            Error::Schema(SchemaResolutionError::InvalidSchema {
                message: e.to_string(),
            })
        })?;

    let errors: Vec<SchemaError> = validator
        .iter_errors(value)
        .map(|e| SchemaError {
            path: e.instance_path.to_string(),
            message: e.to_string(),
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation { errors })
    }
}
