//! Error types for the FHIR model

use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{operation}: no input object was provided")]
    MissingInput { operation: &'static str },

    #[error("object has no resourceType")]
    MissingResourceType { object: Box<Value> },

    #[error("unknown resourceType '{resource_type}'")]
    UnknownResourceType {
        resource_type: String,
        object: Box<Value>,
    },

    #[error("no schema registered for FHIR resource type '{resource_type}'")]
    UnregisteredResourceType {
        resource_type: String,
        object: Box<Value>,
    },

    #[error("unknown type '{0}'")]
    UnknownType(String),

    #[error("'{0}' is not a resource type")]
    NotAResource(String),

    #[error("{type_name} has no field '{field}'")]
    UnknownField { type_name: String, field: String },

    #[error("invalid value for {type_name}.{field}: {message}")]
    InvalidFieldValue {
        type_name: String,
        field: String,
        message: String,
    },

    #[error("{type_name}.{field}[x] is populated twice ('{first}' and '{second}')")]
    ChoiceConflict {
        type_name: String,
        field: String,
        first: String,
        second: String,
    },

    #[error("expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("{0} does not carry internal fields")]
    InternalFieldsNotSupported(String),

    #[error("{operation} failed for {}: {source}", .type_name.as_deref().unwrap_or("resource"))]
    Construction {
        operation: &'static str,
        type_name: Option<String>,
        object: Box<Value>,
        #[source]
        source: Box<Error>,
    },

    #[error("reference update failed: {0}")]
    ReferenceUpdate(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("schema definitions, line {line}: {message}")]
    SchemaDefinition { line: usize, message: String },

    #[error("invalid StructureDefinition '{name}': {message}")]
    StructureDefinition { name: String, message: String },

    #[error("package error: {0}")]
    Package(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("schema registry is already installed")]
    RegistryAlreadyInstalled,
}

impl Error {
    pub fn invalid_field_value(
        type_name: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidFieldValue {
            type_name: type_name.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn unknown_field(type_name: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField {
            type_name: type_name.into(),
            field: field.into(),
        }
    }

    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Wrap an error raised by a reference update callback.
    pub fn reference_update<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::ReferenceUpdate(error.into())
    }

    pub(crate) fn within(self, operation: &'static str, type_name: Option<&str>, object: &Value) -> Self {
        Self::Construction {
            operation,
            type_name: type_name.map(str::to_string),
            object: Box::new(object.clone()),
            source: Box::new(self),
        }
    }

    /// The JSON object that could not be turned into a model node, if known.
    pub fn offending_object(&self) -> Option<&Value> {
        match self {
            Self::Construction { object, .. }
            | Self::MissingResourceType { object }
            | Self::UnknownResourceType { object, .. }
            | Self::UnregisteredResourceType { object, .. } => Some(object),
            _ => None,
        }
    }

    /// The innermost error beneath any construction wrappers.
    pub fn root_cause(&self) -> &Error {
        match self {
            Self::Construction { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Malformed input supplied by a caller (4xx at an HTTP boundary).
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::Construction { source, .. } => source.is_client_error(),
            Self::MissingInput { .. }
            | Self::MissingResourceType { .. }
            | Self::UnknownResourceType { .. }
            | Self::NotAResource(_)
            | Self::InvalidFieldValue { .. }
            | Self::ChoiceConflict { .. }
            | Self::Json(_) => true,
            _ => false,
        }
    }

    /// Failures of the model itself or its collaborators (5xx at an HTTP boundary).
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn construction_errors_expose_the_offending_object() {
        let object = json!({"resourceType": "Nope"});
        let err = Error::UnknownResourceType {
            resource_type: "Nope".into(),
            object: Box::new(object.clone()),
        }
        .within("create", None, &object);

        assert_eq!(err.offending_object(), Some(&object));
        assert!(matches!(
            err.root_cause(),
            Error::UnknownResourceType { resource_type, .. } if resource_type == "Nope"
        ));
        assert_eq!(
            err.to_string(),
            "create failed for resource: unknown resourceType 'Nope'"
        );
    }

    #[test]
    fn classification_follows_the_wrapped_cause() {
        let object = json!({});
        let client = Error::invalid_field_value("Patient", "name", "expected a HumanName object")
            .within("create", Some("Patient"), &object);
        assert!(client.is_client_error());

        let server = Error::UnknownType("Widget".into()).within("create", Some("Widget"), &object);
        assert!(server.is_server_error());
        assert!(Error::reference_update("lookup failed").is_server_error());
    }
}
