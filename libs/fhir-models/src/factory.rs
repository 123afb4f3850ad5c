//! Polymorphic construction
//!
//! [`ResourceFactory`] turns untyped JSON into [`Element`]s. The concrete type is either
//! supplied by the caller or read from the object's `resourceType` and looked up in a
//! [`SchemaRegistry`]. Already-built nodes pass through unchanged.

use serde_json::Value;
use std::sync::Arc;

use crate::element::{Element, RESOURCE_TYPE_KEY};
use crate::error::{Error, Result};
use crate::registry::{self, is_r4_resource_type, SchemaRegistry};
use crate::schema::TypeSchema;

/// Factory input: a built node or raw JSON.
#[derive(Debug, Clone)]
pub enum Input {
    Node(Element),
    Json(Value),
}

impl From<Element> for Input {
    fn from(node: Element) -> Self {
        Self::Node(node)
    }
}

impl From<Value> for Input {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<&Value> for Input {
    fn from(value: &Value) -> Self {
        Self::Json(value.clone())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResourceFactory<'r> {
    registry: &'r SchemaRegistry,
}

impl ResourceFactory<'static> {
    /// Factory over the process-wide registry.
    pub fn global() -> Self {
        Self::new(registry::global())
    }
}

impl<'r> ResourceFactory<'r> {
    pub fn new(registry: &'r SchemaRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &'r SchemaRegistry {
        self.registry
    }

    /// Build a node of `type_name`, or of the resource named by `resourceType` when no
    /// type is given.
    pub fn create(&self, input: impl Into<Input>, type_name: Option<&str>) -> Result<Element> {
        let value = match input.into() {
            Input::Node(node) => return Ok(node),
            Input::Json(Value::Null) => return Err(Error::MissingInput { operation: "create" }),
            Input::Json(value) => value,
        };
        self.build(&value, type_name)
            .map_err(|err| err.within("create", type_name, &value))
    }

    /// Build a resource of `resource_type`, ignoring the object's own `resourceType`.
    pub fn create_by_resource_type(
        &self,
        input: impl Into<Input>,
        resource_type: &str,
    ) -> Result<Element> {
        const OPERATION: &str = "create_by_resource_type";

        let value = match input.into() {
            Input::Node(node) => return Ok(node),
            Input::Json(Value::Null) => return Err(Error::MissingInput { operation: OPERATION }),
            Input::Json(value) => value,
        };
        self.registry
            .resource(resource_type)
            .and_then(|schema| self.build_as(Arc::clone(schema), &value))
            .map_err(|err| err.within(OPERATION, Some(resource_type), &value))
    }

    /// Build every truthy entry of a scalar-or-array input.
    pub fn create_array(
        &self,
        input: impl Into<Input>,
        type_name: Option<&str>,
    ) -> Result<Vec<Element>> {
        match input.into() {
            Input::Node(node) => Ok(vec![node]),
            Input::Json(Value::Array(values)) => values
                .into_iter()
                .filter(is_truthy)
                .map(|value| self.create(value, type_name))
                .collect(),
            Input::Json(value) if is_truthy(&value) => Ok(vec![self.create(value, type_name)?]),
            Input::Json(_) => Ok(Vec::new()),
        }
    }

    /// Parse JSON text and build the resource it describes.
    pub fn from_json_str(&self, text: &str) -> Result<Element> {
        let value: Value = serde_json::from_str(text)?;
        self.create(value, None)
    }

    pub(crate) fn build(&self, value: &Value, type_name: Option<&str>) -> Result<Element> {
        let schema = match type_name {
            Some(name) => self.registry.resolve(name)?,
            None => self.resolve_resource(value)?,
        };
        self.build_as(Arc::clone(schema), value)
    }

    fn build_as(&self, schema: Arc<TypeSchema>, value: &Value) -> Result<Element> {
        let Value::Object(map) = value else {
            return Err(Error::type_mismatch(
                format!("a JSON object for {}", schema.name()),
                json_kind(value),
            ));
        };
        Element::from_map(self.registry, schema, map)
    }

    fn resolve_resource(&self, value: &Value) -> Result<&'r Arc<TypeSchema>> {
        let Some(resource_type) = value.get(RESOURCE_TYPE_KEY).and_then(Value::as_str) else {
            return Err(Error::MissingResourceType {
                object: Box::new(value.clone()),
            });
        };

        match self.registry.get(resource_type) {
            Some(schema) if schema.is_resource() => Ok(schema),
            Some(_) => Err(Error::NotAResource(resource_type.to_string())),
            None if is_r4_resource_type(resource_type) => Err(Error::UnregisteredResourceType {
                resource_type: resource_type.to_string(),
                object: Box::new(value.clone()),
            }),
            None => Err(Error::UnknownResourceType {
                resource_type: resource_type.to_string(),
                object: Box::new(value.clone()),
            }),
        }
    }
}

/// JavaScript truthiness: `null`, `false`, `0` and `""` are falsy.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map_or(true, |n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::builtin().unwrap()
    }

    #[test]
    fn resolves_the_concrete_type_from_resource_type() {
        let registry = registry();
        let factory = ResourceFactory::new(&registry);
        let patient = factory
            .create(json!({"resourceType": "Patient", "id": "p1"}), None)
            .unwrap();
        assert_eq!(patient.resource_type(), Some("Patient"));
        assert_eq!(patient.id(), Some("p1"));
    }

    #[test]
    fn explicit_type_wins_over_resource_type() {
        let registry = registry();
        let factory = ResourceFactory::new(&registry);
        let coding = factory
            .create(json!({"system": "http://loinc.org", "code": "1234-5"}), Some("Coding"))
            .unwrap();
        assert_eq!(coding.type_name(), "Coding");

        let person = factory
            .create_by_resource_type(json!({"resourceType": "Patient", "id": "x"}), "Person")
            .unwrap();
        assert_eq!(person.resource_type(), Some("Person"));
        assert_eq!(person.id(), Some("x"));
    }

    #[test]
    fn built_nodes_pass_through() {
        let registry = registry();
        let factory = ResourceFactory::new(&registry);
        let built = factory
            .create(json!({"resourceType": "Basic", "id": "b"}), None)
            .unwrap();
        let again = factory.create(built.clone(), Some("Coding")).unwrap();
        assert_eq!(again, built);
        let forced = factory.create_by_resource_type(built.clone(), "Patient").unwrap();
        assert_eq!(forced.resource_type(), Some("Basic"));
    }

    #[test]
    fn missing_input_fails_fast() {
        let registry = registry();
        let factory = ResourceFactory::new(&registry);
        assert!(matches!(
            factory.create(Value::Null, None),
            Err(Error::MissingInput { operation: "create" })
        ));
        assert!(matches!(
            factory.create_by_resource_type(Value::Null, "Patient"),
            Err(Error::MissingInput { .. })
        ));
    }

    #[test]
    fn resolution_errors_carry_the_offending_object() {
        let registry = registry();
        let factory = ResourceFactory::new(&registry);

        let object = json!({"resourceType": "Spaceship", "id": "1"});
        let err = factory.create(object.clone(), None).unwrap_err();
        assert_eq!(err.offending_object(), Some(&object));
        assert!(matches!(err.root_cause(), Error::UnknownResourceType { .. }));
        assert!(err.is_client_error());

        let err = factory
            .create(json!({"resourceType": "Encounter"}), None)
            .unwrap_err();
        assert!(matches!(err.root_cause(), Error::UnregisteredResourceType { .. }));
        assert!(err.is_server_error());

        let err = factory.create(json!({"id": "1"}), None).unwrap_err();
        assert!(matches!(err.root_cause(), Error::MissingResourceType { .. }));

        let err = factory
            .create(json!({"resourceType": "Coding"}), None)
            .unwrap_err();
        assert!(matches!(err.root_cause(), Error::NotAResource(name) if name == "Coding"));
    }

    #[test]
    fn nested_errors_keep_the_outer_object() {
        let registry = registry();
        let factory = ResourceFactory::new(&registry);
        let object = json!({
            "resourceType": "Patient",
            "contained": [{"resourceType": "Spaceship"}]
        });
        let err = factory.create(object.clone(), None).unwrap_err();
        assert_eq!(err.offending_object(), Some(&object));
        assert!(matches!(
            err.root_cause(),
            Error::UnknownResourceType { object, .. } if object["resourceType"] == "Spaceship"
        ));
    }

    #[test]
    fn create_array_normalizes_and_filters_falsy_entries() {
        let registry = registry();
        let factory = ResourceFactory::new(&registry);

        let codings = factory
            .create_array(
                json!([{"code": "a"}, null, false, 0, "", {"code": "b"}]),
                Some("Coding"),
            )
            .unwrap();
        let codes: Vec<_> = codings.iter().filter_map(|c| c.str_value("code")).collect();
        assert_eq!(codes, ["a", "b"]);

        let single = factory.create_array(json!({"code": "c"}), Some("Coding")).unwrap();
        assert_eq!(single.len(), 1);
        assert!(factory.create_array(Value::Null, Some("Coding")).unwrap().is_empty());
    }

    #[test]
    fn parses_json_text() {
        let registry = registry();
        let factory = ResourceFactory::new(&registry);
        let basic = factory
            .from_json_str(r#"{"resourceType": "Basic", "id": "b1"}"#)
            .unwrap();
        assert_eq!(basic.id(), Some("b1"));
        assert!(factory.from_json_str("{").unwrap_err().is_client_error());
    }

    #[test]
    fn non_objects_are_rejected() {
        let registry = registry();
        let factory = ResourceFactory::new(&registry);
        let err = factory.create(json!("Patient"), Some("Patient")).unwrap_err();
        assert!(matches!(err.root_cause(), Error::TypeMismatch { .. }));
    }
}
