//! JSON output
//!
//! Two views of the same tree: the public FHIR wire format, and the internal form that
//! also carries `_access`, `_sourceAssigningAuthority`, `_uuid` and `_sourceId`. Both are
//! pruned with [`remove_null`].

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::element::{Element, FieldValue, Item, RESOURCE_TYPE_KEY};
use crate::factory::ResourceFactory;
use crate::prune::remove_null;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Visibility {
    /// FHIR wire format.
    #[default]
    Public,
    /// Wire format plus server-internal fields.
    Internal,
}

impl Element {
    pub fn to_json(&self) -> Value {
        self.serialize_with(Visibility::Public)
    }

    pub fn to_json_internal(&self) -> Value {
        self.serialize_with(Visibility::Internal)
    }

    /// Serialize and prune. An element with nothing populated becomes `{}`.
    pub fn serialize_with(&self, visibility: Visibility) -> Value {
        remove_null(Value::Object(self.unpruned(visibility)))
            .unwrap_or_else(|| Value::Object(Map::new()))
    }

    fn unpruned(&self, visibility: Visibility) -> Map<String, Value> {
        let mut map = Map::new();
        if let Some(resource_type) = self.resource_type() {
            map.insert(
                RESOURCE_TYPE_KEY.to_string(),
                Value::String(resource_type.to_string()),
            );
        }

        for (field, value) in self.fields() {
            let (key, json) = match value {
                FieldValue::Single(item) => (field.name.clone(), item_json(item, visibility)),
                FieldValue::Multiple(items) => (
                    field.name.clone(),
                    Value::Array(items.iter().map(|item| item_json(item, visibility)).collect()),
                ),
                FieldValue::Choice(choice) => (
                    field.json_key(Some(&choice.type_code)),
                    item_json(&choice.item, visibility),
                ),
            };
            map.insert(key, json);
        }

        if visibility == Visibility::Internal {
            self.internal().write(&mut map);
        }
        map
    }
}

fn item_json(item: &Item, visibility: Visibility) -> Value {
    match item {
        Item::Primitive(value) => value.clone(),
        Item::Node(node) => Value::Object(node.unpruned(visibility)),
    }
}

impl Serialize for Element {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Element {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        ResourceFactory::global()
            .create(value, None)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SchemaRegistry;
    use serde_json::json;

    fn build(registry: &SchemaRegistry, value: Value) -> Element {
        ResourceFactory::new(registry).create(value, None).unwrap()
    }

    #[test]
    fn resource_type_comes_first_then_declaration_order() {
        let registry = SchemaRegistry::builtin().unwrap();
        let response = build(
            &registry,
            json!({
                "participantStatus": "accepted",
                "appointment": {"reference": "Appointment/99"},
                "id": "1",
                "resourceType": "AppointmentResponse"
            }),
        );
        let json = response.to_json();
        let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["resourceType", "id", "appointment", "participantStatus"]);
    }

    #[test]
    fn choice_values_use_typed_keys() {
        let registry = SchemaRegistry::builtin().unwrap();
        let history = build(
            &registry,
            json!({
                "resourceType": "FamilyMemberHistory",
                "status": "completed",
                "patient": {"reference": "Patient/1"},
                "relationship": {"text": "mother"},
                "condition": [{"code": {"text": "asthma"}, "onsetAge": {"value": 12, "unit": "a"}}]
            }),
        );
        assert_eq!(
            history.to_json()["condition"][0]["onsetAge"],
            json!({"value": 12, "unit": "a"})
        );
    }

    #[test]
    fn internal_fields_only_in_internal_form() {
        let registry = SchemaRegistry::builtin().unwrap();
        let patient = build(
            &registry,
            json!({
                "resourceType": "Patient",
                "id": "1",
                "_uuid": "Patient/5b3c",
                "_sourceAssigningAuthority": "bwell",
                "_access": {"bwell": 1},
                "managingOrganization": {"reference": "Organization/1", "_sourceId": "Organization/1"}
            }),
        );

        let public = patient.to_json();
        assert!(public.get("_uuid").is_none());
        assert!(public["managingOrganization"].get("_sourceId").is_none());

        let internal = patient.to_json_internal();
        assert_eq!(internal["_uuid"], "Patient/5b3c");
        assert_eq!(internal["_access"], json!({"bwell": 1}));
        assert_eq!(internal["managingOrganization"]["_sourceId"], "Organization/1");
    }

    #[test]
    fn attachment_file_ids_survive_internal_round_trips() {
        let registry = SchemaRegistry::builtin().unwrap();
        let basic = build(
            &registry,
            json!({
                "resourceType": "Basic",
                "code": {"text": "upload"},
                "extension": [{
                    "url": "https://example.org/upload",
                    "valueAttachment": {"contentType": "text/plain", "_file_id": "abc123"}
                }]
            }),
        );

        let internal = basic.to_json_internal();
        assert_eq!(
            internal["extension"][0]["valueAttachment"],
            json!({"contentType": "text/plain", "_file_id": "abc123"})
        );
        assert_eq!(
            basic.to_json()["extension"][0]["valueAttachment"],
            json!({"contentType": "text/plain"})
        );
        assert_eq!(build(&registry, internal.clone()).to_json_internal(), internal);
    }

    #[test]
    fn empty_nodes_are_pruned() {
        let registry = SchemaRegistry::builtin().unwrap();
        let patient = build(
            &registry,
            json!({"resourceType": "Patient", "meta": {}, "name": [{"given": []}]}),
        );
        assert_eq!(patient.to_json(), json!({"resourceType": "Patient"}));

        let coding = ResourceFactory::new(&registry)
            .create(json!({}), Some("Coding"))
            .unwrap();
        assert_eq!(coding.to_json(), json!({}));
    }

    #[test]
    fn serde_uses_the_public_form() {
        let registry = SchemaRegistry::builtin().unwrap();
        let basic = build(&registry, json!({"resourceType": "Basic", "id": "b", "_uuid": "u"}));
        let text = serde_json::to_string(&basic).unwrap();
        assert_eq!(text, r#"{"resourceType":"Basic","id":"b"}"#);
    }
}
