//! Schemas from HL7 StructureDefinitions
//!
//! Reads the snapshot of a base definition (`derivation = specialization`) and produces
//! one [`TypeSchema`] for the type itself plus one per backbone element. Profiles,
//! abstract types, primitives and logical models are skipped.

use heck::ToUpperCamelCase;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use super::{Cardinality, FieldSchema, FieldType, TypeKind, TypeSchema};
use crate::error::{Error, Result};

const EXPLICIT_TYPE_NAME_URL: &str =
    "http://hl7.org/fhir/StructureDefinition/structuredefinition-explicit-type-name";

/// Parse a single StructureDefinition.
///
/// Returns an empty vector for definitions that do not describe a concrete type.
pub fn parse_structure_definition(sd: &Value) -> Result<Vec<TypeSchema>> {
    let name = sd
        .get("type")
        .or_else(|| sd.get("name"))
        .and_then(Value::as_str)
        .ok_or_else(|| definition_error("<unnamed>", "missing 'type'"))?;

    let kind = match sd.get("kind").and_then(Value::as_str) {
        Some("resource") => TypeKind::Resource,
        Some("complex-type") => TypeKind::ComplexType,
        _ => return Ok(Vec::new()),
    };
    let is_abstract = sd.get("abstract").and_then(Value::as_bool).unwrap_or(false);
    let derivation = sd.get("derivation").and_then(Value::as_str);
    if is_abstract || derivation == Some("constraint") {
        return Ok(Vec::new());
    }

    let elements = sd
        .get("snapshot")
        .and_then(|snapshot| snapshot.get("element"))
        .and_then(Value::as_array)
        .ok_or_else(|| definition_error(name, "missing snapshot elements"))?;

    let base = sd
        .get("baseDefinition")
        .and_then(Value::as_str)
        .map(type_name_from_url);

    let mut builder = SchemaBuilder::new(name, elements);
    for element in elements.iter().skip(1) {
        builder.add(element)?;
    }

    Ok(builder.finish(kind, base))
}

/// Schemas for every StructureDefinition in `resources`, expanding Bundles.
///
/// Definitions that fail to parse are logged and skipped.
pub fn schemas_from_resources(resources: &[Value]) -> Vec<TypeSchema> {
    let mut schemas = Vec::new();
    for resource in resources {
        collect(resource, &mut schemas);
    }
    schemas
}

fn collect(resource: &Value, schemas: &mut Vec<TypeSchema>) {
    match resource.get("resourceType").and_then(Value::as_str) {
        Some("StructureDefinition") => match parse_structure_definition(resource) {
            Ok(parsed) => schemas.extend(parsed),
            Err(err) => tracing::warn!(error = %err, "Skipping StructureDefinition"),
        },
        Some("Bundle") => {
            let entries = resource
                .get("entry")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            for entry in entries {
                if let Some(inner) = entry.get("resource") {
                    collect(inner, schemas);
                }
            }
        }
        _ => {}
    }
}

struct Draft {
    name: String,
    fields: Vec<FieldSchema>,
}

struct SchemaBuilder<'a> {
    root: &'a str,
    /// Paths that have child elements.
    parents: HashSet<&'a str>,
    /// Element path to the type name owning its children.
    owners: HashMap<String, usize>,
    drafts: Vec<Draft>,
}

impl<'a> SchemaBuilder<'a> {
    fn new(root: &'a str, elements: &'a [Value]) -> Self {
        let parents = elements
            .iter()
            .filter_map(element_path)
            .filter_map(|path| path.rsplit_once('.').map(|(parent, _)| parent))
            .collect();

        let mut owners = HashMap::new();
        owners.insert(root.to_string(), 0);
        Self {
            root,
            parents,
            owners,
            drafts: vec![Draft {
                name: root.to_string(),
                fields: Vec::new(),
            }],
        }
    }

    fn add(&mut self, element: &'a Value) -> Result<()> {
        let Some(path) = element_path(element) else {
            return Err(definition_error(self.root, "element without 'path'"));
        };
        if element.get("sliceName").is_some() || element.get("max").and_then(Value::as_str) == Some("0") {
            return Ok(());
        }
        let Some((parent, segment)) = path.rsplit_once('.') else {
            return Ok(());
        };
        let Some(&owner) = self.owners.get(parent) else {
            tracing::trace!(path, "Skipping element below an unsupported parent");
            return Ok(());
        };

        let cardinality = match element.get("max").and_then(Value::as_str) {
            Some("*") => Cardinality::Multiple,
            Some(max) if max.parse::<u32>().map(|max| max > 1).unwrap_or(false) => {
                Cardinality::Multiple
            }
            _ => Cardinality::Single,
        };
        let required = element.get("min").and_then(Value::as_u64).unwrap_or(0) > 0;

        let (field_name, field_type) = if let Some(target) = element
            .get("contentReference")
            .and_then(Value::as_str)
        {
            let target = target.rsplit_once('#').map_or(target, |(_, path)| path);
            let type_name = self
                .owners
                .get(target)
                .map(|&index| self.drafts[index].name.clone())
                .unwrap_or_else(|| path_type_name(target));
            (segment.to_string(), FieldType::Complex(type_name))
        } else if self.parents.contains(path) {
            let type_name = backbone_type_name(self.root, path, element);
            self.owners.insert(path.to_string(), self.drafts.len());
            self.drafts.push(Draft {
                name: type_name.clone(),
                fields: Vec::new(),
            });
            (segment.to_string(), FieldType::Complex(type_name))
        } else {
            let codes = type_codes(element);
            match segment.strip_suffix("[x]") {
                Some(base) => (base.to_string(), FieldType::Choice(codes)),
                None => {
                    let code = codes
                        .into_iter()
                        .next()
                        .ok_or_else(|| definition_error(self.root, format!("{path} has no type")))?;
                    (segment.to_string(), FieldType::from_code(&code))
                }
            }
        };

        let cardinality = if field_type_is_choice(&field_type) {
            Cardinality::Single
        } else {
            cardinality
        };
        let field = FieldSchema::new(field_name, field_type, cardinality);
        self.drafts[owner]
            .fields
            .push(if required { field.required() } else { field });
        Ok(())
    }

    fn finish(self, kind: TypeKind, base: Option<String>) -> Vec<TypeSchema> {
        self.drafts
            .into_iter()
            .enumerate()
            .map(|(index, draft)| {
                if index == 0 {
                    let schema = TypeSchema::new(draft.name, kind, draft.fields);
                    match &base {
                        Some(base) => schema.with_base(base.clone()),
                        None => schema,
                    }
                } else {
                    TypeSchema::new(draft.name, TypeKind::BackboneElement, draft.fields)
                        .with_base("BackboneElement")
                }
            })
            .collect()
    }
}

fn element_path(element: &Value) -> Option<&str> {
    element.get("path").and_then(Value::as_str)
}

fn field_type_is_choice(field_type: &FieldType) -> bool {
    matches!(field_type, FieldType::Choice(_))
}

fn type_codes(element: &Value) -> Vec<String> {
    element
        .get("type")
        .and_then(Value::as_array)
        .map(|types| {
            types
                .iter()
                .filter_map(|t| t.get("code").and_then(Value::as_str))
                .map(normalize_type_code)
                .collect()
        })
        .unwrap_or_default()
}

/// Map FHIRPath system types (`http://hl7.org/fhirpath/System.String`) to FHIR primitives.
fn normalize_type_code(code: &str) -> String {
    match code.strip_prefix("http://hl7.org/fhirpath/System.") {
        Some("String") => "string".to_string(),
        Some("Boolean") => "boolean".to_string(),
        Some("Integer") => "integer".to_string(),
        Some("Decimal") => "decimal".to_string(),
        Some("Date") => "date".to_string(),
        Some("DateTime") => "dateTime".to_string(),
        Some("Time") => "time".to_string(),
        Some(other) => other.to_lowercase(),
        None => code.to_string(),
    }
}

fn backbone_type_name(root: &str, path: &str, element: &Value) -> String {
    let explicit = element
        .get("extension")
        .and_then(Value::as_array)
        .and_then(|extensions| {
            extensions.iter().find(|ext| {
                ext.get("url").and_then(Value::as_str) == Some(EXPLICIT_TYPE_NAME_URL)
            })
        })
        .and_then(|ext| ext.get("valueString"))
        .and_then(Value::as_str);

    match explicit {
        Some(explicit) => format!("{root}{}", explicit.to_upper_camel_case()),
        None => path_type_name(path),
    }
}

/// `Consent.provision.actor` -> `ConsentProvisionActor`
fn path_type_name(path: &str) -> String {
    path.split('.')
        .map(|segment| segment.to_upper_camel_case())
        .collect()
}

fn type_name_from_url(url: &str) -> String {
    url.rsplit('/').next().unwrap_or(url).to_string()
}

fn definition_error(name: &str, message: impl Into<String>) -> Error {
    Error::StructureDefinition {
        name: name.to_string(),
        message: message.into(),
    }
}
