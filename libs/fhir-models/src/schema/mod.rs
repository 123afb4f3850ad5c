//! Declarative type schemas
//!
//! Every model node is one generic [`Element`](crate::Element) whose shape comes from a
//! [`TypeSchema`]: the ordered list of declared fields, each with a cardinality and a
//! target type. Schemas are plain data, so the ~150 R4 resource types and their data
//! types are registered as tables rather than code.
//!
//! Schemas come from two places:
//!
//! - the compact definitions format in [`parse_definitions`], used for the built-in table
//! - HL7 StructureDefinitions ([`structure_definition`]), optionally read from an NPM
//!   package tarball ([`package`])

mod dsl;
pub mod package;
pub mod structure_definition;

pub use dsl::{parse_definitions, DefinitionParser};

use std::collections::HashMap;

use crate::element::{ACCESS_KEY, SOURCE_ASSIGNING_AUTHORITY_KEY, SOURCE_ID_KEY, UUID_KEY};

/// Name of the one complex type the reference traversal targets.
pub const REFERENCE_TYPE: &str = "Reference";

/// Bookkeeping keys carried by resources and references.
pub const RECORD_INTERNAL_KEYS: [&str; 4] =
    [ACCESS_KEY, SOURCE_ASSIGNING_AUTHORITY_KEY, UUID_KEY, SOURCE_ID_KEY];

/// Type code meaning "any resource, resolved from its `resourceType`".
pub const RESOURCE_TYPE: &str = "Resource";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Resource,
    ComplexType,
    BackboneElement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Single,
    Multiple,
}

impl Cardinality {
    pub fn is_array(self) -> bool {
        matches!(self, Self::Multiple)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    /// A FHIR primitive, stored as its JSON value.
    Primitive(String),
    /// A named complex or backbone type.
    Complex(String),
    /// Any resource (`contained`, `Bundle.entry.resource`).
    Resource,
    /// A `[x]` field; exactly one of the listed type codes is populated.
    Choice(Vec<String>),
}

impl FieldType {
    pub fn from_code(code: &str) -> Self {
        if code == RESOURCE_TYPE {
            Self::Resource
        } else if is_primitive_type(code) {
            Self::Primitive(code.to_string())
        } else {
            Self::Complex(code.to_string())
        }
    }

    /// Complex type names this field can hold.
    pub fn complex_targets(&self) -> Vec<&str> {
        match self {
            Self::Complex(name) => vec![name.as_str()],
            Self::Choice(codes) => codes
                .iter()
                .map(String::as_str)
                .filter(|code| !is_primitive_type(code) && *code != RESOURCE_TYPE)
                .collect(),
            Self::Primitive(_) | Self::Resource => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    /// JSON name; for choice fields the name without the `[x]` suffix.
    pub name: String,
    pub field_type: FieldType,
    pub cardinality: Cardinality,
    /// Minimum cardinality above zero. Informational only, never enforced.
    pub required: bool,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, field_type: FieldType, cardinality: Cardinality) -> Self {
        Self {
            name: name.into(),
            field_type,
            cardinality,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn is_array(&self) -> bool {
        self.cardinality.is_array()
    }

    pub fn is_choice(&self) -> bool {
        matches!(self.field_type, FieldType::Choice(_))
    }

    /// JSON key for a value of this field, `valueQuantity` for a `value[x]` holding a Quantity.
    pub fn json_key(&self, type_code: Option<&str>) -> String {
        match type_code {
            Some(code) if self.is_choice() => choice_key(&self.name, code),
            _ => self.name.clone(),
        }
    }
}

/// A JSON key resolved against a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyMatch {
    /// Position of the field in declaration order.
    pub index: usize,
    /// Position of the choice type code, when the key names one choice variant.
    pub variant: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct TypeSchema {
    name: String,
    kind: TypeKind,
    base: Option<String>,
    internal_keys: Vec<String>,
    fields: Vec<FieldSchema>,
    keys: HashMap<String, KeyMatch>,
}

impl TypeSchema {
    /// Resources and `Reference` carry the server-internal bookkeeping fields by default.
    pub fn new(name: impl Into<String>, kind: TypeKind, fields: Vec<FieldSchema>) -> Self {
        let name = name.into();
        let internal_keys = if kind == TypeKind::Resource || name == REFERENCE_TYPE {
            RECORD_INTERNAL_KEYS.iter().map(|key| key.to_string()).collect()
        } else {
            Vec::new()
        };
        let keys = index_keys(&fields);
        Self {
            name,
            kind,
            base: None,
            internal_keys,
            fields,
            keys,
        }
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Replace the internal keys this type accepts; an empty set disables them.
    pub fn with_internal_keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.internal_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    pub fn is_resource(&self) -> bool {
        self.kind == TypeKind::Resource
    }

    pub fn is_reference(&self) -> bool {
        self.name == REFERENCE_TYPE
    }

    pub fn has_internal_fields(&self) -> bool {
        !self.internal_keys.is_empty()
    }

    /// Underscore-prefixed keys kept by `to_json_internal` and dropped by `to_json`.
    pub fn internal_keys(&self) -> &[String] {
        &self.internal_keys
    }

    pub fn accepts_internal_key(&self, key: &str) -> bool {
        self.internal_keys.iter().any(|internal| internal == key)
    }

    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.index_of(name).map(|index| &self.fields[index])
    }

    /// Index of a field by its declared name (`value` for `value[x]`).
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    /// Resolve a JSON key: a plain field name, a choice base name or a typed choice key.
    pub fn resolve_key(&self, key: &str) -> Option<KeyMatch> {
        self.keys.get(key).copied()
    }
}

fn index_keys(fields: &[FieldSchema]) -> HashMap<String, KeyMatch> {
    let mut keys = HashMap::new();
    for (index, field) in fields.iter().enumerate() {
        keys.insert(
            field.name.clone(),
            KeyMatch {
                index,
                variant: None,
            },
        );
        if let FieldType::Choice(codes) = &field.field_type {
            for (variant, code) in codes.iter().enumerate() {
                keys.insert(
                    choice_key(&field.name, code),
                    KeyMatch {
                        index,
                        variant: Some(variant),
                    },
                );
            }
        }
    }
    keys
}

pub(crate) fn choice_key(base: &str, type_code: &str) -> String {
    let mut chars = type_code.chars();
    match chars.next() {
        Some(first) => format!("{}{}{}", base, first.to_ascii_uppercase(), chars.as_str()),
        None => base.to_string(),
    }
}

/// Check if a type code is a FHIR primitive
pub fn is_primitive_type(code: &str) -> bool {
    matches!(
        code,
        "base64Binary"
            | "boolean"
            | "canonical"
            | "code"
            | "date"
            | "dateTime"
            | "decimal"
            | "id"
            | "instant"
            | "integer"
            | "integer64"
            | "markdown"
            | "oid"
            | "positiveInt"
            | "string"
            | "time"
            | "unsignedInt"
            | "uri"
            | "url"
            | "uuid"
            | "xhtml"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation_like() -> TypeSchema {
        TypeSchema::new(
            "Sample",
            TypeKind::ComplexType,
            vec![
                FieldSchema::new(
                    "code",
                    FieldType::Complex("CodeableConcept".into()),
                    Cardinality::Single,
                )
                .required(),
                FieldSchema::new(
                    "value",
                    FieldType::Choice(vec!["Quantity".into(), "dateTime".into()]),
                    Cardinality::Single,
                ),
                FieldSchema::new(
                    "note",
                    FieldType::Primitive("string".into()),
                    Cardinality::Multiple,
                ),
            ],
        )
    }

    #[test]
    fn resolves_plain_and_choice_keys() {
        let schema = observation_like();
        assert_eq!(
            schema.resolve_key("code"),
            Some(KeyMatch {
                index: 0,
                variant: None
            })
        );
        assert_eq!(
            schema.resolve_key("valueQuantity"),
            Some(KeyMatch {
                index: 1,
                variant: Some(0)
            })
        );
        assert_eq!(
            schema.resolve_key("valueDateTime"),
            Some(KeyMatch {
                index: 1,
                variant: Some(1)
            })
        );
        assert_eq!(schema.resolve_key("valueString"), None);
        assert_eq!(schema.resolve_key("unknown"), None);
    }

    #[test]
    fn choice_keys_capitalize_the_type_code() {
        assert_eq!(choice_key("onset", "dateTime"), "onsetDateTime");
        assert_eq!(choice_key("value", "base64Binary"), "valueBase64Binary");
        assert_eq!(choice_key("deceased", "boolean"), "deceasedBoolean");
    }

    #[test]
    fn internal_fields_default_to_resources_and_references() {
        let resource = TypeSchema::new("Basic", TypeKind::Resource, Vec::new());
        let reference = TypeSchema::new(REFERENCE_TYPE, TypeKind::ComplexType, Vec::new());
        let coding = TypeSchema::new("Coding", TypeKind::ComplexType, Vec::new());
        assert!(resource.has_internal_fields());
        assert!(reference.has_internal_fields());
        assert!(!coding.has_internal_fields());
        assert!(reference.accepts_internal_key("_uuid"));
        assert!(!reference.accepts_internal_key("_file_id"));

        let attachment = TypeSchema::new("Attachment", TypeKind::ComplexType, Vec::new())
            .with_internal_keys(["_file_id"]);
        assert!(attachment.accepts_internal_key("_file_id"));
        assert!(!attachment.accepts_internal_key("_uuid"));
    }

    #[test]
    fn field_type_from_code() {
        assert_eq!(FieldType::from_code("Resource"), FieldType::Resource);
        assert_eq!(
            FieldType::from_code("dateTime"),
            FieldType::Primitive("dateTime".into())
        );
        assert_eq!(
            FieldType::from_code("Period"),
            FieldType::Complex("Period".into())
        );
    }
}
