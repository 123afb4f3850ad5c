//! The generic model node
//!
//! An [`Element`] pairs a [`TypeSchema`] with one slot per declared field. Every setter
//! follows the same storage discipline:
//!
//! - `null`, or an empty array, clears the field; empty collections are never stored
//! - a single value assigned to an array field is wrapped in a one-element array
//! - JSON objects are coerced into the declared type before storage
//! - choice fields (`value[x]`) hold exactly one typed variant
//!
//! Nested types are resolved through the process-wide registry unless a registry is
//! passed explicitly (`*_with` methods).

use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::factory::ResourceFactory;
use crate::registry::{self, SchemaRegistry};
use crate::schema::{FieldSchema, FieldType, KeyMatch, TypeSchema};

pub const RESOURCE_TYPE_KEY: &str = "resourceType";
pub const ACCESS_KEY: &str = "_access";
pub const SOURCE_ASSIGNING_AUTHORITY_KEY: &str = "_sourceAssigningAuthority";
pub const UUID_KEY: &str = "_uuid";
pub const SOURCE_ID_KEY: &str = "_sourceId";

/// Server-internal bookkeeping, carried by resources and references and by types that
/// declare their own internal keys (`Attachment._file_id`).
///
/// Never part of the public wire format; only [`Element::to_json_internal`] emits them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InternalFields {
    pub access: Option<Value>,
    pub source_assigning_authority: Option<String>,
    pub uuid: Option<String>,
    pub source_id: Option<String>,
    /// Type-specific internal keys, in input order.
    pub other: Map<String, Value>,
}

impl InternalFields {
    pub fn is_empty(&self) -> bool {
        self.access.is_none()
            && self.source_assigning_authority.is_none()
            && self.uuid.is_none()
            && self.source_id.is_none()
            && self.other.is_empty()
    }

    /// Returns true if `key` names one of the resource bookkeeping fields.
    pub fn is_internal_key(key: &str) -> bool {
        matches!(
            key,
            ACCESS_KEY | SOURCE_ASSIGNING_AUTHORITY_KEY | UUID_KEY | SOURCE_ID_KEY
        )
    }

    /// A type-specific internal value such as `_file_id`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.other.get(key)
    }

    fn assign(&mut self, owner: &str, key: &str, value: &Value) -> Result<()> {
        if key == ACCESS_KEY {
            self.access = (!value.is_null()).then(|| value.clone());
            return Ok(());
        }
        if !Self::is_internal_key(key) {
            if value.is_null() {
                self.other.remove(key);
            } else {
                self.other.insert(key.to_string(), value.clone());
            }
            return Ok(());
        }

        let text = match value {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            _ => {
                return Err(Error::invalid_field_value(
                    owner,
                    key,
                    "expected a string",
                ))
            }
        };
        match key {
            SOURCE_ASSIGNING_AUTHORITY_KEY => self.source_assigning_authority = text,
            UUID_KEY => self.uuid = text,
            SOURCE_ID_KEY => self.source_id = text,
            _ => return Err(Error::unknown_field(owner, key)),
        }
        Ok(())
    }

    pub(crate) fn write(&self, map: &mut Map<String, Value>) {
        if let Some(access) = &self.access {
            map.insert(ACCESS_KEY.to_string(), access.clone());
        }
        let strings = [
            (SOURCE_ASSIGNING_AUTHORITY_KEY, &self.source_assigning_authority),
            (UUID_KEY, &self.uuid),
            (SOURCE_ID_KEY, &self.source_id),
        ];
        for (key, value) in strings {
            if let Some(text) = value.as_deref().filter(|text| !text.is_empty()) {
                map.insert(key.to_string(), Value::String(text.to_string()));
            }
        }
        for (key, value) in &self.other {
            map.insert(key.clone(), value.clone());
        }
    }
}

/// One stored value: a primitive JSON value or a nested node.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Primitive(Value),
    Node(Element),
}

impl Item {
    pub fn as_node(&self) -> Option<&Element> {
        match self {
            Self::Node(node) => Some(node),
            Self::Primitive(_) => None,
        }
    }

    pub fn as_node_mut(&mut self) -> Option<&mut Element> {
        match self {
            Self::Node(node) => Some(node),
            Self::Primitive(_) => None,
        }
    }

    pub fn as_primitive(&self) -> Option<&Value> {
        match self {
            Self::Primitive(value) => Some(value),
            Self::Node(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_primitive().and_then(Value::as_str)
    }
}

impl From<Element> for Item {
    fn from(node: Element) -> Self {
        Self::Node(node)
    }
}

/// The populated variant of a choice field.
#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceValue {
    pub type_code: String,
    pub item: Item,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Single(Item),
    Multiple(Vec<Item>),
    Choice(ChoiceValue),
}

impl FieldValue {
    /// The stored items; one for single and choice values.
    pub fn items(&self) -> &[Item] {
        match self {
            Self::Single(item) => std::slice::from_ref(item),
            Self::Choice(choice) => std::slice::from_ref(&choice.item),
            Self::Multiple(items) => items,
        }
    }

    pub fn items_mut(&mut self) -> &mut [Item] {
        match self {
            Self::Single(item) => std::slice::from_mut(item),
            Self::Choice(choice) => std::slice::from_mut(&mut choice.item),
            Self::Multiple(items) => items,
        }
    }

    pub fn first(&self) -> Option<&Item> {
        self.items().first()
    }
}

/// A schema-driven FHIR node: a resource, a complex type or a backbone element.
///
/// `Clone` is a deep copy; nodes exclusively own their children.
#[derive(Debug, Clone)]
pub struct Element {
    schema: Arc<TypeSchema>,
    values: Vec<Option<FieldValue>>,
    internal: InternalFields,
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.schema.name() == other.schema.name()
            && self.values == other.values
            && self.internal == other.internal
    }
}

impl Element {
    /// An element of the given type with no field populated.
    pub fn new(schema: Arc<TypeSchema>) -> Self {
        let values = vec![None; schema.fields().len()];
        Self {
            schema,
            values,
            internal: InternalFields::default(),
        }
    }

    /// An empty element of a type from the process-wide registry.
    pub fn of_type(type_name: &str) -> Result<Self> {
        let schema = registry::global().resolve(type_name)?;
        Ok(Self::new(Arc::clone(schema)))
    }

    pub(crate) fn from_map(
        registry: &SchemaRegistry,
        schema: Arc<TypeSchema>,
        map: &Map<String, Value>,
    ) -> Result<Self> {
        let mut values: Vec<Option<FieldValue>> = vec![None; schema.fields().len()];
        let mut internal = InternalFields::default();

        for (key, value) in map {
            if key == RESOURCE_TYPE_KEY {
                if value.as_str() != Some(schema.name()) {
                    tracing::debug!(
                        type_name = schema.name(),
                        resource_type = %value,
                        "Ignoring mismatching resourceType"
                    );
                }
                continue;
            }

            if schema.accepts_internal_key(key) {
                internal.assign(schema.name(), key, value)?;
                continue;
            }
            if InternalFields::is_internal_key(key) {
                tracing::debug!(type_name = schema.name(), key = %key, "Ignoring internal field");
                continue;
            }

            let Some(KeyMatch { index, variant }) = schema.resolve_key(key) else {
                tracing::debug!(type_name = schema.name(), key = %key, "Ignoring unknown field");
                continue;
            };

            let coerced = coerce_field(registry, &schema, index, variant, value)?;
            if let Some(coerced) = coerced {
                if let (Some(FieldValue::Choice(existing)), FieldValue::Choice(incoming)) =
                    (&values[index], &coerced)
                {
                    let field = &schema.fields()[index];
                    return Err(Error::ChoiceConflict {
                        type_name: schema.name().to_string(),
                        field: field.name.clone(),
                        first: field.json_key(Some(&existing.type_code)),
                        second: field.json_key(Some(&incoming.type_code)),
                    });
                }
                values[index] = Some(coerced);
            }
        }

        Ok(Self {
            schema,
            values,
            internal,
        })
    }

    pub fn schema(&self) -> &Arc<TypeSchema> {
        &self.schema
    }

    pub fn type_name(&self) -> &str {
        self.schema.name()
    }

    /// The fixed `resourceType`, for resources.
    pub fn resource_type(&self) -> Option<&str> {
        self.schema.is_resource().then(|| self.schema.name())
    }

    pub fn is_resource(&self) -> bool {
        self.schema.is_resource()
    }

    pub fn is_reference(&self) -> bool {
        self.schema.is_reference()
    }

    /// True when no field and no internal field is populated.
    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none) && self.internal.is_empty()
    }

    pub fn id(&self) -> Option<&str> {
        self.str_value("id")
    }

    /// A populated field by declared name or JSON key.
    ///
    /// A typed choice key (`valueString`) only matches while that variant is populated.
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        let KeyMatch { index, variant } = self.schema.resolve_key(key)?;
        let value = self.values[index].as_ref()?;
        match (variant, value) {
            (Some(variant), FieldValue::Choice(choice)) => {
                (self.variant_code(index, variant) == Some(choice.type_code.as_str())).then_some(value)
            }
            _ => Some(value),
        }
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut FieldValue> {
        let KeyMatch { index, variant } = self.schema.resolve_key(key)?;
        if let Some(variant) = variant {
            let code = self.variant_code(index, variant)?.to_string();
            let value = self.values[index].as_mut()?;
            if matches!(value, FieldValue::Choice(choice) if choice.type_code != code) {
                return None;
            }
            return Some(value);
        }
        self.values[index].as_mut()
    }

    /// Stored items of a field; empty when unset.
    pub fn items(&self, key: &str) -> &[Item] {
        self.get(key).map(FieldValue::items).unwrap_or(&[])
    }

    /// The first stored value of a primitive string field.
    pub fn str_value(&self, key: &str) -> Option<&str> {
        self.get(key)?.first()?.as_str()
    }

    /// The first nested node of a field.
    pub fn node(&self, key: &str) -> Option<&Element> {
        self.get(key)?.first()?.as_node()
    }

    pub fn node_mut(&mut self, key: &str) -> Option<&mut Element> {
        self.get_mut(key)?.items_mut().first_mut()?.as_node_mut()
    }

    pub fn nodes(&self, key: &str) -> impl Iterator<Item = &Element> {
        self.items(key).iter().filter_map(Item::as_node)
    }

    pub fn nodes_mut(&mut self, key: &str) -> impl Iterator<Item = &mut Element> {
        self.get_mut(key)
            .map(FieldValue::items_mut)
            .unwrap_or_default()
            .iter_mut()
            .filter_map(Item::as_node_mut)
    }

    pub fn choice(&self, name: &str) -> Option<&ChoiceValue> {
        match self.get(name)? {
            FieldValue::Choice(choice) => Some(choice),
            _ => None,
        }
    }

    /// Populated fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&FieldSchema, &FieldValue)> {
        self.schema
            .fields()
            .iter()
            .zip(&self.values)
            .filter_map(|(field, value)| value.as_ref().map(|value| (field, value)))
    }

    pub(crate) fn fields_mut(&mut self) -> impl Iterator<Item = (&FieldSchema, &mut FieldValue)> {
        self.schema
            .fields()
            .iter()
            .zip(self.values.iter_mut())
            .filter_map(|(field, value)| value.as_mut().map(|value| (field, value)))
    }

    /// Assign a JSON value to a field, by declared name or choice key (`onsetAge`).
    pub fn set_json(&mut self, key: &str, value: Value) -> Result<()> {
        self.set_json_with(registry::global(), key, value)
    }

    pub fn set_json_with(&mut self, registry: &SchemaRegistry, key: &str, value: Value) -> Result<()> {
        if key == RESOURCE_TYPE_KEY {
            tracing::debug!(type_name = self.type_name(), "resourceType is fixed per type");
            return Ok(());
        }
        if self.schema.accepts_internal_key(key) {
            return self.internal.assign(self.schema.name(), key, &value);
        }
        if InternalFields::is_internal_key(key) {
            return Err(Error::InternalFieldsNotSupported(self.type_name().to_string()));
        }

        let KeyMatch { index, variant } = self.resolve(key)?;
        let absent = is_absent(&value);
        if self.schema.fields()[index].is_choice() && variant.is_none() && !absent {
            return Err(Error::invalid_field_value(
                self.type_name(),
                key,
                "choice values are assigned through a typed key such as valueString",
            ));
        }
        if absent {
            self.clear_slot(index, variant);
            return Ok(());
        }
        self.values[index] = coerce_field(registry, &self.schema, index, variant, &value)?;
        Ok(())
    }

    /// Assign a primitive value (`"final"`, `true`, `42`) to a primitive field.
    pub fn set_primitive(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        let KeyMatch { index, variant } = self.resolve(key)?;
        let primitive = match (&self.schema.fields()[index].field_type, variant) {
            (FieldType::Primitive(_), _) => true,
            (FieldType::Choice(_), Some(variant)) => self
                .variant_code(index, variant)
                .map_or(false, crate::schema::is_primitive_type),
            _ => false,
        };
        if !primitive {
            return Err(Error::invalid_field_value(
                self.type_name(),
                key,
                "field does not hold a primitive",
            ));
        }
        self.set_json_with(registry::global(), key, value.into())
    }

    /// Append one JSON value to an array field.
    pub fn push_json(&mut self, key: &str, value: Value) -> Result<()> {
        self.push_json_with(registry::global(), key, value)
    }

    pub fn push_json_with(&mut self, registry: &SchemaRegistry, key: &str, value: Value) -> Result<()> {
        let index = self.array_index(key)?;
        if let Some(FieldValue::Multiple(items)) =
            coerce_field(registry, &self.schema, index, None, &value)?
        {
            self.extend_items(index, items);
        }
        Ok(())
    }

    /// Store a node: wrapped for array fields, tagged for choice fields.
    pub fn set_node(&mut self, name: &str, node: Element) -> Result<()> {
        let index = self.resolve(name)?.index;
        let field = &self.schema.fields()[index];
        let value = match check_node(&self.schema, field, &node)? {
            Some(type_code) => FieldValue::Choice(ChoiceValue {
                type_code,
                item: Item::Node(node),
            }),
            None if field.is_array() => FieldValue::Multiple(vec![Item::Node(node)]),
            None => FieldValue::Single(Item::Node(node)),
        };
        self.values[index] = Some(value);
        Ok(())
    }

    /// Replace an array field with `nodes`; an empty vector clears it.
    pub fn set_nodes(&mut self, name: &str, nodes: Vec<Element>) -> Result<()> {
        let index = self.array_index(name)?;
        let field = &self.schema.fields()[index];
        for node in &nodes {
            check_node(&self.schema, field, node)?;
        }
        self.values[index] = (!nodes.is_empty())
            .then(|| FieldValue::Multiple(nodes.into_iter().map(Item::Node).collect()));
        Ok(())
    }

    /// Append a node to an array field.
    pub fn push_node(&mut self, name: &str, node: Element) -> Result<()> {
        let index = self.array_index(name)?;
        check_node(&self.schema, &self.schema.fields()[index], &node)?;
        self.extend_items(index, vec![Item::Node(node)]);
        Ok(())
    }

    /// Clear a field by declared name or choice key.
    ///
    /// A typed choice key (`valueString`) only clears the field while that variant is
    /// the populated one.
    pub fn clear(&mut self, key: &str) -> Result<()> {
        let KeyMatch { index, variant } = self.resolve(key)?;
        self.clear_slot(index, variant);
        Ok(())
    }

    fn clear_slot(&mut self, index: usize, variant: Option<usize>) {
        if let (Some(variant), Some(FieldValue::Choice(choice))) = (variant, &self.values[index]) {
            if self.variant_code(index, variant) != Some(choice.type_code.as_str()) {
                return;
            }
        }
        self.values[index] = None;
    }

    pub fn internal(&self) -> &InternalFields {
        &self.internal
    }

    pub fn access(&self) -> Option<&Value> {
        self.internal.access.as_ref()
    }

    pub fn source_assigning_authority(&self) -> Option<&str> {
        self.internal.source_assigning_authority.as_deref()
    }

    pub fn uuid(&self) -> Option<&str> {
        self.internal.uuid.as_deref()
    }

    pub fn source_id(&self) -> Option<&str> {
        self.internal.source_id.as_deref()
    }

    /// A type-specific internal value, such as an attachment's `_file_id`.
    pub fn internal_value(&self, key: &str) -> Option<&Value> {
        self.internal.get(key)
    }

    pub fn set_access(&mut self, access: Value) -> Result<()> {
        self.ensure_internal_key(ACCESS_KEY)?;
        self.internal.access = (!access.is_null()).then_some(access);
        Ok(())
    }

    pub fn set_source_assigning_authority(&mut self, authority: impl Into<String>) -> Result<()> {
        self.ensure_internal_key(SOURCE_ASSIGNING_AUTHORITY_KEY)?;
        self.internal.source_assigning_authority = Some(authority.into());
        Ok(())
    }

    pub fn set_uuid(&mut self, uuid: impl Into<String>) -> Result<()> {
        self.ensure_internal_key(UUID_KEY)?;
        self.internal.uuid = Some(uuid.into());
        Ok(())
    }

    pub fn set_source_id(&mut self, source_id: impl Into<String>) -> Result<()> {
        self.ensure_internal_key(SOURCE_ID_KEY)?;
        self.internal.source_id = Some(source_id.into());
        Ok(())
    }

    fn ensure_internal_key(&self, key: &str) -> Result<()> {
        if self.schema.accepts_internal_key(key) {
            Ok(())
        } else {
            Err(Error::InternalFieldsNotSupported(self.type_name().to_string()))
        }
    }

    fn resolve(&self, key: &str) -> Result<KeyMatch> {
        self.schema
            .resolve_key(key)
            .ok_or_else(|| Error::unknown_field(self.type_name(), key))
    }

    fn array_index(&self, name: &str) -> Result<usize> {
        let index = self.resolve(name)?.index;
        if self.schema.fields()[index].is_array() {
            Ok(index)
        } else {
            Err(Error::invalid_field_value(
                self.type_name(),
                name,
                "field does not hold an array",
            ))
        }
    }

    fn extend_items(&mut self, index: usize, items: Vec<Item>) {
        match &mut self.values[index] {
            Some(FieldValue::Multiple(existing)) => existing.extend(items),
            slot => *slot = (!items.is_empty()).then_some(FieldValue::Multiple(items)),
        }
    }

    fn variant_code(&self, index: usize, variant: usize) -> Option<&str> {
        match &self.schema.fields()[index].field_type {
            FieldType::Choice(codes) => codes.get(variant).map(String::as_str),
            _ => None,
        }
    }
}

/// `null` and `[]` mean "no value".
pub(crate) fn is_absent(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn coerce_field(
    registry: &SchemaRegistry,
    owner: &TypeSchema,
    index: usize,
    variant: Option<usize>,
    value: &Value,
) -> Result<Option<FieldValue>> {
    if is_absent(value) {
        return Ok(None);
    }
    let field = &owner.fields()[index];

    match (&field.field_type, variant) {
        (FieldType::Choice(codes), Some(variant)) => {
            if value.is_array() {
                return Err(Error::invalid_field_value(
                    owner.name(),
                    &field.name,
                    "a choice value cannot be an array",
                ));
            }
            let type_code = codes[variant].clone();
            let target = FieldType::from_code(&type_code);
            let item = coerce_item(registry, owner, field, &target, value)?;
            Ok(Some(FieldValue::Choice(ChoiceValue { type_code, item })))
        }
        (FieldType::Choice(_), None) => Err(Error::invalid_field_value(
            owner.name(),
            &field.name,
            "choice values need a typed key such as valueString",
        )),
        (target, _) if field.is_array() => {
            let values = match value {
                Value::Array(values) => values.as_slice(),
                single => std::slice::from_ref(single),
            };
            let items = values
                .iter()
                .filter(|value| !value.is_null())
                .map(|value| coerce_item(registry, owner, field, target, value))
                .collect::<Result<Vec<_>>>()?;
            Ok((!items.is_empty()).then_some(FieldValue::Multiple(items)))
        }
        (target, _) => {
            if value.is_array() {
                return Err(Error::invalid_field_value(
                    owner.name(),
                    &field.name,
                    "expected a single value, got an array",
                ));
            }
            Ok(Some(FieldValue::Single(coerce_item(
                registry, owner, field, target, value,
            )?)))
        }
    }
}

fn coerce_item(
    registry: &SchemaRegistry,
    owner: &TypeSchema,
    field: &FieldSchema,
    target: &FieldType,
    value: &Value,
) -> Result<Item> {
    match (target, value) {
        (FieldType::Primitive(code), Value::Object(_) | Value::Array(_)) => Err(
            Error::invalid_field_value(owner.name(), &field.name, format!("expected a {code} value")),
        ),
        (FieldType::Primitive(_), primitive) => Ok(Item::Primitive(primitive.clone())),
        (FieldType::Complex(type_name), Value::Object(map)) => {
            let schema = registry.resolve(type_name)?;
            Ok(Item::Node(Element::from_map(registry, Arc::clone(schema), map)?))
        }
        (FieldType::Resource, Value::Object(_)) => {
            Ok(Item::Node(ResourceFactory::new(registry).build(value, None)?))
        }
        (FieldType::Complex(type_name), _) => Err(Error::invalid_field_value(
            owner.name(),
            &field.name,
            format!("expected a {type_name} object"),
        )),
        (FieldType::Resource, _) => Err(Error::invalid_field_value(
            owner.name(),
            &field.name,
            "expected a resource object",
        )),
        (FieldType::Choice(_), _) => Err(Error::invalid_field_value(
            owner.name(),
            &field.name,
            "nested choice types are not supported",
        )),
    }
}

/// Checks that `node` fits `field`; returns the type code for choice fields.
fn check_node(owner: &TypeSchema, field: &FieldSchema, node: &Element) -> Result<Option<String>> {
    let fits = match &field.field_type {
        FieldType::Complex(type_name) => node.type_name() == type_name,
        FieldType::Resource => node.is_resource(),
        FieldType::Choice(codes) => codes.iter().any(|code| code == node.type_name()),
        FieldType::Primitive(_) => false,
    };
    if !fits {
        return Err(Error::type_mismatch(
            format!("a value for {}.{}", owner.name(), field.name),
            node.type_name(),
        ));
    }
    Ok(field
        .is_choice()
        .then(|| node.type_name().to_string()))
}
