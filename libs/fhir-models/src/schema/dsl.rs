//! Compact schema definitions
//!
//! ```text
//! # comment
//! abstract DomainResource : Resource
//!   text Narrative
//!   contained Resource*
//!
//! resource AppointmentResponse : DomainResource
//!   appointment Reference!
//!   participantType CodeableConcept*
//!
//! backbone FamilyMemberHistoryCondition : BackboneElement
//!   onset[x] Age|Range|Period|string
//! ```
//!
//! A header line starts in column zero: `abstract`, `resource`, `complex` or `backbone`,
//! the type name, an optional `: Base` whose fields are inherited, and an optional
//! `@internal` marker. A bare `@internal` accepts the resource bookkeeping keys
//! (`_uuid`, `_sourceId`, ...); `@internal(_file_id)` names the keys explicitly.
//! Abstract types are inheritance templates and are not returned.
//! Field lines are indented: `name Type`, with `*` for arrays and `!` for required
//! fields. Choice fields end in `[x]` and list their type codes separated by `|`.

use std::collections::HashMap;

use super::{
    Cardinality, FieldSchema, FieldType, TypeKind, TypeSchema, RECORD_INTERNAL_KEYS,
};
use crate::error::{Error, Result};

struct Draft {
    name: String,
    kind: Option<TypeKind>,
    base: Option<String>,
    internal: Option<Vec<String>>,
    fields: Vec<FieldSchema>,
}

/// Parse definitions text into concrete type schemas, in file order.
pub fn parse_definitions(source: &str) -> Result<Vec<TypeSchema>> {
    DefinitionParser::new().parse(source)
}

/// Parses definitions split over several sources. Types may inherit from abstract
/// templates declared in an earlier source.
#[derive(Debug, Default)]
pub struct DefinitionParser {
    templates: HashMap<String, Vec<FieldSchema>>,
}

impl DefinitionParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(&mut self, source: &str) -> Result<Vec<TypeSchema>> {
        parse_source(source, &mut self.templates)
    }
}

fn parse_source(
    source: &str,
    templates: &mut HashMap<String, Vec<FieldSchema>>,
) -> Result<Vec<TypeSchema>> {
    let mut schemas = Vec::new();
    let mut current: Option<Draft> = None;

    for (index, raw) in source.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.split('#').next().unwrap_or_default();
        if line.trim().is_empty() {
            continue;
        }

        if line.starts_with(char::is_whitespace) {
            let draft = current
                .as_mut()
                .ok_or_else(|| definition_error(line_no, "field line outside of a type"))?;
            let field = parse_field(line.trim(), line_no)?;
            if draft.fields.iter().any(|existing| existing.name == field.name) {
                return Err(definition_error(
                    line_no,
                    format!("duplicate field '{}' in {}", field.name, draft.name),
                ));
            }
            draft.fields.push(field);
        } else {
            if let Some(draft) = current.take() {
                finish(draft, templates, &mut schemas);
            }
            current = Some(parse_header(line, line_no, templates)?);
        }
    }

    if let Some(draft) = current.take() {
        finish(draft, templates, &mut schemas);
    }

    Ok(schemas)
}

fn finish(
    draft: Draft,
    templates: &mut HashMap<String, Vec<FieldSchema>>,
    schemas: &mut Vec<TypeSchema>,
) {
    templates.insert(draft.name.clone(), draft.fields.clone());

    if let Some(kind) = draft.kind {
        let mut schema = TypeSchema::new(draft.name, kind, draft.fields);
        if let Some(keys) = draft.internal {
            schema = schema.with_internal_keys(keys);
        }
        if let Some(base) = draft.base {
            schema = schema.with_base(base);
        }
        schemas.push(schema);
    }
}

fn parse_header(
    line: &str,
    line_no: usize,
    templates: &HashMap<String, Vec<FieldSchema>>,
) -> Result<Draft> {
    let mut tokens = line.split_whitespace();
    let keyword = tokens.next().unwrap_or_default();
    let kind = match keyword {
        "abstract" => None,
        "resource" => Some(TypeKind::Resource),
        "complex" => Some(TypeKind::ComplexType),
        "backbone" => Some(TypeKind::BackboneElement),
        other => {
            return Err(definition_error(
                line_no,
                format!("unknown declaration '{other}'"),
            ))
        }
    };

    let name = tokens
        .next()
        .ok_or_else(|| definition_error(line_no, "missing type name"))?
        .to_string();
    if templates.contains_key(&name) {
        return Err(definition_error(
            line_no,
            format!("type '{name}' is declared twice"),
        ));
    }

    let mut base = None;
    let mut internal = None;
    while let Some(token) = tokens.next() {
        match token {
            ":" => {
                let base_name = tokens
                    .next()
                    .ok_or_else(|| definition_error(line_no, "missing base type after ':'"))?;
                base = Some(base_name.to_string());
            }
            "@internal" => {
                internal = Some(RECORD_INTERNAL_KEYS.iter().map(|key| key.to_string()).collect())
            }
            other if other.starts_with("@internal(") => {
                internal = Some(parse_internal_keys(other, line_no)?);
            }
            other => {
                return Err(definition_error(
                    line_no,
                    format!("unexpected token '{other}'"),
                ))
            }
        }
    }

    let fields = match &base {
        Some(base_name) => templates.get(base_name).cloned().ok_or_else(|| {
            definition_error(line_no, format!("unknown base type '{base_name}'"))
        })?,
        None => Vec::new(),
    };

    Ok(Draft {
        name,
        kind,
        base,
        internal,
        fields,
    })
}

fn parse_internal_keys(token: &str, line_no: usize) -> Result<Vec<String>> {
    let keys = token
        .strip_prefix("@internal(")
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| definition_error(line_no, format!("malformed marker '{token}'")))?;
    keys.split(',')
        .map(|key| {
            if key.len() > 1 && key.starts_with('_') {
                Ok(key.to_string())
            } else {
                Err(definition_error(
                    line_no,
                    format!("internal key '{key}' must start with '_'"),
                ))
            }
        })
        .collect()
}

fn parse_field(line: &str, line_no: usize) -> Result<FieldSchema> {
    let mut tokens = line.split_whitespace();
    let (Some(name), Some(spec), None) = (tokens.next(), tokens.next(), tokens.next()) else {
        return Err(definition_error(
            line_no,
            "expected '<name> <type>' in field line",
        ));
    };

    let mut type_spec = spec;
    let mut cardinality = Cardinality::Single;
    let mut required = false;
    loop {
        if let Some(rest) = type_spec.strip_suffix('*') {
            cardinality = Cardinality::Multiple;
            type_spec = rest;
        } else if let Some(rest) = type_spec.strip_suffix('!') {
            required = true;
            type_spec = rest;
        } else {
            break;
        }
    }
    if type_spec.is_empty() {
        return Err(definition_error(line_no, format!("field '{name}' has no type")));
    }

    let field = match name.strip_suffix("[x]") {
        Some(base) => {
            if cardinality.is_array() {
                return Err(definition_error(
                    line_no,
                    format!("choice field '{name}' cannot repeat"),
                ));
            }
            let codes: Vec<String> = type_spec.split('|').map(str::to_string).collect();
            if codes.iter().any(String::is_empty) {
                return Err(definition_error(
                    line_no,
                    format!("empty type code in '{type_spec}'"),
                ));
            }
            FieldSchema::new(base, FieldType::Choice(codes), cardinality)
        }
        None => {
            if type_spec.contains('|') {
                return Err(definition_error(
                    line_no,
                    format!("field '{name}' lists several types but is not a choice field"),
                ));
            }
            FieldSchema::new(name, FieldType::from_code(type_spec), cardinality)
        }
    };

    Ok(if required { field.required() } else { field })
}

fn definition_error(line: usize, message: impl Into<String>) -> Error {
    Error::SchemaDefinition {
        line,
        message: message.into(),
    }
}
