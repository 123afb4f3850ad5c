//! Reference string parsing
//!
//! Handles the forms found in stored resources:
//! - Relative: `Patient/123`
//! - Versioned: `Patient/123/_history/2`
//! - Absolute URL: `https://fhir.example.org/Patient/123`
//! - Bare id: `123`
//! - Any of the above with a source assigning authority suffix: `Patient/123|bwell`
//!
//! Contained (`#id`) and URN (`urn:uuid:...`) references do not name a stored resource
//! and are rejected.

use std::fmt;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReferenceParts {
    pub resource_type: Option<String>,
    pub id: String,
    pub version: Option<String>,
    pub source_assigning_authority: Option<String>,
}

impl ReferenceParts {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: Some(resource_type.into()),
            id: id.into(),
            version: None,
            source_assigning_authority: None,
        }
    }

    pub fn with_source_assigning_authority(mut self, authority: impl Into<String>) -> Self {
        self.source_assigning_authority = Some(authority.into());
        self
    }

    /// `Type/id`, or just the id when the type is unknown.
    pub fn source_id(&self) -> String {
        match &self.resource_type {
            Some(resource_type) => format!("{resource_type}/{}", self.id),
            None => self.id.clone(),
        }
    }
}

impl fmt::Display for ReferenceParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&create_reference(self))
    }
}

/// Parse a reference string into its components.
pub fn parse_reference(reference: &str) -> Result<ReferenceParts> {
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_reference(reference, "empty reference"));
    }
    if trimmed.starts_with('#') {
        return Err(Error::invalid_reference(reference, "contained reference"));
    }
    if trimmed.starts_with("urn:") {
        return Err(Error::invalid_reference(reference, "URN reference"));
    }

    let (path, source_assigning_authority) = match trimmed.split_once('|') {
        Some((path, authority)) if !authority.is_empty() => (path, Some(authority.to_string())),
        Some((path, _)) => (path, None),
        None => (trimmed, None),
    };

    let path = match path.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map_or("", |(_, path)| path),
        None => path,
    };
    let segments: Vec<&str> = path
        .trim_matches('/')
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();

    let (resource_type, id, version) = match segments.as_slice() {
        [id] => (None, *id, None),
        [.., resource_type, id, "_history", version] => (Some(*resource_type), *id, Some(*version)),
        [.., resource_type, id] => (Some(*resource_type), *id, None),
        [] => return Err(Error::invalid_reference(reference, "missing id")),
    };

    if let Some(resource_type) = resource_type {
        if !resource_type.starts_with(|c: char| c.is_ascii_uppercase()) {
            return Err(Error::invalid_reference(
                reference,
                format!("'{resource_type}' is not a resource type"),
            ));
        }
    }

    Ok(ReferenceParts {
        resource_type: resource_type.map(str::to_string),
        id: id.to_string(),
        version: version.map(str::to_string),
        source_assigning_authority,
    })
}

/// Build a reference string: `[Type/]id[/_history/version][|authority]`.
pub fn create_reference(parts: &ReferenceParts) -> String {
    let mut reference = parts.source_id();
    if let Some(version) = &parts.version {
        reference.push_str("/_history/");
        reference.push_str(version);
    }
    if let Some(authority) = &parts.source_assigning_authority {
        reference.push('|');
        reference.push_str(authority);
    }
    reference
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_relative_references() {
        let parts = parse_reference("Patient/123").unwrap();
        assert_eq!(parts, ReferenceParts::new("Patient", "123"));
        assert_eq!(parts.source_id(), "Patient/123");
    }

    #[test]
    fn parses_authority_suffix() {
        let parts = parse_reference("Patient/123|bwell").unwrap();
        assert_eq!(parts.id, "123");
        assert_eq!(parts.source_assigning_authority.as_deref(), Some("bwell"));
        assert_eq!(create_reference(&parts), "Patient/123|bwell");

        let trailing = parse_reference("Patient/123|").unwrap();
        assert_eq!(trailing.source_assigning_authority, None);
    }

    #[test]
    fn parses_versions_and_absolute_urls() {
        let versioned = parse_reference("Observation/o1/_history/4").unwrap();
        assert_eq!(versioned.version.as_deref(), Some("4"));
        assert_eq!(versioned.to_string(), "Observation/o1/_history/4");

        let absolute = parse_reference("https://fhir.example.org/r4/Practitioner/p9|acme").unwrap();
        assert_eq!(absolute.resource_type.as_deref(), Some("Practitioner"));
        assert_eq!(absolute.id, "p9");
        assert_eq!(absolute.source_assigning_authority.as_deref(), Some("acme"));
    }

    #[test]
    fn bare_ids_have_no_type() {
        let parts = parse_reference("123|bwell").unwrap();
        assert_eq!(parts.resource_type, None);
        assert_eq!(parts.source_id(), "123");
    }

    #[test]
    fn rejects_unaddressable_references() {
        for reference in ["", "  ", "#contained", "urn:uuid:2c0d7b70-3c7d-4f6b-9d36-0f0d6b1c7f2a", "patient/1"] {
            assert!(
                matches!(parse_reference(reference), Err(Error::InvalidReference { .. })),
                "{reference:?} should be rejected"
            );
        }
    }
}
