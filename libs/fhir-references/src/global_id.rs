//! Global id stamping
//!
//! Resources from different sources may share ids. Each stored resource therefore
//! carries a source assigning authority (a `meta.security` tag) and a global UUID derived
//! from `id|authority`. Every reference gets the same treatment: internal `_uuid`,
//! `_sourceId` and `_sourceAssigningAuthority` fields plus matching extensions, so
//! references can be resolved by global id later.

use async_trait::async_trait;
use lumen_models::{Element, ReferenceUpdater, TraversalOptions};
use serde_json::json;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::parser::parse_reference;

pub const SOURCE_ID_SYSTEM: &str = "https://www.icanbwell.com/sourceId";
pub const UUID_SYSTEM: &str = "https://www.icanbwell.com/uuid";
pub const SOURCE_ASSIGNING_AUTHORITY_SYSTEM: &str =
    "https://www.icanbwell.com/sourceAssigningAuthority";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalIdConfig {
    /// Namespace for UUIDv5 generation.
    pub namespace: Uuid,
}

impl Default for GlobalIdConfig {
    fn default() -> Self {
        Self {
            namespace: Uuid::NAMESPACE_OID,
        }
    }
}

/// Returns true if `value` is a hyphenated UUID.
pub fn is_uuid(value: &str) -> bool {
    value.len() == 36 && Uuid::parse_str(value).is_ok()
}

/// The global id for `id` issued by `authority`; ids that are already UUIDs are kept.
pub fn global_uuid(namespace: &Uuid, id: &str, authority: &str) -> String {
    if is_uuid(id) {
        id.to_string()
    } else {
        Uuid::new_v5(namespace, format!("{id}|{authority}").as_bytes()).to_string()
    }
}

/// The resource's source assigning authority from its `meta.security` tags.
///
/// `None` when the resource has no security tags at all.
pub fn source_assigning_authority(resource: &Element) -> Option<Result<String>> {
    let meta = resource.node("meta")?;
    let mut security = meta.nodes("security").peekable();
    security.peek()?;

    let authority = security
        .filter(|tag| tag.str_value("system") == Some(SOURCE_ASSIGNING_AUTHORITY_SYSTEM))
        .find_map(|tag| tag.str_value("code"))
        .map(str::to_string);

    Some(authority.ok_or_else(|| Error::MissingSourceAssigningAuthority {
        resource: format!(
            "{}/{}",
            resource.type_name(),
            resource.id().unwrap_or_default()
        ),
    }))
}

/// Stamps global ids onto references, defaulting to one source assigning authority.
#[derive(Debug, Clone)]
pub struct GlobalIdStamper {
    authority: String,
    config: GlobalIdConfig,
}

impl GlobalIdStamper {
    pub fn new(authority: impl Into<String>, config: GlobalIdConfig) -> Self {
        Self {
            authority: authority.into(),
            config,
        }
    }

    /// Stamper using the resource's own authority; `None` when it carries no security tags.
    pub fn for_resource(resource: &Element, config: GlobalIdConfig) -> Result<Option<Self>> {
        source_assigning_authority(resource)
            .transpose()
            .map(|authority| authority.map(|authority| Self::new(authority, config)))
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Set the resource-level `_sourceId`, `_uuid` and `_sourceAssigningAuthority`.
    pub fn stamp_resource_ids(&self, resource: &mut Element) -> Result<()> {
        let Some(id) = resource.id().map(str::to_string) else {
            return Ok(());
        };
        let uuid = global_uuid(&self.config.namespace, &id, &self.authority);
        resource.set_source_id(id)?;
        resource.set_uuid(uuid)?;
        resource.set_source_assigning_authority(self.authority.clone())?;
        Ok(())
    }

    /// Add global id fields and extensions to one reference.
    ///
    /// An authority in the reference string (`Patient/1|acme`) wins over one already
    /// recorded on the reference, which wins over the stamper's default.
    pub fn stamp_reference(&self, reference: &mut Element) -> lumen_models::Result<()> {
        let Some(value) = reference.str_value("reference").map(str::to_string) else {
            return Ok(());
        };
        let parts = match parse_reference(&value) {
            Ok(parts) => parts,
            Err(err) => {
                tracing::debug!(reference = %value, error = %err, "Not stamping reference");
                return Ok(());
            }
        };

        let authority = parts
            .source_assigning_authority
            .clone()
            .or_else(|| reference.source_assigning_authority().map(str::to_string))
            .unwrap_or_else(|| self.authority.clone());

        let uuid = global_uuid(&self.config.namespace, &parts.id, &authority);
        let uuid = match &parts.resource_type {
            Some(resource_type) => format!("{resource_type}/{uuid}"),
            None => uuid,
        };
        let source_id = parts.source_id();

        upsert_extension(reference, "sourceId", SOURCE_ID_SYSTEM, &source_id)?;
        upsert_extension(reference, "uuid", UUID_SYSTEM, &uuid)?;
        upsert_extension(
            reference,
            "sourceAssigningAuthority",
            SOURCE_ASSIGNING_AUTHORITY_SYSTEM,
            &authority,
        )?;
        reference.set_uuid(uuid)?;
        reference.set_source_id(source_id)?;
        reference.set_source_assigning_authority(authority)?;
        Ok(())
    }
}

#[async_trait]
impl ReferenceUpdater for GlobalIdStamper {
    async fn update_reference(&self, mut reference: Element) -> lumen_models::Result<Element> {
        self.stamp_reference(&mut reference)?;
        Ok(reference)
    }
}

/// Stamp the resource and every reference in it.
///
/// Returns `false` when the resource has no security tags and was left alone.
pub async fn stamp_global_ids(
    resource: &mut Element,
    config: GlobalIdConfig,
    options: TraversalOptions,
) -> Result<bool> {
    let Some(stamper) = GlobalIdStamper::for_resource(resource, config)? else {
        tracing::debug!(
            resource_type = resource.type_name(),
            id = resource.id(),
            "No security tags, skipping global ids"
        );
        return Ok(false);
    };

    stamper.stamp_resource_ids(resource)?;
    resource.update_references_with(&stamper, options).await?;
    Ok(true)
}

fn upsert_extension(
    node: &mut Element,
    id: &str,
    url: &str,
    value: &str,
) -> lumen_models::Result<()> {
    if let Some(extension) = node
        .nodes_mut("extension")
        .find(|extension| extension.str_value("url") == Some(url))
    {
        if extension.str_value("valueString") != Some(value) {
            extension.set_json("valueString", json!(value))?;
        }
        return Ok(());
    }
    node.push_json(
        "extension",
        json!({"id": id, "url": url, "valueString": value}),
    )
}
