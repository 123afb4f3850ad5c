//! Source assigning authority migration
//!
//! Moves a resource from one source assigning authority to another: security tags,
//! references pinned to the old authority, and finally every derived global id.

use async_trait::async_trait;
use lumen_models::{Element, ReferenceUpdater, TraversalOptions};
use serde_json::json;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::global_id::{stamp_global_ids, GlobalIdConfig};
use crate::parser::{create_reference, parse_reference};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSourceAssigningAuthority {
    old: String,
    new: String,
}

impl ChangeSourceAssigningAuthority {
    pub fn new(old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            old: old.into(),
            new: new.into(),
        }
    }

    /// Rewrite the resource in place and re-stamp its global ids.
    pub async fn apply(
        &self,
        resource: &mut Element,
        config: GlobalIdConfig,
        options: TraversalOptions,
    ) -> Result<()> {
        let tags = self.rewrite_security_tags(resource)?;
        resource.update_references_with(self, options).await?;
        let stamped = stamp_global_ids(resource, config, options).await?;
        tracing::debug!(
            resource_type = resource.type_name(),
            id = resource.id(),
            tags,
            stamped,
            "Changed source assigning authority"
        );
        Ok(())
    }

    /// [`apply`](Self::apply) on a copy under a deadline; the resource is only replaced
    /// when every step succeeded.
    pub async fn apply_atomically(
        &self,
        resource: &mut Element,
        config: GlobalIdConfig,
        options: TraversalOptions,
        timeout: Duration,
    ) -> Result<()> {
        let mut working = resource.clone();
        match tokio::time::timeout(timeout, self.apply(&mut working, config, options)).await {
            Ok(Ok(())) => {
                *resource = working;
                Ok(())
            }
            Ok(Err(err)) => {
                tracing::warn!(
                    resource_type = resource.type_name(),
                    id = resource.id(),
                    error = %err,
                    "Authority change failed, resource left unchanged"
                );
                Err(err)
            }
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }

    /// Replace `meta.security` codes equal to the old authority. Returns the number changed.
    pub fn rewrite_security_tags(&self, resource: &mut Element) -> Result<usize> {
        let Some(meta) = resource.node_mut("meta") else {
            return Ok(0);
        };

        let mut changed = 0;
        for tag in meta.nodes_mut("security") {
            if tag.str_value("code") == Some(self.old.as_str()) {
                tag.set_json("code", json!(self.new))?;
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Re-point one reference from the old authority to the new one.
    pub fn rewrite_reference(&self, reference: &mut Element) -> lumen_models::Result<()> {
        let Some(mut parts) = reference
            .str_value("reference")
            .and_then(|value| parse_reference(value).ok())
        else {
            return Ok(());
        };

        let pinned = parts.source_assigning_authority.take();
        match pinned.as_deref() {
            Some(authority) if authority == self.old => {
                parts.source_assigning_authority = Some(self.new.clone());
                reference.set_json("reference", json!(create_reference(&parts)))?;
            }
            Some(_) => {}
            None => {
                if reference.source_assigning_authority() == Some(self.old.as_str()) {
                    reference.set_source_assigning_authority(self.new.clone())?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ReferenceUpdater for ChangeSourceAssigningAuthority {
    async fn update_reference(&self, mut reference: Element) -> lumen_models::Result<Element> {
        self.rewrite_reference(&mut reference)?;
        Ok(reference)
    }
}
