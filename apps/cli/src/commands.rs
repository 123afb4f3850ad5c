//! Subcommand implementations
//!
//! Each command takes the input document as text and returns the rendered output, so
//! `main` only deals with files, stdin and stdout.

use anyhow::{Context, Result};
use lumen_models::{registry, Element, ResourceFactory, Visibility};
use lumen_references::{stamp_global_ids, ChangeSourceAssigningAuthority};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

use crate::config::AppConfig;

pub fn parse_resource(text: &str) -> Result<Element> {
    ResourceFactory::global()
        .from_json_str(text)
        .context("Failed to build resource")
}

/// Build and re-serialize a resource, dropping unknown fields and empty values.
pub fn render(text: &str, visibility: Visibility, compact: bool) -> Result<String> {
    let resource = parse_resource(text)?;
    format_json(&resource.serialize_with(visibility), compact)
}

/// Stamp global ids onto a resource, or onto every entry of a Bundle.
pub async fn stamp(text: &str, config: &AppConfig, compact: bool) -> Result<String> {
    let mut root = parse_resource(text)?;
    let mut stamped = 0usize;
    for resource in resources_mut(&mut root) {
        let applied = with_deadline(
            config.timeout(),
            stamp_global_ids(resource, config.global_id_config(), config.traversal_options()),
        )
        .await
        .with_context(|| describe("Failed to stamp", resource))?;
        if applied {
            stamped += 1;
        }
    }
    tracing::info!(stamped, "Stamped global ids");
    format_json(&root.to_json_internal(), compact)
}

/// Move a resource (or every Bundle entry) from one source assigning authority to another.
pub async fn change_authority(
    text: &str,
    from: &str,
    to: &str,
    config: &AppConfig,
    compact: bool,
) -> Result<String> {
    let change = ChangeSourceAssigningAuthority::new(from, to);
    let mut root = parse_resource(text)?;
    for resource in resources_mut(&mut root) {
        change
            .apply_atomically(
                resource,
                config.global_id_config(),
                config.traversal_options(),
                config.timeout(),
            )
            .await
            .with_context(|| describe("Failed to change the authority of", resource))?;
    }
    format_json(&root.to_json_internal(), compact)
}

/// Resource types known to the installed registry, or the R4 types it lacks.
pub fn types(missing: bool) -> Vec<String> {
    let registry = registry::global();
    if missing {
        registry
            .missing_r4_resource_types()
            .into_iter()
            .map(str::to_string)
            .collect()
    } else {
        registry
            .resource_types()
            .into_iter()
            .map(str::to_string)
            .collect()
    }
}

fn resources_mut(root: &mut Element) -> Vec<&mut Element> {
    if root.type_name() != "Bundle" {
        return vec![root];
    }
    root.nodes_mut("entry")
        .filter_map(|entry| entry.node_mut("resource"))
        .collect()
}

async fn with_deadline<F, T>(timeout: Duration, future: F) -> Result<T>
where
    F: Future<Output = lumen_references::Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(lumen_references::Error::Timeout(timeout).into()),
    }
}

fn describe(action: &str, resource: &Element) -> String {
    format!(
        "{action} {}/{}",
        resource.type_name(),
        resource.id().unwrap_or("<no id>")
    )
}

fn format_json(value: &Value, compact: bool) -> Result<String> {
    let text = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_references::global_id::{global_uuid, SOURCE_ASSIGNING_AUTHORITY_SYSTEM};
    use serde_json::json;

    fn tagged_patient(authority: &str) -> String {
        json!({
            "resourceType": "Patient",
            "id": "123",
            "meta": {"security": [{"system": SOURCE_ASSIGNING_AUTHORITY_SYSTEM, "code": authority}]},
            "generalPractitioner": [{"reference": "Practitioner/7"}]
        })
        .to_string()
    }

    #[test]
    fn render_prunes_and_hides_internal_fields() {
        let input = json!({
            "resourceType": "AppointmentResponse",
            "id": "1",
            "appointment": {"reference": "Appointment/2", "_sourceId": "Appointment/2"},
            "participantStatus": "accepted",
            "comment": null,
            "participantType": []
        })
        .to_string();

        let public: Value =
            serde_json::from_str(&render(&input, Visibility::Public, true).unwrap()).unwrap();
        assert_eq!(
            public,
            json!({
                "resourceType": "AppointmentResponse",
                "id": "1",
                "appointment": {"reference": "Appointment/2"},
                "participantStatus": "accepted"
            })
        );

        let internal: Value =
            serde_json::from_str(&render(&input, Visibility::Internal, true).unwrap()).unwrap();
        assert_eq!(internal["appointment"]["_sourceId"], "Appointment/2");
    }

    #[test]
    fn render_rejects_unknown_resource_types() {
        let err = render(r#"{"resourceType": "Spaceship"}"#, Visibility::Public, true).unwrap_err();
        assert!(format!("{err:#}").contains("Spaceship"));
    }

    #[tokio::test]
    async fn stamp_handles_bundle_entries() {
        let bundle = json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [
                {"resource": serde_json::from_str::<Value>(&tagged_patient("bwell")).unwrap()},
                {"resource": {"resourceType": "Patient", "id": "untagged"}}
            ]
        })
        .to_string();

        let output = stamp(&bundle, &AppConfig::default(), true).await.unwrap();
        let output: Value = serde_json::from_str(&output).unwrap();

        let namespace = AppConfig::default().global_id_config().namespace;
        let stamped = &output["entry"][0]["resource"];
        assert_eq!(stamped["_uuid"], global_uuid(&namespace, "123", "bwell"));
        assert_eq!(
            stamped["generalPractitioner"][0]["_uuid"],
            format!("Practitioner/{}", global_uuid(&namespace, "7", "bwell"))
        );
        assert!(output["entry"][1]["resource"].get("_uuid").is_none());
    }

    #[tokio::test]
    async fn change_authority_rewrites_tags_and_ids() {
        let output = change_authority(
            &tagged_patient("rise"),
            "rise",
            "bwell",
            &AppConfig::default(),
            true,
        )
        .await
        .unwrap();
        let output: Value = serde_json::from_str(&output).unwrap();

        let namespace = AppConfig::default().global_id_config().namespace;
        assert_eq!(output["meta"]["security"][0]["code"], "bwell");
        assert_eq!(output["_sourceAssigningAuthority"], "bwell");
        assert_eq!(output["_uuid"], global_uuid(&namespace, "123", "bwell"));
    }

    #[tokio::test]
    async fn change_authority_fails_when_the_new_ids_cannot_be_stamped() {
        let owner_only = json!({
            "resourceType": "Patient",
            "id": "9",
            "meta": {"security": [{"system": "https://www.icanbwell.com/owner", "code": "rise"}]}
        })
        .to_string();
        let bundle = json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [
                {"resource": serde_json::from_str::<Value>(&tagged_patient("rise")).unwrap()},
                {"resource": serde_json::from_str::<Value>(&owner_only).unwrap()}
            ]
        })
        .to_string();

        let err = change_authority(&bundle, "rise", "bwell", &AppConfig::default(), true)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("Patient/9"));
    }
}
