//! All-or-nothing reference rewrites
//!
//! The traversal mutates in place and does not roll back. [`rewrite_atomically`] runs it
//! on a copy under a deadline and only commits the copy when every callback succeeded.

use lumen_models::{Element, ReferenceUpdater, TraversalOptions};
use std::time::Duration;

use crate::error::{Error, Result};

pub async fn rewrite_atomically(
    resource: &mut Element,
    updater: &dyn ReferenceUpdater,
    options: TraversalOptions,
    timeout: Duration,
) -> Result<()> {
    let mut working = resource.clone();
    match tokio::time::timeout(timeout, working.update_references_with(updater, options)).await {
        Ok(Ok(())) => {
            *resource = working;
            Ok(())
        }
        Ok(Err(err)) => {
            tracing::warn!(
                resource_type = resource.type_name(),
                id = resource.id(),
                error = %err,
                "Reference rewrite failed, resource left unchanged"
            );
            Err(err.into())
        }
        Err(_) => {
            tracing::warn!(
                resource_type = resource.type_name(),
                id = resource.id(),
                ?timeout,
                "Reference rewrite timed out, resource left unchanged"
            );
            Err(Error::Timeout(timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_models::ResourceFactory;
    use serde_json::json;

    fn patient() -> Element {
        ResourceFactory::global()
            .create(
                json!({
                    "resourceType": "Patient",
                    "generalPractitioner": [{"reference": "Practitioner/1"}, {"reference": "Practitioner/2"}]
                }),
                None,
            )
            .unwrap()
    }

    #[tokio::test]
    async fn commits_on_success() {
        let mut resource = patient();
        let rename = |mut reference: Element| async move {
            reference.set_json("display", json!("ok"))?;
            Ok::<Element, lumen_models::Error>(reference)
        };
        rewrite_atomically(
            &mut resource,
            &rename,
            TraversalOptions::default(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(resource.to_json()["generalPractitioner"][1]["display"], "ok");
    }

    #[tokio::test]
    async fn keeps_the_original_on_failure() {
        let mut resource = patient();
        let before = resource.clone();
        let fail_second = |mut reference: Element| async move {
            if reference.str_value("reference") == Some("Practitioner/2") {
                return Err(lumen_models::Error::reference_update("unresolvable"));
            }
            reference.set_json("display", json!("changed"))?;
            Ok(reference)
        };
        let err = rewrite_atomically(
            &mut resource,
            &fail_second,
            TraversalOptions::sequential(),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Model(lumen_models::Error::ReferenceUpdate(_))));
        assert_eq!(resource, before);
    }

    #[tokio::test]
    async fn keeps_the_original_on_timeout() {
        let mut resource = patient();
        let before = resource.clone();
        let slow = |reference: Element| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<Element, lumen_models::Error>(reference)
        };
        let err = rewrite_atomically(
            &mut resource,
            &slow,
            TraversalOptions::default(),
            Duration::from_millis(20),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(resource, before);
    }
}
