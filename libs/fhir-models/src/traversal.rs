//! Reference rewriting
//!
//! [`Element::update_references`] walks a tree and replaces every `Reference` node with
//! the result of an async callback. References nested in backbone elements, choice
//! values, recursive structures and contained resources are all visited. Reference nodes
//! are handed to the callback whole and not descended into.
//!
//! Array elements are processed concurrently up to [`TraversalOptions::concurrency`];
//! sibling fields run in declaration order. A failing callback aborts the walk. The
//! reference it was given stays unchanged, but rewrites already applied elsewhere in the
//! tree are kept, so callers needing all-or-nothing semantics should work on a clone.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, TryStreamExt};
use std::future::Future;

use crate::element::{Element, FieldValue, Item};
use crate::error::{Error, Result};
use crate::schema::REFERENCE_TYPE;

/// Default number of array elements processed at once.
pub const DEFAULT_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraversalOptions {
    /// Upper bound on concurrently pending callbacks per array; `1` is sequential.
    pub concurrency: usize,
}

impl Default for TraversalOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl TraversalOptions {
    pub fn sequential() -> Self {
        Self { concurrency: 1 }
    }
}

/// Rewrites one reference. Must return a `Reference`; returning the input is a no-op.
#[async_trait]
pub trait ReferenceUpdater: Send + Sync {
    async fn update_reference(&self, reference: Element) -> Result<Element>;
}

#[async_trait]
impl<F, Fut> ReferenceUpdater for F
where
    F: Fn(Element) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Element>> + Send,
{
    async fn update_reference(&self, reference: Element) -> Result<Element> {
        self(reference).await
    }
}

impl Element {
    /// Replace every reference below this node with the updater's result.
    pub async fn update_references(&mut self, updater: &dyn ReferenceUpdater) -> Result<()> {
        self.update_references_with(updater, TraversalOptions::default())
            .await
    }

    pub async fn update_references_with(
        &mut self,
        updater: &dyn ReferenceUpdater,
        options: TraversalOptions,
    ) -> Result<()> {
        visit_children(self, updater, options.concurrency.max(1)).await
    }
}

fn visit_children<'a>(
    node: &'a mut Element,
    updater: &'a dyn ReferenceUpdater,
    limit: usize,
) -> BoxFuture<'a, Result<()>> {
    async move {
        for (_, value) in node.fields_mut() {
            match value {
                FieldValue::Single(item) => visit_item(item, updater, limit).await?,
                FieldValue::Choice(choice) => visit_item(&mut choice.item, updater, limit).await?,
                FieldValue::Multiple(items) => {
                    stream::iter(items.iter_mut().map(Ok))
                        .try_for_each_concurrent(limit, |item| visit_item(item, updater, limit))
                        .await?
                }
            }
        }
        Ok(())
    }
    .boxed()
}

fn visit_item<'a>(
    item: &'a mut Item,
    updater: &'a dyn ReferenceUpdater,
    limit: usize,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let Item::Node(node) = item else {
            return Ok(());
        };
        if !node.is_reference() {
            return visit_children(node, updater, limit).await;
        }

        let updated = updater.update_reference(node.clone()).await?;
        if !updated.is_reference() {
            return Err(Error::type_mismatch(REFERENCE_TYPE, updated.type_name()));
        }
        tracing::trace!(
            before = node.str_value("reference"),
            after = updated.str_value("reference"),
            "Updated reference"
        );
        *node = updated;
        Ok(())
    }
    .boxed()
}
