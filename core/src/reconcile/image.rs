//! The `Image` reconciler: aggregates consumed-but-unrecorded `ImageImport`s
//! owned by each `Image`, prepends them to its history in arrival order,
//! then flags the contributing imports consumed.

use std::sync::Arc;

use chrono::Utc;

use crate::context::SystemContext;
use crate::generation::{next_generation, prepend_finished_imports};
use crate::reconcile::Action;
use crate::types::HashReference;

/// Reconcile a single `Image`, named `name` in namespace `ns`.
#[tracing::instrument(skip(ctx))]
pub async fn reconcile(ctx: &Arc<SystemContext>, ns: &str, name: &str) -> anyhow::Result<Action> {
    let Some(mut image) = ctx.client().get_image(ns, name).await? else {
        return Ok(Action::Await);
    };
    let status = image.status.get_or_insert_with(Default::default);

    let already_absorbed_at = status.hash_references.first().map(|r| r.imported_at);

    let mut candidates = ctx
        .client()
        .list_image_imports_owned_by(ns, name)
        .await?
        .into_iter()
        .filter(|imp| {
            imp.status
                .as_ref()
                .is_some_and(|s| s.is_resolved() && s.consumed_at.is_none())
        })
        .filter(|imp| {
            let imported_at = imp.status.as_ref().unwrap().hash_reference.as_ref().unwrap().imported_at;
            already_absorbed_at.is_none_or(|cutoff| imported_at > cutoff)
        })
        .collect::<Vec<_>>();

    // Stable sort oldest-first by `importedAt`.
    candidates.sort_by_key(|imp| imp.status.as_ref().unwrap().hash_reference.as_ref().unwrap().imported_at);

    if candidates.is_empty() {
        return Ok(Action::Await);
    }

    let references: Vec<HashReference> = candidates
        .iter()
        .map(|imp| imp.status.as_ref().unwrap().hash_reference.clone().unwrap())
        .collect();
    let before = next_generation(status);
    prepend_finished_imports(status, references);
    tracing::info!(
        image = name,
        absorbed = candidates.len(),
        from_generation = before,
        "prepended resolved imports into image history"
    );

    ctx.client().update_image_status(&image).await?;

    // Only after the Image's status is durably persisted do we mark the
    // contributing imports consumed: if this next loop fails partway, the
    // absorbed-filter above makes re-aggregation safe.
    for imp in candidates {
        let ns = imp.metadata.namespace.clone().unwrap_or_default();
        let name = imp.metadata.name.clone().unwrap_or_default();
        let mut imp = imp;
        imp.status.get_or_insert_with(Default::default).consumed_at = Some(Utc::now());
        if let Err(e) = ctx.client().update_image_import_status(&imp).await {
            tracing::warn!(ns, name, error = %e, "failed to mark import consumed; will retry next pass");
        }
    }

    Ok(Action::Await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::TestHarness;

    #[tokio::test]
    async fn absorbs_resolved_imports_in_arrival_order() {
        let harness = TestHarness::new().await;
        harness.cluster.put_image(harness.new_image("demo", "alp", "docker.io/library/alpine:3.18")).await;

        let t1 = Utc::now() - chrono::Duration::seconds(5);
        let t2 = Utc::now();
        harness
            .cluster
            .put_image_import(harness.resolved_import("demo", "alp-a", "alp", t1, "a"))
            .await;
        harness
            .cluster
            .put_image_import(harness.resolved_import("demo", "alp-b", "alp", t2, "b"))
            .await;

        reconcile(&harness.ctx, "demo", "alp").await.unwrap();

        let image = harness.cluster.get_image("demo", "alp").await.unwrap().unwrap();
        let status = image.status.unwrap();
        assert_eq!(status.hash_references.len(), 2);
        // P8: the later import (t2) has the higher generation.
        assert!(status.hash_references[0].generation > status.hash_references[1].generation);
        assert!(status.hash_references[0].image_reference.ends_with("b"));
        assert!(status.hash_references[1].image_reference.ends_with("a"));

        let a = harness.cluster.get_image_import("demo", "alp-a").await.unwrap().unwrap();
        assert!(a.status.unwrap().consumed_at.is_some());
    }

    #[tokio::test]
    async fn does_not_double_absorb_already_recorded_imports() {
        let harness = TestHarness::new().await;
        harness.cluster.put_image(harness.new_image("demo", "alp", "docker.io/library/alpine:3.18")).await;
        let t1 = Utc::now() - chrono::Duration::seconds(5);
        harness
            .cluster
            .put_image_import(harness.resolved_import("demo", "alp-a", "alp", t1, "a"))
            .await;
        reconcile(&harness.ctx, "demo", "alp").await.unwrap();
        // Second pass: nothing new, no-op, and re-running doesn't duplicate.
        reconcile(&harness.ctx, "demo", "alp").await.unwrap();
        let image = harness.cluster.get_image("demo", "alp").await.unwrap().unwrap();
        assert_eq!(image.status.unwrap().hash_references.len(), 1);
    }
}
