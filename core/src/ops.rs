//! User-facing operations backing the CLI surface: illustrative wiring, not
//! part of the hard reconciliation core. Kept here, not in `tagctl-cli`, so
//! the binary crate stays a thin argument-parsing shell that only ever
//! assembles inputs and calls straight into these functions.

use std::sync::Arc;

use kube::api::ObjectMeta;

use crate::context::SystemContext;
use crate::error::Error;
use crate::generation::{next_generation, validate_generation};
use crate::types::{Image, ImageImport, ImageImportSpec, ImageSpec};

/// `tagctl new --from <ref> [--mirror] [-n ns] <name>`: create a fresh
/// `Image` declaration. Errors if one already exists under `name`.
pub async fn new_image(
    ctx: &Arc<SystemContext>,
    ns: &str,
    name: &str,
    from: &str,
    mirror: bool,
    insecure: bool,
) -> anyhow::Result<Image> {
    if ctx.client().get_image(ns, name).await?.is_some() {
        anyhow::bail!("Image {ns}/{name} already exists");
    }
    let image = Image {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(ns.to_string()),
            ..Default::default()
        },
        spec: ImageSpec {
            from: from.to_string(),
            mirror,
            insecure,
            generation: None,
        },
        status: None,
    };
    ctx.client().create_image(image).await
}

/// `tagctl import -f <ref> [-n ns] <name>`: create an `ImageImport`
/// targeting the `Image` named `name`, named `<name>-<randomSuffix>`.
/// `from`/`mirror`/`insecure` are left unset (inherited from the target
/// `Image`) when not overridden, matching the reconciler's
/// inheritance-on-first-reconcile behavior.
pub async fn new_import(
    ctx: &Arc<SystemContext>,
    ns: &str,
    target_image: &str,
    from: Option<String>,
    mirror: Option<bool>,
    insecure: Option<bool>,
) -> anyhow::Result<ImageImport> {
    let generated_name = format!("{target_image}-{}", tagctl_utils::random_suffix(5));
    let import = ImageImport {
        metadata: ObjectMeta {
            name: Some(generated_name),
            namespace: Some(ns.to_string()),
            ..Default::default()
        },
        spec: ImageImportSpec {
            target_image: target_image.to_string(),
            from,
            mirror,
            insecure,
        },
        status: None,
    };
    ctx.client().create_image_import(import).await
}

/// `tagctl upgrade <name>`: move the `Image`'s pinned current generation
/// (the `spec.generation` pointer) one step toward the head of history. A
/// no-op error if already at the head or if there is no history yet.
pub async fn upgrade(ctx: &Arc<SystemContext>, ns: &str, name: &str) -> anyhow::Result<Image> {
    step_generation(ctx, ns, name, 1).await
}

/// `tagctl downgrade <name>`: move the `Image`'s pinned current generation
/// one step away from the head of history — a spec-only edit that leaves
/// `status.hashReferences` intact.
pub async fn downgrade(ctx: &Arc<SystemContext>, ns: &str, name: &str) -> anyhow::Result<Image> {
    step_generation(ctx, ns, name, -1).await
}

async fn step_generation(
    ctx: &Arc<SystemContext>,
    ns: &str,
    name: &str,
    delta: i64,
) -> anyhow::Result<Image> {
    let mut image = ctx
        .client()
        .get_image(ns, name)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Image {ns}/{name} not found"))?;
    let status = image.status.clone().unwrap_or_default();
    let head = status
        .hash_references
        .first()
        .map(|r| r.generation)
        .ok_or_else(|| anyhow::anyhow!("Image {ns}/{name} has no resolved history yet"))?;
    let current = image.spec.generation.unwrap_or(head);
    let target = current + delta;

    validate_generation(&status, target).map_err(|e| match e {
        Error::InvalidGeneration(g) => anyhow::anyhow!(
            "generation {g} does not exist for {ns}/{name} (have {}..={head})",
            status.hash_references.last().map(|r| r.generation).unwrap_or(head)
        ),
        other => other.into(),
    })?;
    if target == next_generation(&status) {
        anyhow::bail!("generation {target} has not been resolved yet for {ns}/{name}");
    }

    image.spec.generation = if target == head { None } else { Some(target) };
    ctx.client().update_image(&image).await
}
