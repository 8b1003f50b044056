//! The `ImageImport` reconciler: owns the lifecycle of a single
//! `ImageImport` from `New` through `Resolving`/`Resolved`/`Failed` to
//! `Consumed` and eventual deletion.

use std::sync::Arc;

use chrono::Utc;
use kube::api::ObjectMeta;
use kube::Resource;

use crate::context::SystemContext;
use crate::error::Error;
use crate::generation::{register_import_failure, register_import_success};
use crate::reconcile::Action;
use crate::resolver::Resolver;
use crate::types::{Image, ImageImport, ImageImportSpec, ImageSpec};

/// Reconcile a single `ImageImport`, named `name` in namespace `ns`.
#[tracing::instrument(skip(ctx))]
pub async fn reconcile(ctx: &Arc<SystemContext>, ns: &str, name: &str) -> anyhow::Result<Action> {
    let Some(mut import) = ctx.client().get_image_import(ns, name).await? else {
        // Deleted out from under us between enqueue and reconcile; nothing
        // to do.
        return Ok(Action::Await);
    };

    if import.spec.target_image.is_empty() {
        return Err(invalid_spec("targetImage must be set").into());
    }

    let consumed_at = import.status.as_ref().and_then(|s| s.consumed_at);
    if let Some(consumed_at) = consumed_at {
        let age = Utc::now().signed_duration_since(consumed_at);
        if age >= crate::types::CONSUME_GRACE {
            ctx.client().delete_image_import(ns, name).await?;
            return Ok(Action::Await);
        }
        let remaining = (crate::types::CONSUME_GRACE - age)
            .num_seconds()
            .max(1) as u64;
        return Ok(Action::RequeueAfter(remaining));
    }

    if import.status.as_ref().is_some_and(|s| s.is_resolved()) {
        // The Image reconciler is responsible for flagging this consumed
        // once it has absorbed the hash reference into the owning Image.
        return Ok(Action::Await);
    }

    if import.status.as_ref().is_some_and(|s| s.attempts_exhausted()) {
        import.status.get_or_insert_with(Default::default).consumed_at = Some(Utc::now());
        ctx.client().update_image_import_status(&import).await?;
        return Ok(Action::RequeueAfter(3600));
    }

    let target = ensure_owner_image(ctx, ns, &mut import).await?;

    let resolver = Resolver::new(ctx.clone());
    let from = import
        .spec
        .from
        .clone()
        .unwrap_or_else(|| target.spec.from.clone());
    let mirror = import.spec.mirror.unwrap_or(target.spec.mirror);
    let insecure = import.spec.insecure.unwrap_or(target.spec.insecure);

    match resolver
        .resolve(&from, mirror, insecure, ns, &import.spec.target_image)
        .await
    {
        Ok(hash_reference) => {
            let status = import.status.get_or_insert_with(Default::default);
            register_import_success(status, Utc::now(), hash_reference);
            ctx.client().update_image_import_status(&import).await?;
            Ok(Action::Await)
        }
        Err(e) => {
            let status = import.status.get_or_insert_with(Default::default);
            register_import_failure(status, Utc::now(), e.to_string());
            ctx.client().update_image_import_status(&import).await?;
            Err(e.into())
        }
    }
}

/// Ensure `import` has an owning `Image`, creating one on demand from the
/// import's spec, and writes back the owner reference plus inherited spec
/// fields before resolution runs.
async fn ensure_owner_image(
    ctx: &Arc<SystemContext>,
    ns: &str,
    import: &mut ImageImport,
) -> anyhow::Result<Image> {
    let existing = ctx
        .client()
        .get_image(ns, &import.spec.target_image)
        .await?;

    let target = match existing {
        Some(img) => img,
        None => {
            let from = import.spec.from.clone().ok_or_else(|| {
                anyhow::Error::new(invalid_spec(
                    "no existing target Image and spec.from is empty",
                ))
            })?;
            let new_image = Image {
                metadata: ObjectMeta {
                    name: Some(import.spec.target_image.clone()),
                    namespace: Some(ns.to_string()),
                    ..Default::default()
                },
                spec: ImageSpec {
                    from,
                    mirror: import.spec.mirror.unwrap_or(false),
                    insecure: import.spec.insecure.unwrap_or(false),
                    generation: None,
                },
                status: None,
            };
            ctx.client().create_image(new_image).await?
        }
    };

    let needs_owner_ref = !import
        .meta()
        .owner_references
        .as_ref()
        .is_some_and(|refs| refs.iter().any(|r| r.name == target.name_any()));
    let needs_spec_inherit =
        import.spec.from.is_none() || import.spec.mirror.is_none() || import.spec.insecure.is_none();

    if needs_owner_ref || needs_spec_inherit {
        if needs_spec_inherit {
            import.spec.from.get_or_insert_with(|| target.spec.from.clone());
            import.spec.mirror.get_or_insert(target.spec.mirror);
            import.spec.insecure.get_or_insert(target.spec.insecure);
        }
        if needs_owner_ref {
            let owner_refs = import.meta_mut().owner_references.get_or_insert_with(Vec::new);
            owner_refs.push(owner_reference(&target));
        }
        *import = ctx.client().update_image_import(import).await?;
    }

    Ok(target)
}

fn owner_reference(target: &Image) -> k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
    k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
        api_version: format!("{}/{}", Image::group(&()), Image::version(&())),
        kind: Image::kind(&()).to_string(),
        name: target.name_any(),
        uid: target.meta().uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

fn invalid_spec(msg: impl Into<String>) -> Error {
    Error::InvalidSpec(msg.into())
}
