//! The cluster-client collaborator interface: CRUD and watch for `Image`,
//! `ImageImport`, `Secret`, `ConfigMap`.
//!
//! This is an external collaborator and its real list/watch/informer
//! machinery is out of scope for the core; what the core needs is captured
//! here as a trait so the reconcilers and the resolver can be exercised
//! against the in-memory fake in [`crate::fixture`] without a real cluster.

use async_trait::async_trait;

use crate::types::{Image, ImageImport};

/// CRUD surface the reconcilers need against the kube API, scoped to the
/// two CRDs plus the Secret/ConfigMap reads needed for credential and
/// mirror-config discovery.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch an `Image` by name, or `None` if it doesn't exist.
    async fn get_image(&self, ns: &str, name: &str) -> anyhow::Result<Option<Image>>;

    /// Create a new `Image`.
    async fn create_image(&self, image: Image) -> anyhow::Result<Image>;

    /// Replace an `Image`'s `.spec` (used by `tagctl upgrade`/`downgrade` to
    /// pin or unpin `spec.generation`; optimistic concurrency via
    /// `resourceVersion`).
    async fn update_image(&self, image: &Image) -> anyhow::Result<Image>;

    /// Replace an `Image`'s `.status` subresource (optimistic concurrency
    /// via `resourceVersion`).
    async fn update_image_status(&self, image: &Image) -> anyhow::Result<Image>;

    /// Fetch an `ImageImport` by name, or `None` if it doesn't exist.
    async fn get_image_import(&self, ns: &str, name: &str) -> anyhow::Result<Option<ImageImport>>;

    /// Create a new `ImageImport`.
    async fn create_image_import(&self, import: ImageImport) -> anyhow::Result<ImageImport>;

    /// Replace an `ImageImport`'s spec/metadata (used to write back
    /// inherited spec fields and the owner reference before resolution).
    async fn update_image_import(&self, import: &ImageImport) -> anyhow::Result<ImageImport>;

    /// Replace an `ImageImport`'s `.status` subresource.
    async fn update_image_import_status(&self, import: &ImageImport)
        -> anyhow::Result<ImageImport>;

    /// Delete an `ImageImport`.
    async fn delete_image_import(&self, ns: &str, name: &str) -> anyhow::Result<()>;

    /// List every `ImageImport` in `ns` whose `spec.targetImage == image`
    /// (the "OwnedByImage" predicate).
    async fn list_image_imports_owned_by(
        &self,
        ns: &str,
        image: &str,
    ) -> anyhow::Result<Vec<ImageImport>>;

    /// Enumerate every `.dockerconfigjson` secret in `ns`, in listing
    /// order, as raw JSON payloads.
    async fn list_dockerconfig_secrets(&self, ns: &str) -> anyhow::Result<Vec<Vec<u8>>>;

    /// Fetch the mirror-registry config secret
    /// `<podNamespace>/mirror-registry-config`, if present.
    async fn get_mirror_registry_secret(
        &self,
        pod_namespace: &str,
    ) -> anyhow::Result<Option<Vec<u8>>>;

    /// Fetch the `localRegistryHosting.v1` YAML field from
    /// `kube-public/local-registry-hosting`, if present.
    async fn get_local_registry_hosting(&self) -> anyhow::Result<Option<String>>;
}
