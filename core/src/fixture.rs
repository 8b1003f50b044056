//! In-memory fakes for the external collaborators: a
//! `ClusterClient` backed by a couple of `HashMap`s and an `ImageCopier`
//! that either always succeeds or always fails, wired together behind a
//! [`TestHarness`] so the reconcilers and resolver can be exercised without
//! a real cluster or registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::api::ObjectMeta;

use crate::context::SystemContext;
use crate::kube_client::ClusterClient;
use crate::registry_store::{ImageCopier, ImageListSelection, ManifestDigest, PullContext};
use crate::types::{
    HashReference, Image, ImageImport, ImageImportSpec, ImageImportStatus, ImageSpec, ImageStatus,
    ImportAttempt,
};

const MODE_SUCCESS: u8 = 0;
const MODE_FAIL: u8 = 1;

type Key = (String, String);

fn key_of(ns: Option<&String>, name: Option<&String>) -> Key {
    (
        ns.cloned().unwrap_or_default(),
        name.cloned().unwrap_or_default(),
    )
}

/// The in-memory `ClusterClient` fake.
#[derive(Debug)]
pub struct FakeCluster {
    images: Mutex<HashMap<Key, Image>>,
    imports: Mutex<HashMap<Key, ImageImport>>,
    mode: Arc<AtomicU8>,
}

impl FakeCluster {
    fn new(mode: Arc<AtomicU8>) -> Self {
        Self {
            images: Mutex::new(HashMap::new()),
            imports: Mutex::new(HashMap::new()),
            mode,
        }
    }

    /// Make the paired `ImageCopier` resolve every manifest fetch and copy
    /// successfully.
    pub fn seed_success(&self) {
        self.mode.store(MODE_SUCCESS, Ordering::SeqCst);
    }

    /// Make the paired `ImageCopier` fail every manifest fetch and copy.
    pub fn seed_always_fail(&self) {
        self.mode.store(MODE_FAIL, Ordering::SeqCst);
    }

    /// Insert or replace an `Image`.
    pub async fn put_image(&self, image: Image) {
        let key = key_of(image.metadata.namespace.as_ref(), image.metadata.name.as_ref());
        self.images.lock().unwrap().insert(key, image);
    }

    /// Insert or replace an `ImageImport`.
    pub async fn put_image_import(&self, import: ImageImport) {
        let key = key_of(
            import.metadata.namespace.as_ref(),
            import.metadata.name.as_ref(),
        );
        self.imports.lock().unwrap().insert(key, import);
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get_image(&self, ns: &str, name: &str) -> anyhow::Result<Option<Image>> {
        let key = (ns.to_string(), name.to_string());
        Ok(self.images.lock().unwrap().get(&key).cloned())
    }

    async fn create_image(&self, image: Image) -> anyhow::Result<Image> {
        let key = key_of(image.metadata.namespace.as_ref(), image.metadata.name.as_ref());
        self.images.lock().unwrap().insert(key, image.clone());
        Ok(image)
    }

    async fn update_image(&self, image: &Image) -> anyhow::Result<Image> {
        let key = key_of(image.metadata.namespace.as_ref(), image.metadata.name.as_ref());
        self.images.lock().unwrap().insert(key, image.clone());
        Ok(image.clone())
    }

    async fn update_image_status(&self, image: &Image) -> anyhow::Result<Image> {
        let key = key_of(image.metadata.namespace.as_ref(), image.metadata.name.as_ref());
        self.images.lock().unwrap().insert(key, image.clone());
        Ok(image.clone())
    }

    async fn get_image_import(&self, ns: &str, name: &str) -> anyhow::Result<Option<ImageImport>> {
        let key = (ns.to_string(), name.to_string());
        Ok(self.imports.lock().unwrap().get(&key).cloned())
    }

    async fn create_image_import(&self, import: ImageImport) -> anyhow::Result<ImageImport> {
        let key = key_of(
            import.metadata.namespace.as_ref(),
            import.metadata.name.as_ref(),
        );
        self.imports.lock().unwrap().insert(key, import.clone());
        Ok(import)
    }

    async fn update_image_import(&self, import: &ImageImport) -> anyhow::Result<ImageImport> {
        let key = key_of(
            import.metadata.namespace.as_ref(),
            import.metadata.name.as_ref(),
        );
        self.imports.lock().unwrap().insert(key, import.clone());
        Ok(import.clone())
    }

    async fn update_image_import_status(
        &self,
        import: &ImageImport,
    ) -> anyhow::Result<ImageImport> {
        self.update_image_import(import).await
    }

    async fn delete_image_import(&self, ns: &str, name: &str) -> anyhow::Result<()> {
        let key = (ns.to_string(), name.to_string());
        self.imports.lock().unwrap().remove(&key);
        Ok(())
    }

    async fn list_image_imports_owned_by(
        &self,
        ns: &str,
        image: &str,
    ) -> anyhow::Result<Vec<ImageImport>> {
        Ok(self
            .imports
            .lock()
            .unwrap()
            .values()
            .filter(|imp| {
                imp.metadata.namespace.as_deref() == Some(ns) && imp.spec.target_image == image
            })
            .cloned()
            .collect())
    }

    async fn list_dockerconfig_secrets(&self, _ns: &str) -> anyhow::Result<Vec<Vec<u8>>> {
        Ok(Vec::new())
    }

    async fn get_mirror_registry_secret(
        &self,
        _pod_namespace: &str,
    ) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn get_local_registry_hosting(&self) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}

/// The in-memory `ImageCopier` fake, sharing a mode flag with a
/// `FakeCluster` so a test can flip both via `seed_success`/
/// `seed_always_fail`.
struct FakeCopier {
    mode: Arc<AtomicU8>,
}

impl FakeCopier {
    fn digest(&self) -> ManifestDigest {
        ManifestDigest::parse(&format!("sha256:{}", "a".repeat(64))).unwrap()
    }
}

#[async_trait]
impl ImageCopier for FakeCopier {
    async fn fetch_manifest(&self, _src: &PullContext) -> anyhow::Result<(Vec<u8>, ManifestDigest)> {
        if self.mode.load(Ordering::SeqCst) == MODE_FAIL {
            anyhow::bail!("manifest fetch failed (fixture)");
        }
        Ok((b"{}".to_vec(), self.digest()))
    }

    async fn copy(
        &self,
        _src: &PullContext,
        _dst: &str,
        _selection: ImageListSelection,
    ) -> anyhow::Result<ManifestDigest> {
        if self.mode.load(Ordering::SeqCst) == MODE_FAIL {
            anyhow::bail!("copy failed (fixture)");
        }
        Ok(self.digest())
    }
}

/// Wires a `SystemContext` over the two fakes above, plus convenience
/// constructors for `Image`/`ImageImport` test fixtures.
pub struct TestHarness {
    /// The context under test, backed by `cluster` and an in-memory copier.
    pub ctx: Arc<SystemContext>,
    /// The fake cluster backing `ctx`, for seeding and asserting state.
    pub cluster: Arc<FakeCluster>,
}

impl TestHarness {
    /// Build a fresh harness; the paired copier defaults to always
    /// succeeding until `cluster.seed_always_fail()` is called.
    pub async fn new() -> Self {
        let mode = Arc::new(AtomicU8::new(MODE_SUCCESS));
        let cluster = Arc::new(FakeCluster::new(mode.clone()));
        let copier = Arc::new(FakeCopier { mode });
        let ctx = Arc::new(SystemContext::new(
            cluster.clone() as Arc<dyn ClusterClient>,
            copier as Arc<dyn ImageCopier>,
            "tagctl-system",
            camino::Utf8PathBuf::from("/tmp"),
        ));
        Self { ctx, cluster }
    }

    /// A minimal `Image` fixture.
    pub fn new_image(&self, ns: &str, name: &str, from: &str) -> Image {
        Image {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(ns.to_string()),
                ..Default::default()
            },
            spec: ImageSpec {
                from: from.to_string(),
                mirror: false,
                insecure: false,
                generation: None,
            },
            status: None,
        }
    }

    /// An `ImageImport` fixture with no spec inheritance and no status yet.
    pub fn new_import_named(&self, ns: &str, name: &str, target_image: &str) -> ImageImport {
        ImageImport {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(ns.to_string()),
                ..Default::default()
            },
            spec: ImageImportSpec {
                target_image: target_image.to_string(),
                from: None,
                mirror: None,
                insecure: None,
            },
            status: Default::default(),
        }
    }

    /// An `ImageImport` fixture already in the `Resolved` state, with its
    /// digest-pinned reference ending in `marker` so tests can tell
    /// multiple resolved imports apart.
    pub fn resolved_import(
        &self,
        ns: &str,
        name: &str,
        target_image: &str,
        imported_at: DateTime<Utc>,
        marker: &str,
    ) -> ImageImport {
        let mut import = self.new_import_named(ns, name, target_image);
        import.spec.from = Some("docker.io/library/alpine:3.18".to_string());
        import.status = Some(ImageImportStatus {
            hash_reference: Some(HashReference {
                generation: 0,
                from: "docker.io/library/alpine:3.18".to_string(),
                imported_at,
                image_reference: format!(
                    "docker://registry.example/alpine@sha256:{}{}",
                    "0".repeat(63),
                    marker
                ),
            }),
            import_attempts: vec![ImportAttempt::success(imported_at)],
            consumed_at: None,
        });
        import
    }
}
