//! The Registry Store adapter: a thin facade over the image-copy
//! collaborator's `Copy`/`NewImage`/`Digest` interface, offering `Load`
//! (mirror a resolved reference into the managed registry) and `Save`
//! (produce a local archive of a reference for the pull side of the
//! transport).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use camino::Utf8PathBuf;

use crate::docker_config::Credential;
use crate::error::Error;

/// A manifest digest, always of the form `sha256:<hex>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestDigest(pub String);

impl ManifestDigest {
    /// Parse and validate a raw digest string.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let Some(hex) = raw.strip_prefix("sha256:") else {
            anyhow::bail!("not a sha256 digest: {raw}");
        };
        if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            anyhow::bail!("malformed sha256 digest: {raw}");
        }
        Ok(Self(raw.to_string()))
    }
}

/// Which platforms a copy should include. The core only ever needs "all of
/// them", but the type leaves room for the collaborator's richer
/// `ImageListSelection` without the core depending on its concrete enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageListSelection {
    /// Copy every platform-specific manifest in a multi-arch index.
    AllImages,
}

/// Everything needed to address one source or destination image for a
/// copy/manifest-fetch operation.
#[derive(Debug, Clone)]
pub struct PullContext {
    /// Fully-qualified `docker://...` style reference.
    pub reference: String,
    /// Credential to present, if any (the "no credential" attempt uses
    /// `None`).
    pub credential: Option<Credential>,
    /// Whether to skip TLS verification.
    pub insecure: bool,
}

/// Facade over the image-copy library: fetch a manifest and its digest, or
/// copy an image between two references. This is the one trait boundary
/// across which the core never implements blob transfer, manifest parsing,
/// or signature verification itself.
#[async_trait]
pub trait ImageCopier: Send + Sync {
    /// Fetch the raw manifest and its digest for `src`.
    async fn fetch_manifest(&self, src: &PullContext) -> anyhow::Result<(Vec<u8>, ManifestDigest)>;

    /// Copy every selected platform from `src` to `dst`, returning the
    /// digest of the manifest written at the destination (which may differ
    /// from the source digest if the destination rewrites the manifest,
    /// e.g. to drop a signature layer).
    async fn copy(
        &self,
        src: &PullContext,
        dst: &str,
        selection: ImageListSelection,
    ) -> anyhow::Result<ManifestDigest>;
}

/// A scratch archive file, owned by the caller via an explicit cleanup
/// capability. `cleanup` is idempotent — safe to call more than once.
#[derive(Debug)]
pub struct ScratchArchive {
    path: Utf8PathBuf,
    cleaned: AtomicBool,
}

impl ScratchArchive {
    fn new(path: Utf8PathBuf) -> Self {
        Self {
            path,
            cleaned: AtomicBool::new(false),
        }
    }

    /// The path to the archive file.
    pub fn path(&self) -> &Utf8PathBuf {
        &self.path
    }

    /// Remove the archive. Safe to call more than once.
    pub fn cleanup(&self) {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = std::fs::remove_file(&self.path);
    }
}

impl Drop for ScratchArchive {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Where the mirror registry lives and how destination names are formed.
#[derive(Debug, Clone)]
pub struct MirrorTarget {
    /// Cluster-internal hostname for the mirror, e.g. `registry.ns.svc:5000`.
    pub host: String,
    /// If set, every image shares this one repository, namespaced by
    /// `<ns>-<name>`; otherwise each `(ns, name)` gets its own repository
    /// path `<ns>/<name>`.
    pub shared_repository: Option<String>,
}

impl MirrorTarget {
    /// Compute the destination reference for `Load`.
    pub fn destination_reference(&self, ns: &str, name: &str) -> String {
        let repo = match &self.shared_repository {
            Some(shared) => format!("{shared}/{ns}-{name}"),
            None => format!("{ns}/{name}"),
        };
        format!("docker://{}/{repo}", self.host)
    }
}

/// The Registry Store adapter itself.
pub struct RegistryStore {
    copier: Arc<dyn ImageCopier>,
    mirror: MirrorTarget,
    scratch_dir: Utf8PathBuf,
}

impl std::fmt::Debug for RegistryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryStore")
            .field("mirror", &self.mirror)
            .field("scratch_dir", &self.scratch_dir)
            .finish()
    }
}

impl RegistryStore {
    /// Construct a store backed by `copier`, mirroring into `mirror`, using
    /// `scratch_dir` for temporary archives.
    pub fn new(copier: Arc<dyn ImageCopier>, mirror: MirrorTarget, scratch_dir: Utf8PathBuf) -> Self {
        Self {
            copier,
            mirror,
            scratch_dir,
        }
    }

    /// `Load(srcRef, srcAuth, ns, name) -> pinnedDigestRef`: copy every
    /// platform of `src_ref` into the mirror and return the resulting
    /// digest-pinned reference.
    #[tracing::instrument(skip(self, credential))]
    pub async fn load(
        &self,
        src_ref: &str,
        credential: Option<Credential>,
        insecure: bool,
        ns: &str,
        name: &str,
    ) -> Result<String, Error> {
        let src = PullContext {
            reference: src_ref.to_string(),
            credential,
            insecure,
        };
        let dst = self.mirror.destination_reference(ns, name);
        let digest = self
            .copier
            .copy(&src, &dst, ImageListSelection::AllImages)
            .await
            .map_err(|e| Error::TransferFailed(format!("{e:#}")))?;
        Ok(format!("{dst}@{}", digest.0))
    }

    /// Fetch just the manifest digest for `pull`, without copying
    /// anything. Used by the resolver before deciding whether to mirror.
    #[tracing::instrument(skip(self, pull), fields(reference = %pull.reference))]
    pub async fn fetch_manifest_digest(&self, pull: &PullContext) -> anyhow::Result<ManifestDigest> {
        let (_manifest, digest) = self.copier.fetch_manifest(pull).await?;
        Ok(digest)
    }

    /// `Save(ref) -> localArchiveRef, cleanup`: produce a local
    /// `docker-archive:` copy of `reference` for streaming out over pull.
    #[tracing::instrument(skip(self))]
    pub async fn save(&self, reference: &str) -> Result<(Utf8PathBuf, ScratchArchive), Error> {
        let archive_path = self.new_local_reference();
        let src = PullContext {
            reference: reference.to_string(),
            credential: None,
            insecure: false,
        };
        let dst = format!("docker-archive:{archive_path}");
        self.copier
            .copy(&src, &dst, ImageListSelection::AllImages)
            .await
            .map_err(|e| Error::TransferFailed(format!("{e:#}")))?;
        Ok((archive_path.clone(), ScratchArchive::new(archive_path)))
    }

    /// Allocate a fresh scratch archive path for intermediate use (e.g. the
    /// push side writing incoming chunks before calling `load`).
    pub fn new_local_reference(&self) -> Utf8PathBuf {
        self.scratch_dir
            .join(format!("tagctl-{}.tar", uuid::Uuid::new_v4()))
    }
}
