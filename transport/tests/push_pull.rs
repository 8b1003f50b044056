//! End-to-end coverage of `TagIOService` over a real (loopback) gRPC
//! connection: push an archive, run the two reconcilers that turn the
//! resulting `ImageImport` into a resolved `Image`, then pull it back and
//! check the bytes round-trip. Also covers the push-atomicity and
//! pull-authorization invariants that only show up once a real stream is
//! driven end to end.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use camino::Utf8PathBuf;
use kube::api::ObjectMeta;
use tonic::transport::Server;
use tonic::Request;

use tagctl_core::access_review::{AccessReview, BearerPresentAccessReview};
use tagctl_core::context::SystemContext;
use tagctl_core::kube_client::ClusterClient;
use tagctl_core::reconcile::{image, image_import};
use tagctl_core::registry_store::{ImageCopier, ImageListSelection, ManifestDigest, PullContext};
use tagctl_core::types::{Image, ImageImport, ImageSpec};

use tagctl_transport::server::TagctlTagIoService;
use tagctl_transport::{Body, Chunk, Header, Packet, Progress, TagIoServiceClient, TagIoServiceServer};

type Key = (String, String);

fn key_of(ns: Option<&String>, name: Option<&String>) -> Key {
    (
        ns.cloned().unwrap_or_default(),
        name.cloned().unwrap_or_default(),
    )
}

/// In-memory `ClusterClient`, separate from `tagctl_core::fixture::FakeCluster`
/// since that one is `#[cfg(test)]`-gated inside `core` and invisible here;
/// this one additionally resolves `generateName` the way a real API server
/// would, since the push handler relies on that to name new `ImageImport`s.
#[derive(Debug, Default)]
struct FakeClusterClient {
    images: Mutex<HashMap<Key, Image>>,
    imports: Mutex<HashMap<Key, ImageImport>>,
    name_seq: AtomicU64,
}

impl FakeClusterClient {
    fn put_image(&self, image: Image) {
        let key = key_of(image.metadata.namespace.as_ref(), image.metadata.name.as_ref());
        self.images.lock().unwrap().insert(key, image);
    }
}

#[async_trait]
impl ClusterClient for FakeClusterClient {
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
        self.put_image(image.clone());
        Ok(image.clone())
    }

    async fn update_image_status(&self, image: &Image) -> anyhow::Result<Image> {
        self.put_image(image.clone());
        Ok(image.clone())
    }

    async fn get_image_import(&self, ns: &str, name: &str) -> anyhow::Result<Option<ImageImport>> {
        let key = (ns.to_string(), name.to_string());
        Ok(self.imports.lock().unwrap().get(&key).cloned())
    }

    async fn create_image_import(&self, mut import: ImageImport) -> anyhow::Result<ImageImport> {
        if import.metadata.name.is_none() {
            if let Some(prefix) = import.metadata.generate_name.clone() {
                let n = self.name_seq.fetch_add(1, Ordering::SeqCst);
                import.metadata.name = Some(format!("{prefix}{n:05}"));
            }
        }
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

/// An `ImageCopier` that models the mirror registry as an in-memory byte
/// store, keyed by the destination reference with any `@sha256:...` suffix
/// stripped, so a `docker-archive:` → `docker://mirror/...` copy (push's
/// `Load`) and the reverse `docker://mirror/...@sha256:...` →
/// `docker-archive:` copy (pull's `Save`) round-trip the same bytes under
/// the same key.
#[derive(Debug, Default)]
struct FakeMirror {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

fn digest_stripped(reference: &str) -> &str {
    reference.split('@').next().unwrap_or(reference)
}

fn fixed_digest() -> ManifestDigest {
    ManifestDigest::parse(&format!("sha256:{}", "7".repeat(64))).unwrap()
}

#[async_trait]
impl ImageCopier for FakeMirror {
    async fn fetch_manifest(&self, _src: &PullContext) -> anyhow::Result<(Vec<u8>, ManifestDigest)> {
        Ok((b"{}".to_vec(), fixed_digest()))
    }

    async fn copy(
        &self,
        src: &PullContext,
        dst: &str,
        _selection: ImageListSelection,
    ) -> anyhow::Result<ManifestDigest> {
        if let Some(path) = src.reference.strip_prefix("docker-archive:") {
            let bytes = tokio::fs::read(path).await?;
            self.blobs
                .lock()
                .unwrap()
                .insert(digest_stripped(dst).to_string(), bytes);
        } else if let Some(path) = dst.strip_prefix("docker-archive:") {
            let bytes = self
                .blobs
                .lock()
                .unwrap()
                .get(digest_stripped(&src.reference))
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no blob stored for {}", src.reference))?;
            tokio::fs::write(path, bytes).await?;
        } else {
            anyhow::bail!("unsupported fake copy: {} -> {dst}", src.reference);
        }
        Ok(fixed_digest())
    }
}

async fn spawn_server(ctx: Arc<SystemContext>) -> String {
    // Grab an OS-assigned port synchronously, then let tonic bind its own
    // listener on it: simpler than threading a `TcpListenerStream` through
    // for a one-shot test server, at the cost of a vanishingly small race
    // if something else grabs the port in between.
    let addr = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap()
    };
    let access: Arc<dyn AccessReview> = Arc::new(BearerPresentAccessReview);
    let service = TagctlTagIoService::new(ctx, access);
    tokio::spawn(async move {
        let _ = Server::builder()
            .add_service(TagIoServiceServer::new(service))
            .serve(addr)
            .await;
    });
    // Give the spawned server a moment to bind before the client connects.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    format!("http://{addr}")
}

fn new_harness(scratch: &camino::Utf8Path) -> (Arc<FakeClusterClient>, Arc<SystemContext>) {
    let cluster = Arc::new(FakeClusterClient::default());
    let mirror = Arc::new(FakeMirror::default());
    let ctx = Arc::new(SystemContext::new(
        cluster.clone() as Arc<dyn ClusterClient>,
        mirror as Arc<dyn ImageCopier>,
        "tagctl-system",
        scratch.to_owned(),
    ));
    (cluster, ctx)
}

#[tokio::test]
async fn push_then_pull_round_trips_archive_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let (cluster, ctx) = new_harness(&scratch);

    cluster.put_image(Image {
        metadata: ObjectMeta {
            name: Some("alp".into()),
            namespace: Some("demo".into()),
            ..Default::default()
        },
        spec: ImageSpec {
            from: "docker.io/library/alpine:3.18".into(),
            mirror: false,
            insecure: false,
            generation: None,
        },
        status: None,
    });

    let url = spawn_server(ctx.clone()).await;
    let mut client = TagIoServiceClient::connect(url).await.unwrap();

    let archive_path = scratch.join("source.tar");
    let body: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    tokio::fs::write(&archive_path, &body).await.unwrap();

    tagctl_transport::client::push(&mut client, "demo", "alp", "some-token", &archive_path)
        .await
        .unwrap();

    let pending = cluster
        .list_image_imports_owned_by("demo", "alp")
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    let import_name = pending[0].metadata.name.clone().unwrap();
    assert!(pending[0].status.is_none());

    image_import::reconcile(&ctx, "demo", &import_name)
        .await
        .unwrap();
    image::reconcile(&ctx, "demo", "alp").await.unwrap();

    let dest_path = scratch.join("dest.tar");
    tagctl_transport::client::pull(&mut client, "demo", "alp", "some-token", &dest_path)
        .await
        .unwrap();

    let roundtripped = tokio::fs::read(&dest_path).await.unwrap();
    assert_eq!(roundtripped, body);
}

#[tokio::test]
async fn push_closed_before_declared_size_creates_no_import() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let (cluster, ctx) = new_harness(&scratch);
    cluster.put_image(Image {
        metadata: ObjectMeta {
            name: Some("alp".into()),
            namespace: Some("demo".into()),
            ..Default::default()
        },
        spec: ImageSpec {
            from: "docker.io/library/alpine:3.18".into(),
            mirror: false,
            insecure: false,
            generation: None,
        },
        status: None,
    });

    let url = spawn_server(ctx.clone()).await;
    let mut client = TagIoServiceClient::connect(url).await.unwrap();

    // Declares 10_000 bytes but only ever sends 100, then the outbound
    // stream just ends, as happens when the sender aborts partway.
    let packets = vec![
        Packet {
            body: Some(Body::Header(Header {
                namespace: "demo".into(),
                name: "alp".into(),
                token: "some-token".into(),
            })),
        },
        Packet {
            body: Some(Body::Progress(Progress { offset: 0, size: 10_000 })),
        },
        Packet {
            body: Some(Body::Chunk(Chunk { content: vec![9u8; 100] })),
        },
    ];
    let outbound = futures_util::stream::iter(packets);
    let result = client.push(Request::new(outbound)).await;
    assert!(result.is_err());

    let pending = cluster
        .list_image_imports_owned_by("demo", "alp")
        .await
        .unwrap();
    assert!(pending.is_empty());
}

#[tokio::test]
async fn pull_with_empty_token_is_unauthorized_and_writes_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let (_cluster, ctx) = new_harness(&scratch);

    let url = spawn_server(ctx.clone()).await;
    let mut client = TagIoServiceClient::connect(url).await.unwrap();

    let dest_path = scratch.join("should-not-exist.tar");
    let result = tagctl_transport::client::pull(&mut client, "demo", "alp", "", &dest_path).await;
    assert!(result.is_err());
    assert!(tokio::fs::metadata(&dest_path).await.is_err());
}
