//! Per-process configuration resolver: unqualified-registry list,
//! mirror-registry address/credentials, and the default signature policy.

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::OnceCell;

use crate::docker_config::Credential;
use crate::kube_client::ClusterClient;
use crate::registry_store::{ImageCopier, MirrorTarget, RegistryStore};

/// Default unqualified-registry search list when neither the environment
/// nor any configuration overrides it.
pub const DEFAULT_UNQUALIFIED_REGISTRIES: &[&str] = &["docker.io"];

/// Signature verification policy applied to resolves. The core never
/// implements signature checking itself; this only selects which policy
/// the image-copy collaborator should apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignaturePolicy {
    /// Accept any content (suitable for disconnected/dev clusters only).
    #[default]
    InsecureAcceptAnything,
    /// Require the image-copy collaborator's configured signature policy.
    Enforced,
}

#[derive(Debug, Deserialize)]
struct MirrorRegistryConfig {
    address: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    repository: Option<String>,
    #[serde(default)]
    insecure: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LocalRegistryHostingV1 {
    host: String,
    #[serde(default)]
    host_from_cluster_network: Option<String>,
    #[allow(dead_code)]
    #[serde(default)]
    host_from_container_runtime: Option<String>,
    #[allow(dead_code)]
    #[serde(default)]
    help: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LocalRegistryHostingDoc {
    #[serde(rename = "localRegistryHosting.v1")]
    v1: LocalRegistryHostingV1,
}

/// Resolved mirror registry address plus the credential to use against it,
/// if any.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Cluster-internal hostname used for server-side resolution.
    pub internal_host: String,
    /// Client-facing hostname, used for push URLs shown to users.
    pub external_host: String,
    pub credential: Option<Credential>,
    pub repository: Option<String>,
    pub insecure: bool,
}

/// Per-process configuration, assembled once and shared by every
/// reconciler and transport handler.
pub struct SystemContext {
    client: Arc<dyn ClusterClient>,
    pod_namespace: String,
    unqualified_registries: Vec<String>,
    signature_policy: SignaturePolicy,
    mirror: OnceCell<Option<MirrorConfig>>,
    store: OnceCell<Arc<RegistryStore>>,
    copier: Arc<dyn ImageCopier>,
    scratch_dir: camino::Utf8PathBuf,
}

impl std::fmt::Debug for SystemContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemContext")
            .field("pod_namespace", &self.pod_namespace)
            .field("unqualified_registries", &self.unqualified_registries)
            .field("signature_policy", &self.signature_policy)
            .finish()
    }
}

impl SystemContext {
    /// Construct a context for `pod_namespace`, reading the unqualified
    /// registry list from `UNQUALIFIED_SEARCH_REGISTRIES` if set.
    pub fn new(
        client: Arc<dyn ClusterClient>,
        copier: Arc<dyn ImageCopier>,
        pod_namespace: impl Into<String>,
        scratch_dir: camino::Utf8PathBuf,
    ) -> Self {
        let unqualified_registries = std::env::var("UNQUALIFIED_SEARCH_REGISTRIES")
            .ok()
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_else(|| {
                DEFAULT_UNQUALIFIED_REGISTRIES
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            });
        Self {
            client,
            pod_namespace: pod_namespace.into(),
            unqualified_registries,
            signature_policy: SignaturePolicy::default(),
            mirror: OnceCell::new(),
            store: OnceCell::new(),
            copier,
            scratch_dir,
        }
    }

    /// Candidate registries to try for an unqualified source reference.
    pub fn unqualified_registries(&self) -> &[String] {
        &self.unqualified_registries
    }

    /// The default signature policy applied to resolves.
    pub fn signature_policy(&self) -> SignaturePolicy {
        self.signature_policy
    }

    /// Lazily resolve the mirror registry config, preferring the
    /// namespace-local secret and falling back to the cluster ConfigMap:
    /// two sources, first one present wins.
    pub async fn mirror_config(&self) -> anyhow::Result<&Option<MirrorConfig>> {
        self.mirror
            .get_or_try_init(|| async {
                if let Some(raw) = self
                    .client
                    .get_mirror_registry_secret(&self.pod_namespace)
                    .await?
                {
                    let cfg: MirrorRegistryConfig = serde_json::from_slice(&raw)?;
                    let credential = match (&cfg.username, &cfg.password, &cfg.token) {
                        (Some(u), Some(p), _) => Some(Credential {
                            username: u.clone(),
                            password: p.clone(),
                        }),
                        (None, None, Some(t)) => Some(Credential {
                            username: "<token>".into(),
                            password: t.clone(),
                        }),
                        _ => None,
                    };
                    return Ok(Some(MirrorConfig {
                        internal_host: cfg.address.clone(),
                        external_host: cfg.address,
                        credential,
                        repository: cfg.repository,
                        insecure: cfg.insecure.as_deref() == Some("true"),
                    }));
                }
                if let Some(raw_yaml) = self.client.get_local_registry_hosting().await? {
                    let doc: LocalRegistryHostingDoc = serde_yaml::from_str(&raw_yaml)?;
                    return Ok(Some(MirrorConfig {
                        external_host: doc.v1.host.clone(),
                        internal_host: doc
                            .v1
                            .host_from_cluster_network
                            .unwrap_or(doc.v1.host),
                        credential: None,
                        repository: None,
                        insecure: false,
                    }));
                }
                Ok(None)
            })
            .await
    }

    /// Lazily construct the single process-wide `RegistryStore`, behind the
    /// mutual exclusion `OnceCell` gives us for free: one instance per
    /// process.
    pub async fn registry_store(&self) -> anyhow::Result<Arc<RegistryStore>> {
        let store = self
            .store
            .get_or_try_init(|| async {
                let mirror = self.mirror_config().await?;
                let target = match mirror {
                    Some(m) => MirrorTarget {
                        host: m.internal_host.clone(),
                        shared_repository: m.repository.clone(),
                    },
                    None => MirrorTarget {
                        host: "mirror.invalid".into(),
                        shared_repository: None,
                    },
                };
                Ok::<_, anyhow::Error>(Arc::new(RegistryStore::new(
                    self.copier.clone(),
                    target,
                    self.scratch_dir.clone(),
                )))
            })
            .await?;
        Ok(store.clone())
    }

    /// Enumerate decoded docker-config credentials for `ns` matching
    /// `host`, in secret-listing order.
    pub async fn credentials_for(&self, ns: &str, host: &str) -> anyhow::Result<Vec<Credential>> {
        let secrets = self.client.list_dockerconfig_secrets(ns).await?;
        Ok(crate::docker_config::enumerate_credentials(&secrets, host))
    }

    /// Access to the underlying cluster client, for reconcilers that need
    /// more than configuration lookups.
    pub fn client(&self) -> &Arc<dyn ClusterClient> {
        &self.client
    }
}
