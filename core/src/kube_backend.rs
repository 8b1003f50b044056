//! A `ClusterClient` backed by a real `kube::Client`, used by the
//! controller binary and the CLI against an actual cluster. Every other
//! piece of the core is exercised against [`crate::fixture::FakeCluster`]
//! instead; this module is the one place the crate actually talks to the
//! API server.

use async_trait::async_trait;
use fn_error_context::context;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};

use crate::kube_client::ClusterClient;
use crate::types::{Image, ImageImport};

/// Name of the `kube-public` ConfigMap carrying the local-registry-hosting
/// descriptor.
const LOCAL_REGISTRY_HOSTING_NS: &str = "kube-public";
const LOCAL_REGISTRY_HOSTING_NAME: &str = "local-registry-hosting";
const MIRROR_REGISTRY_SECRET_NAME: &str = "mirror-registry-config";

/// A [`ClusterClient`] implementation over `kube::Client`.
pub struct KubeClusterClient {
    client: Client,
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient").finish()
    }
}

impl KubeClusterClient {
    /// Wrap an already-constructed `kube::Client`.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn images(&self, ns: &str) -> Api<Image> {
        Api::namespaced(self.client.clone(), ns)
    }

    fn imports(&self, ns: &str) -> Api<ImageImport> {
        Api::namespaced(self.client.clone(), ns)
    }

    fn secrets(&self, ns: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), ns)
    }
}

/// `kube::Api::get` turns "not found" into `Err`; every collaborator call
/// in this crate wants `Ok(None)` instead.
async fn get_opt<K>(api: &Api<K>, name: &str) -> anyhow::Result<Option<K>>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    #[context("get Image {}/{}", ns, name)]
    async fn get_image(&self, ns: &str, name: &str) -> anyhow::Result<Option<Image>> {
        get_opt(&self.images(ns), name).await
    }

    #[context("create Image {}/{}", image.metadata.namespace.as_deref().unwrap_or(""), image.metadata.name.as_deref().unwrap_or(""))]
    async fn create_image(&self, image: Image) -> anyhow::Result<Image> {
        let ns = image.metadata.namespace.clone().unwrap_or_default();
        Ok(self.images(&ns).create(&PostParams::default(), &image).await?)
    }

    #[context("update Image spec {}/{}", image.namespace().unwrap_or_default(), image.name_any())]
    async fn update_image(&self, image: &Image) -> anyhow::Result<Image> {
        let ns = image.namespace().unwrap_or_default();
        let name = image.name_any();
        let patch = serde_json::json!({ "spec": image.spec });
        Ok(self
            .images(&ns)
            .patch(&name, &PatchParams::default(), &Patch::Merge(patch))
            .await?)
    }

    #[context("update Image status {}/{}", image.namespace().unwrap_or_default(), image.name_any())]
    async fn update_image_status(&self, image: &Image) -> anyhow::Result<Image> {
        let ns = image.namespace().unwrap_or_default();
        let name = image.name_any();
        let patch = serde_json::json!({ "status": image.status });
        Ok(self
            .images(&ns)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(patch))
            .await?)
    }

    #[context("get ImageImport {}/{}", ns, name)]
    async fn get_image_import(&self, ns: &str, name: &str) -> anyhow::Result<Option<ImageImport>> {
        get_opt(&self.imports(ns), name).await
    }

    #[context("create ImageImport {}/{}", import.metadata.namespace.as_deref().unwrap_or(""), import.metadata.name.as_deref().unwrap_or(""))]
    async fn create_image_import(&self, import: ImageImport) -> anyhow::Result<ImageImport> {
        let ns = import.metadata.namespace.clone().unwrap_or_default();
        Ok(self
            .imports(&ns)
            .create(&PostParams::default(), &import)
            .await?)
    }

    #[context("update ImageImport {}/{}", import.namespace().unwrap_or_default(), import.name_any())]
    async fn update_image_import(&self, import: &ImageImport) -> anyhow::Result<ImageImport> {
        let ns = import.namespace().unwrap_or_default();
        let name = import.name_any();
        let patch = serde_json::json!({
            "metadata": { "ownerReferences": import.metadata.owner_references },
            "spec": import.spec,
        });
        Ok(self
            .imports(&ns)
            .patch(&name, &PatchParams::default(), &Patch::Merge(patch))
            .await?)
    }

    #[context("update ImageImport status {}/{}", import.namespace().unwrap_or_default(), import.name_any())]
    async fn update_image_import_status(
        &self,
        import: &ImageImport,
    ) -> anyhow::Result<ImageImport> {
        let ns = import.namespace().unwrap_or_default();
        let name = import.name_any();
        let patch = serde_json::json!({ "status": import.status });
        Ok(self
            .imports(&ns)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(patch))
            .await?)
    }

    #[context("delete ImageImport {}/{}", ns, name)]
    async fn delete_image_import(&self, ns: &str, name: &str) -> anyhow::Result<()> {
        match self.imports(ns).delete(name, &Default::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[context("list ImageImports owned by {}/{}", ns, image)]
    async fn list_image_imports_owned_by(
        &self,
        ns: &str,
        image: &str,
    ) -> anyhow::Result<Vec<ImageImport>> {
        // Ownership is discovered by listing and filtering, not by a
        // back-pointer on the Image, so there's no label selector to rely
        // on here.
        let all = self.imports(ns).list(&ListParams::default()).await?;
        Ok(all
            .items
            .into_iter()
            .filter(|imp| imp.spec.target_image == image)
            .collect())
    }

    #[context("list dockerconfigjson secrets in {}", ns)]
    async fn list_dockerconfig_secrets(&self, ns: &str) -> anyhow::Result<Vec<Vec<u8>>> {
        let lp = ListParams::default().fields("type=kubernetes.io/dockerconfigjson");
        let secrets = self.secrets(ns).list(&lp).await?;
        Ok(secrets
            .items
            .into_iter()
            .filter_map(|s| s.data.and_then(|mut d| d.remove(".dockerconfigjson")))
            .map(|b| b.0)
            .collect())
    }

    #[context("get mirror registry secret {}/{}", pod_namespace, MIRROR_REGISTRY_SECRET_NAME)]
    async fn get_mirror_registry_secret(
        &self,
        pod_namespace: &str,
    ) -> anyhow::Result<Option<Vec<u8>>> {
        let Some(secret) = get_opt(&self.secrets(pod_namespace), MIRROR_REGISTRY_SECRET_NAME).await? else {
            return Ok(None);
        };
        // The secret's keys map directly onto `MirrorRegistryConfig`'s
        // fields; re-assemble it as one JSON document so
        // `SystemContext::mirror_config` can decode it uniformly.
        let data = secret.data.unwrap_or_default();
        let mut obj = serde_json::Map::new();
        for (k, v) in data {
            if let Ok(s) = String::from_utf8(v.0) {
                obj.insert(k, serde_json::Value::String(s));
            }
        }
        Ok(Some(serde_json::to_vec(&obj)?))
    }

    #[context("get {}/{} ConfigMap", LOCAL_REGISTRY_HOSTING_NS, LOCAL_REGISTRY_HOSTING_NAME)]
    async fn get_local_registry_hosting(&self) -> anyhow::Result<Option<String>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), LOCAL_REGISTRY_HOSTING_NS);
        let Some(cm) = get_opt(&api, LOCAL_REGISTRY_HOSTING_NAME).await? else {
            return Ok(None);
        };
        Ok(cm
            .data
            .and_then(|mut d| d.remove("localRegistryHosting.v1"))
            .map(|v1| format!("localRegistryHosting.v1: |\n{}", indent(&v1))))
    }
}

fn indent(s: &str) -> String {
    s.lines().map(|l| format!("  {l}\n")).collect()
}
