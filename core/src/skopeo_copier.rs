//! An `ImageCopier` backed by forking `skopeo` as a subprocess, the way the
//! teacher shells out to it for manifest fetches and pulls rather than
//! linking a container-transport library directly.
//!
//! `skopeo` already understands every reference form this crate produces
//! (`docker://`, `docker-archive:`), so `PullContext.reference` and the
//! `dst` passed to [`copy`](SkopeoCopier::copy) are handed to it verbatim.

use std::process::Stdio;

use async_trait::async_trait;
use fn_error_context::context;

use crate::registry_store::{ImageCopier, ImageListSelection, ManifestDigest, PullContext};

/// Build a `skopeo` command with stdin closed, matching every invocation
/// site below.
fn new_cmd() -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("skopeo");
    cmd.stdin(Stdio::null());
    cmd.kill_on_drop(true);
    cmd
}

/// Apply `--creds`/`--tls-verify` for one side of a `skopeo` invocation.
/// `prefix` is `""` for a single-reference command (`inspect`) or
/// `"src-"`/`"dest-"` when both sides of a `copy` need distinct flags.
fn apply_auth(cmd: &mut tokio::process::Command, prefix: &str, src: &PullContext) {
    if let Some(credential) = &src.credential {
        cmd.arg(format!("--{prefix}creds"));
        cmd.arg(format!("{}:{}", credential.username, credential.password));
    }
    if src.insecure {
        cmd.arg(format!("--{prefix}tls-verify=false"));
    }
}

/// An [`ImageCopier`] that forks `/usr/bin/skopeo` for every operation.
#[derive(Debug, Default)]
pub struct SkopeoCopier;

impl SkopeoCopier {
    /// Construct a copier. `skopeo` is located on `$PATH` at call time, not
    /// at construction.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ImageCopier for SkopeoCopier {
    #[context("skopeo inspect")]
    async fn fetch_manifest(&self, src: &PullContext) -> anyhow::Result<(Vec<u8>, ManifestDigest)> {
        let mut cmd = new_cmd();
        cmd.args(["inspect", "--raw"]);
        apply_auth(&mut cmd, "", src);
        cmd.arg(&src.reference);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let output = cmd.spawn()?.wait_with_output().await?;
        if !output.status.success() {
            anyhow::bail!(
                "skopeo inspect {} failed: {}",
                src.reference,
                String::from_utf8_lossy(&output.stderr)
            );
        }
        let manifest = output.stdout;
        let hash = openssl::hash::hash(openssl::hash::MessageDigest::sha256(), &manifest)?;
        let digest = ManifestDigest::parse(&format!("sha256:{}", hex::encode(hash.as_ref())))?;
        Ok((manifest, digest))
    }

    #[context("skopeo copy")]
    async fn copy(
        &self,
        src: &PullContext,
        dst: &str,
        selection: ImageListSelection,
    ) -> anyhow::Result<ManifestDigest> {
        let digestfile = tempfile::NamedTempFile::new()?;
        let mut cmd = new_cmd();
        cmd.arg("copy");
        match selection {
            ImageListSelection::AllImages => {
                cmd.arg("--multi-arch").arg("all");
            }
        }
        cmd.arg("--digestfile").arg(digestfile.path());
        apply_auth(&mut cmd, "src-", src);
        cmd.args([&src.reference, dst]);
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());

        let output = cmd.spawn()?.wait_with_output().await?;
        if !output.status.success() {
            anyhow::bail!(
                "skopeo copy {} -> {} failed: {}",
                src.reference,
                dst,
                String::from_utf8_lossy(&output.stderr)
            );
        }
        let written = std::fs::read_to_string(digestfile.path())?;
        ManifestDigest::parse(written.trim())
    }
}
