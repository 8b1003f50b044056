//! Command line interface: illustrative wiring, not part of the hard
//! reconciliation core. Every subcommand only assembles its inputs and
//! delegates straight into `tagctl_core::ops` or `tagctl_transport::client`.
//! The controller runtime and transport server run as the separate
//! `controller` binary, built on [`crate::serve`] instead.

use std::ffi::OsString;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tagctl_core::context::SystemContext;
use tagctl_core::kube_backend::KubeClusterClient;
use tagctl_core::ops;
use tagctl_core::skopeo_copier::SkopeoCopier;

/// `tagctl new --from <ref> [--mirror] [--insecure] [-n namespace] <name>`.
#[derive(Debug, Parser, PartialEq, Eq)]
pub(crate) struct NewOpts {
    /// Namespace to create the `Image` in.
    #[clap(long, short = 'n', default_value = "default")]
    namespace: String,
    /// Source reference to resolve on each reconcile.
    #[clap(long)]
    from: String,
    /// Copy through the cluster's mirror registry rather than serving
    /// directly from the source.
    #[clap(long)]
    mirror: bool,
    /// Skip TLS verification against the source registry.
    #[clap(long)]
    insecure: bool,
    /// Name of the `Image` to create.
    name: String,
}

/// `tagctl import [-f <ref>] [-n namespace] <name>`.
#[derive(Debug, Parser, PartialEq, Eq)]
pub(crate) struct ImportOpts {
    /// Namespace of the target `Image`.
    #[clap(long, short = 'n', default_value = "default")]
    namespace: String,
    /// Source reference for this import, overriding the target `Image`'s
    /// `spec.from` for this attempt only.
    #[clap(long, short = 'f')]
    from: Option<String>,
    /// Name of the `Image` to import against.
    name: String,
}

/// `tagctl upgrade`/`tagctl downgrade [-n namespace] <name>`.
#[derive(Debug, Parser, PartialEq, Eq)]
pub(crate) struct GenerationStepOpts {
    /// Namespace of the `Image`.
    #[clap(long, short = 'n', default_value = "default")]
    namespace: String,
    /// Name of the `Image`.
    name: String,
}

/// `tagctl push <host/namespace/name> --archive <path>`.
#[derive(Debug, Parser, PartialEq, Eq)]
pub(crate) struct PushOpts {
    /// `host/namespace/name` of the controller's gRPC endpoint and target
    /// `Image`.
    target: String,
    /// Local `docker-archive` tarball to upload.
    #[clap(long)]
    archive: camino::Utf8PathBuf,
    /// Bearer token to authorize the push with. Falls back to
    /// `$TAGCTL_TOKEN` when unset.
    #[clap(long)]
    token: Option<String>,
}

/// `tagctl pull <host/namespace/name> --out <path>`.
#[derive(Debug, Parser, PartialEq, Eq)]
pub(crate) struct PullOpts {
    /// `host/namespace/name` of the controller's gRPC endpoint and source
    /// `Image`.
    target: String,
    /// Destination path for the downloaded archive.
    #[clap(long)]
    out: camino::Utf8PathBuf,
    /// Bearer token to authorize the pull with. Falls back to
    /// `$TAGCTL_TOKEN` when unset.
    #[clap(long)]
    token: Option<String>,
}

#[derive(Debug, Parser, PartialEq, Eq)]
#[clap(name = "tagctl")]
#[clap(rename_all = "kebab-case")]
#[clap(version)]
pub(crate) enum Opt {
    /// Declare a new `Image`.
    New(NewOpts),
    /// Request an out-of-band import against an existing `Image`.
    Import(ImportOpts),
    /// Move an `Image`'s pinned generation one step toward the head of its
    /// history.
    Upgrade(GenerationStepOpts),
    /// Move an `Image`'s pinned generation one step away from the head of
    /// its history.
    Downgrade(GenerationStepOpts),
    /// Upload a local archive as a new import.
    Push(PushOpts),
    /// Download an `Image`'s current archive.
    Pull(PullOpts),
}

/// Parse the provided arguments and execute.
pub async fn run_from_iter<I>(args: I) -> Result<()>
where
    I: IntoIterator,
    I::Item: Into<OsString> + Clone,
{
    run_from_opt(Opt::parse_from(args)).await
}

/// Split `host/namespace/name` into its three components.
fn parse_target(target: &str) -> Result<(String, String, String)> {
    let mut parts = target.splitn(3, '/');
    let (Some(host), Some(ns), Some(name)) = (parts.next(), parts.next(), parts.next()) else {
        bail!("expected target in the form host/namespace/name, got {target:?}");
    };
    Ok((host.to_string(), ns.to_string(), name.to_string()))
}

/// Build a [`SystemContext`] against a real cluster, for every subcommand
/// except `push`/`pull` (which only need the transport, not the cluster
/// API).
async fn real_context(pod_namespace: &str, scratch_dir: camino::Utf8PathBuf) -> Result<Arc<SystemContext>> {
    let client = kube::Client::try_default()
        .await
        .context("connecting to the cluster")?;
    let cluster = Arc::new(KubeClusterClient::new(client)) as Arc<dyn tagctl_core::kube_client::ClusterClient>;
    let copier = Arc::new(SkopeoCopier::new()) as Arc<dyn tagctl_core::registry_store::ImageCopier>;
    Ok(Arc::new(SystemContext::new(cluster, copier, pod_namespace, scratch_dir)))
}

async fn run_from_opt(opt: Opt) -> Result<()> {
    match opt {
        Opt::New(o) => {
            let ctx = real_context(&o.namespace, default_scratch_dir()).await?;
            let image = ops::new_image(&ctx, &o.namespace, &o.name, &o.from, o.mirror, o.insecure).await?;
            println!("created {}/{}", o.namespace, image.metadata.name.unwrap_or(o.name));
            Ok(())
        }
        Opt::Import(o) => {
            let ctx = real_context(&o.namespace, default_scratch_dir()).await?;
            let import = ops::new_import(&ctx, &o.namespace, &o.name, o.from, None, None).await?;
            println!(
                "created {}/{}",
                o.namespace,
                import.metadata.name.unwrap_or_default()
            );
            Ok(())
        }
        Opt::Upgrade(o) => {
            let ctx = real_context(&o.namespace, default_scratch_dir()).await?;
            let image = ops::upgrade(&ctx, &o.namespace, &o.name).await?;
            println!("{}/{} pinned to generation {:?}", o.namespace, o.name, image.spec.generation);
            Ok(())
        }
        Opt::Downgrade(o) => {
            let ctx = real_context(&o.namespace, default_scratch_dir()).await?;
            let image = ops::downgrade(&ctx, &o.namespace, &o.name).await?;
            println!("{}/{} pinned to generation {:?}", o.namespace, o.name, image.spec.generation);
            Ok(())
        }
        Opt::Push(o) => {
            let (host, ns, name) = parse_target(&o.target)?;
            let token = o.token.or_else(|| std::env::var("TAGCTL_TOKEN").ok()).unwrap_or_default();
            let channel = tonic::transport::Channel::from_shared(format!("http://{host}"))?
                .connect()
                .await
                .context("connecting to tagctl server")?;
            let mut client = tagctl_transport::TagIoServiceClient::new(channel);
            tagctl_transport::client::push(&mut client, &ns, &name, &token, &o.archive).await?;
            println!("pushed {} to {ns}/{name}", o.archive);
            Ok(())
        }
        Opt::Pull(o) => {
            let (host, ns, name) = parse_target(&o.target)?;
            let token = o.token.or_else(|| std::env::var("TAGCTL_TOKEN").ok()).unwrap_or_default();
            let channel = tonic::transport::Channel::from_shared(format!("http://{host}"))?
                .connect()
                .await
                .context("connecting to tagctl server")?;
            let mut client = tagctl_transport::TagIoServiceClient::new(channel);
            tagctl_transport::client::pull(&mut client, &ns, &name, &token, &o.out).await?;
            println!("pulled {ns}/{name} to {}", o.out);
            Ok(())
        }
    }
}

fn default_scratch_dir() -> camino::Utf8PathBuf {
    camino::Utf8PathBuf::from("/var/tmp/tagctl")
}
