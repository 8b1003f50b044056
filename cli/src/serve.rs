//! The controller runtime + `TagIOService` gRPC server, run by the
//! `controller` binary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use kube::api::ListParams;
use kube::{Api, ResourceExt};

use tagctl_core::access_review::{AccessReview, BearerPresentAccessReview};
use tagctl_core::context::SystemContext;
use tagctl_core::kube_backend::KubeClusterClient;
use tagctl_core::reconcile::Action;
use tagctl_core::runtime::{AlwaysLeader, ControllerRuntime, Key, LeaderRequirement, Queue, ReconcileFn, Registration};
use tagctl_core::skopeo_copier::SkopeoCopier;
use tagctl_core::types::{Image, ImageImport};
use tagctl_transport::server::TagctlTagIoService;
use tagctl_transport::TagIoServiceServer;

/// `controller`'s command-line options: the runtime + server, wired up as
/// its own small binary rather than a `tagctl` subcommand.
#[derive(Debug, Parser, PartialEq, Eq)]
#[clap(name = "controller")]
#[clap(rename_all = "kebab-case")]
#[clap(version)]
pub struct ServeOpts {
    /// Namespace this process runs in, used to locate the mirror-registry
    /// secret.
    #[clap(long, default_value = "tagctl-system")]
    pub pod_namespace: String,
    /// Address to bind the `TagIOService` gRPC server to.
    #[clap(long, default_value = "0.0.0.0:8443")]
    pub grpc_addr: String,
    /// Scratch directory for transient archives.
    #[clap(long, default_value = "/var/tmp/tagctl")]
    pub scratch_dir: camino::Utf8PathBuf,
    /// Worker pool size per reconciler queue.
    #[clap(long, default_value_t = 4)]
    pub workers: usize,
    /// Seconds between full re-list passes used to seed the reconcile
    /// queues, in lieu of a real informer: list/watch stays an external
    /// collaborator, so this is the minimal stand-in the controller needs
    /// to make progress on its own.
    #[clap(long, default_value_t = 30)]
    pub poll_interval_secs: u64,
}

/// Wrap a `(ctx, key) -> Future<Output = Result<Action>>` closure as a
/// [`ReconcileFn`], since the trait object's `Pin<Box<dyn Future>>` return
/// type can't be named directly at the call site.
fn boxed_reconcile<F, Fut>(f: F) -> ReconcileFn
where
    F: Fn(Arc<SystemContext>, Key) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<Action>> + Send + 'static,
{
    Arc::new(move |ctx, key| Box::pin(f(ctx, key)))
}

/// Run the controller runtime and transport server until interrupted.
pub async fn serve(opts: ServeOpts) -> Result<()> {
    let client = kube::Client::try_default()
        .await
        .context("connecting to the cluster")?;
    let cluster = Arc::new(KubeClusterClient::new(client.clone())) as Arc<dyn tagctl_core::kube_client::ClusterClient>;
    let copier = Arc::new(SkopeoCopier::new()) as Arc<dyn tagctl_core::registry_store::ImageCopier>;
    let ctx = Arc::new(SystemContext::new(
        cluster,
        copier,
        opts.pod_namespace.clone(),
        opts.scratch_dir.clone(),
    ));

    let leader = Arc::new(AlwaysLeader);
    let mut runtime = ControllerRuntime::new(ctx.clone(), leader);
    let image_queue = runtime.queue("image");
    let import_queue = runtime.queue("image-import");

    let registrations = vec![
        Registration {
            name: "image",
            // Image reconciles absorb finished imports into shared history;
            // only one replica should run it at a time.
            leader_requirement: LeaderRequirement::Required,
            workers: opts.workers,
            reconcile: boxed_reconcile(|ctx, key| async move {
                tagctl_core::reconcile::image::reconcile(&ctx, &key.0, &key.1).await
            }),
        },
        Registration {
            name: "image-import",
            leader_requirement: LeaderRequirement::None,
            workers: opts.workers,
            reconcile: boxed_reconcile(|ctx, key| async move {
                tagctl_core::reconcile::image_import::reconcile(&ctx, &key.0, &key.1).await
            }),
        },
    ];

    let poller = tokio::spawn(poll_loop(
        client,
        image_queue,
        import_queue,
        Duration::from_secs(opts.poll_interval_secs),
    ));

    let grpc_addr = opts.grpc_addr.parse().context("parsing --grpc-addr")?;
    let access = Arc::new(BearerPresentAccessReview) as Arc<dyn AccessReview>;
    let service = TagctlTagIoService::new(ctx.clone(), access);
    let grpc = tokio::spawn(async move {
        if let Err(e) = tonic::transport::Server::builder()
            .add_service(TagIoServiceServer::new(service))
            .serve(grpc_addr)
            .await
        {
            tracing::error!(error = %e, "grpc server exited");
        }
    });

    runtime
        .run(registrations, async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await;

    poller.abort();
    grpc.abort();
    Ok(())
}

/// Periodically re-lists every `Image`/`ImageImport` cluster-wide and
/// enqueues their keys. A real deployment would drive the queues off an
/// informer instead; list/watch is an explicitly out-of-scope external
/// collaborator here, so a plain poll is the minimal thing that lets
/// `serve` make progress unattended.
async fn poll_loop(client: kube::Client, image_queue: Arc<Queue>, import_queue: Arc<Queue>, interval: Duration) {
    let images: Api<Image> = Api::all(client.clone());
    let imports: Api<ImageImport> = Api::all(client);
    loop {
        match images.list(&ListParams::default()).await {
            Ok(list) => {
                for img in list.items {
                    image_queue.enqueue((img.namespace().unwrap_or_default(), img.name_any())).await;
                }
            }
            Err(e) => tracing::warn!(error = %e, "listing Images"),
        }
        match imports.list(&ListParams::default()).await {
            Ok(list) => {
                for imp in list.items {
                    import_queue.enqueue((imp.namespace().unwrap_or_default(), imp.name_any())).await;
                }
            }
            Err(e) => tracing::warn!(error = %e, "listing ImageImports"),
        }
        tokio::time::sleep(interval).await;
    }
}
