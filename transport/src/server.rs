//! Server side of `TagIOService`: push accepts an uploaded archive, mirrors
//! it, and records a new `ImageImport`; pull streams the current archive
//! for an `Image`.

use std::pin::Pin;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use kube::api::ObjectMeta;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tonic::{Request, Response, Status, Streaming};

use tagctl_core::access_review::{AccessReview, Decision};
use tagctl_core::context::SystemContext;
use tagctl_core::error::Error;
use tagctl_core::generation::current_reference;
use tagctl_core::types::{ImageImport, ImageImportSpec};

use crate::chunker::{INGEST_CHUNK_MAX, SEND_CHUNK_SIZE};
use crate::error_to_status;
use crate::proto::packet::Body;
use crate::proto::tag_io_service_server::TagIoService;
use crate::proto::{Chunk, Header, Packet, Progress};

const API_GROUP: &str = "imagecontroller.example.com";

type PacketStream = Pin<Box<dyn Stream<Item = Result<Packet, Status>> + Send + 'static>>;

/// The `TagIOService` implementation, backed by a `SystemContext` for
/// registry/cluster access and an `AccessReview` for per-stream token
/// checks. RBAC itself stays an external collaborator.
pub struct TagctlTagIoService {
    ctx: Arc<SystemContext>,
    access: Arc<dyn AccessReview>,
}

impl std::fmt::Debug for TagctlTagIoService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagctlTagIoService").finish()
    }
}

impl TagctlTagIoService {
    /// Build a service instance over `ctx`, authorizing streams via
    /// `access`.
    pub fn new(ctx: Arc<SystemContext>, access: Arc<dyn AccessReview>) -> Self {
        Self { ctx, access }
    }

    async fn authorize(&self, header: &Header, verb: &str, resource: &str) -> Result<(), Status> {
        match self
            .access
            .check_token(&header.token, &header.namespace, verb, resource, API_GROUP)
            .await
        {
            Ok(Decision::Allowed) => Ok(()),
            Ok(Decision::Denied) => Err(error_to_status(&Error::Unauthorized(format!(
                "{verb} {resource} denied for {}/{}",
                header.namespace, header.name
            )))),
            Err(e) => Err(Status::internal(format!("{e:#}"))),
        }
    }
}

/// Read the first packet of `inbound` and require it to be a `Header`:
/// exactly one Header per stream, before any Chunk or Progress.
async fn next_header(inbound: &mut Streaming<Packet>) -> Result<Header, Status> {
    match inbound.next().await {
        Some(Ok(Packet {
            body: Some(Body::Header(h)),
        })) => Ok(h),
        Some(Ok(_)) => Err(error_to_status(&Error::ProtocolViolation(
            "first packet was not a Header".into(),
        ))),
        Some(Err(e)) => Err(e),
        None => Err(error_to_status(&Error::ProtocolViolation(
            "stream closed before Header".into(),
        ))),
    }
}

#[tonic::async_trait]
impl TagIoService for TagctlTagIoService {
    type PushStream = PacketStream;
    type PullStream = PacketStream;

    #[tracing::instrument(skip(self, request))]
    async fn push(
        &self,
        request: Request<Streaming<Packet>>,
    ) -> Result<Response<Self::PushStream>, Status> {
        let mut inbound = request.into_inner();
        let header = next_header(&mut inbound).await?;
        self.authorize(&header, "create", "imageimports").await?;

        let store = self
            .ctx
            .registry_store()
            .await
            .map_err(|e| Status::internal(format!("{e:#}")))?;
        let archive_path = store.new_local_reference();
        let mut file = tokio::fs::File::create(&archive_path)
            .await
            .map_err(|e| Status::internal(e.to_string()))?;

        let mut declared_size: Option<i64> = None;
        let mut offset: i64 = 0;
        while let Some(packet) = inbound.next().await {
            let packet = packet?;
            match packet.body {
                Some(Body::Header(_)) => {
                    return Err(error_to_status(&Error::ProtocolViolation(
                        "duplicate Header".into(),
                    )));
                }
                Some(Body::Progress(p)) => {
                    declared_size.get_or_insert(p.size);
                }
                Some(Body::Chunk(c)) => {
                    if declared_size.is_none() {
                        let _ = std::fs::remove_file(&archive_path);
                        return Err(error_to_status(&Error::ProtocolViolation(
                            "Chunk arrived before Progress.size".into(),
                        )));
                    }
                    if c.content.len() > INGEST_CHUNK_MAX {
                        let _ = std::fs::remove_file(&archive_path);
                        return Err(error_to_status(&Error::ProtocolViolation(
                            "chunk exceeds ingest limit".into(),
                        )));
                    }
                    file.write_all(&c.content)
                        .await
                        .map_err(|e| Status::internal(e.to_string()))?;
                    offset += c.content.len() as i64;
                }
                None => {}
            }
        }
        file.flush().await.map_err(|e| Status::internal(e.to_string()))?;
        drop(file);

        // The stream ended (clean half-close or dropped connection) without
        // delivering every byte it declared: treat it like any other
        // transfer failure and commit no ImageImport. No Chunk at all
        // (size-0 archive, or an empty test fixture) is not a failure.
        if let Some(sz) = declared_size {
            if offset != sz {
                let _ = std::fs::remove_file(&archive_path);
                return Err(error_to_status(&Error::TransferFailed(format!(
                    "stream ended after {offset} of {sz} declared bytes"
                ))));
            }
        }

        let ns = header.namespace.clone();
        let name = header.name.clone();
        let src_ref = format!("docker-archive:{archive_path}");
        let pinned = store
            .load(&src_ref, None, false, &ns, &name)
            .await
            .map_err(|e| error_to_status(&e))?;
        let _ = std::fs::remove_file(&archive_path);

        let import = ImageImport {
            metadata: ObjectMeta {
                generate_name: Some(format!("{name}-push-")),
                namespace: Some(ns),
                ..Default::default()
            },
            spec: ImageImportSpec {
                target_image: name,
                from: Some(pinned),
                mirror: Some(false),
                insecure: None,
            },
            status: None,
        };
        self.ctx
            .client()
            .create_image_import(import)
            .await
            .map_err(|e| Status::internal(format!("{e:#}")))?;

        let ack = Packet {
            body: Some(Body::Progress(Progress {
                offset,
                size: declared_size.unwrap_or(offset),
            })),
        };
        let stream = futures_util::stream::once(async move { Ok(ack) });
        Ok(Response::new(Box::pin(stream)))
    }

    #[tracing::instrument(skip(self, request))]
    async fn pull(
        &self,
        request: Request<Streaming<Packet>>,
    ) -> Result<Response<Self::PullStream>, Status> {
        let mut inbound = request.into_inner();
        let header = next_header(&mut inbound).await?;
        self.authorize(&header, "get", "images").await?;

        let ctx = self.ctx.clone();
        let ns = header.namespace.clone();
        let name = header.name.clone();

        let image = ctx
            .client()
            .get_image(&ns, &name)
            .await
            .map_err(|e| Status::internal(format!("{e:#}")))?
            .ok_or_else(|| error_to_status(&Error::NotFound(format!("{ns}/{name}"))))?;
        let status = image.status.clone().unwrap_or_default();
        let reference = current_reference(&image.spec, &status).to_string();
        if reference.is_empty() {
            return Err(error_to_status(&Error::NotFound(format!(
                "{ns}/{name} has no resolved reference"
            ))));
        }

        let store = ctx
            .registry_store()
            .await
            .map_err(|e| Status::internal(format!("{e:#}")))?;
        let (path, archive) = store.save(&reference).await.map_err(|e| error_to_status(&e))?;

        let out = async_stream::try_stream! {
            let _archive = archive;
            let meta = tokio::fs::metadata(&path)
                .await
                .map_err(|e| Status::internal(e.to_string()))?;
            let size = meta.len() as i64;
            yield Packet { body: Some(Body::Progress(Progress { offset: 0, size })) };

            let mut file = tokio::fs::File::open(&path)
                .await
                .map_err(|e| Status::internal(e.to_string()))?;
            let mut buf = vec![0u8; SEND_CHUNK_SIZE];
            let mut offset = 0i64;
            loop {
                let n = file
                    .read(&mut buf)
                    .await
                    .map_err(|e| Status::internal(e.to_string()))?;
                if n == 0 {
                    break;
                }
                offset += n as i64;
                yield Packet { body: Some(Body::Chunk(Chunk { content: buf[..n].to_vec() })) };
                yield Packet { body: Some(Body::Progress(Progress { offset, size })) };
            }
        };
        Ok(Response::new(Box::pin(out) as PacketStream))
    }
}
