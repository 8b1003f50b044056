//! Client-side helpers for `TagIOService` push/pull, used by the
//! illustrative `tagctl push`/`tagctl pull` commands.

use camino::Utf8Path;
use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tonic::transport::Channel;
use tonic::Request;

use crate::chunker::{ProgressingReader, SEND_CHUNK_SIZE};
use crate::proto::packet::Body;
use crate::proto::tag_io_service_client::TagIoServiceClient;
use crate::proto::{Chunk, Header, Packet, Progress};

/// Upload `archive_path` as the source for `(namespace, name)`, authorizing
/// with `token`.
pub async fn push(
    client: &mut TagIoServiceClient<Channel>,
    namespace: &str,
    name: &str,
    token: &str,
    archive_path: &Utf8Path,
) -> anyhow::Result<()> {
    let header = Header {
        namespace: namespace.to_string(),
        name: name.to_string(),
        token: token.to_string(),
    };
    let size = tokio::fs::metadata(archive_path).await?.len() as i64;
    let path = archive_path.to_owned();

    let outbound = async_stream::stream! {
        yield Packet { body: Some(Body::Header(header)) };
        yield Packet { body: Some(Body::Progress(Progress { offset: 0, size })) };

        let file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(error = %e, "failed to open archive for push");
                return;
            }
        };
        let mut file = ProgressingReader::new(file, move |read| {
            tracing::trace!(read, size, "push progress");
        });
        let mut buf = vec![0u8; SEND_CHUNK_SIZE];
        loop {
            match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => yield Packet { body: Some(Body::Chunk(Chunk { content: buf[..n].to_vec() })) },
                Err(e) => {
                    tracing::error!(error = %e, "failed reading archive during push");
                    break;
                }
            }
        }
    };

    let mut inbound = client.push(Request::new(outbound)).await?.into_inner();
    while let Some(packet) = inbound.next().await {
        packet?;
    }
    Ok(())
}

/// Download the current archive for `(namespace, name)` into `dest_path`,
/// authorizing with `token`.
pub async fn pull(
    client: &mut TagIoServiceClient<Channel>,
    namespace: &str,
    name: &str,
    token: &str,
    dest_path: &Utf8Path,
) -> anyhow::Result<()> {
    let header = Header {
        namespace: namespace.to_string(),
        name: name.to_string(),
        token: token.to_string(),
    };
    let outbound = async_stream::stream! {
        yield Packet { body: Some(Body::Header(header)) };
    };

    let mut inbound = client.pull(Request::new(outbound)).await?.into_inner();
    let mut file = tokio::fs::File::create(dest_path).await?;
    while let Some(packet) = inbound.next().await {
        let packet = packet?;
        match packet.body {
            Some(Body::Chunk(c)) => {
                file.write_all(&c.content).await?;
            }
            Some(Body::Progress(p)) => {
                tracing::debug!(offset = p.offset, size = p.size, "pull progress");
            }
            _ => {}
        }
    }
    file.flush().await?;
    Ok(())
}
