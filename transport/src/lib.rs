//! `tagctl-transport`: the bidirectional chunked push/pull protocol (spec
//! §4.6) built on `tonic`/`prost` over the `TagIOService` defined in
//! `proto/tagio.proto`.

#![deny(missing_docs)]
#![deny(missing_debug_implementations)]

/// Generated `prost`/`tonic` types and service traits for `TagIOService`.
#[allow(missing_docs)]
#[allow(missing_debug_implementations)]
#[allow(clippy::all)]
pub mod proto {
    tonic::include_proto!("tagctl.tagio.v1");
}

/// Chunk-size constants and the progress-tracking reader used by both
/// sides of the transport.
pub mod chunker;
/// The `TagIOService` client-side helpers.
pub mod client;
/// The `TagIOService` server implementation.
pub mod server;

pub use proto::tag_io_service_client::TagIoServiceClient;
pub use proto::tag_io_service_server::{TagIoService, TagIoServiceServer};
pub use proto::{packet::Body, Chunk, Header, Packet, Progress};

/// Map a core error onto the gRPC status it should terminate a stream
/// with: `ProtocolViolation`, `Unauthorized`, or a generic failure.
pub fn error_to_status(err: &tagctl_core::error::Error) -> tonic::Status {
    use tagctl_core::error::Error;
    match err {
        Error::ProtocolViolation(msg) => tonic::Status::invalid_argument(msg.clone()),
        Error::Unauthorized(msg) => tonic::Status::unauthenticated(msg.clone()),
        Error::NotFound(msg) => tonic::Status::not_found(msg.clone()),
        other => tonic::Status::internal(other.to_string()),
    }
}
