//! `tagctl-core`: the image-resolution and generation state machine behind
//! the `Image`/`ImageImport` custom resources, independent of how it is
//! driven (the binary in `tagctl-cli`) or exposed over the wire (the
//! bidirectional streaming transport in `tagctl-transport`).
//!
//! Everything the core needs from the cluster, the image-copy stack, and
//! access control is expressed as a trait in [`kube_client`],
//! [`registry_store`], and [`access_review`] respectively, so the bulk of
//! this crate is testable without a cluster.

#![deny(missing_docs)]
#![deny(missing_debug_implementations)]

/// Token-based authorization check used to gate the transport.
pub mod access_review;
/// Per-process configuration: unqualified registries, mirror config, store.
pub mod context;
/// Decoding of `.dockerconfigjson` secrets into usable credentials.
pub mod docker_config;
/// The error taxonomy surfaced on object status.
pub mod error;
/// Pure operations on `Image`/`HashReference` history.
pub mod generation;
/// A real-cluster `ClusterClient` backed by `kube::Client`: CRUD surface
/// only — list/watch/informers stay an external collaborator and are not
/// reimplemented here.
pub mod kube_backend;
/// The cluster-API collaborator interface.
pub mod kube_client;
/// Thin, reusable operations backing the CLI surface (new/import/upgrade/
/// downgrade).
pub mod ops;
/// The `Image` and `ImageImport` reconcilers.
pub mod reconcile;
/// Facade over the image-copy collaborator.
pub mod registry_store;
/// Resolves a source reference to a digest-pinned `HashReference`.
pub mod resolver;
/// The work-queue-based controller runtime.
pub mod runtime;
/// An `ImageCopier` backed by forking the `skopeo` subprocess.
pub mod skopeo_copier;
/// CRD types and their embedded status value types.
pub mod types;

/// In-memory fakes for the collaborator traits, used by reconciler tests.
#[cfg(test)]
pub mod fixture;

/// The crate-wide fallible return type: a single `anyhow`-based alias
/// rather than per-module `Result`s.
pub type Result<T> = anyhow::Result<T>;
