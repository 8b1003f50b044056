//! The error taxonomy surfaced on object status and used to decide whether
//! the controller runtime retries a reconcile.

use thiserror::Error;

/// Errors produced by the resolver, the reconcilers, and the transport
/// layer. Everything else funnels through `anyhow::Error` and is only
/// classified here at the point where the distinction (retry vs terminal,
/// what string lands on `.status`) actually matters.
#[derive(Error, Debug)]
pub enum Error {
    /// A mandatory field was missing or malformed; never retried.
    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    /// Upstream manifest or object could not be found; retried up to the
    /// attempt cap.
    #[error("not found: {0}")]
    NotFound(String),

    /// No credential worked against any candidate registry.
    #[error("authentication required: {0}")]
    AuthRequired(String),

    /// The caller presented invalid or insufficient credentials for an
    /// operation that checks them directly (e.g. the transport's bearer
    /// token).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A mid-copy network or storage failure; retried.
    #[error("transfer failed: {0}")]
    TransferFailed(String),

    /// A stream invariant was violated (e.g. a `Chunk` arriving before the
    /// `Header`); the stream is terminated and not retried.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A generation requested by the user is not in
    /// `{NextGeneration} ∪ {existing generations}`.
    #[error("invalid generation: {0}")]
    InvalidGeneration(i64),

    /// No registry candidate was available to resolve an unqualified
    /// reference against.
    #[error("no registry available to resolve unqualified reference")]
    NoRegistry,

    /// Wraps every error accumulated while fanning out over registry
    /// candidates and credentials.
    #[error("import failed: {0:?}")]
    ImportFailed(Aggregate),
}

/// A collection of errors gathered from independent attempts (one registry
/// candidate / credential combination each), preserved in attempt order so
/// operators can see every failure, not just the last one.
#[derive(Debug, Default)]
pub struct Aggregate(pub Vec<String>);

impl Aggregate {
    /// Start an empty aggregate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one attempt's failure.
    pub fn push(&mut self, context: impl std::fmt::Display, err: &anyhow::Error) {
        self.0.push(format!("{context}: {err:#}"));
    }

    /// True if no attempt has failed yet.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Aggregate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            f.write_str(e)?;
        }
        Ok(())
    }
}

impl Error {
    /// Whether the controller runtime should requeue this error with
    /// backoff (vs treating it as terminal for this attempt).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::AuthRequired(_)
                | Error::TransferFailed(_)
                | Error::ImportFailed(_)
                | Error::NoRegistry
        )
    }
}
