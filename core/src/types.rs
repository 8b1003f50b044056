//! Custom resource definitions for `Image` and `ImageImport`, plus the
//! value types embedded in their status (`HashReference`, `ImportAttempt`).
//!
//! These follow the common CRD shape of a `kube::CustomResource` derive on
//! the spec type, with a separate plain struct for status.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Maximum number of `HashReference` entries retained in an `Image`'s
/// history; older entries are dropped once this bound is reached.
pub const MAX_HISTORY: usize = 10;

/// Maximum number of import attempts recorded on an `ImageImport` before it
/// is flagged consumed without ever succeeding.
pub const MAX_IMPORT_ATTEMPTS: usize = 10;

/// Grace period after `consumedAt` before an `ImageImport` is deleted.
pub const CONSUME_GRACE: chrono::Duration = chrono::Duration::hours(1);

/// A user-declared logical tag name bound to a remote source reference.
#[derive(CustomResource, Serialize, Deserialize, Debug, Default, Clone, PartialEq, JsonSchema)]
#[kube(
    group = "imagecontroller.example.com",
    version = "v1alpha1",
    kind = "Image",
    struct = "Image",
    namespaced,
    status = "ImageStatus",
    derive = "PartialEq",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    /// Remote source reference; may be unqualified (no registry host).
    pub from: String,
    /// Whether resolved content should be copied into the managed mirror.
    #[serde(default)]
    pub mirror: bool,
    /// Whether to accept an insecure (non-TLS-verified) source registry.
    #[serde(default)]
    pub insecure: bool,
    /// Pin `CurrentReference` to a specific historical generation instead
    /// of the head of `hashReferences`. Unset means "head".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,
}

/// Observed state of an `Image`: its resolution history.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageStatus {
    /// Ordered sequence of resolved digests, newest first, length <= 10.
    #[serde(default)]
    pub hash_references: Vec<HashReference>,
    /// Outcome of the most recent reconcile attempt that touched this
    /// image's history (as opposed to an individual `ImageImport`'s own
    /// attempts).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_import_attempt: Option<ImportAttempt>,
}

/// One historical resolution recorded in an `Image`'s or `ImageImport`'s
/// status.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HashReference {
    /// Monotonically increasing generation number.
    pub generation: i64,
    /// The source reference that was resolved to produce this entry.
    pub from: String,
    /// When the resolution completed.
    pub imported_at: DateTime<Utc>,
    /// Fully qualified, digest-pinned reference, e.g.
    /// `host/repo/name@sha256:...`. Never tag-pinned.
    pub image_reference: String,
}

/// Record of a single resolve attempt, successful or not.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportAttempt {
    /// When the attempt was made.
    pub when: DateTime<Utc>,
    /// Whether the attempt succeeded.
    pub succeeded: bool,
    /// Empty on success; the error text on failure.
    #[serde(default)]
    pub reason: String,
}

impl ImportAttempt {
    /// Build a successful attempt record timestamped `now`.
    pub fn success(now: DateTime<Utc>) -> Self {
        Self {
            when: now,
            succeeded: true,
            reason: String::new(),
        }
    }

    /// Build a failed attempt record timestamped `now`.
    pub fn failure(now: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            when: now,
            succeeded: false,
            reason: reason.into(),
        }
    }
}

/// A single-shot request to resolve (and optionally mirror) a source
/// reference, producing one `HashReference` on the owning `Image`.
#[derive(CustomResource, Serialize, Deserialize, Debug, Default, Clone, PartialEq, JsonSchema)]
#[kube(
    group = "imagecontroller.example.com",
    version = "v1alpha1",
    kind = "ImageImport",
    struct = "ImageImport",
    namespaced,
    status = "ImageImportStatus",
    derive = "PartialEq",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct ImageImportSpec {
    /// Name of the owning `Image` (same namespace).
    pub target_image: String,
    /// Source reference. Inherited from the target `Image` on first
    /// reconcile if empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Inherited from the target `Image` on first reconcile if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror: Option<bool>,
    /// Inherited from the target `Image` on first reconcile if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,
}

/// Observed state of an `ImageImport`.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageImportStatus {
    /// Set once, on the first successful resolve.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_reference: Option<HashReference>,
    /// Every attempt made so far, oldest first.
    #[serde(default)]
    pub import_attempts: Vec<ImportAttempt>,
    /// Set once this import's outcome has been absorbed by the `Image`
    /// reconciler (or has failed terminally); never unset once present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_at: Option<DateTime<Utc>>,
}

impl ImageImportStatus {
    /// True iff this import has a recorded successful resolution.
    pub fn is_resolved(&self) -> bool {
        self.hash_reference.is_some()
    }

    /// True iff the attempt cap has been reached without success.
    pub fn attempts_exhausted(&self) -> bool {
        !self.is_resolved() && self.import_attempts.len() >= MAX_IMPORT_ATTEMPTS
    }
}
