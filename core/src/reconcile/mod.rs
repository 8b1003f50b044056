//! Reconcilers for `ImageImport` and `Image`.

pub mod image;
pub mod image_import;

/// Outcome of a single reconcile step: whether the controller runtime
/// should requeue the key, and after how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing more to do right now.
    Await,
    /// Requeue after the given number of seconds (e.g. to re-check the
    /// consume grace period).
    RequeueAfter(u64),
}
