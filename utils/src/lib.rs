//! The inevitable catchall "utils" crate. Generally only add
//! things here that are needed by more than one other crate in
//! the workspace and don't warrant a dependency of their own.

mod backoff;
mod names;
pub mod tracing_util;

pub use backoff::Backoff;
pub use names::random_suffix;
