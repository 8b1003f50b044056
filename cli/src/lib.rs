//! Shared code behind the `tagctl` CLI binary and the `controller` binary:
//! argument parsing delegates straight into `tagctl-core`/`tagctl-transport`,
//! keeping both binaries as thin shells over the logic crates.

#![deny(missing_docs)]
#![deny(missing_debug_implementations)]

/// The `tagctl` user-facing CLI surface.
pub mod cli;
/// The controller runtime + transport server bootstrap, run by `controller`.
pub mod serve;
