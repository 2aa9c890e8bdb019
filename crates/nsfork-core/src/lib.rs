//! # nsfork-core
//!
//! Run typed work inside the mount and network namespaces of another process.
//!
//! This crate provides:
//! - Raw read/write/open/close/setns wrappers safe to use after `fork`
//! - Joining existing namespaces from their `/proc/<pid>/ns` handles
//! - A NUL-terminated `ok:`/`err:` protocol over a pipe
//! - [`ForkExecutor`], which forks, switches, runs a closure and returns its
//!   result to the caller within a deadline
//! - Filesystem and block device helpers built on top of it

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod devices;
pub mod error;
pub mod executor;
pub mod namespace;
pub mod nsfs;
pub mod pipe;
pub mod protocol;
pub mod raw;
pub mod switcher;

pub use config::ExecutorConfig;
pub use devices::KernelDevice;
pub use error::{ErrorKind, NsForkError};
pub use executor::{run_forked, run_in_namespace, CallId, ForkExecutor};
pub use namespace::NamespaceRef;
pub use switcher::SwitchStep;

/// Crate-level result type
pub type Result<T> = std::result::Result<T, NsForkError>;
