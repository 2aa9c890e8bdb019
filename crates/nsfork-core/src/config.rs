//! Executor configuration

use crate::{protocol::DEFAULT_READ_BUFFER, NsForkError, Result};
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Signal sent to a child that outlives its deadline unless configured
pub const DEFAULT_KILL_SIGNAL: Signal = Signal::SIGINT;

/// Configuration for a [`crate::ForkExecutor`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Deadline for callers that do not pick their own, see
    /// [`crate::nsfs::NsFs::with_default_timeout`]
    pub default_timeout: Duration,

    /// Starting size of the result read buffer, doubled as needed
    pub initial_buffer_size: usize,

    /// Signal sent to a child that missed its deadline
    pub kill_signal: i32,

    /// Wait for children once their pipe closes so they do not linger as
    /// zombies. Disable when the host reaps children itself.
    pub reap_children: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(60),
            initial_buffer_size: DEFAULT_READ_BUFFER,
            kill_signal: DEFAULT_KILL_SIGNAL as i32,
            reap_children: true,
        }
    }
}

impl ExecutorConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> ExecutorConfigBuilder {
        ExecutorConfigBuilder::default()
    }

    /// The configured kill signal
    pub fn signal(&self) -> Result<Signal> {
        Signal::try_from(self.kill_signal).map_err(|e| {
            NsForkError::Config(format!("invalid kill signal {}: {e}", self.kill_signal))
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.signal()?;
        if self.initial_buffer_size == 0 {
            return Err(NsForkError::Config(
                "initial buffer size must be at least 1 byte".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for `ExecutorConfig`
#[derive(Debug, Default)]
pub struct ExecutorConfigBuilder {
    config: ExecutorConfig,
}

impl ExecutorConfigBuilder {
    #[must_use]
    pub fn default_timeout(mut self, duration: Duration) -> Self {
        self.config.default_timeout = duration;
        self
    }

    #[must_use]
    pub fn default_timeout_secs(self, secs: u64) -> Self {
        self.default_timeout(Duration::from_secs(secs))
    }

    #[must_use]
    pub fn initial_buffer_size(mut self, bytes: usize) -> Self {
        self.config.initial_buffer_size = bytes;
        self
    }

    #[must_use]
    pub fn kill_signal(mut self, signal: Signal) -> Self {
        self.config.kill_signal = signal as i32;
        self
    }

    #[must_use]
    pub fn reap_children(mut self, reap: bool) -> Self {
        self.config.reap_children = reap;
        self
    }

    #[must_use]
    pub fn build(self) -> ExecutorConfig {
        self.config
    }
}

/// Get the proc mount used to locate other processes' namespaces
///
/// Returns:
/// - `$NSFORK_PROC_ROOT` if set (e.g. `/host/proc` inside a container)
/// - `/proc` otherwise
pub fn default_proc_root() -> PathBuf {
    std::env::var("NSFORK_PROC_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/proc"))
}
