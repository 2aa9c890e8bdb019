//! Error types for nsfork-core

use crate::switcher::SwitchStep;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NsForkError {
    #[error("invalid namespace path {}: {reason}", .path.display())]
    InvalidPath { path: PathBuf, reason: String },

    #[error("namespace handle {} does not exist", .0.display())]
    MissingHandle(PathBuf),

    #[error("cannot access namespace handle {}: {source}", .path.display())]
    Handle {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to init pipe: {0}")]
    Pipe(#[source] nix::Error),

    #[error("failed to fork: {0}")]
    Fork(#[source] nix::Error),

    /// The child could not join the target namespaces.
    #[error("{message}")]
    NamespaceSwitch { step: SwitchStep, message: String },

    /// The caller's logic failed, or its result could not be serialized.
    #[error("{0}")]
    Logic(String),

    #[error("invalid termination character, not NUL")]
    InvalidTermination,

    #[error("unknown response: {0}")]
    UnknownResponse(String),

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to read from namespace pipe: {0}")]
    Read(#[source] nix::Error),

    #[error("result reader exited without a response")]
    ReaderLost,

    #[error("namespace call timed out after {0:?}")]
    Timeout(Duration),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Phase a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Before any child existed: paths, pipe, fork, configuration
    Setup,
    /// The child failed to join a namespace
    NamespaceSwitch,
    /// The caller's logic failed inside the namespace
    Logic,
    /// The response could not be read or framed
    Protocol,
    /// The deadline expired
    Timeout,
    /// Local I/O outside the fork machinery
    Io,
}

impl NsForkError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPath { .. }
            | Self::MissingHandle(_)
            | Self::Handle { .. }
            | Self::Pipe(_)
            | Self::Fork(_)
            | Self::Config(_) => ErrorKind::Setup,
            Self::NamespaceSwitch { .. } => ErrorKind::NamespaceSwitch,
            Self::Logic(_) => ErrorKind::Logic,
            Self::InvalidTermination
            | Self::UnknownResponse(_)
            | Self::Decode(_)
            | Self::Read(_)
            | Self::ReaderLost => ErrorKind::Protocol,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Rebuild a typed error from the text of an `err:` response.
    ///
    /// The wire format does not say which side produced the text, so the
    /// step is recovered from the switcher's message prefixes. A logic error
    /// whose text happens to start with one of them, such as
    /// `failed to open net namespace`, is classified as
    /// [`NsForkError::NamespaceSwitch`] too.
    #[must_use]
    pub fn from_remote(message: String) -> Self {
        match SwitchStep::from_message(&message) {
            Some(step) => Self::NamespaceSwitch { step, message },
            None => Self::Logic(message),
        }
    }

    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_logic_error_keeps_text() {
        let err = NsForkError::from_remote("disk not found".into());
        assert_eq!(err.kind(), ErrorKind::Logic);
        assert_eq!(err.to_string(), "disk not found");
    }

    #[test]
    fn test_remote_switch_error_restores_step() {
        let err = NsForkError::from_remote(
            "failed to setns net namespace: EPERM: Operation not permitted".into(),
        );
        match err {
            NsForkError::NamespaceSwitch { step, ref message } => {
                assert_eq!(step, SwitchStep::JoinNet);
                assert!(message.contains("EPERM"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_logic_text_with_switch_prefix_reads_as_switch() {
        let err = NsForkError::from_remote("failed to open net namespace of the pod".into());
        assert_eq!(err.kind(), ErrorKind::NamespaceSwitch);
        assert!(matches!(
            err,
            NsForkError::NamespaceSwitch {
                step: SwitchStep::OpenNet,
                ..
            }
        ));
    }

    #[test]
    fn test_kinds() {
        assert_eq!(
            NsForkError::MissingHandle(PathBuf::from("/x/net")).kind(),
            ErrorKind::Setup
        );
        assert_eq!(NsForkError::InvalidTermination.kind(), ErrorKind::Protocol);
        assert_eq!(
            NsForkError::Timeout(Duration::from_secs(1)).kind(),
            ErrorKind::Timeout
        );
        assert!(NsForkError::Timeout(Duration::from_secs(1)).is_timeout());
    }
}
