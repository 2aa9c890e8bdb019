//! Joining existing network and mount namespaces
//!
//! Runs in the forked child, so it sticks to [`crate::raw`]. The network
//! namespace is joined first: joining the mount namespace changes how the
//! remaining handle path would resolve.

use crate::raw;
use nix::errno::Errno;
use nix::sched::CloneFlags;
use std::ffi::CStr;
use std::fmt;
use thiserror::Error;

/// One step of [`switch`], in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwitchStep {
    OpenNet,
    JoinNet,
    CloseNet,
    OpenMount,
    JoinMount,
    CloseMount,
}

impl SwitchStep {
    pub const ALL: [Self; 6] = [
        Self::OpenNet,
        Self::JoinNet,
        Self::CloseNet,
        Self::OpenMount,
        Self::JoinMount,
        Self::CloseMount,
    ];

    /// Short identifier, e.g. `join-net`
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::OpenNet => "open-net",
            Self::JoinNet => "join-net",
            Self::CloseNet => "close-net",
            Self::OpenMount => "open-mount",
            Self::JoinMount => "join-mount",
            Self::CloseMount => "close-mount",
        }
    }

    /// Leading text of the error message for this step
    #[must_use]
    pub const fn message_prefix(self) -> &'static str {
        match self {
            Self::OpenNet => "failed to open net namespace",
            Self::JoinNet => "failed to setns net namespace",
            Self::CloseNet => "failed to close net namespace",
            Self::OpenMount => "failed to open mount namespace",
            Self::JoinMount => "failed to setns mount namespace",
            Self::CloseMount => "failed to close mount namespace",
        }
    }

    /// Recover the step from a message produced by [`SwitchError`].
    #[must_use]
    pub fn from_message(message: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|step| message.starts_with(step.message_prefix()))
    }

    #[must_use]
    pub const fn is_net(self) -> bool {
        matches!(self, Self::OpenNet | Self::JoinNet | Self::CloseNet)
    }
}

impl fmt::Display for SwitchStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{}: {errno}", .step.message_prefix())]
pub struct SwitchError {
    pub step: SwitchStep,
    pub errno: Errno,
}

impl SwitchError {
    const fn new(step: SwitchStep, errno: Errno) -> Self {
        Self { step, errno }
    }
}

/// Join the network namespace at `net`, then the mount namespace at `mount`.
///
/// Stops at the first failing step. The process is then partially switched
/// and must not go on to run work meant for the target namespaces.
pub fn switch(mount: &CStr, net: &CStr) -> Result<(), SwitchError> {
    join(
        net,
        CloneFlags::CLONE_NEWNET,
        [SwitchStep::OpenNet, SwitchStep::JoinNet, SwitchStep::CloseNet],
    )?;
    join(
        mount,
        CloneFlags::CLONE_NEWNS,
        [
            SwitchStep::OpenMount,
            SwitchStep::JoinMount,
            SwitchStep::CloseMount,
        ],
    )
}

fn join(
    path: &CStr,
    kind: CloneFlags,
    [open, setns, close]: [SwitchStep; 3],
) -> Result<(), SwitchError> {
    let fd = raw::open(path, libc::O_RDONLY, 0o644).map_err(|e| SwitchError::new(open, e))?;
    if let Err(e) = raw::setns(fd, kind) {
        let _ = raw::close(fd);
        return Err(SwitchError::new(setns, e));
    }
    raw::close(fd).map_err(|e| SwitchError::new(close, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    fn cpath(path: &std::path::Path) -> CString {
        CString::new(path.as_os_str().as_encoded_bytes()).unwrap()
    }

    #[test]
    fn test_missing_net_handle_fails_first() {
        let dir = tempfile::tempdir().unwrap();
        let mount = cpath(&dir.path().join("mnt"));
        let net = cpath(&dir.path().join("net"));
        let err = switch(&mount, &net).unwrap_err();
        assert_eq!(err.step, SwitchStep::OpenNet);
        assert_eq!(err.errno, Errno::ENOENT);
        assert!(err.to_string().starts_with("failed to open net namespace"));
    }

    #[test]
    fn test_net_join_failure_skips_mount() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file opens fine but is not a namespace. The mount handle
        // does not exist, so reaching the mount steps would report open-mount.
        let net = dir.path().join("net");
        std::fs::write(&net, b"").unwrap();

        let err = switch(&cpath(&dir.path().join("mnt")), &cpath(&net)).unwrap_err();
        assert_eq!(err.step, SwitchStep::JoinNet);
        assert_eq!(err.errno, Errno::EINVAL);
        assert!(err.step.is_net());
    }

    #[test]
    fn test_step_round_trips_through_message() {
        for step in SwitchStep::ALL {
            let err = SwitchError::new(step, Errno::EPERM);
            assert_eq!(SwitchStep::from_message(&err.to_string()), Some(step));
        }
        assert_eq!(SwitchStep::from_message("disk not found"), None);
    }

    #[test]
    fn test_step_names() {
        assert_eq!(SwitchStep::JoinMount.to_string(), "join-mount");
        assert_eq!(SwitchStep::CloseNet.name(), "close-net");
    }
}
