//! Namespace references
//!
//! A [`NamespaceRef`] is a directory holding the `mnt` and `net` handles of
//! another process, usually `/proc/<pid>/ns`. The namespaces themselves are
//! never modified, only joined.

use crate::{NsForkError, Result};
use serde::{Deserialize, Serialize};
use std::ffi::{CStr, CString};
use std::path::{Path, PathBuf};

/// File name of the mount namespace handle
pub const MOUNT_HANDLE: &str = "mnt";
/// File name of the network namespace handle
pub const NET_HANDLE: &str = "net";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamespaceRef {
    dir: PathBuf,
}

impl NamespaceRef {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Namespaces of process `pid` as seen through a proc mount at `proc_root`
    pub fn for_pid(proc_root: impl AsRef<Path>, pid: u32) -> Self {
        Self::new(proc_root.as_ref().join(pid.to_string()).join("ns"))
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn mount_path(&self) -> PathBuf {
        self.dir.join(MOUNT_HANDLE)
    }

    #[must_use]
    pub fn net_path(&self) -> PathBuf {
        self.dir.join(NET_HANDLE)
    }

    /// Check both handles and prepare the paths for the child.
    ///
    /// Runs in the parent so that a bad reference fails before any fork.
    pub fn resolve(&self) -> Result<NamespaceHandles> {
        let net = handle_path(&self.net_path())?;
        let mount = handle_path(&self.mount_path())?;
        Ok(NamespaceHandles { mount, net })
    }
}

/// Handle paths ready for raw syscalls in the child
#[derive(Debug, Clone)]
pub struct NamespaceHandles {
    mount: CString,
    net: CString,
}

impl NamespaceHandles {
    #[must_use]
    pub fn mount(&self) -> &CStr {
        &self.mount
    }

    #[must_use]
    pub fn net(&self) -> &CStr {
        &self.net
    }
}

fn handle_path(path: &Path) -> Result<CString> {
    let c_path = CString::new(path.as_os_str().as_encoded_bytes()).map_err(|e| {
        NsForkError::InvalidPath {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    })?;

    match std::fs::metadata(path) {
        Ok(_) => Ok(c_path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(NsForkError::MissingHandle(path.to_path_buf()))
        }
        Err(source) => Err(NsForkError::Handle {
            path: path.to_path_buf(),
            source,
        }),
    }
}
