//! Filesystem operations inside a target mount namespace
//!
//! The `*_local` functions act on the current mount namespace; [`NsFs`] runs
//! them in a forked child that has joined the target namespaces.

use crate::{ForkExecutor, NamespaceRef, Result};
use serde::{Deserialize, Serialize};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Metadata of a path, following symlinks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub path: PathBuf,
    pub size: u64,
    pub mode: u32,
    pub is_dir: bool,
    pub is_regular: bool,
}

impl FileStat {
    #[must_use]
    pub const fn is_empty_file(&self) -> bool {
        self.is_regular && self.size == 0
    }
}

pub fn stat_local(path: &Path) -> std::io::Result<FileStat> {
    let meta = std::fs::metadata(path)?;
    Ok(FileStat {
        path: path.to_path_buf(),
        size: meta.len(),
        mode: meta.mode(),
        is_dir: meta.is_dir(),
        is_regular: meta.is_file(),
    })
}

/// Every path below `root`, `root` included, depth first.
///
/// Entries of a directory are visited in lexical order. Symlinks are listed
/// but not followed.
pub fn list_files_local(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    walk(root, &mut out)?;
    Ok(out)
}

fn walk(path: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    out.push(path.to_path_buf());
    if !std::fs::symlink_metadata(path)?.is_dir() {
        return Ok(());
    }

    let mut entries = std::fs::read_dir(path)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();
    for entry in entries {
        walk(&entry, out)?;
    }
    Ok(())
}

/// Remove a file or an empty directory.
pub fn remove_local(path: &Path) -> std::io::Result<()> {
    if std::fs::symlink_metadata(path)?.is_dir() {
        std::fs::remove_dir(path)
    } else {
        std::fs::remove_file(path)
    }
}

/// Remove the empty regular files below `dir`.
///
/// After each removal the file's parent directory is removed too if that
/// leaves it empty; failures there are ignored. Returns the removed files.
pub fn remove_empty_files_local(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for file in list_files_local(dir)? {
        let stat = stat_local(&file)?;
        if !stat.is_empty_file() {
            continue;
        }
        std::fs::remove_file(&file)?;
        if let Some(parent) = file.parent() {
            let _ = std::fs::remove_dir(parent);
        }
        removed.push(file);
    }
    Ok(removed)
}

/// Filesystem operations bound to one namespace and deadline
#[derive(Debug, Clone, Copy)]
pub struct NsFs<'a> {
    executor: &'a ForkExecutor,
    ns: &'a NamespaceRef,
    timeout: Duration,
}

impl<'a> NsFs<'a> {
    #[must_use]
    pub const fn new(executor: &'a ForkExecutor, ns: &'a NamespaceRef, timeout: Duration) -> Self {
        Self {
            executor,
            ns,
            timeout,
        }
    }

    /// Bind `ns` with the executor's configured default timeout.
    #[must_use]
    pub const fn with_default_timeout(executor: &'a ForkExecutor, ns: &'a NamespaceRef) -> Self {
        Self::new(executor, ns, executor.config().default_timeout)
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn stat(&self, path: impl AsRef<Path>) -> Result<FileStat> {
        let path = path.as_ref();
        self.executor
            .run_in_namespace(self.ns, self.timeout, || {
                stat_local(path).map_err(|e| format!("failed to stat {}: {e}", path.display()))
            })
            .await
    }

    /// Whether `path` exists inside the namespace
    pub async fn exists(&self, path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        self.executor
            .run_in_namespace(self.ns, self.timeout, || match std::fs::metadata(path) {
                Ok(_) => Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(format!("failed to stat {}: {e}", path.display())),
            })
            .await
    }

    pub async fn list_files(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        self.executor
            .run_in_namespace(self.ns, self.timeout, || {
                list_files_local(dir)
                    .map_err(|e| format!("failed to search {}: {e}", dir.display()))
            })
            .await
    }

    pub async fn remove(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.executor
            .run_in_namespace(self.ns, self.timeout, || {
                remove_local(path).map_err(|e| format!("failed to remove {}: {e}", path.display()))
            })
            .await
    }

    /// Remove empty regular files below `dir`. A missing `dir` removes nothing.
    pub async fn remove_empty_files(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        if !self.exists(dir).await? {
            tracing::debug!(dir = %dir.display(), "nothing to clean up");
            return Ok(Vec::new());
        }
        let removed = self
            .executor
            .run_in_namespace(self.ns, self.timeout, || {
                remove_empty_files_local(dir)
                    .map_err(|e| format!("failed to clean up {}: {e}", dir.display()))
            })
            .await?;
        tracing::info!(dir = %dir.display(), removed = removed.len(), "removed empty files");
        Ok(removed)
    }
}
