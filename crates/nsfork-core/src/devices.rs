//! Known block devices and their major:minor numbers

use crate::{ForkExecutor, NamespaceRef, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

pub const PROC_PARTITIONS: &str = "/proc/partitions";

/// A block device as the kernel knows it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KernelDevice {
    pub name: String,
    pub major: u32,
    pub minor: u32,
}

impl KernelDevice {
    /// Combined device number
    #[must_use]
    pub fn dev(&self) -> libc::dev_t {
        libc::makedev(self.major, self.minor)
    }
}

impl fmt::Display for KernelDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major, self.minor)
    }
}

/// Parse the `/proc/partitions` table, keyed by device name.
///
/// ```text
/// major minor  #blocks  name
///
///    8        0  500107608 sda
///    8        1     524288 sda1
/// ```
///
/// Lines that do not hold four fields with numeric major and minor are
/// skipped, which covers the header.
#[must_use]
pub fn parse_partitions(text: &str) -> HashMap<String, KernelDevice> {
    text.lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [major, minor, _blocks, name] = fields.as_slice() else {
                return None;
            };
            Some(KernelDevice {
                name: (*name).to_string(),
                major: major.parse().ok()?,
                minor: minor.parse().ok()?,
            })
        })
        .map(|dev| (dev.name.clone(), dev))
        .collect()
}

/// Read the partition table at `path`.
pub fn known_devices_from(
    path: impl AsRef<Path>,
) -> std::io::Result<HashMap<String, KernelDevice>> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_partitions(&text))
}

/// Block devices visible to the current process.
pub fn known_devices_local() -> std::io::Result<HashMap<String, KernelDevice>> {
    known_devices_from(PROC_PARTITIONS)
}

/// Block devices visible inside `ns`.
pub async fn list_known_devices(
    executor: &ForkExecutor,
    ns: &NamespaceRef,
    timeout: Duration,
) -> Result<HashMap<String, KernelDevice>> {
    executor
        .run_in_namespace(ns, timeout, || {
            known_devices_local().map_err(|e| format!("failed to read {PROC_PARTITIONS}: {e}"))
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "major minor  #blocks  name

   8        0  500107608 sda
   8        1     524288 sda1
 259        0  976762584 nvme0n1
   7        0         4 loop0
garbage line
";

    #[test]
    fn test_parse_partitions() {
        let devices = parse_partitions(SAMPLE);
        assert_eq!(devices.len(), 4);

        let sda1 = &devices["sda1"];
        assert_eq!((sda1.major, sda1.minor), (8, 1));
        assert_eq!(sda1.to_string(), "8:1");

        let nvme = &devices["nvme0n1"];
        assert_eq!(nvme.major, 259);
        assert!(!devices.contains_key("name"));
    }

    #[test]
    fn test_dev_number() {
        let dev = KernelDevice {
            name: "sdb".into(),
            major: 8,
            minor: 16,
        };
        assert_eq!(libc::major(dev.dev()), 8);
        assert_eq!(libc::minor(dev.dev()), 16);
    }

    #[test]
    fn test_empty_table() {
        assert!(parse_partitions("").is_empty());
    }

    #[test]
    fn test_known_devices_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partitions");
        std::fs::write(&path, SAMPLE).unwrap();
        let devices = known_devices_from(&path).unwrap();
        assert_eq!(devices["sda"].minor, 0);
    }
}
