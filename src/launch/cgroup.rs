//! # cgroup Driver
//!
//! Creates and removes the per-container CPU control group through the
//! cgroup filesystem. Both hierarchies are supported:
//!
//! | Hierarchy | Detected by                      | Group path                                | Limit file   |
//! |-----------|----------------------------------|-------------------------------------------|--------------|
//! | v2        | `{root}/cgroup.controllers`      | `{root}/gocker/{name}`                    | `cpu.weight` |
//! | v1        | otherwise                        | `{root}/cpu/gocker/{name}`                | `cpu.shares` |
//!
//! Membership is established by writing a pid to `cgroup.procs`. The
//! launcher opens that file *before* switching root, because the cgroup
//! filesystem is not visible from inside the image.

use crate::constants::{CGROUP_PARENT, MAX_CPU_SHARES, MIN_CPU_SHARES};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Converts v1 `cpu.shares` to v2 `cpu.weight`.
///
/// Maps `[2, 262144]` linearly onto `[1, 10000]`, the same conversion runc
/// and systemd use. Out-of-range input is clamped first.
#[must_use]
pub fn shares_to_weight(shares: u64) -> u64 {
    let shares = shares.clamp(MIN_CPU_SHARES, MAX_CPU_SHARES);
    1 + ((shares - MIN_CPU_SHARES) * 9999) / (MAX_CPU_SHARES - MIN_CPU_SHARES)
}

/// cgroup hierarchy flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupVersion {
    /// Legacy per-controller hierarchies.
    V1,
    /// Unified hierarchy.
    V2,
}

impl CgroupVersion {
    /// Detects the hierarchy mounted at `root`.
    pub fn detect(root: &Path) -> Self {
        if root.join("cgroup.controllers").exists() {
            Self::V2
        } else {
            Self::V1
        }
    }
}

/// A control group created for one container.
///
/// Removed by [`Cgroup::delete`]; if dropped without it, removal is
/// attempted and a failure is logged.
#[derive(Debug)]
pub struct Cgroup {
    path: PathBuf,
    version: CgroupVersion,
    deleted: bool,
}

impl Cgroup {
    /// Creates `gocker/{name}` under `root` with the given CPU shares.
    pub fn create(root: &Path, name: &str, cpu_shares: u64) -> io::Result<Self> {
        let version = CgroupVersion::detect(root);
        let (parent, limit_file, limit) = match version {
            CgroupVersion::V2 => {
                let parent = root.join(CGROUP_PARENT);
                fs::create_dir_all(&parent)?;
                // Delegation may already be configured; a refusal here
                // surfaces below as a missing cpu.weight.
                for dir in [root, parent.as_path()] {
                    if let Err(e) = fs::write(dir.join("cgroup.subtree_control"), "+cpu") {
                        debug!("Unable to enable cpu controller in {}: {}", dir.display(), e);
                    }
                }
                (parent, "cpu.weight", shares_to_weight(cpu_shares))
            }
            CgroupVersion::V1 => {
                let parent = root.join("cpu").join(CGROUP_PARENT);
                fs::create_dir_all(&parent)?;
                (parent, "cpu.shares", cpu_shares)
            }
        };

        let path = parent.join(name);
        fs::create_dir(&path)?;
        let group = Self {
            path,
            version,
            deleted: false,
        };

        // On failure `group` drops here and the directory is removed.
        fs::write(group.path.join(limit_file), limit.to_string())?;

        debug!(
            "Created cgroup {} ({:?}, {}={})",
            group.path.display(),
            version,
            limit_file,
            limit
        );
        Ok(group)
    }

    /// Directory of the group.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hierarchy the group lives in.
    pub fn version(&self) -> CgroupVersion {
        self.version
    }

    /// Opens `cgroup.procs` for writing a member pid.
    pub fn open_procs(&self) -> io::Result<File> {
        OpenOptions::new()
            .write(true)
            .open(self.path.join("cgroup.procs"))
    }

    /// Removes the group. It must have no live members.
    pub fn delete(mut self) -> io::Result<()> {
        self.deleted = true;
        fs::remove_dir(&self.path)?;
        debug!("Deleted cgroup {}", self.path.display());
        Ok(())
    }
}

impl Drop for Cgroup {
    fn drop(&mut self) {
        if !self.deleted
            && let Err(e) = fs::remove_dir(&self.path)
        {
            warn!("Failed to remove cgroup {}: {}", self.path.display(), e);
        }
    }
}
