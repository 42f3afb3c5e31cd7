//! Production [`Host`] backed by the Linux kernel.
//!
//! | Step            | Mechanism                                            |
//! |-----------------|------------------------------------------------------|
//! | cgroup          | cgroup filesystem ([`Cgroup`])                       |
//! | join            | `cgroup.procs` fd written by the child before `exec` |
//! | root switch     | `chroot` + `chdir` ([`RootGuard`])                   |
//! | network         | rtnetlink bridge ([`network`])                       |
//! | execute         | `tokio::process::Command`                            |
//!
//! # Safety
//!
//! The pre-exec hook runs between `fork` and `exec` in the child. It only
//! calls `getpid` and `write` on a descriptor opened by the parent and
//! formats the pid into a stack buffer; it does not allocate, lock, or log.

use super::chroot::RootGuard;
use super::cgroup::Cgroup;
use super::{Host, LaunchRequest, network};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::fs::File;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, warn};

/// Open handle on a group's `cgroup.procs`, taken before the root switch.
#[derive(Debug)]
pub struct CgroupJoin {
    procs: File,
}

/// The Linux [`Host`].
#[derive(Debug, Clone)]
pub struct LinuxHost {
    cgroup_root: PathBuf,
}

impl LinuxHost {
    /// Creates a host that manages groups under `cgroup_root`.
    pub fn new(cgroup_root: impl Into<PathBuf>) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
        }
    }

    /// Mount point of the cgroup filesystem in use.
    pub fn cgroup_root(&self) -> &Path {
        &self.cgroup_root
    }
}

#[async_trait]
impl Host for LinuxHost {
    type Cgroup = Cgroup;
    type Membership = CgroupJoin;
    type Root = RootGuard;

    fn create_cgroup(&self, name: &str, cpu_shares: u64) -> Result<Cgroup> {
        Cgroup::create(&self.cgroup_root, name, cpu_shares).map_err(|e| Error::Resource {
            resource: format!("cgroup {}", name),
            reason: e.to_string(),
        })
    }

    fn prepare_join(&self, cgroup: &Cgroup) -> Result<CgroupJoin> {
        let procs = cgroup.open_procs().map_err(|e| Error::Resource {
            resource: format!("cgroup membership {}", cgroup.path().display()),
            reason: e.to_string(),
        })?;
        Ok(CgroupJoin { procs })
    }

    fn delete_cgroup(&self, cgroup: Cgroup) -> Result<()> {
        let resource = format!("cgroup {}", cgroup.path().display());
        cgroup.delete().map_err(|e| Error::Teardown {
            resource,
            reason: e.to_string(),
        })
    }

    fn enter_root(&self, path: &Path) -> Result<RootGuard> {
        RootGuard::enter(path).map_err(|e| Error::Resource {
            resource: format!("root {}", path.display()),
            reason: e.to_string(),
        })
    }

    fn restore_root(&self, root: RootGuard) -> Result<()> {
        let resource = format!("root {}", root.new_root().display());
        root.release().map_err(|e| Error::Teardown {
            resource,
            reason: e.to_string(),
        })
    }

    async fn attach_network(&self, bridge: &str, device: &str) -> Result<()> {
        network::attach(bridge, device)
            .await
            .map_err(|reason| Error::Network {
                bridge: bridge.to_string(),
                device: device.to_string(),
                reason,
            })
    }

    async fn detach_network(&self, bridge: &str) -> Result<()> {
        network::delete_bridge(bridge)
            .await
            .map_err(|reason| Error::Teardown {
                resource: format!("bridge {}", bridge),
                reason,
            })
    }

    async fn execute(&self, request: &LaunchRequest, join: &CgroupJoin) -> Result<Option<i32>> {
        let exec_err = |reason: String| Error::Exec {
            command: request.command.join(" "),
            reason,
        };
        let (program, args) = request
            .command
            .split_first()
            .ok_or_else(|| exec_err("empty command".to_string()))?;

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .env_clear()
            .envs(env_pairs(&request.env))
            .current_dir(request.working_dir_or_root())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let procs_fd = join.procs.as_raw_fd();
        // SAFETY: the hook only calls async-signal-safe functions; see the
        // module docs.
        unsafe {
            cmd.pre_exec(move || join_cgroup_raw(procs_fd).map_err(std::io::Error::from_raw_os_error));
        }

        let mut child = cmd.spawn().map_err(|e| exec_err(e.to_string()))?;
        debug!("Spawned {} (pid {:?})", program, child.id());

        let status = child.wait().await.map_err(|e| exec_err(e.to_string()))?;
        debug!("Container process exited: {}", status);
        Ok(status.code())
    }
}

/// Splits `KEY=VALUE` entries. Entries without `=` cannot be passed to the
/// child and are skipped with a warning.
fn env_pairs(env: &[String]) -> Vec<(&str, &str)> {
    env.iter()
        .filter_map(|kv| {
            let pair = kv.split_once('=');
            if pair.is_none() {
                warn!("Ignoring malformed environment entry {:?}", kv);
            }
            pair
        })
        .collect()
}

/// Writes the calling process's pid to `procs_fd`. Async-signal-safe.
fn join_cgroup_raw(procs_fd: RawFd) -> std::result::Result<(), i32> {
    // SAFETY: getpid and write are async-signal-safe; the buffer is on the
    // stack and the fd stays open in the child until exec.
    unsafe {
        let mut buf = [0u8; 16];
        let len = format_pid(libc::getpid(), &mut buf);
        let written = libc::write(procs_fd, buf.as_ptr().cast::<libc::c_void>(), len);
        if written < 0 {
            return Err(*libc::__errno_location());
        }
    }
    Ok(())
}

/// Formats a pid as decimal into `buf` without allocating.
fn format_pid(pid: libc::pid_t, buf: &mut [u8; 16]) -> usize {
    let mut n = pid.unsigned_abs();
    let mut digits = [0u8; 16];
    let mut len = 0;
    loop {
        digits[len] = b'0' + (n % 10) as u8;
        n /= 10;
        len += 1;
        if n == 0 {
            break;
        }
    }
    for i in 0..len {
        buf[i] = digits[len - 1 - i];
    }
    len
}
