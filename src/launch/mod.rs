//! # Container Launcher
//!
//! Runs the configured command of a pulled image inside a CPU-limited
//! control group with the image directory as its root.
//!
//! ## Sequence
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌──────────────┐   ┌────────────┐
//! │ Resolved │──▶│ CgroupCreated │──▶│ ProcessJoined│──▶│ FsIsolated │
//! └──────────┘   └───────────────┘   └──────────────┘   └─────┬──────┘
//!                                                             │ device given?
//!                                                             ▼
//!                ┌──────────┐        ┌───────────┐     ┌─────────────┐
//!                │ Teardown │◀───────│ Executing │◀────│ (NetAttached)│
//!                └──────────┘        └───────────┘     └─────────────┘
//! ```
//!
//! Everything that can be checked without touching the OS (reference,
//! manifest, runtime config, command) is checked before the cgroup is
//! created. Once a resource is acquired it is released on every path, in
//! reverse order: bridge, root, cgroup.
//!
//! ## Failure Semantics
//!
//! | Step fails      | Result                                                   |
//! |-----------------|----------------------------------------------------------|
//! | resolve/derive  | `NotFound` / `Config`, nothing created                   |
//! | cgroup          | `Resource`, nothing started                              |
//! | join            | `Resource`, cgroup deleted                               |
//! | root switch     | `Resource`, cgroup deleted                               |
//! | network         | recorded in [`LaunchOutcome::network_error`], continues  |
//! | execute         | `Exec`, full teardown                                    |
//! | teardown        | kept next to the primary error, never replaces it        |
//!
//! ## Process Model
//!
//! The container command runs in a child process. The child joins the
//! cgroup in its pre-exec hook through a `cgroup.procs` descriptor opened
//! before the root switch, so it is a member before its first instruction.
//! The root switch is scoped to the launch and inherited by the child.
//! Because the root is process-wide, launches in one process are serialized.
//!
//! ## Host Seam
//!
//! The OS primitives sit behind [`Host`] so the sequencing can be exercised
//! without privileges. [`LinuxHost`](host::LinuxHost) is the real one.

pub mod cgroup;
pub mod chroot;
#[cfg(target_os = "linux")]
pub mod host;
#[cfg(target_os = "linux")]
pub mod network;

use crate::config::Config;
use crate::constants::{BRIDGE_PREFIX, CONTAINER_ID_PREFIX};
use crate::error::{Error, Result};
use crate::reference::ImageReference;
use crate::storage::ImageStore;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Serializes root switches within this process.
static LAUNCH_LOCK: Mutex<()> = Mutex::const_new(());

// =============================================================================
// Host Seam
// =============================================================================

/// OS primitives used by [`ContainerLauncher`].
///
/// Handles are moved back into the release methods, so each acquired
/// resource is released at most once.
#[async_trait]
pub trait Host: Send + Sync {
    /// A created control group.
    type Cgroup: Send + Sync;
    /// A prepared join of the container process into a group.
    type Membership: Send + Sync;
    /// An active root switch.
    type Root: Send + Sync;

    /// Creates control group `name` with the given CPU shares.
    fn create_cgroup(&self, name: &str, cpu_shares: u64) -> Result<Self::Cgroup>;

    /// Prepares the container process to join `cgroup`.
    fn prepare_join(&self, cgroup: &Self::Cgroup) -> Result<Self::Membership>;

    /// Deletes a control group.
    fn delete_cgroup(&self, cgroup: Self::Cgroup) -> Result<()>;

    /// Switches the process root to `path`.
    fn enter_root(&self, path: &Path) -> Result<Self::Root>;

    /// Restores the root active before [`enter_root`](Self::enter_root).
    fn restore_root(&self, root: Self::Root) -> Result<()>;

    /// Creates `bridge` and attaches `device` to it.
    async fn attach_network(&self, bridge: &str, device: &str) -> Result<()>;

    /// Deletes `bridge`.
    async fn detach_network(&self, bridge: &str) -> Result<()>;

    /// Runs the container command to completion; returns its exit code
    /// (`None` if it was killed by a signal).
    async fn execute(
        &self,
        request: &LaunchRequest,
        membership: &Self::Membership,
    ) -> Result<Option<i32>>;
}

// =============================================================================
// Launch Types
// =============================================================================

/// Per-launch options from the caller.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Host network device to attach to a fresh bridge.
    pub device: Option<String>,
    /// CPU shares; the launcher default when `None`.
    pub cpu_shares: Option<u64>,
}

/// Everything needed to run one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Canonical image directory that becomes the root.
    pub image_path: PathBuf,
    /// Working directory inside the root; empty means `/`.
    pub working_dir: String,
    /// argv of the container process.
    pub command: Vec<String>,
    /// `KEY=VALUE` environment of the container process.
    pub env: Vec<String>,
    /// CPU shares of the container's group.
    pub cpu_shares: u64,
}

impl LaunchRequest {
    /// Working directory to use, defaulting to `/`.
    pub fn working_dir_or_root(&self) -> &str {
        if self.working_dir.is_empty() {
            "/"
        } else {
            &self.working_dir
        }
    }
}

/// Result of a launch whose command ran.
#[derive(Debug)]
pub struct LaunchOutcome {
    /// `c_{uuid}`.
    pub container_id: String,
    /// Exit code, `None` if the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// True for exit code 0.
    pub success: bool,
    /// Network attachment failure, if one was requested and failed.
    pub network_error: Option<Error>,
    /// Cleanup failures after the command ran.
    pub teardown_errors: Vec<Error>,
}

/// Progress of a launch, logged at every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    /// Manifest loaded and launch request derived.
    Resolved,
    /// Control group exists.
    CgroupCreated,
    /// Membership prepared for the container process.
    ProcessJoined,
    /// Root switched to the image.
    FsIsolated,
    /// Device attached to the container's bridge.
    NetAttached,
    /// Command running.
    Executing,
    /// Releasing resources.
    Teardown,
}

impl fmt::Display for LaunchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Resolved => "resolved",
            Self::CgroupCreated => "cgroup-created",
            Self::ProcessJoined => "process-joined",
            Self::FsIsolated => "fs-isolated",
            Self::NetAttached => "net-attached",
            Self::Executing => "executing",
            Self::Teardown => "teardown",
        };
        f.write_str(s)
    }
}

/// Returns the bridge name for a container (`gk` + 8 hex chars).
pub fn bridge_name(container_uuid: &Uuid) -> String {
    let hex = container_uuid.simple().to_string();
    format!("{}{}", BRIDGE_PREFIX, &hex[..8])
}

// =============================================================================
// Launcher
// =============================================================================

/// Launches containers from images in an [`ImageStore`].
pub struct ContainerLauncher<H: Host> {
    host: H,
    store: Arc<ImageStore>,
    cpu_shares: u64,
}

#[cfg(target_os = "linux")]
impl ContainerLauncher<host::LinuxHost> {
    /// Creates a launcher on the Linux host from a [`Config`].
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = Arc::new(ImageStore::new(&config.base_dir)?);
        Ok(Self::new(host::LinuxHost::new(&config.cgroup_root), store)
            .with_cpu_shares(config.cpu_shares))
    }
}

impl<H: Host> ContainerLauncher<H> {
    /// Creates a launcher from explicit parts.
    pub fn new(host: H, store: Arc<ImageStore>) -> Self {
        Self {
            host,
            store,
            cpu_shares: crate::constants::DEFAULT_CPU_SHARES,
        }
    }

    /// Sets the CPU shares used when [`LaunchOptions::cpu_shares`] is `None`.
    pub fn with_cpu_shares(mut self, shares: u64) -> Self {
        self.cpu_shares = shares;
        self
    }

    /// Returns the host.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Resolves `image` from the store and runs its configured command.
    ///
    /// A non-zero exit is reported in [`LaunchOutcome::exit_code`], not as
    /// an error.
    ///
    /// # Errors
    ///
    /// See the module-level failure table. A failed launch whose cleanup
    /// also failed returns [`Error::Launch`].
    pub async fn run(&self, image: &str, options: &LaunchOptions) -> Result<LaunchOutcome> {
        let reference = ImageReference::parse(image)?;
        let request = self.resolve(&reference, options)?;
        debug!(reference = %reference, state = %LaunchState::Resolved, "launch state");

        let _serial = LAUNCH_LOCK.lock().await;
        let _image_lock = self.store.lock(&reference)?;

        let uuid = Uuid::new_v4();
        let container_id = format!("{}{}", CONTAINER_ID_PREFIX, uuid);
        info!("Starting container {} from {}", container_id, reference);

        let cgroup_name = format!(
            "{}-{}",
            reference.storage_key(),
            &uuid.simple().to_string()[..8]
        );
        let bridge = options.device.as_deref().map(|d| (bridge_name(&uuid), d));

        self.launch(container_id, &cgroup_name, bridge, &request).await
    }

    /// Loads the manifest and derives the launch request. Touches no OS
    /// resource.
    fn resolve(&self, reference: &ImageReference, options: &LaunchOptions) -> Result<LaunchRequest> {
        let manifest = self.store.load_manifest(reference)?;
        let runtime = manifest.runtime_config(&reference.to_string())?;

        let command = runtime.command();
        if command.first().is_none_or(|c| c.is_empty()) {
            return Err(Error::Config {
                reference: reference.to_string(),
                reason: "image has no command".to_string(),
            });
        }

        let dir = self.store.path_for(reference);
        let image_path = dir.canonicalize().map_err(|e| Error::NotFound {
            reference: reference.to_string(),
            path: dir.clone(),
            reason: e.to_string(),
        })?;

        Ok(LaunchRequest {
            image_path,
            working_dir: runtime.working_dir,
            command,
            env: runtime.env,
            cpu_shares: options.cpu_shares.unwrap_or(self.cpu_shares),
        })
    }

    async fn launch(
        &self,
        container_id: String,
        cgroup_name: &str,
        bridge: Option<(String, &str)>,
        request: &LaunchRequest,
    ) -> Result<LaunchOutcome> {
        let state = |s: LaunchState| debug!(container = %container_id, state = %s, "launch state");

        let cgroup = self.host.create_cgroup(cgroup_name, request.cpu_shares)?;
        state(LaunchState::CgroupCreated);

        let membership = match self.host.prepare_join(&cgroup) {
            Ok(m) => m,
            Err(e) => return Err(self.abort(e, None, cgroup)),
        };
        state(LaunchState::ProcessJoined);

        let root = match self.host.enter_root(&request.image_path) {
            Ok(r) => r,
            Err(e) => return Err(self.abort(e, Some(membership), cgroup)),
        };
        state(LaunchState::FsIsolated);

        let mut network_error = None;
        let mut attached = None;
        if let Some((name, device)) = bridge {
            match self.host.attach_network(&name, device).await {
                Ok(()) => {
                    state(LaunchState::NetAttached);
                    attached = Some(name);
                }
                Err(e) => {
                    warn!("Continuing without network: {}", e);
                    network_error = Some(e);
                }
            }
        }

        state(LaunchState::Executing);
        let result = self.host.execute(request, &membership).await;

        state(LaunchState::Teardown);
        let mut teardown = Vec::new();
        if let Some(name) = attached
            && let Err(e) = self.host.detach_network(&name).await
        {
            teardown.push(e);
        }
        drop(membership);
        if let Err(e) = self.host.restore_root(root) {
            teardown.push(e);
        }
        if let Err(e) = self.host.delete_cgroup(cgroup) {
            teardown.push(e);
        }
        for e in &teardown {
            warn!("Teardown of {} incomplete: {}", container_id, e);
        }

        match result {
            Ok(exit_code) => {
                info!("Container {} exited with {:?}", container_id, exit_code);
                Ok(LaunchOutcome {
                    container_id,
                    exit_code,
                    success: exit_code == Some(0),
                    network_error,
                    teardown_errors: teardown,
                })
            }
            Err(e) => Err(Error::with_teardown(e, teardown)),
        }
    }

    /// Releases what an early failure left acquired and returns the
    /// aggregated error.
    fn abort(
        &self,
        primary: Error,
        membership: Option<H::Membership>,
        cgroup: H::Cgroup,
    ) -> Error {
        drop(membership);
        let teardown = self.host.delete_cgroup(cgroup).err().into_iter().collect();
        Error::with_teardown(primary, teardown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_name_fits_ifnamsiz() {
        let name = bridge_name(&Uuid::new_v4());
        assert!(name.starts_with(BRIDGE_PREFIX));
        assert_eq!(name.len(), BRIDGE_PREFIX.len() + 8);
        assert!(name.len() <= crate::constants::MAX_IFNAME_LEN);
    }

    #[test]
    fn test_working_dir_defaults_to_root() {
        let mut request = LaunchRequest {
            image_path: PathBuf::from("/images/library_alpine"),
            working_dir: String::new(),
            command: vec!["/bin/sh".to_string()],
            env: vec![],
            cpu_shares: 100,
        };
        assert_eq!(request.working_dir_or_root(), "/");
        request.working_dir = "/srv".to_string();
        assert_eq!(request.working_dir_or_root(), "/srv");
    }
}
