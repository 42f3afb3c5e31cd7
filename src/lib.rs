//! # gocker
//!
//! **Minimal Container Engine**
//!
//! Pulls images from a Docker Registry V2 endpoint into a local image store
//! and launches their configured command inside a CPU-limited control group
//! with the image directory as the root filesystem.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                             gocker                                  │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌───────────────────────────────┐  ┌───────────────────────────┐   │
//! │  │         PullPipeline          │  │    ContainerLauncher      │   │
//! │  │  token → manifest → layers    │  │  cgroup → join → chroot   │   │
//! │  │  (bounded concurrency)        │  │  → bridge → exec → undo   │   │
//! │  └───────┬───────────────┬───────┘  └──────┬──────────────┬─────┘   │
//! │          │               │                 │              │         │
//! │  ┌───────▼──────┐  ┌─────▼─────────────────▼───┐   ┌──────▼──────┐  │
//! │  │RegistryClient│  │        ImageStore         │   │    Host     │  │
//! │  │ bearer auth  │  │ layout │ flock │ verify   │   │ (LinuxHost) │  │
//! │  └──────────────┘  └───────────────────────────┘   └─────────────┘  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # On-Disk Layout
//!
//! ```text
//! {base}/{library}_{name}.json
//! {base}/{library}_{name}/layers/contents/{digest}
//! {base}/.locks/{library}_{name}.lock
//! ```
//!
//! # Security Model
//!
//! - **Path Safety**: reference segments and layer digests are validated
//!   before they become path segments (see [`constants::validate_digest`]).
//! - **Content Verification**: `sha256` layers are hashed while streaming
//!   and rejected on mismatch before they reach their final path.
//! - **Bounded Memory**: manifests are capped at `MAX_MANIFEST_SIZE`; blobs
//!   are streamed through a fixed-size buffer.
//! - **Scoped Privilege**: the root switch and control group exist only for
//!   the duration of a launch and are released on every path.
//!
//! # Not Provided
//!
//! Layer extraction, PID/UTS/IPC namespaces, signature verification, and
//! multi-container networking are outside this crate.
//!
//! # Example
//!
//! ```rust,ignore
//! use gocker::{Config, ContainerLauncher, LaunchOptions, PullPipeline};
//!
//! #[tokio::main]
//! async fn main() -> gocker::Result<()> {
//!     let config = Config::from_env();
//!
//!     let report = PullPipeline::from_config(&config)?.pull("alpine:3.19").await?;
//!     println!("{} layers", report.digests.len());
//!
//!     let launcher = ContainerLauncher::from_config(&config)?;
//!     let outcome = launcher.run("alpine:3.19", &LaunchOptions::default()).await?;
//!     println!("exit: {:?}", outcome.exit_code);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod launch;
pub mod manifest;
pub mod pull;
pub mod reference;
pub mod registry;
pub mod storage;

// Re-exports
pub use config::{Config, RegistryConfig};
pub use error::{Error, RegistryFailure, Result};
#[cfg(target_os = "linux")]
pub use launch::host::LinuxHost;
pub use launch::{ContainerLauncher, Host, LaunchOptions, LaunchOutcome, LaunchRequest};
pub use manifest::{HistoryEntry, Layer, Manifest, RuntimeConfig};
pub use pull::{PullPipeline, PullReport, PullState};
pub use reference::ImageReference;
pub use registry::{AuthToken, BlobStream, RegistryClient};
pub use storage::{ImageLock, ImageStore, ImageSummary};
