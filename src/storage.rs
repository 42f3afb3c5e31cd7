//! # Image Store
//!
//! Persists pulled images under a base directory in a fixed layout:
//!
//! ```text
//! {base}/
//! ├── library_alpine.json            (manifest, pretty JSON)
//! ├── library_alpine/
//! │   └── layers/
//! │       └── contents/
//! │           ├── sha256:ab12...     (raw layer blob)
//! │           └── sha256:cd34...
//! └── .locks/
//!     └── library_alpine.lock        (advisory flock)
//! ```
//!
//! Paths are derived by the pure function [`image_dir`]; nothing here reads
//! the environment.
//!
//! ## Security Model
//!
//! ### Path Safety
//!
//! Reference segments are validated at parse time and layer digests are
//! checked with [`validate_digest`] before any path is built from them, so
//! neither can escape the base directory.
//!
//! ### Atomic Writes
//!
//! Manifests and blobs are written to a uniquely named temp file in the
//! destination directory and renamed into place. A blob is also fsynced and,
//! for `sha256` digests, hashed while streaming and compared to its digest
//! before the rename. On any failure, and when a write is cancelled by
//! dropping its future, the temp file is removed, so a content path is
//! either absent or complete.
//!
//! ### Exclusivity
//!
//! [`ImageStore::lock`] takes a non-blocking exclusive `flock` on the
//! image's lock file. A second pull or launch of the same image fails with
//! [`Error::ImageBusy`] instead of interleaving writes. Locks are released
//! when the [`ImageLock`] is dropped or the process exits.

use crate::constants::{
    CONTENTS_DIR, COPY_BUFFER_SIZE, LAYERS_DIR, LOCKS_DIR, MANIFEST_EXTENSION, validate_digest,
};
use crate::error::{Error, RegistryFailure, Result};
use crate::manifest::Manifest;
use crate::reference::ImageReference;
use chrono::{DateTime, Local};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Returns `{base}/{library}_{name}`, the directory stem of an image.
///
/// The manifest lives next to it at `{stem}.json`.
pub fn image_dir(base: &Path, reference: &ImageReference) -> PathBuf {
    base.join(reference.storage_key())
}

/// On-disk store of pulled images.
///
/// ## Thread Safety
///
/// `ImageStore` holds no mutable state and is shared across tasks behind an
/// `Arc`. Concurrent writers of different blobs never collide because each
/// uses its own temp file; writers of the same image are serialized by
/// [`ImageLock`].
#[derive(Debug, Clone)]
pub struct ImageStore {
    base_dir: PathBuf,
}

impl ImageStore {
    /// Opens a store rooted at `base_dir`, creating the directory if needed.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).map_err(|e| Error::Persistence {
            path: base_dir.clone(),
            reason: format!("unable to create base directory: {}", e),
        })?;

        debug!("Image store at: {}", base_dir.display());
        Ok(Self { base_dir })
    }

    /// Returns the base directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Returns the image directory stem (`{base}/{library}_{name}`).
    pub fn path_for(&self, reference: &ImageReference) -> PathBuf {
        image_dir(&self.base_dir, reference)
    }

    /// Returns `{stem}.json`.
    pub fn manifest_path(&self, reference: &ImageReference) -> PathBuf {
        // Names may contain '.', so append rather than `with_extension`.
        self.base_dir
            .join(format!("{}.{}", reference.storage_key(), MANIFEST_EXTENSION))
    }

    /// Returns `{stem}/layers`.
    pub fn layers_dir(&self, reference: &ImageReference) -> PathBuf {
        self.path_for(reference).join(LAYERS_DIR)
    }

    /// Returns `{stem}/layers/contents`.
    pub fn contents_dir(&self, reference: &ImageReference) -> PathBuf {
        self.layers_dir(reference).join(CONTENTS_DIR)
    }

    /// Returns the content file of one layer blob.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the digest is not a safe file name.
    pub fn content_path(&self, reference: &ImageReference, digest: &str) -> Result<PathBuf> {
        let contents = self.contents_dir(reference);
        validate_digest(digest).map_err(|reason| Error::Persistence {
            path: contents.clone(),
            reason: format!("unsafe layer digest '{}': {}", digest, reason),
        })?;
        Ok(contents.join(digest))
    }

    // =========================================================================
    // Manifest
    // =========================================================================

    /// Writes the manifest as pretty JSON, replacing any previous copy.
    pub fn write_manifest(&self, reference: &ImageReference, manifest: &Manifest) -> Result<PathBuf> {
        let path = self.manifest_path(reference);
        let persist_err = |reason: String| Error::Persistence {
            path: path.clone(),
            reason,
        };

        let json = serde_json::to_vec_pretty(manifest)
            .map_err(|e| persist_err(format!("unable to encode manifest: {}", e)))?;

        let temp = TempGuard::new(temp_sibling(&path));
        File::create(temp.path())
            .and_then(|mut f| f.write_all(&json).and_then(|_| f.sync_all()))
            .and_then(|_| fs::rename(temp.path(), &path))
            .map_err(|e| persist_err(format!("unable to write manifest: {}", e)))?;
        temp.keep();

        debug!("Wrote manifest: {}", path.display());
        Ok(path)
    }

    /// Loads a previously pulled manifest.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the file is missing or unparsable.
    pub fn load_manifest(&self, reference: &ImageReference) -> Result<Manifest> {
        let path = self.manifest_path(reference);
        let not_found = |reason: String| Error::NotFound {
            reference: reference.to_string(),
            path: path.clone(),
            reason,
        };

        let data = fs::read(&path).map_err(|e| not_found(e.to_string()))?;
        serde_json::from_slice(&data).map_err(|e| not_found(format!("unparsable manifest: {}", e)))
    }

    /// Creates `{stem}/layers/contents`. Idempotent.
    pub fn ensure_layer_dirs(&self, reference: &ImageReference) -> Result<PathBuf> {
        let contents = self.contents_dir(reference);
        fs::create_dir_all(&contents).map_err(|e| Error::Persistence {
            path: contents.clone(),
            reason: format!("unable to create layer directories: {}", e),
        })?;
        Ok(contents)
    }

    // =========================================================================
    // Blobs
    // =========================================================================

    /// Streams a layer blob into its content file.
    ///
    /// Copies in [`COPY_BUFFER_SIZE`] chunks, fsyncs, verifies `sha256`
    /// digests, then renames into place. Returns the number of bytes stored.
    ///
    /// # Errors
    ///
    /// - [`Error::Persistence`] for an unsafe digest or a local write failure
    /// - [`Error::BlobFetch`] if reading from `reader` fails
    /// - [`Error::DigestMismatch`] if the content does not hash to `digest`
    pub async fn stream_blob_to_file<R>(
        &self,
        reference: &ImageReference,
        digest: &str,
        reader: R,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin + Send,
    {
        let path = self.content_path(reference, digest)?;
        // Removed on every early return, and when this future is dropped
        // mid-stream by a cancelled pull.
        let temp = TempGuard::new(temp_sibling(&path));

        let written = copy_verified(digest, reader, temp.path()).await?;
        tokio::fs::rename(temp.path(), &path)
            .await
            .map_err(|e| Error::Persistence {
                path: path.clone(),
                reason: format!("unable to move blob into place: {}", e),
            })?;
        temp.keep();

        debug!(digest = %digest, bytes = written, "stored blob");
        Ok(written)
    }

    // =========================================================================
    // Locking
    // =========================================================================

    /// Takes the image's exclusive advisory lock without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ImageBusy`] if another holder has it.
    pub fn lock(&self, reference: &ImageReference) -> Result<ImageLock> {
        let dir = self.base_dir.join(LOCKS_DIR);
        fs::create_dir_all(&dir).map_err(|e| Error::Persistence {
            path: dir.clone(),
            reason: format!("unable to create lock directory: {}", e),
        })?;

        let path = dir.join(format!("{}.lock", reference.storage_key()));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::Persistence {
                path: path.clone(),
                reason: format!("unable to open lock file: {}", e),
            })?;

        // SAFETY: the fd is owned by `file` and valid for this call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                return Err(Error::ImageBusy {
                    reference: reference.to_string(),
                });
            }
            return Err(Error::Persistence {
                path,
                reason: format!("unable to lock: {}", err),
            });
        }

        debug!(lock_path = %path.display(), "acquired image lock");
        Ok(ImageLock { file, path })
    }

    // =========================================================================
    // Listing
    // =========================================================================

    /// Summarizes every image with a manifest in the store, sorted by key.
    ///
    /// Manifests that fail to parse are skipped with a warning.
    pub fn list(&self) -> Result<Vec<ImageSummary>> {
        let entries = fs::read_dir(&self.base_dir).map_err(|e| Error::Persistence {
            path: self.base_dir.clone(),
            reason: format!("unable to read store: {}", e),
        })?;

        let mut images = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(MANIFEST_EXTENSION)
            {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };

            let manifest: Manifest = match fs::read(&path)
                .map_err(Error::from)
                .and_then(|data| serde_json::from_slice(&data).map_err(Error::from))
            {
                Ok(m) => m,
                Err(e) => {
                    warn!("Skipping unreadable manifest {}: {}", path.display(), e);
                    continue;
                }
            };

            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(DateTime::<Local>::from)
                .ok();
            let contents = self.base_dir.join(&key).join(LAYERS_DIR).join(CONTENTS_DIR);

            images.push(ImageSummary {
                name: manifest.name.clone(),
                tag: manifest.tag.clone(),
                architecture: manifest.architecture.clone(),
                layers: manifest.distinct_digests().len(),
                size: dir_size(&contents),
                modified,
                key,
            });
        }

        images.sort_by(|a, b| a.key.cmp(&b.key));
        info!("Found {} images in {}", images.len(), self.base_dir.display());
        Ok(images)
    }
}

/// Copies `reader` into `temp_path`, hashing as it goes.
async fn copy_verified<R>(digest: &str, mut reader: R, temp_path: &Path) -> Result<u64>
where
    R: AsyncRead + Unpin + Send,
{
    let write_err = |e: std::io::Error| Error::Persistence {
        path: temp_path.to_path_buf(),
        reason: e.to_string(),
    };

    let mut file = tokio::fs::File::create(temp_path).await.map_err(write_err)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut written = 0u64;

    loop {
        let n = reader.read(&mut buf).await.map_err(|e| Error::BlobFetch {
            digest: digest.to_string(),
            cause: RegistryFailure::Unreachable(e.to_string()),
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        file.write_all(&buf[..n]).await.map_err(write_err)?;
        written += n as u64;
    }

    file.flush().await.map_err(write_err)?;
    file.sync_all().await.map_err(write_err)?;
    drop(file);

    if let Some(("sha256", expected)) = digest.split_once(':') {
        let computed = hex::encode(hasher.finalize());
        if !computed.eq_ignore_ascii_case(expected) {
            return Err(Error::DigestMismatch {
                digest: digest.to_string(),
                computed: format!("sha256:{}", computed),
            });
        }
    } else {
        debug!(digest = %digest, "skipping verification for non-sha256 digest");
    }

    Ok(written)
}

/// Unique temp file next to `path`: `.{name}.tmp.{uuid}`.
fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp.{}", name, uuid::Uuid::new_v4()))
}

/// A temp file path that is deleted on drop unless [`keep`](Self::keep)
/// is called after it was renamed into place.
#[derive(Debug)]
struct TempGuard {
    path: PathBuf,
    armed: bool,
}

impl TempGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed temp file {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove temp file {}: {}", self.path.display(), e),
        }
    }
}

/// Sums regular files directly in `dir`, ignoring temp files. Missing → 0.
fn dir_size(dir: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}

/// Exclusive advisory lock on one image. Released on drop.
#[derive(Debug)]
pub struct ImageLock {
    file: File,
    path: PathBuf,
}

impl ImageLock {
    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ImageLock {
    fn drop(&mut self) {
        // SAFETY: the fd is still owned by `self.file`.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
        debug!(lock_path = %self.path.display(), "released image lock");
    }
}

/// One stored image, as shown by `gocker images`.
#[derive(Debug, Clone)]
pub struct ImageSummary {
    /// Storage key (`library_name`).
    pub key: String,
    /// Repository name from the manifest.
    pub name: String,
    /// Tag from the manifest.
    pub tag: String,
    /// Architecture from the manifest.
    pub architecture: String,
    /// Number of distinct layers.
    pub layers: usize,
    /// Bytes of stored layer content.
    pub size: u64,
    /// Last modification of the manifest.
    pub modified: Option<DateTime<Local>>,
}

/// Formats a byte count with binary units (`512B`, `1.5KiB`, `3.0MiB`).
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{}B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    for unit in &UNITS[..UNITS.len() - 1] {
        if value < 1024.0 {
            return format!("{:.1}{}", value, unit);
        }
        value /= 1024.0;
    }
    format!("{:.1}{}", value, UNITS[UNITS.len() - 1])
}
