//! Root switching for the launcher process.
//!
//! [`RootGuard::enter`] keeps descriptors for the current root and working
//! directory, then `chroot`s into the image and changes to its `/`.
//! [`RootGuard::release`] restores both through those descriptors:
//!
//! ```text
//! fchdir(old_root) → chroot(".") → fchdir(old_cwd)
//! ```
//!
//! The root is process-wide state. Callers must serialize root switches
//! (the launcher holds its launch lock for the whole sequence).

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A scoped root switch. Restored on [`release`](Self::release) or drop.
#[derive(Debug)]
pub struct RootGuard {
    new_root: PathBuf,
    old_root: File,
    old_cwd: File,
    restored: bool,
}

impl RootGuard {
    /// Switches the process root to `new_root`.
    ///
    /// `new_root` should be canonical; it is resolved against the current
    /// root before the switch.
    pub fn enter(new_root: &Path) -> io::Result<Self> {
        let old_root = File::open("/")?;
        let old_cwd = File::open(".")?;

        std::os::unix::fs::chroot(new_root)?;
        let mut guard = Self {
            new_root: new_root.to_path_buf(),
            old_root,
            old_cwd,
            restored: false,
        };

        if let Err(e) = std::env::set_current_dir("/") {
            guard.restored = true;
            let restored = restore(&guard.old_root, &guard.old_cwd);
            return Err(with_restore_failure(e, restored));
        }

        debug!("Entered root {}", guard.new_root.display());
        Ok(guard)
    }

    /// Path that was made the root.
    pub fn new_root(&self) -> &Path {
        &self.new_root
    }

    /// Restores the original root and working directory.
    pub fn release(mut self) -> io::Result<()> {
        self.restored = true;
        restore(&self.old_root, &self.old_cwd)?;
        debug!("Restored root from {}", self.new_root.display());
        Ok(())
    }
}

impl Drop for RootGuard {
    fn drop(&mut self) {
        if !self.restored
            && let Err(e) = restore(&self.old_root, &self.old_cwd)
        {
            warn!(
                "Failed to restore root after {}: {}",
                self.new_root.display(),
                e
            );
        }
    }
}

fn restore(old_root: &File, old_cwd: &File) -> io::Result<()> {
    fchdir(old_root)?;
    std::os::unix::fs::chroot(".")?;
    fchdir(old_cwd)
}

/// Keeps `primary` and, if restoring also failed, appends that failure.
fn with_restore_failure(primary: io::Error, restored: io::Result<()>) -> io::Error {
    match restored {
        Ok(()) => primary,
        Err(e) => io::Error::new(
            primary.kind(),
            format!("{} (restoring the previous root also failed: {})", primary, e),
        ),
    }
}

fn fchdir(dir: &File) -> io::Result<()> {
    // SAFETY: the descriptor is owned by `dir` and open for the call.
    let rc = unsafe { libc::fchdir(dir.as_raw_fd()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_failure_keeps_primary() {
        let primary = io::Error::new(io::ErrorKind::NotFound, "chdir / failed");

        let err = with_restore_failure(primary, Err(io::Error::other("fchdir failed")));

        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        let message = err.to_string();
        assert!(message.contains("chdir / failed"));
        assert!(message.contains("fchdir failed"));
    }

    #[test]
    fn test_successful_restore_returns_primary() {
        let primary = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err = with_restore_failure(primary, Ok(()));
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert_eq!(err.to_string(), "denied");
    }
}
