//! # Engine Constants
//!
//! Defines defaults, resource limits, timeouts, and on-disk names for the
//! pull pipeline and the container launcher. These constants are the
//! **single source of truth** for bounds used throughout the codebase; the
//! [`Config`](crate::config::Config) defaults are built from them.
//!
//! ## Modification Guidelines
//!
//! Before modifying any constant:
//! 1. Check the on-disk layout constants against images already pulled
//!    (changing a directory name orphans existing stores)
//! 2. Consider interactions with other limits (e.g. `COPY_BUFFER_SIZE ×
//!    DEFAULT_PULL_CONCURRENCY` is the peak copy-buffer memory of a pull)
//! 3. Update dependent tests
//!
//! ## Cross-References
//!
//! - [`crate::reference`]: reference validation limits and defaults
//! - [`crate::registry`]: endpoints, media types, and timeouts
//! - [`crate::storage`]: on-disk layout names and copy buffer size
//! - [`crate::launch`]: cgroup defaults and bridge naming

use std::time::Duration;

// =============================================================================
// Image References
// =============================================================================

/// Library used when a reference has no `library/` segment.
///
/// Matches Docker Hub's namespace for official images.
pub const DEFAULT_LIBRARY: &str = "library";

/// Tag used when a reference has no `:tag` suffix.
pub const DEFAULT_TAG: &str = "latest";

/// Maximum image reference length in bytes.
///
/// **Security**: References become path segments and URL segments. Bounding
/// them keeps both well inside filesystem and HTTP limits.
pub const MAX_IMAGE_REF_LEN: usize = 512;

/// Valid characters for each reference segment (library, name, tag).
///
/// Includes: `a-z`, `A-Z`, `0-9`, `-`, `_`, `.`
///
/// **Security**: Excludes `/` and `:` inside segments. A segment is used
/// verbatim in the storage key `{library}_{name}`, so a separator here would
/// escape the base directory.
pub const REFERENCE_SEGMENT_VALID_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_.";

// =============================================================================
// Registry Endpoints
// =============================================================================

/// Default registry API base (Docker Registry V2, version segment included).
pub const DEFAULT_REGISTRY_URL: &str = "https://registry-1.docker.io/v2";

/// Default token issuer for bearer authentication.
pub const DEFAULT_AUTH_URL: &str = "https://auth.docker.io/token";

/// Default `service` parameter sent to the token issuer.
pub const DEFAULT_AUTH_SERVICE: &str = "registry.docker.io";

/// `Accept` header for manifest requests.
///
/// The manifest model is the schema-1 shape (`fsLayers` + `history`).
pub const MANIFEST_ACCEPT: &str = concat!(
    "application/vnd.docker.distribution.manifest.v1+prettyjws, ",
    "application/vnd.docker.distribution.manifest.v1+json, ",
    "application/json"
);

/// `Accept` header for token requests.
pub const JSON_ACCEPT: &str = "application/json";

/// User agent sent with every registry request.
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

// =============================================================================
// Size Limits
// =============================================================================

/// Maximum manifest body size (1 MiB).
///
/// **Security**: Manifests are buffered for JSON decoding. Schema-1
/// manifests with full history are typically under 100 KiB.
pub const MAX_MANIFEST_SIZE: usize = 1024 * 1024;

/// Chunk size used when copying blob streams to disk (1 MiB).
///
/// Blobs are never held in memory whole; at most one buffer of this size is
/// live per in-flight layer.
pub const COPY_BUFFER_SIZE: usize = 1024 * 1024;

/// Default number of layer blobs fetched concurrently within one pull.
pub const DEFAULT_PULL_CONCURRENCY: usize = 4;

// =============================================================================
// Timeouts
// =============================================================================

/// Timeout for token and manifest requests (30 seconds).
///
/// Blob downloads are not bounded by a total timeout because their size is
/// arbitrary; they rely on [`CONNECT_TIMEOUT`] and transport errors.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for establishing a registry connection (10 seconds).
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Storage Paths
// =============================================================================

/// Default base directory for pulled images (relative to the working dir).
pub const DEFAULT_BASE_DIR: &str = "gocker-images";

/// Environment variable overriding the base directory.
pub const BASE_DIR_ENV: &str = "GOCKER_BASE_DIR";

/// Environment variable overriding the registry API base.
pub const REGISTRY_URL_ENV: &str = "GOCKER_REGISTRY_URL";

/// Environment variable overriding the token issuer URL.
pub const AUTH_URL_ENV: &str = "GOCKER_AUTH_URL";

/// Environment variable overriding the token `service` parameter.
pub const AUTH_SERVICE_ENV: &str = "GOCKER_AUTH_SERVICE";

/// Extension of the manifest file stored next to each image directory.
pub const MANIFEST_EXTENSION: &str = "json";

/// Per-image subdirectory holding layer data.
pub const LAYERS_DIR: &str = "layers";

/// Subdirectory of [`LAYERS_DIR`] holding raw layer blobs by digest.
pub const CONTENTS_DIR: &str = "contents";

/// Subdirectory of the base directory holding advisory lock files.
pub const LOCKS_DIR: &str = ".locks";

// =============================================================================
// Resource Control
// =============================================================================

/// Default CPU shares for a launched container.
///
/// cgroup v1 writes this to `cpu.shares`; cgroup v2 converts it to
/// `cpu.weight` (see [`crate::launch::cgroup::shares_to_weight`]).
pub const DEFAULT_CPU_SHARES: u64 = 100;

/// Minimum CPU shares accepted by the kernel.
pub const MIN_CPU_SHARES: u64 = 2;

/// Maximum CPU shares accepted by the kernel.
pub const MAX_CPU_SHARES: u64 = 262_144;

/// Default cgroup filesystem mount point.
pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Parent group under which every container group is created.
pub const CGROUP_PARENT: &str = "gocker";

// =============================================================================
// Networking
// =============================================================================

/// Prefix of per-container bridge interface names.
pub const BRIDGE_PREFIX: &str = "gk";

/// Maximum network interface name length (IFNAMSIZ - 1).
pub const MAX_IFNAME_LEN: usize = 15;

/// Prefix of generated container identifiers.
pub const CONTAINER_ID_PREFIX: &str = "c_";

// =============================================================================
// Validation Helpers
// =============================================================================

/// Validates a reference segment (library, name, or tag).
///
/// # Returns
///
/// `Ok(())` if valid, `Err(reason)` with a description of the failure.
#[inline]
#[must_use = "validation result must be checked before the segment is used in a path"]
pub fn validate_reference_segment(segment: &str) -> std::result::Result<(), &'static str> {
    if segment.is_empty() {
        return Err("empty segment");
    }
    if segment == "." || segment == ".." {
        return Err("segment cannot be '.' or '..'");
    }
    if !segment
        .chars()
        .all(|c| REFERENCE_SEGMENT_VALID_CHARS.contains(c))
    {
        return Err("segment contains invalid characters");
    }
    Ok(())
}

/// Validates a layer digest for use as a path segment.
///
/// A digest has the form `algorithm:encoded`. The algorithm may contain
/// `a-z`, `0-9`, `+`, `.`, `_`, `-`; the encoded part may contain
/// `A-Z`, `a-z`, `0-9`, `=`, `_`, `-`.
#[must_use = "validation result must be checked before the digest is used in a path"]
pub fn validate_digest(digest: &str) -> std::result::Result<(), &'static str> {
    let Some((algorithm, encoded)) = digest.split_once(':') else {
        return Err("digest must have the form algorithm:encoded");
    };
    if algorithm.is_empty() || encoded.is_empty() {
        return Err("digest algorithm and encoded part must be non-empty");
    }
    if !algorithm
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "+._-".contains(c))
    {
        return Err("digest algorithm contains invalid characters");
    }
    if !encoded
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "=_-".contains(c))
    {
        return Err("digest encoded part contains invalid characters");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_validation() {
        assert!(validate_reference_segment("redis").is_ok());
        assert!(validate_reference_segment("my-app_1.2").is_ok());
        assert!(validate_reference_segment("").is_err());
        assert!(validate_reference_segment("..").is_err());
        assert!(validate_reference_segment("a/b").is_err());
        assert!(validate_reference_segment("a:b").is_err());
    }

    #[test]
    fn test_digest_validation() {
        assert!(validate_digest("sha256:abcdef0123").is_ok());
        assert!(validate_digest("sha256+b64u:aGVsbG8=").is_ok());
        assert!(validate_digest("abcdef").is_err());
        assert!(validate_digest("sha256:").is_err());
        assert!(validate_digest("sha256:../../etc").is_err());
        assert!(validate_digest("sha256:ab/cd").is_err());
    }
}
