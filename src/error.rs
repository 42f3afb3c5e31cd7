//! Error types for the pull pipeline and the container launcher.
//!
//! Every component returns a typed [`Error`]; only the binary decides to
//! halt and report. Registry failures carry a [`RegistryFailure`] source so
//! callers can tell "registry reachable but refused" apart from "registry
//! unreachable". Cleanup failures are aggregated next to the primary error
//! rather than replacing it.

use std::path::PathBuf;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a registry exchange failed.
#[derive(Debug, thiserror::Error)]
pub enum RegistryFailure {
    /// The request never produced an HTTP response (DNS, connect, TLS,
    /// timeout, or a body stream that broke mid-read).
    #[error("registry unreachable: {0}")]
    Unreachable(String),

    /// The registry answered with a non-success status.
    #[error("registry refused the request with status {0}")]
    Refused(u16),

    /// The registry answered successfully but the body was unusable.
    #[error("invalid registry response: {0}")]
    InvalidResponse(String),
}

impl RegistryFailure {
    /// Returns the HTTP status if the registry refused the request.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Refused(status) => Some(*status),
            _ => None,
        }
    }
}

/// Errors that can occur while pulling or launching images.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Reference Errors
    // =========================================================================
    /// Failed to parse an image reference.
    #[error("invalid image reference '{reference}': {reason}")]
    InvalidImageReference { reference: String, reason: String },

    // =========================================================================
    // Registry Errors
    // =========================================================================
    /// Token acquisition failed.
    #[error("unable to get auth token for {scope}")]
    Auth {
        scope: String,
        #[source]
        cause: RegistryFailure,
    },

    /// Manifest retrieval or validation failed.
    #[error("unable to get manifest for {reference}")]
    Manifest {
        reference: String,
        #[source]
        cause: RegistryFailure,
    },

    /// Blob retrieval failed.
    #[error("unable to fetch blob {digest}")]
    BlobFetch {
        digest: String,
        #[source]
        cause: RegistryFailure,
    },

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Writing an artifact to the image store failed.
    #[error("unable to persist {}: {reason}", path.display())]
    Persistence { path: PathBuf, reason: String },

    /// Streamed blob content does not hash to its digest.
    #[error("content of {digest} does not match its digest (computed {computed})")]
    DigestMismatch { digest: String, computed: String },

    /// Another pull or launch holds the image's advisory lock.
    #[error("image {reference} is in use by another pull or launch")]
    ImageBusy { reference: String },

    // =========================================================================
    // Pull Errors
    // =========================================================================
    /// A pull failed; wraps the underlying cause.
    #[error("unable to pull image {reference}{}", digest.as_ref().map(|d| format!(" (layer {d})")).unwrap_or_default())]
    Pull {
        reference: String,
        digest: Option<String>,
        #[source]
        source: Box<Error>,
    },

    // =========================================================================
    // Launch Errors
    // =========================================================================
    /// The image has no usable manifest in the store.
    #[error("image {reference} not found at {}: {reason}", path.display())]
    NotFound {
        reference: String,
        path: PathBuf,
        reason: String,
    },

    /// The image's runtime configuration is unusable.
    #[error("invalid runtime config for {reference}: {reason}")]
    Config { reference: String, reason: String },

    /// A control group or root switch could not be established.
    #[error("unable to set up {resource}: {reason}")]
    Resource { resource: String, reason: String },

    /// The network attachment failed.
    #[error("unable to attach {device} to bridge {bridge}: {reason}")]
    Network {
        bridge: String,
        device: String,
        reason: String,
    },

    /// The container command could not be executed.
    #[error("unable to execute '{command}': {reason}")]
    Exec { command: String, reason: String },

    /// Releasing an acquired resource failed.
    #[error("unable to clean up {resource}: {reason}")]
    Teardown { resource: String, reason: String },

    /// A launch failed and cleanup failed too; both are kept.
    #[error("{primary}{}", format_teardown(teardown))]
    Launch {
        primary: Box<Error>,
        teardown: Vec<Error>,
    },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

fn format_teardown(teardown: &[Error]) -> String {
    if teardown.is_empty() {
        return String::new();
    }
    let joined = teardown
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    format!(" (cleanup also failed: {joined})")
}

impl Error {
    /// Wraps a pull failure with the reference (and failing layer, if any).
    pub fn pull(reference: impl Into<String>, digest: Option<String>, source: Error) -> Self {
        Self::Pull {
            reference: reference.into(),
            digest,
            source: Box::new(source),
        }
    }

    /// Attaches teardown failures to a primary launch error.
    ///
    /// Returns `primary` unchanged when there are no teardown failures.
    pub fn with_teardown(primary: Error, teardown: Vec<Error>) -> Self {
        if teardown.is_empty() {
            primary
        } else {
            Self::Launch {
                primary: Box::new(primary),
                teardown,
            }
        }
    }

    /// Returns the primary error, looking through a [`Error::Launch`]
    /// aggregate.
    pub fn primary(&self) -> &Error {
        match self {
            Self::Launch { primary, .. } => primary,
            other => other,
        }
    }

    /// Returns the teardown failures aggregated into this error.
    pub fn teardown_errors(&self) -> &[Error] {
        match self {
            Self::Launch { teardown, .. } => teardown,
            _ => &[],
        }
    }

    /// Returns true for errors raised by a cleanup step.
    pub fn is_teardown(&self) -> bool {
        matches!(self, Self::Teardown { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
