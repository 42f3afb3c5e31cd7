//! Tests for error formatting, source chains, and teardown aggregation.

use gocker::{Error, RegistryFailure};
use std::error::Error as _;
use std::path::PathBuf;

// =============================================================================
// Display Formatting
// =============================================================================

#[test]
fn test_display_messages() {
    let cases = [
        (
            Error::InvalidImageReference {
                reference: "a/b/c".to_string(),
                reason: "too many path segments".to_string(),
            },
            "invalid image reference 'a/b/c': too many path segments",
        ),
        (
            Error::ImageBusy {
                reference: "library/alpine:latest".to_string(),
            },
            "image library/alpine:latest is in use by another pull or launch",
        ),
        (
            Error::Persistence {
                path: PathBuf::from("/store/x.json"),
                reason: "disk full".to_string(),
            },
            "unable to persist /store/x.json: disk full",
        ),
        (
            Error::Config {
                reference: "alpine".to_string(),
                reason: "no command".to_string(),
            },
            "invalid runtime config for alpine: no command",
        ),
        (
            Error::Network {
                bridge: "gk0011aabb".to_string(),
                device: "eth0".to_string(),
                reason: "no such device".to_string(),
            },
            "unable to attach eth0 to bridge gk0011aabb: no such device",
        ),
    ];

    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn test_pull_without_digest() {
    let err = Error::pull(
        "library/alpine:latest",
        None,
        Error::Auth {
            scope: "repository:library/alpine:pull".to_string(),
            cause: RegistryFailure::Unreachable("connection refused".to_string()),
        },
    );
    assert_eq!(err.to_string(), "unable to pull image library/alpine:latest");
}

// =============================================================================
// Source Chains
// =============================================================================

#[test]
fn test_registry_failure_is_source() {
    let err = Error::Manifest {
        reference: "library/alpine:latest".to_string(),
        cause: RegistryFailure::Refused(401),
    };

    let source = err.source().unwrap();
    assert_eq!(
        source.to_string(),
        "registry refused the request with status 401"
    );
}

#[test]
fn test_refused_vs_unreachable() {
    assert_eq!(RegistryFailure::Refused(404).status(), Some(404));
    assert_eq!(
        RegistryFailure::Unreachable("timeout".to_string()).status(),
        None
    );
    assert_eq!(
        RegistryFailure::InvalidResponse("bad json".to_string()).status(),
        None
    );
}

#[test]
fn test_io_conversion() {
    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    let err: Error = io.into();
    assert!(matches!(err, Error::Io(_)));
    assert!(err.to_string().contains("denied"));
}

// =============================================================================
// Teardown Aggregation
// =============================================================================

#[test]
fn test_with_teardown_aggregates() {
    let primary = Error::Exec {
        command: "/bin/false".to_string(),
        reason: "exec failed".to_string(),
    };
    let teardown = vec![
        Error::Teardown {
            resource: "root".to_string(),
            reason: "fchdir failed".to_string(),
        },
        Error::Teardown {
            resource: "cgroup".to_string(),
            reason: "busy".to_string(),
        },
    ];

    let err = Error::with_teardown(primary, teardown);

    assert!(matches!(err.primary(), Error::Exec { .. }));
    assert_eq!(err.teardown_errors().len(), 2);
    assert!(err.teardown_errors().iter().all(Error::is_teardown));

    let message = err.to_string();
    assert!(message.starts_with("unable to execute '/bin/false': exec failed"));
    assert!(message.contains("cleanup also failed"));
    assert!(message.contains("unable to clean up root: fchdir failed"));
    assert!(message.contains("unable to clean up cgroup: busy"));
}

#[test]
fn test_plain_error_has_no_teardown() {
    let err = Error::ImageBusy {
        reference: "alpine".to_string(),
    };
    assert!(err.teardown_errors().is_empty());
    assert!(matches!(err.primary(), Error::ImageBusy { .. }));
    assert!(!err.is_teardown());
}
