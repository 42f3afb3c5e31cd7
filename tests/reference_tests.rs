//! Tests for image reference parsing.
//!
//! Validates default library/tag resolution, storage key derivation, and
//! rejection of references that would be unsafe as path segments.

use gocker::constants::MAX_IMAGE_REF_LEN;
use gocker::{Error, ImageReference};

// =============================================================================
// Parsing Tests
// =============================================================================

#[test]
fn test_bare_name_gets_defaults() {
    let r = ImageReference::parse("alpine").unwrap();
    assert_eq!(
        r,
        ImageReference {
            library: "library".to_string(),
            name: "alpine".to_string(),
            tag: "latest".to_string(),
        }
    );
}

#[test]
fn test_library_and_tag() {
    let r = ImageReference::parse("acme/app:1.0").unwrap();
    assert_eq!(r.library, "acme");
    assert_eq!(r.name, "app");
    assert_eq!(r.tag, "1.0");
}

#[test]
fn test_tag_without_library() {
    let r = ImageReference::parse("redis:7").unwrap();
    assert_eq!(r.library, "library");
    assert_eq!(r.name, "redis");
    assert_eq!(r.tag, "7");
}

#[test]
fn test_from_str_matches_parse() {
    let parsed: ImageReference = "acme/app:1.0".parse().unwrap();
    assert_eq!(parsed, ImageReference::parse("acme/app:1.0").unwrap());
}

// =============================================================================
// Derived Names
// =============================================================================

#[test]
fn test_derived_names() {
    let r = ImageReference::parse("acme/app:1.0").unwrap();
    assert_eq!(r.repository(), "acme/app");
    assert_eq!(r.storage_key(), "acme_app");
    assert_eq!(r.scope(), "repository:acme/app:pull");
    assert_eq!(r.to_string(), "acme/app:1.0");
}

#[test]
fn test_display_includes_defaults() {
    let r = ImageReference::parse("alpine").unwrap();
    assert_eq!(r.to_string(), "library/alpine:latest");
}

// =============================================================================
// Rejection Tests
// =============================================================================

#[test]
fn test_rejects_empty() {
    assert!(matches!(
        ImageReference::parse(""),
        Err(Error::InvalidImageReference { .. })
    ));
}

#[test]
fn test_rejects_nested_path() {
    let err = ImageReference::parse("a/b/c").unwrap_err();
    assert!(matches!(err, Error::InvalidImageReference { .. }));
    assert!(err.to_string().contains("a/b/c"));
}

#[test]
fn test_rejects_empty_segments() {
    for input in ["/app", "acme/", "acme/app:", ":tag"] {
        assert!(
            ImageReference::parse(input).is_err(),
            "{} should be rejected",
            input
        );
    }
}

#[test]
fn test_rejects_traversal_segments() {
    for input in ["../app", "acme/..", "app:.."] {
        assert!(
            ImageReference::parse(input).is_err(),
            "{} should be rejected",
            input
        );
    }
}

#[test]
fn test_rejects_invalid_characters() {
    for input in ["ac me/app", "acme/app@sha256", "app:t ag", "app\0"] {
        assert!(
            ImageReference::parse(input).is_err(),
            "{:?} should be rejected",
            input
        );
    }
}

#[test]
fn test_storage_keys_do_not_collide() {
    let err = ImageReference::parse("a_b/c").unwrap_err();
    assert!(matches!(err, Error::InvalidImageReference { .. }));
    assert!(err.to_string().contains("library"));

    let r = ImageReference::parse("a/b_c").unwrap();
    assert_eq!(r.storage_key(), "a_b_c");
    assert_eq!(
        ImageReference::parse("my_app").unwrap().storage_key(),
        "library_my_app"
    );
}

#[test]
fn test_rejects_too_long() {
    let long = "a".repeat(MAX_IMAGE_REF_LEN + 1);
    assert!(ImageReference::parse(&long).is_err());

    let max = "a".repeat(MAX_IMAGE_REF_LEN);
    assert!(ImageReference::parse(&max).is_ok());
}
