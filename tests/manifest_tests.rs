//! Tests for manifest decoding, validation, and runtime config derivation.

use gocker::{Error, HistoryEntry, Layer, Manifest};

const REGISTRY_MANIFEST: &str = r#"{
    "schemaVersion": 1,
    "name": "library/alpine",
    "tag": "3.19",
    "architecture": "amd64",
    "fsLayers": [
        { "blobSum": "sha256:aaaa" },
        { "blobSum": "sha256:bbbb" },
        { "blobSum": "sha256:aaaa" }
    ],
    "history": [
        { "v1Compatibility": "{\"id\":\"x\",\"config\":{\"WorkingDir\":\"/srv\",\"Env\":[\"PATH=/bin\",\"A=1\"],\"Cmd\":[\"/bin/sh\",\"-c\",\"echo hi\"]}}" },
        { "v1Compatibility": "{\"id\":\"y\"}" }
    ],
    "signatures": []
}"#;

fn layer(digest: &str) -> Layer {
    Layer {
        digest: digest.to_string(),
    }
}

fn manifest(layers: Vec<Layer>, history: Vec<&str>) -> Manifest {
    Manifest {
        schema_version: Some(1),
        name: "library/alpine".to_string(),
        tag: "latest".to_string(),
        architecture: "amd64".to_string(),
        layers,
        history: history
            .into_iter()
            .map(|h| HistoryEntry {
                v1_compatibility: h.to_string(),
            })
            .collect(),
    }
}

// =============================================================================
// Decoding
// =============================================================================

#[test]
fn test_decodes_registry_shape() {
    let m: Manifest = serde_json::from_str(REGISTRY_MANIFEST).unwrap();
    assert_eq!(m.name, "library/alpine");
    assert_eq!(m.tag, "3.19");
    assert_eq!(m.architecture, "amd64");
    assert_eq!(m.layers.len(), 3);
    assert_eq!(m.history.len(), 2);
    assert!(m.validate().is_ok());
}

#[test]
fn test_serializes_registry_field_names() {
    let m = manifest(vec![layer("sha256:aaaa")], vec!["{}"]);
    let json = serde_json::to_value(&m).unwrap();
    assert_eq!(json["fsLayers"][0]["blobSum"], "sha256:aaaa");
    assert_eq!(json["history"][0]["v1Compatibility"], "{}");

    let back: Manifest = serde_json::from_value(json).unwrap();
    assert_eq!(back, m);
}

// =============================================================================
// Validation
// =============================================================================

#[test]
fn test_validate_rejects_zero_layers() {
    let m = manifest(vec![], vec!["{}"]);
    let reason = m.validate().unwrap_err();
    assert!(reason.contains("no layers"));
}

#[test]
fn test_validate_rejects_empty_name() {
    let mut m = manifest(vec![layer("sha256:aaaa")], vec![]);
    m.name.clear();
    assert!(m.validate().is_err());
}

#[test]
fn test_validate_rejects_unsafe_digest() {
    for digest in ["sha256:../../etc/passwd", "sha256:ab/cd", "abcd", "sha256:"] {
        let m = manifest(vec![layer("sha256:aaaa"), layer(digest)], vec![]);
        assert!(m.validate().is_err(), "{} should be rejected", digest);
    }
}

#[test]
fn test_distinct_digests_keeps_first_seen_order() {
    let m: Manifest = serde_json::from_str(REGISTRY_MANIFEST).unwrap();
    assert_eq!(m.distinct_digests(), vec!["sha256:aaaa", "sha256:bbbb"]);
}

// =============================================================================
// Runtime Config
// =============================================================================

#[test]
fn test_runtime_config_from_first_entry() {
    let m: Manifest = serde_json::from_str(REGISTRY_MANIFEST).unwrap();
    let rc = m.runtime_config("alpine").unwrap();
    assert_eq!(rc.working_dir, "/srv");
    assert_eq!(rc.env, vec!["PATH=/bin", "A=1"]);
    assert_eq!(rc.command(), vec!["/bin/sh", "-c", "echo hi"]);
}

#[test]
fn test_runtime_config_lowercase_keys() {
    let m = manifest(
        vec![layer("sha256:aaaa")],
        vec![r#"{"config":{"workingDir":"/app","env":["X=1"],"cmd":["./run"]}}"#],
    );
    let rc = m.runtime_config("alpine").unwrap();
    assert_eq!(rc.working_dir, "/app");
    assert_eq!(rc.env, vec!["X=1"]);
    assert_eq!(rc.cmd, vec!["./run"]);
}

#[test]
fn test_runtime_config_without_config_object() {
    let m = manifest(vec![layer("sha256:aaaa")], vec![r#"{"id":"x"}"#]);
    let rc = m.runtime_config("alpine").unwrap();
    assert!(rc.command().is_empty());
    assert!(rc.working_dir.is_empty());
}

#[test]
fn test_empty_history_is_config_error() {
    let m = manifest(vec![layer("sha256:aaaa")], vec![]);
    let err = m.runtime_config("alpine").unwrap_err();
    assert!(matches!(err, Error::Config { .. }));
    assert!(err.to_string().contains("history is empty"));
}

#[test]
fn test_malformed_history_is_config_error() {
    let m = manifest(vec![layer("sha256:aaaa")], vec!["{not json"]);
    assert!(matches!(
        m.runtime_config("alpine"),
        Err(Error::Config { .. })
    ));
}
