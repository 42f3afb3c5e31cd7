//! # Image Manifests
//!
//! Models the schema-1 registry manifest: an ordered `fsLayers` list of
//! blob digests and a `history` list whose entries each carry a separately
//! encoded JSON document (`v1Compatibility`). The first history entry holds
//! the runtime configuration that governs the default launch.
//!
//! ```text
//! {
//!   "name": "library/alpine",
//!   "tag": "latest",
//!   "architecture": "amd64",
//!   "fsLayers": [ { "blobSum": "sha256:..." } ],
//!   "history":  [ { "v1Compatibility": "{\"config\":{\"Cmd\":[\"/bin/sh\"]}}" } ]
//! }
//! ```
//!
//! The same document is written to `{base}/{library}_{name}.json`, so the
//! serialized field names match the registry's.

use crate::constants::validate_digest;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A schema-1 image manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Manifest schema version, when the registry sends one.
    #[serde(
        rename = "schemaVersion",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub schema_version: Option<u32>,
    /// Repository name (`library/name`).
    #[serde(default)]
    pub name: String,
    /// Tag the manifest was resolved from.
    #[serde(default)]
    pub tag: String,
    /// Target architecture.
    #[serde(default)]
    pub architecture: String,
    /// Layers, top-most first as served by the registry.
    #[serde(rename = "fsLayers", default)]
    pub layers: Vec<Layer>,
    /// Per-layer history; entry 0 carries the launch configuration.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// A layer entry in [`Manifest::layers`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    /// Content digest of the layer blob.
    #[serde(rename = "blobSum")]
    pub digest: String,
}

/// A history entry in [`Manifest::history`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// JSON document encoded as a string.
    #[serde(rename = "v1Compatibility")]
    pub v1_compatibility: String,
}

/// Decoded `v1Compatibility` document. Only `config` is used.
#[derive(Debug, Default, Deserialize)]
struct V1Compatibility {
    #[serde(default, alias = "Config")]
    config: Option<ContainerConfig>,
}

/// Container configuration as written by Docker (capitalized keys), with
/// lowercase aliases for hand-written manifests.
#[derive(Debug, Default, Deserialize)]
struct ContainerConfig {
    #[serde(rename = "WorkingDir", alias = "workingDir", alias = "working_dir", default)]
    working_dir: Option<String>,
    #[serde(rename = "Env", alias = "env", default)]
    env: Option<Vec<String>>,
    #[serde(rename = "Cmd", alias = "cmd", default)]
    cmd: Option<Vec<String>>,
    #[serde(rename = "Entrypoint", alias = "entrypoint", default)]
    entrypoint: Option<Vec<String>>,
}

/// Launch configuration derived from the first history entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Working directory inside the image root (empty means `/`).
    pub working_dir: String,
    /// `KEY=VALUE` environment entries.
    pub env: Vec<String>,
    /// Default arguments.
    pub cmd: Vec<String>,
    /// Executable prefix prepended to `cmd`.
    pub entrypoint: Vec<String>,
}

impl RuntimeConfig {
    /// Returns the full argv: `entrypoint` followed by `cmd`.
    pub fn command(&self) -> Vec<String> {
        self.entrypoint
            .iter()
            .chain(self.cmd.iter())
            .cloned()
            .collect()
    }
}

impl Manifest {
    /// Checks the manifest is usable for a pull.
    ///
    /// # Errors
    ///
    /// Returns the reason when the name is empty, there are no layers, or a
    /// layer digest is not safe to use as a file name.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.name.is_empty() {
            return Err("manifest has no name".to_string());
        }
        if self.layers.is_empty() {
            return Err("manifest has no layers".to_string());
        }
        for layer in &self.layers {
            validate_digest(&layer.digest)
                .map_err(|reason| format!("layer digest '{}': {}", layer.digest, reason))?;
        }
        Ok(())
    }

    /// Returns layer digests without duplicates, in first-seen order.
    pub fn distinct_digests(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.layers
            .iter()
            .filter(|l| seen.insert(l.digest.as_str()))
            .map(|l| l.digest.clone())
            .collect()
    }

    /// Decodes the launch configuration from the first history entry.
    ///
    /// `reference` is only used for error messages.
    pub fn runtime_config(&self, reference: &str) -> Result<RuntimeConfig> {
        let entry = self.history.first().ok_or_else(|| Error::Config {
            reference: reference.to_string(),
            reason: "manifest history is empty".to_string(),
        })?;

        let doc: V1Compatibility =
            serde_json::from_str(&entry.v1_compatibility).map_err(|e| Error::Config {
                reference: reference.to_string(),
                reason: format!("malformed v1Compatibility: {}", e),
            })?;

        let config = doc.config.unwrap_or_default();
        Ok(RuntimeConfig {
            working_dir: config.working_dir.unwrap_or_default(),
            env: config.env.unwrap_or_default(),
            cmd: config.cmd.unwrap_or_default(),
            entrypoint: config.entrypoint.unwrap_or_default(),
        })
    }
}
