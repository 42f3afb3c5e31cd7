//! # Image References
//!
//! Parses `"[library/]name[:tag]"` into an [`ImageReference`].
//!
//! | Input              | library   | name    | tag      |
//! |--------------------|-----------|---------|----------|
//! | `alpine`           | `library` | `alpine`| `latest` |
//! | `alpine:3.19`      | `library` | `alpine`| `3.19`   |
//! | `acme/app:1.0`     | `acme`    | `app`   | `1.0`    |
//!
//! ## Security
//!
//! Every segment ends up in a filesystem path (`{library}_{name}`) and in a
//! registry URL, so segments are checked against
//! [`REFERENCE_SEGMENT_VALID_CHARS`](crate::constants::REFERENCE_SEGMENT_VALID_CHARS)
//! and the whole reference against [`MAX_IMAGE_REF_LEN`]. The library may
//! not contain `_`, which keeps `{library}_{name}` unique per repository.

use crate::constants::{DEFAULT_LIBRARY, DEFAULT_TAG, MAX_IMAGE_REF_LEN, validate_reference_segment};
use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

const STORAGE_KEY_SEPARATOR: char = '_';

/// A parsed `library/name:tag` image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Namespace, `library` for official images.
    pub library: String,
    /// Repository name within the library.
    pub name: String,
    /// Tag, `latest` if omitted.
    pub tag: String,
}

impl ImageReference {
    /// Parses an image string, applying the default library and tag.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidImageReference {
            reference: input.to_string(),
            reason: reason.to_string(),
        };

        if input.is_empty() {
            return Err(invalid("empty reference"));
        }
        if input.len() > MAX_IMAGE_REF_LEN {
            return Err(invalid(&format!(
                "reference exceeds {} bytes",
                MAX_IMAGE_REF_LEN
            )));
        }

        // The tag separator is the last ':' after the last '/'.
        let (path, tag) = match input.rsplit_once(':') {
            Some((path, tag)) if !tag.contains('/') => (path, tag),
            _ => (input, DEFAULT_TAG),
        };

        let (library, name) = match path.split_once('/') {
            Some((_, rest)) if rest.contains('/') => {
                return Err(invalid("at most one '/' is allowed"));
            }
            Some((library, name)) => (library, name),
            None => (DEFAULT_LIBRARY, path),
        };

        for (label, segment) in [("library", library), ("name", name), ("tag", tag)] {
            validate_reference_segment(segment)
                .map_err(|reason| invalid(&format!("{}: {}", label, reason)))?;
        }
        if library.contains(STORAGE_KEY_SEPARATOR) {
            return Err(invalid("library: '_' is reserved as the storage key separator"));
        }

        Ok(Self {
            library: library.to_string(),
            name: name.to_string(),
            tag: tag.to_string(),
        })
    }

    /// Returns `library/name`, the repository path used in registry URLs.
    pub fn repository(&self) -> String {
        format!("{}/{}", self.library, self.name)
    }

    /// Returns `library_name`, the key used for on-disk paths and locks.
    ///
    /// Distinct repositories never share a key: the library has no `_`, so
    /// the first `_` always ends it.
    pub fn storage_key(&self) -> String {
        format!("{}{}{}", self.library, STORAGE_KEY_SEPARATOR, self.name)
    }

    /// Returns the token scope granting pull access to this repository.
    pub fn scope(&self) -> String {
        format!("repository:{}:pull", self.repository())
    }
}

impl FromStr for ImageReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.library, self.name, self.tag)
    }
}
