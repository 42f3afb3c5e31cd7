//! # Registry Client
//!
//! Talks to a Docker Registry V2 endpoint with bearer-token authentication.
//!
//! ## Protocol
//!
//! ```text
//! GET {auth_url}?service={service}&scope=repository:{library}/{name}:pull
//!     → {"token": "..."}
//! GET {registry_url}/{library}/{name}/manifests/{tag}     Authorization: Bearer <token>
//!     → Manifest (schema 1)
//! GET {registry_url}/{library}/{name}/blobs/{digest}      Authorization: Bearer <token>
//!     → raw layer bytes (streamed)
//! ```
//!
//! ## Failure Classification
//!
//! Every request goes through one routine that maps failures onto
//! [`RegistryFailure`]:
//!
//! | Condition                          | Failure                           |
//! |------------------------------------|-----------------------------------|
//! | DNS, connect, TLS, timeout         | [`RegistryFailure::Unreachable`]  |
//! | Non-2xx status                     | [`RegistryFailure::Refused`]      |
//! | Undecodable or oversized body      | [`RegistryFailure::InvalidResponse`] |
//!
//! The caller wraps the failure in the error for its step (`Auth`,
//! `Manifest`, `BlobFetch`).
//!
//! ## Security
//!
//! - Tokens live in [`AuthToken`], whose `Debug` output is redacted; they are
//!   never logged or persisted.
//! - Manifest bodies are bounded by [`MAX_MANIFEST_SIZE`].
//! - Blob bodies are never buffered whole; [`BlobStream`] hands the caller an
//!   `AsyncRead` over the response body.

use crate::config::RegistryConfig;
use crate::constants::{
    CONNECT_TIMEOUT, JSON_ACCEPT, MANIFEST_ACCEPT, MAX_MANIFEST_SIZE, REQUEST_TIMEOUT, USER_AGENT,
};
use crate::error::{Error, RegistryFailure, Result};
use crate::manifest::Manifest;
use crate::reference::ImageReference;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::io::StreamReader;
use tracing::{debug, instrument};

// =============================================================================
// Auth Token
// =============================================================================

/// Bearer token scoped to pulling one repository.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wraps a raw token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token for the `Authorization` header.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

/// Token issuer response. Docker Hub sends both fields; some issuers only
/// send `access_token`.
#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: String,
    #[serde(default)]
    access_token: String,
}

impl TokenResponse {
    fn into_token(self) -> String {
        if self.token.is_empty() {
            self.access_token
        } else {
            self.token
        }
    }
}

// =============================================================================
// Blob Stream
// =============================================================================

/// A layer blob body being streamed from the registry.
pub struct BlobStream {
    digest: String,
    content_length: Option<u64>,
    reader: Pin<Box<dyn AsyncRead + Send>>,
}

impl BlobStream {
    /// Wraps an arbitrary reader, e.g. for feeding the store from a file.
    pub fn from_reader<R>(digest: impl Into<String>, content_length: Option<u64>, reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self {
            digest: digest.into(),
            content_length,
            reader: Box::pin(reader),
        }
    }

    /// Digest the blob was requested by.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Length announced by the registry, if any.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }
}

impl fmt::Debug for BlobStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobStream")
            .field("digest", &self.digest)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for BlobStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.reader.as_mut().poll_read(cx, buf)
    }
}

// =============================================================================
// Client
// =============================================================================

/// HTTP client for one registry and its token issuer.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    client: Client,
    config: RegistryConfig,
}

impl RegistryClient {
    /// Creates a client for the given endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the HTTP client cannot be built (e.g. the
    /// TLS backend fails to initialize).
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::Config {
                reference: config.registry_url.clone(),
                reason: format!("unable to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Returns the configured endpoints.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Requests a pull token for the reference's repository.
    #[instrument(skip(self, reference), fields(reference = %reference))]
    pub async fn fetch_token(&self, reference: &ImageReference) -> Result<AuthToken> {
        let scope = reference.scope();
        let auth_err = |cause| Error::Auth {
            scope: scope.clone(),
            cause,
        };

        let req = self
            .client
            .get(&self.config.auth_url)
            .query(&[
                ("service", self.config.auth_service.as_str()),
                ("scope", scope.as_str()),
            ])
            .timeout(REQUEST_TIMEOUT);
        let response = self.send(req, None, JSON_ACCEPT).await.map_err(auth_err)?;

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| auth_err(classify_body_error(e)))?;
        let token = body.into_token();
        if token.is_empty() {
            return Err(auth_err(RegistryFailure::InvalidResponse(
                "token issuer returned an empty token".to_string(),
            )));
        }

        debug!("Acquired token for {}", scope);
        Ok(AuthToken(token))
    }

    /// Fetches and decodes the manifest for the reference's tag.
    #[instrument(skip(self, token, reference), fields(reference = %reference))]
    pub async fn fetch_manifest(
        &self,
        token: &AuthToken,
        reference: &ImageReference,
    ) -> Result<Manifest> {
        let manifest_err = |cause| Error::Manifest {
            reference: reference.to_string(),
            cause,
        };

        let url = format!(
            "{}/{}/manifests/{}",
            self.base_url(),
            reference.repository(),
            reference.tag
        );
        debug!(url = %url, "fetching manifest");

        let req = self.client.get(&url).timeout(REQUEST_TIMEOUT);
        let response = self
            .send(req, Some(token), MANIFEST_ACCEPT)
            .await
            .map_err(manifest_err)?;

        let body = read_bounded(response, MAX_MANIFEST_SIZE)
            .await
            .map_err(manifest_err)?;
        let manifest: Manifest = serde_json::from_slice(&body).map_err(|e| {
            manifest_err(RegistryFailure::InvalidResponse(format!(
                "undecodable manifest: {}",
                e
            )))
        })?;

        if manifest.layers.is_empty() {
            return Err(manifest_err(RegistryFailure::InvalidResponse(
                "manifest has no layers".to_string(),
            )));
        }

        debug!(
            layers = manifest.layers.len(),
            history = manifest.history.len(),
            "received manifest"
        );
        Ok(manifest)
    }

    /// Opens a streaming download of one layer blob.
    #[instrument(skip(self, token, reference), fields(reference = %reference))]
    pub async fn fetch_blob(
        &self,
        token: &AuthToken,
        reference: &ImageReference,
        digest: &str,
    ) -> Result<BlobStream> {
        let url = format!(
            "{}/{}/blobs/{}",
            self.base_url(),
            reference.repository(),
            digest
        );
        debug!(url = %url, "fetching blob");

        let response = self
            .send(self.client.get(&url), Some(token), "*/*")
            .await
            .map_err(|cause| Error::BlobFetch {
                digest: digest.to_string(),
                cause,
            })?;

        let content_length = response.content_length();
        let body = response.bytes_stream().map_err(io::Error::other);

        Ok(BlobStream {
            digest: digest.to_string(),
            content_length,
            reader: Box::pin(StreamReader::new(body)),
        })
    }

    fn base_url(&self) -> &str {
        self.config.registry_url.trim_end_matches('/')
    }

    /// Sends a request with the shared headers and classifies the outcome.
    async fn send(
        &self,
        req: RequestBuilder,
        token: Option<&AuthToken>,
        accept: &str,
    ) -> std::result::Result<Response, RegistryFailure> {
        let req = req.header(ACCEPT, accept);
        let req = match token {
            Some(token) => req.bearer_auth(token.as_str()),
            None => req,
        };

        let response = req
            .send()
            .await
            .map_err(|e| RegistryFailure::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            debug!(status = %status, url = %response.url(), "registry refused request");
            return Err(RegistryFailure::Refused(status.as_u16()));
        }
        Ok(response)
    }
}

/// Maps an error raised while reading or decoding a response body.
fn classify_body_error(e: reqwest::Error) -> RegistryFailure {
    if e.is_decode() {
        RegistryFailure::InvalidResponse(e.to_string())
    } else {
        RegistryFailure::Unreachable(e.to_string())
    }
}

/// Reads a response body, failing once it grows past `limit` bytes.
async fn read_bounded(
    response: Response,
    limit: usize,
) -> std::result::Result<Vec<u8>, RegistryFailure> {
    if let Some(len) = response.content_length()
        && len > limit as u64
    {
        return Err(RegistryFailure::InvalidResponse(format!(
            "body of {} bytes exceeds limit of {} bytes",
            len, limit
        )));
    }

    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| RegistryFailure::Unreachable(e.to_string()))?;
        if body.len() + chunk.len() > limit {
            return Err(RegistryFailure::InvalidResponse(format!(
                "body exceeds limit of {} bytes",
                limit
            )));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}
