//! Blob client (C7): upload/download/delete against content-addressed
//! blob servers, authorised by signed nostr events.
//!
//! Status codes degrade gracefully: ambiguous responses are the
//! caller's problem to retry, not this crate's to paper over. Built on
//! async `reqwest::Client` since every suspension point here must be
//! cancellable.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use nsyte_hash::hash_bytes;
use nsyte_types::SignedEvent;
use reqwest::StatusCode;
use thiserror::Error;

/// Failure modes for a single blob-server request, restricted to the
/// subset this crate can observe.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("transport error contacting blob server: {0}")]
    Transient(String),
    #[error("blob server returned 5xx: {0}")]
    ServerError(u16),
    #[error("blob server requires authorisation ({0})")]
    AuthRequired(u16),
    #[error("blob not found")]
    NotFound,
    #[error("blob server rejected the request: {0} {1}")]
    Malformed(u16, String),
    #[error("downloaded content hash does not match requested hash")]
    HashMismatch,
}

impl BlobError {
    /// Whether C9 should retry this failure within its retry budget
    /// (: transport errors, 5xx, and timeouts are `Transient`).
    pub fn is_retryable(&self) -> bool {
        matches!(self, BlobError::Transient(_) | BlobError::ServerError(_))
    }

    /// Whether this is the 401/402 case C9 routes to the signer for
    /// an authorisation header and retries once, uncounted.
    pub fn is_auth_required(&self) -> bool {
        matches!(self, BlobError::AuthRequired(_))
    }
}

/// Async HTTP client for blob servers: one `reqwest::Client` reused
/// across every call (connection pooling is the transport's job).
#[derive(Debug, Clone)]
pub struct BlobClient {
    http: reqwest::Client,
}

impl BlobClient {
    pub fn new() -> Result<Self, BlobError> {
        let http = reqwest::Client::builder()
            .user_agent(format!("nsyte/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BlobError::Transient(e.to_string()))?;
        Ok(Self { http })
    }

    /// `HEAD /<hex-hash>`: true if the server already holds the blob.
    pub async fn probe(&self, server: &str, hash: &str) -> Result<bool, BlobError> {
        let url = blob_url(server, hash);
        let resp = self
            .http
            .head(url)
            .send()
            .await
            .map_err(|e| BlobError::Transient(e.to_string()))?;

        match resp.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_server_error() => Err(BlobError::ServerError(s.as_u16())),
            s => Err(BlobError::Malformed(s.as_u16(), "unexpected HEAD status".to_string())),
        }
    }

    /// `GET /<hex-hash>`: fetches the blob and verifies the content
    /// hash equals the requested hash before returning it.
    pub async fn download(&self, server: &str, hash: &str) -> Result<Bytes, BlobError> {
        let url = blob_url(server, hash);
        let resp = self.http.get(url).send().await.map_err(|e| BlobError::Transient(e.to_string()))?;

        match resp.status() {
            StatusCode::OK => {
                let bytes = resp.bytes().await.map_err(|e| BlobError::Transient(e.to_string()))?;
                if hash_bytes(&bytes) != hash {
                    return Err(BlobError::HashMismatch);
                }
                Ok(bytes)
            }
            StatusCode::NOT_FOUND => Err(BlobError::NotFound),
            s if s.is_server_error() => Err(BlobError::ServerError(s.as_u16())),
            s if s == StatusCode::UNAUTHORIZED || s.as_u16() == 402 => Err(BlobError::AuthRequired(s.as_u16())),
            s => Err(BlobError::Malformed(s.as_u16(), "unexpected GET status".to_string())),
        }
    }

    /// `PUT /upload`, body is the blob, authorised by `auth_event`
    ///. Success = 200 or 201.
    pub async fn upload(&self, server: &str, bytes: Bytes, auth_event: &SignedEvent) -> Result<(), BlobError> {
        let url = format!("{}/upload", server.trim_end_matches('/'));
        let header = authorization_header(auth_event)?;

        let resp = self
            .http
            .put(url)
            .header("Authorization", header)
            .body(bytes)
            .send()
            .await
            .map_err(|e| BlobError::Transient(e.to_string()))?;

        match resp.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(()),
            s if s == StatusCode::UNAUTHORIZED || s.as_u16() == 402 => Err(BlobError::AuthRequired(s.as_u16())),
            s if s.is_server_error() => Err(BlobError::ServerError(s.as_u16())),
            s => {
                let body = resp.text().await.unwrap_or_default();
                Err(BlobError::Malformed(s.as_u16(), body))
            }
        }
    }

    /// `DELETE /<hex-hash>`, authorised by `auth_event`. Per,
    /// a `404` here is treated as success by the caller (the blob is
    /// already gone) — this method surfaces `NotFound` and leaves that
    /// policy decision to C9.
    pub async fn delete(&self, server: &str, hash: &str, auth_event: &SignedEvent) -> Result<(), BlobError> {
        let url = blob_url(server, hash);
        let header = authorization_header(auth_event)?;

        let resp = self
            .http
            .delete(url)
            .header("Authorization", header)
            .send()
            .await
            .map_err(|e| BlobError::Transient(e.to_string()))?;

        match resp.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => Err(BlobError::NotFound),
            s if s == StatusCode::UNAUTHORIZED || s.as_u16() == 402 => Err(BlobError::AuthRequired(s.as_u16())),
            s if s.is_server_error() => Err(BlobError::ServerError(s.as_u16())),
            s => Err(BlobError::Malformed(s.as_u16(), "unexpected DELETE status".to_string())),
        }
    }
}

impl Default for BlobClient {
    fn default() -> Self {
        Self::new().expect("default reqwest client builds")
    }
}

fn blob_url(server: &str, hash: &str) -> String {
    format!("{}/{}", server.trim_end_matches('/'), hash)
}

/// `Authorization: Nostr <base64(json(event))>`.
fn authorization_header(event: &SignedEvent) -> Result<String, BlobError> {
    let json = serde_json::to_vec(event).map_err(|e| BlobError::Malformed(0, e.to_string()))?;
    Ok(format!("Nostr {}", BASE64.encode(json)))
}
