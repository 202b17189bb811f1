// Object storage collaborator
// Stores item photos at content-addressed paths and mints time-bounded signed
// URLs for retrieval. Only the returned path string is persisted; the bytes
// live with the provider.

use async_trait::async_trait;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

use crate::app_config::StorageConfig;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage provider returned status {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("Storage provider returned an unusable response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store the bytes and return the object path.
    async fn store(&self, bytes: &[u8], mime: &str) -> Result<String, StorageError>;

    /// Mint a time-bounded URL for retrieving a previously stored object.
    async fn signed_url(&self, path: &str, expires_in_secs: u64) -> Result<String, StorageError>;
}

/// HTTP object-store client (supabase-storage style API).
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: String,
    bucket: String,
    api_key: String,
}

impl HttpObjectStore {
    pub fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bucket: config.bucket.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

/// Content-addressed object path: identical uploads land on the same key, so
/// retried requests do not accumulate duplicate blobs.
pub fn object_path(bytes: &[u8], mime: &str) -> String {
    let digest = Sha256::digest(bytes);
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("listings/{}.{}", hex, extension_for_mime(mime))
}

fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "jpg",
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStore {
    #[instrument(skip(self, bytes))]
    async fn store(&self, bytes: &[u8], mime: &str) -> Result<String, StorageError> {
        let path = object_path(bytes, mime);

        let response = self
            .client
            .post(format!("{}/object/{}/{}", self.base_url, self.bucket, path))
            .bearer_auth(&self.api_key)
            .header("content-type", mime)
            .header("x-upsert", "true")
            .body(bytes.to_vec())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(path)
    }

    #[instrument(skip(self))]
    async fn signed_url(&self, path: &str, expires_in_secs: u64) -> Result<String, StorageError> {
        let response = self
            .client
            .post(format!(
                "{}/object/sign/{}/{}",
                self.base_url, self.bucket, path
            ))
            .bearer_auth(&self.api_key)
            .json(&json!({ "expiresIn": expires_in_secs }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }

        let payload: serde_json::Value = response.json().await?;
        let signed = payload["signedURL"]
            .as_str()
            .ok_or_else(|| StorageError::Malformed("missing signedURL field".to_string()))?;

        Ok(format!("{}{}", self.base_url, signed))
    }
}
