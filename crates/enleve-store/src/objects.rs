//! Private object storage on the local filesystem.
//!
//! Objects live under `<base>/<bucket>/<path>`. They are never addressed by
//! a permanent public URL: readers get a signed URL whose token is a keyed
//! BLAKE3 hash over bucket, path, expiry and a per-request nonce, so every
//! request yields a distinct token and an expired one is refused.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use enleve_shared::models::SignedUrl;

use crate::error::{Result, StoreError};

const SCHEME: &str = "local://";

/// Verify that a resolved path stays within the expected base directory.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf> {
    let mut resolved = base.to_path_buf();
    for component in target.strip_prefix(base).unwrap_or(target).components() {
        match component {
            Component::Normal(c) => resolved.push(c),
            Component::ParentDir => {
                return Err(StoreError::InvalidObject("path traversal detected".into()));
            }
            _ => {} // RootDir, CurDir, Prefix
        }
    }
    if !resolved.starts_with(base) {
        return Err(StoreError::InvalidObject("path traversal detected".into()));
    }
    Ok(resolved)
}

fn check_segment(segment: &str) -> Result<()> {
    if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\') {
        return Err(StoreError::InvalidObject(format!(
            "invalid path segment: {segment:?}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ObjectStore {
    base_path: PathBuf,
    signing_key: [u8; 32],
}

impl ObjectStore {
    pub async fn new(base_path: PathBuf, signing_key: [u8; 32]) -> Result<Self> {
        fs::create_dir_all(&base_path).await?;
        debug!(path = %base_path.display(), "object store initialized");
        Ok(Self {
            base_path,
            signing_key,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub async fn put(&self, bucket: &str, path: &str, data: &[u8], upsert: bool) -> Result<()> {
        let target = self.object_path(bucket, path)?;
        if !upsert && fs::try_exists(&target).await? {
            return Err(StoreError::ObjectExists(format!("{bucket}/{path}")));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&target, data).await?;

        debug!(bucket, path, size = data.len(), "stored object");
        Ok(())
    }

    pub async fn get(&self, bucket: &str, path: &str) -> Result<Vec<u8>> {
        let target = self.object_path(bucket, path)?;
        if !fs::try_exists(&target).await? {
            return Err(StoreError::NotFound);
        }
        Ok(fs::read(&target).await?)
    }

    pub async fn exists(&self, bucket: &str, path: &str) -> Result<bool> {
        let target = self.object_path(bucket, path)?;
        Ok(fs::try_exists(&target).await?)
    }

    /// Issue a signed URL valid for `ttl`. Each call uses a fresh nonce.
    pub fn sign(&self, bucket: &str, path: &str, ttl: Duration) -> Result<SignedUrl> {
        self.object_path(bucket, path)?;
        let expires_at = Utc::now() + ttl;
        let expires = expires_at.timestamp();
        let nonce = Uuid::new_v4().simple().to_string();
        let token = self.token(bucket, path, expires, &nonce);

        Ok(SignedUrl {
            url: format!(
                "{SCHEME}{bucket}/{path}?expires={expires}&nonce={nonce}&token={}",
                URL_SAFE_NO_PAD.encode(token.as_bytes())
            ),
            expires_at: DateTime::from_timestamp(expires, 0).unwrap_or(expires_at),
        })
    }

    /// Read the object behind a signed URL after checking token and expiry.
    pub async fn open_signed(&self, url: &str) -> Result<Vec<u8>> {
        let rest = url
            .strip_prefix(SCHEME)
            .ok_or_else(|| StoreError::InvalidObject("not a local signed URL".into()))?;
        let (location, query) = rest
            .split_once('?')
            .ok_or_else(|| StoreError::InvalidObject("missing signature".into()))?;
        let (bucket, path) = location
            .split_once('/')
            .ok_or_else(|| StoreError::InvalidObject("missing object path".into()))?;

        let params: HashMap<&str, &str> = query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .collect();
        let expires: i64 = params
            .get("expires")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| StoreError::InvalidObject("missing expiry".into()))?;
        let nonce = params
            .get("nonce")
            .ok_or_else(|| StoreError::InvalidObject("missing nonce".into()))?;
        let presented = params
            .get("token")
            .and_then(|t| URL_SAFE_NO_PAD.decode(t).ok())
            .and_then(|bytes| <[u8; 32]>::try_from(bytes.as_slice()).ok())
            .map(blake3::Hash::from)
            .ok_or_else(|| StoreError::InvalidObject("malformed token".into()))?;

        // blake3::Hash equality is constant time.
        if presented != self.token(bucket, path, expires, nonce) {
            return Err(StoreError::InvalidObject("invalid signature".into()));
        }
        if Utc::now().timestamp() >= expires {
            return Err(StoreError::Expired);
        }

        self.get(bucket, path).await
    }

    fn token(&self, bucket: &str, path: &str, expires: i64, nonce: &str) -> blake3::Hash {
        let message = format!("{bucket}\n{path}\n{expires}\n{nonce}");
        blake3::keyed_hash(&self.signing_key, message.as_bytes())
    }

    fn object_path(&self, bucket: &str, path: &str) -> Result<PathBuf> {
        check_segment(bucket)?;
        if bucket.contains('/') {
            return Err(StoreError::InvalidObject("bucket may not contain '/'".into()));
        }
        for segment in path.split('/') {
            check_segment(segment)?;
        }
        let raw = self.base_path.join(bucket).join(path);
        ensure_within(&self.base_path, &raw)
    }
}

/// Random signing key for a store that lives only as long as the process.
pub fn ephemeral_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    key[..16].copy_from_slice(Uuid::new_v4().as_bytes());
    key[16..].copy_from_slice(Uuid::new_v4().as_bytes());
    key
}
