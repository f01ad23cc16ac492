//! Bucket storage for uploaded files.
//!
//! Objects live under `<root>/<bucket>/<key>`. Avatars and post images are
//! publicly served from `public_base_url`; resource files are only reachable
//! through the authenticated download route.

pub mod upload;

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Avatars,
    Images,
    Resources,
}

impl Bucket {
    pub const ALL: [Bucket; 3] = [Bucket::Avatars, Bucket::Images, Bucket::Resources];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Avatars => "avatars",
            Bucket::Images => "images",
            Bucket::Resources => "resources",
        }
    }

    /// Whether objects in this bucket may be served without authentication.
    pub fn is_public(&self) -> bool {
        !matches!(self, Bucket::Resources)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Object not found: {0}")]
    NotFound(String),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, bucket: Bucket, key: &str, data: Bytes) -> Result<(), StorageError>;

    async fn get(&self, bucket: Bucket, key: &str) -> Result<Bytes, StorageError>;

    /// Removing a missing object is not an error.
    async fn delete(&self, bucket: Bucket, key: &str) -> Result<(), StorageError>;

    fn public_url(&self, bucket: Bucket, key: &str) -> String;
}

/// Keys are flat or slash-separated relative names; nothing that could
/// escape the bucket directory.
fn check_key(key: &str) -> Result<(), StorageError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Directory-backed store.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalObjectStore {
    pub fn new<P: AsRef<Path>>(root: P, public_base_url: &str) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        for bucket in Bucket::ALL {
            std::fs::create_dir_all(root.join(bucket.as_str()))?;
        }
        Ok(Self {
            root,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn bucket_dir(&self, bucket: Bucket) -> PathBuf {
        self.root.join(bucket.as_str())
    }

    fn object_path(&self, bucket: Bucket, key: &str) -> Result<PathBuf, StorageError> {
        check_key(key)?;
        Ok(self.bucket_dir(bucket).join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, bucket: Bucket, key: &str, data: Bytes) -> Result<(), StorageError> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, &data).await?;
        tracing::debug!(bucket = bucket.as_str(), key, size = data.len(), "stored object");
        Ok(())
    }

    async fn get(&self, bucket: Bucket, key: &str) -> Result<Bytes, StorageError> {
        let path = self.object_path(bucket, key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(format!("{}/{}", bucket.as_str(), key)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, bucket: Bucket, key: &str) -> Result<(), StorageError> {
        let path = self.object_path(bucket, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn public_url(&self, bucket: Bucket, key: &str) -> String {
        format!("{}/{}/{}", self.public_base_url, bucket.as_str(), key)
    }
}

/// Remove objects whose database rows were never written. Failures are
/// logged and skipped; the caller is already returning an error.
pub async fn discard<K: AsRef<str>>(store: &dyn ObjectStore, bucket: Bucket, keys: &[K]) {
    for key in keys {
        let key = key.as_ref();
        if let Err(e) = store.delete(bucket, key).await {
            tracing::warn!(bucket = bucket.as_str(), "could not discard orphaned object {}: {}", key, e);
        }
    }
}
