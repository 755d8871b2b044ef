//! Build artifact cache store.
//!
//! The builder reads and writes `/tmp/cache` inside the build container;
//! persisting that directory between runs is what makes warm builds fast.
//! This store keeps one cache tarball per target image under the user's
//! home directory, keyed by the SHA-256 of the image reference so keys are
//! filesystem-safe regardless of registry hosts or tags.
//!
//! Writes go to a uniquely named temp file first and are renamed into
//! place, so a crashed run never leaves a truncated tarball behind. A
//! missing entry is a normal cold start, not an error. Concurrent runs
//! staging the same image reference are unsupported.

use crate::archive::ArtifactStream;
use crate::error::{Error, Result};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

/// On-disk store of build artifact cache tarballs.
pub struct CacheStore {
    base_dir: PathBuf,
}

impl CacheStore {
    /// Opens the store at the default location.
    pub fn new() -> Result<Self> {
        Self::with_path(Self::default_path())
    }

    /// Opens the store at a specific directory, creating it if needed.
    pub fn with_path(base_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    fn default_path() -> PathBuf {
        if let Some(home) = dirs::home_dir() {
            home.join(".stagehand").join("cache")
        } else {
            PathBuf::from(".stagehand").join("cache")
        }
    }

    /// Cache key for an image reference.
    pub fn key(image_ref: &str) -> String {
        hex::encode(Sha256::digest(image_ref.as_bytes()))
    }

    fn entry_path(&self, image_ref: &str) -> PathBuf {
        self.base_dir.join(format!("{}.tar", Self::key(image_ref)))
    }

    /// Whether a cache entry exists for `image_ref`.
    pub fn has(&self, image_ref: &str) -> bool {
        self.entry_path(image_ref).exists()
    }

    /// Opens the cache entry for `image_ref` as a tar stream.
    ///
    /// Returns `Ok(None)` when no entry exists.
    pub fn load(&self, image_ref: &str) -> Result<Option<ArtifactStream>> {
        let path = self.entry_path(image_ref);
        match File::open(&path) {
            Ok(file) => {
                debug!(path = %path.display(), "loaded build cache entry");
                Ok(Some(ArtifactStream::from_file(file)))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persists `content` as the cache entry for `image_ref`.
    pub async fn save(&self, image_ref: &str, mut content: ArtifactStream) -> Result<()> {
        let final_path = self.entry_path(image_ref);
        let temp_path = self
            .base_dir
            .join(format!(".{}.{}.tmp", Self::key(image_ref), Uuid::now_v7()));

        let result = async {
            let mut file = tokio::fs::File::create(&temp_path)
                .await
                .map_err(|e| Error::CacheWriteFailed(e.to_string()))?;
            while let Some(chunk) = content.next().await {
                let chunk = chunk.map_err(|e| Error::CacheWriteFailed(e.to_string()))?;
                file.write_all(&chunk)
                    .await
                    .map_err(|e| Error::CacheWriteFailed(e.to_string()))?;
            }
            file.flush()
                .await
                .map_err(|e| Error::CacheWriteFailed(e.to_string()))?;
            drop(file);
            tokio::fs::rename(&temp_path, &final_path)
                .await
                .map_err(|e| Error::CacheWriteFailed(e.to_string()))
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&temp_path).await;
        } else {
            debug!(path = %final_path.display(), "saved build cache entry");
        }
        result
    }
}
