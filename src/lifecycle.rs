//! Lifecycle bundle management and command assembly.
//!
//! The lifecycle bundle is a gzipped tar carrying the `builder` and
//! `launcher` binaries. It is injected at `/lifecycle` into both staging
//! containers. This module fetches and caches the bundle locally and
//! assembles the exact command lines the two binaries expect.

use crate::archive::ArtifactStream;
use crate::constants::{
    APP_DIR, BUILDER_BINARY, BUILDPACKS_DIR, BUILD_CACHE_DIR, DROPLET_PATH,
    LAUNCHER_BINARY, LIFECYCLE_FETCH_TIMEOUT, RESULT_METADATA_PATH,
};
use crate::error::{Error, Result};
use futures::StreamExt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

/// A lifecycle bundle present on the local filesystem.
pub struct LifecycleBundle {
    path: PathBuf,
}

impl LifecycleBundle {
    /// Uses an already-downloaded bundle.
    pub fn from_file(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("lifecycle bundle not found at {}", path.display()),
            )));
        }
        Ok(Self { path })
    }

    /// Returns the bundle at `path`, downloading it from `url` first if it
    /// is not already present.
    pub async fn ensure(url: &str, path: PathBuf) -> Result<Self> {
        if path.exists() {
            debug!(path = %path.display(), "lifecycle bundle already cached");
            return Ok(Self { path });
        }
        info!(%url, "downloading lifecycle bundle");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let fetch_err = |reason: String| Error::LifecycleFetch {
            url: url.to_string(),
            reason,
        };
        let client = reqwest::Client::builder()
            .timeout(LIFECYCLE_FETCH_TIMEOUT)
            .build()
            .map_err(|e| fetch_err(e.to_string()))?;
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;
        if !response.status().is_success() {
            return Err(fetch_err(format!("HTTP {}", response.status())));
        }

        let temp_path = path.with_extension(format!("download.{}", Uuid::now_v7()));
        let result = async {
            let mut file = tokio::fs::File::create(&temp_path)
                .await
                .map_err(|e| fetch_err(e.to_string()))?;
            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|e| fetch_err(e.to_string()))?;
                file.write_all(&chunk)
                    .await
                    .map_err(|e| fetch_err(e.to_string()))?;
            }
            file.flush().await.map_err(|e| fetch_err(e.to_string()))?;
            drop(file);
            tokio::fs::rename(&temp_path, &path)
                .await
                .map_err(|e| fetch_err(e.to_string()))
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(result.unwrap_err());
        }
        Ok(Self { path })
    }

    /// Default on-disk location for the downloaded bundle.
    pub fn default_path() -> PathBuf {
        if let Some(home) = dirs::home_dir() {
            home.join(".stagehand").join("lifecycle.tar.gz")
        } else {
            PathBuf::from(".stagehand").join("lifecycle.tar.gz")
        }
    }

    /// Local path of the bundle.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the bundle as a stream ready for container injection.
    ///
    /// The engine extracts gzipped tars natively, so the bundle is
    /// streamed as-is.
    pub fn artifact_stream(&self) -> Result<ArtifactStream> {
        Ok(ArtifactStream::from_file(File::open(&self.path)?))
    }
}

// =============================================================================
// Command Assembly
// =============================================================================

/// Resolves a lifecycle binary path for a stack.
///
/// Windows stacks run Windows containers, so the binaries carry an `.exe`
/// suffix there.
pub fn binary_path(base: &str, stack: &str) -> String {
    if stack.starts_with("windows") {
        format!("{base}.exe")
    } else {
        base.to_string()
    }
}

/// Command line for the builder inside the build container.
pub fn builder_command(
    stack: &str,
    buildpack_order: &str,
    skip_detect: bool,
    skip_cert_verify: bool,
) -> Vec<String> {
    let mut cmd = vec![
        binary_path(BUILDER_BINARY, stack),
        format!("-buildDir={APP_DIR}"),
        format!("-buildpacksDir={BUILDPACKS_DIR}"),
        format!("-outputDroplet={DROPLET_PATH}"),
        format!("-outputMetadata={RESULT_METADATA_PATH}"),
        format!("-buildArtifactsCacheDir={BUILD_CACHE_DIR}"),
        format!("-buildpackOrder={buildpack_order}"),
    ];
    if skip_detect {
        cmd.push("-skipDetect".to_string());
    }
    if skip_cert_verify {
        cmd.push("-skipCertVerify".to_string());
    }
    cmd
}

/// Command line for the launcher baked into the launch container.
///
/// The trailing empty argument is part of the launcher's calling
/// convention.
pub fn launcher_command(stack: &str, start_command: &str) -> Vec<String> {
    vec![
        binary_path(LAUNCHER_BINARY, stack),
        APP_DIR.to_string(),
        start_command.to_string(),
        String::new(),
    ]
}
