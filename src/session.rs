//! One container, cradle to grave.
//!
//! A [`ContainerSession`] owns a single container ID and sequences the
//! engine calls around it: inject artifacts, run to completion while
//! draining logs, extract outputs, remove. The pipeline composes two of
//! these (build, then launch) and never touches container IDs directly.
//!
//! # Run Semantics
//!
//! [`ContainerSession::run_and_wait`] races the engine's wait against the
//! log drain:
//! - wait fails: return immediately, abandoning the drain
//! - wait succeeds: finish draining before reporting the exit code, so no
//!   tail of build output is lost
//! - the whole race can be bounded by a deadline; expiry force-kills the
//!   container and reports [`Error::Timeout`]
//!
//! Nothing spawned here outlives the call.

use crate::archive::{self, ArtifactStream};
use crate::engine::{ContainerEngine, ContainerSpec, LogChunk};
use crate::error::{Error, Result};
use futures::StreamExt;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A created container and the engine handle to drive it.
pub struct ContainerSession {
    engine: Arc<dyn ContainerEngine>,
    id: String,
}

impl ContainerSession {
    /// Creates the container described by `spec`.
    pub async fn create(engine: Arc<dyn ContainerEngine>, spec: &ContainerSpec) -> Result<Self> {
        let id = engine.create_container(spec).await?;
        debug!(container = %id, image = %spec.image, "created container");
        Ok(Self { engine, id })
    }

    /// The engine-assigned container ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Uploads a tar stream, extracted at `dest` inside the container.
    pub async fn inject(
        &self,
        dest: &str,
        content: ArtifactStream,
        allow_overwrite_dir_with_file: bool,
    ) -> Result<()> {
        debug!(container = %self.id, %dest, "injecting artifact");
        self.engine
            .copy_in(&self.id, dest, content, allow_overwrite_dir_with_file)
            .await
    }

    /// Creates a directory inside the container.
    pub async fn make_dir(&self, path: &str) -> Result<()> {
        let entry = archive::dir_entry(path)?;
        self.engine.copy_in(&self.id, "/", entry, false).await
    }

    /// Downloads `src` from the container as a tar stream.
    pub async fn extract(&self, src: &str) -> Result<ArtifactStream> {
        debug!(container = %self.id, %src, "extracting artifact");
        self.engine.copy_out(&self.id, src).await
    }

    /// Starts the container and blocks until it exits, copying its output
    /// to `stdout`/`stderr` as it runs.
    ///
    /// A non-zero exit is reported as [`Error::NonZeroExit`] after the log
    /// drain completes. When `deadline` is set and expires, the container
    /// is force-killed and [`Error::Timeout`] returned.
    pub async fn run_and_wait(
        &self,
        stdout: &mut (dyn Write + Send),
        stderr: &mut (dyn Write + Send),
        deadline: Option<Duration>,
    ) -> Result<()> {
        self.engine.start_container(&self.id).await?;
        let mut logs = self.engine.container_logs(&self.id).await?;

        let drain = async {
            while let Some(chunk) = logs.next().await {
                match chunk? {
                    LogChunk::Stdout(bytes) => stdout.write_all(&bytes)?,
                    LogChunk::Stderr(bytes) => stderr.write_all(&bytes)?,
                }
            }
            stdout.flush()?;
            stderr.flush()?;
            Ok::<(), Error>(())
        };

        let run = async {
            tokio::pin!(drain);
            let wait = self.engine.wait_container(&self.id);
            tokio::pin!(wait);
            let code = tokio::select! {
                code = &mut wait => {
                    // Engine wait failures abandon the drain; normal exits
                    // flush the remaining log tail first.
                    let code = code?;
                    (&mut drain).await?;
                    code
                }
                drained = &mut drain => {
                    drained?;
                    wait.await?
                }
            };
            if code != 0 {
                return Err(Error::NonZeroExit { code });
            }
            Ok(())
        };

        match deadline {
            None => run.await,
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => {
                    if let Err(e) = self.engine.kill_container(&self.id).await {
                        warn!(container = %self.id, error = %e, "failed to kill timed-out container");
                    }
                    Err(Error::Timeout {
                        operation: format!("container run {}", self.id),
                        duration: limit,
                    })
                }
            },
        }
    }

    /// Removes the container, force-stopping it if needed.
    ///
    /// Removal failures are logged, never propagated: teardown runs on
    /// every exit path and must not mask the staging result.
    pub async fn remove(&self) {
        if let Err(e) = self.engine.remove_container(&self.id).await {
            warn!(container = %self.id, error = %e, "failed to remove container");
        } else {
            debug!(container = %self.id, "removed container");
        }
    }
}
