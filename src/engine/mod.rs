//! Container engine abstraction.
//!
//! This trait defines the engine operations staging needs:
//! - `pull_image`: Fetch a base image through the engine's own pull path
//! - `create_container` / `start_container` / `wait_container`: Lifecycle
//! - `container_logs`: Follow stdout/stderr while a container runs
//! - `copy_in` / `copy_out`: Move tar streams across the container boundary
//! - `commit_container`: Freeze a container's filesystem into an image
//! - `kill_container` / `remove_container`: Teardown
//!
//! # One Backend, Two Callers
//!
//! The pipeline and the session layer only ever talk to this trait. The
//! Docker implementation lives in [`docker`]; tests substitute an in-memory
//! engine. Nothing above this module imports an engine client directly.

use crate::archive::ArtifactStream;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::Stream;
use std::io;
use std::pin::Pin;

pub mod docker;

pub use docker::DockerEngine;

// =============================================================================
// Container Specification
// =============================================================================

/// Everything needed to create a container.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    /// Image reference to create the container from.
    pub image: String,
    /// Command and arguments.
    pub cmd: Vec<String>,
    /// Environment entries in `KEY=value` form.
    pub env: Vec<String>,
    /// Working directory, if the image default is not wanted.
    pub working_dir: Option<String>,
    /// Ports the container exposes, without host bindings.
    pub exposed_ports: Vec<String>,
}

// =============================================================================
// Log Streaming
// =============================================================================

/// A chunk of container output, tagged by the stream it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogChunk {
    /// Bytes from the container's stdout.
    Stdout(Bytes),
    /// Bytes from the container's stderr.
    Stderr(Bytes),
}

impl LogChunk {
    /// Returns the chunk payload regardless of source.
    pub fn data(&self) -> &Bytes {
        match self {
            Self::Stdout(b) | Self::Stderr(b) => b,
        }
    }
}

/// Stream of log chunks from a running container.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<LogChunk>> + Send>>;

// =============================================================================
// Engine Trait
// =============================================================================

/// Interface to a container engine.
///
/// All methods map one call to one engine API request. Sequencing (create
/// before start, wait while draining logs) belongs to the callers.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Pulls `reference`, writing engine progress lines to `progress`.
    async fn pull_image(
        &self,
        reference: &str,
        progress: &mut (dyn io::Write + Send),
    ) -> Result<()>;

    /// Creates a container and returns its ID.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// Starts a created container.
    async fn start_container(&self, id: &str) -> Result<()>;

    /// Blocks until the container stops, returning its exit code.
    async fn wait_container(&self, id: &str) -> Result<i64>;

    /// Follows the container's stdout and stderr.
    async fn container_logs(&self, id: &str) -> Result<LogStream>;

    /// Uploads a tar stream, extracting it at `dest` inside the container.
    ///
    /// With `allow_overwrite_dir_with_file` unset, the engine refuses
    /// archive entries that would replace an existing directory with a
    /// non-directory.
    async fn copy_in(
        &self,
        id: &str,
        dest: &str,
        content: ArtifactStream,
        allow_overwrite_dir_with_file: bool,
    ) -> Result<()>;

    /// Downloads `src` from the container as a tar stream.
    ///
    /// Fails with [`crate::Error::NotFoundInContainer`] when the path does
    /// not exist.
    async fn copy_out(&self, id: &str, src: &str) -> Result<ArtifactStream>;

    /// Commits the container's filesystem as `reference`, returning the
    /// new image ID.
    async fn commit_container(&self, id: &str, reference: &str) -> Result<String>;

    /// Force-kills a running container.
    async fn kill_container(&self, id: &str) -> Result<()>;

    /// Removes a container, force-stopping it if still running.
    async fn remove_container(&self, id: &str) -> Result<()>;
}
