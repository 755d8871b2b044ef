//! # Staging Constants
//!
//! Defines the container filesystem layout, lifecycle binary contracts,
//! size bounds, and timeouts for the staging pipeline. These constants are
//! the **single source of truth** for every path and flag the lifecycle
//! binaries expect inside the build and launch containers.
//!
//! ## Layout Contract
//!
//! The builder binary is invoked inside the build container and reads and
//! writes a fixed set of paths (`/home/vcap/app`, `/buildpacks`, `/tmp`).
//! The launcher binary is baked into the committed launch image and starts
//! the application from the unpacked droplet. Both sides of the pipeline
//! must agree on these paths, which is why they live here rather than in
//! the modules that use them.
//!
//! ## Cross-References
//!
//! - [`crate::lifecycle`]: Assembles builder/launcher command lines from these paths
//! - [`crate::pipeline`]: Injects artifacts at these container paths
//! - [`crate::archive`]: Uses the streaming bounds
//! - The `stagehand` binary: applies the default run timeout

use std::time::Duration;

// =============================================================================
// Container Filesystem Layout
// =============================================================================
//
// Paths inside build and launch containers. The builder and launcher
// binaries hard-code these, so they are not configurable.
// =============================================================================

/// Builder binary path inside the build container.
///
/// On Windows stacks the `.exe` suffix is appended; see
/// [`crate::lifecycle::binary_path`].
pub const BUILDER_BINARY: &str = "/lifecycle/builder";

/// Launcher binary path inside the launch container.
pub const LAUNCHER_BINARY: &str = "/lifecycle/launcher";

/// Home directory of the application user inside both containers.
///
/// The droplet unpacks beneath this directory, producing `/home/vcap/app`
/// with the staged application contents.
pub const CONTAINER_HOME: &str = "/home/vcap";

/// Application source directory inside the build container.
pub const APP_DIR: &str = "/home/vcap/app";

/// Directory where buildpack zips are unpacked, one subdirectory per
/// buildpack named by the MD5 of its order entry.
pub const BUILDPACKS_DIR: &str = "/buildpacks";

/// Scratch directory inside the build container.
pub const TMP_DIR: &str = "/tmp";

/// Droplet tarball written by the builder.
pub const DROPLET_PATH: &str = "/tmp/droplet";

/// Staging metadata JSON written by the builder (process types).
pub const RESULT_METADATA_PATH: &str = "/tmp/result.json";

/// Build artifact cache directory read and written by the builder.
pub const BUILD_CACHE_DIR: &str = "/tmp/cache";

// =============================================================================
// Launch Environment
// =============================================================================

/// Port the launched application listens on.
pub const APP_PORT: &str = "8080";

/// Environment variable naming the stack, set in both containers.
pub const CF_STACK_ENV: &str = "CF_STACK";

// =============================================================================
// Size Limits
// =============================================================================

/// Maximum size of the staging metadata JSON (1 MiB).
///
/// **Security**: Bounds memory when reading `result.json` out of the build
/// container. Legitimate metadata is a few hundred bytes.
pub const MAX_METADATA_SIZE: usize = 1024 * 1024;

// =============================================================================
// Streaming
// =============================================================================
//
// Archive producers run on blocking threads and feed a bounded channel, so
// a large application or buildpack is never fully materialized in memory.
// The worst-case buffered data per stream is
//   STREAM_CHANNEL_CAPACITY × STREAM_CHUNK_SIZE = 8 × 32 KiB = 256 KiB.
// =============================================================================

/// Chunk size for streamed archive bodies (32 KiB).
pub const STREAM_CHUNK_SIZE: usize = 32 * 1024;

/// Bounded channel capacity between archive producers and consumers.
pub const STREAM_CHANNEL_CAPACITY: usize = 8;

// =============================================================================
// Timeouts
// =============================================================================

/// Default wall-clock limit for a container run (15 minutes).
///
/// Staging a cold application with remote buildpacks can legitimately take
/// several minutes; 15 minutes bounds truly stuck builds. A value of zero
/// on the command line disables the limit entirely.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Timeout for downloading the lifecycle bundle (5 minutes).
pub const LIFECYCLE_FETCH_TIMEOUT: Duration = Duration::from_secs(300);

// =============================================================================
// Lifecycle Bundle
// =============================================================================

/// Default download URL for the lifecycle bundle (builder + launcher).
pub const DEFAULT_LIFECYCLE_URL: &str =
    "https://github.com/dgodd/cfwindowsstager/releases/download/v0.0.1/lifecycle.tar.gz";
