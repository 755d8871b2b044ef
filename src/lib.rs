//! # stagehand
//!
//! **Stages an application source tree into a runnable container image.**
//!
//! Stagehand drives the buildpack lifecycle inside ephemeral containers:
//! a build container runs the `builder` binary over the application source
//! and produces a droplet, then a launch container is provisioned with the
//! droplet and the `launcher` binary and committed as the target image.
//! The launch container is never started; running the result is left to
//! the operator.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          stagehand                               │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────────────────────────────────────────┐    │
//! │  │                    StagingPipeline                       │    │
//! │  │  pull → build container → droplet → launch container     │    │
//! │  │                      → commit                            │    │
//! │  └───────────────┬─────────────────────────┬────────────────┘    │
//! │                  │                         │                     │
//! │  ┌───────────────┴──────────┐  ┌───────────┴────────────────┐    │
//! │  │     ContainerSession     │  │   Artifact plumbing        │    │
//! │  │  create │ inject │ run   │  │  archive (tar/zip streams) │    │
//! │  │  extract │ remove        │  │  cache │ lifecycle bundle  │    │
//! │  └───────────────┬──────────┘  └────────────────────────────┘    │
//! │                  │                                               │
//! │  ┌───────────────┴──────────────────────────────────────────┐    │
//! │  │                 ContainerEngine Trait                    │    │
//! │  │   pull │ create │ start │ wait │ logs │ copy │ commit    │    │
//! │  └───────────────┬──────────────────────────────────────────┘    │
//! │                  │                                               │
//! │           ┌──────┴───────┐                                       │
//! │           │ DockerEngine │                                       │
//! │           └──────────────┘                                       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Properties
//!
//! - **No orphaned containers**: both staging containers are removed on
//!   every exit path; removal failures are logged, never masked over the
//!   staging result.
//! - **Streaming transfers**: applications, buildpacks, and droplets cross
//!   the engine boundary as bounded streams, never fully in memory.
//! - **Bounded runs**: container runs carry an optional deadline; expiry
//!   force-kills the container.
//! - **Warm rebuilds**: the builder's artifact cache persists between runs,
//!   keyed by target image reference.
//!
//! # Example
//!
//! ```rust,ignore
//! use stagehand::{
//!     BuildpackLocator, CacheStore, DockerEngine, LifecycleBundle,
//!     StagingPipeline, StagingRequest,
//! };
//!
//! #[tokio::main]
//! async fn main() -> stagehand::Result<()> {
//!     let engine = std::sync::Arc::new(DockerEngine::connect()?);
//!     let pipeline = StagingPipeline::new(
//!         engine,
//!         CacheStore::new()?,
//!         LifecycleBundle::from_file("lifecycle.tar.gz".into())?,
//!         None,
//!     );
//!     // ... build a StagingRequest and call pipeline.stage(...)
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod cache;
pub mod constants;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod pipeline;
pub mod session;

// Re-exports
pub use archive::ArtifactStream;
pub use cache::CacheStore;
pub use constants::*;
pub use engine::{ContainerEngine, ContainerSpec, DockerEngine, LogChunk, LogStream};
pub use error::{Error, Result};
pub use lifecycle::LifecycleBundle;
pub use pipeline::{
    run_instructions, BuildpackLocator, StagedImage, StagingPipeline, StagingRequest,
};
pub use session::ContainerSession;
