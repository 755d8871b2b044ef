//! The staging pipeline.
//!
//! Stages an application source tree into a runnable container image:
//!
//! 1. Pull the base image through the engine
//! 2. Run the builder in a build container (lifecycle, buildpacks, cache,
//!    and app injected beforehand)
//! 3. Read the staging metadata for the `web` start command
//! 4. Provision a launch container with the lifecycle and the droplet
//! 5. Commit the launch container as the target image
//!
//! The launch container is committed, never started. Both containers are
//! removed on every exit path, success or failure; the build container
//! stays alive until the droplet has been copied out of it.

use crate::archive::{self};
use crate::cache::CacheStore;
use crate::constants::{
    APP_DIR, APP_PORT, BUILDPACKS_DIR, BUILD_CACHE_DIR, CF_STACK_ENV, CONTAINER_HOME,
    DROPLET_PATH, MAX_METADATA_SIZE, RESULT_METADATA_PATH, TMP_DIR,
};
use crate::engine::{ContainerEngine, ContainerSpec};
use crate::error::{Error, Result};
use crate::lifecycle::{self, LifecycleBundle};
use crate::session::ContainerSession;
use md5::{Digest, Md5};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

// =============================================================================
// Buildpack Locators
// =============================================================================

/// Where a buildpack comes from.
///
/// Remote buildpacks are downloaded by the builder itself; local zips are
/// repacked into the build container before the builder runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildpackLocator {
    /// An `http(s)` URL the builder fetches on its own.
    Remote(String),
    /// A zip file on the local filesystem.
    Local(PathBuf),
}

impl BuildpackLocator {
    /// Classifies a raw `--buildpack` argument.
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with("http://") || raw.starts_with("https://") {
            Self::Remote(raw.to_string())
        } else {
            Self::Local(PathBuf::from(raw))
        }
    }

    /// The entry this buildpack contributes to `-buildpackOrder`.
    pub fn order_entry(&self) -> String {
        match self {
            Self::Remote(url) => url.clone(),
            Self::Local(path) => path.to_string_lossy().into_owned(),
        }
    }

    /// Directory prefix for this buildpack under `/buildpacks`.
    ///
    /// The builder locates each order entry by the MD5 of its raw string,
    /// so local zips must unpack under exactly that directory name.
    pub fn prefix(&self) -> String {
        format!("{}/", hex::encode(Md5::digest(self.order_entry().as_bytes())))
    }
}

// =============================================================================
// Requests and Results
// =============================================================================

/// Inputs for one staging run.
#[derive(Debug, Clone)]
pub struct StagingRequest {
    /// Image reference to commit the staged application as.
    pub image_ref: String,
    /// Base image both staging containers are created from.
    pub base_image: String,
    /// Stack name, exported as `CF_STACK`.
    pub stack: String,
    /// Application source directory.
    pub app_dir: PathBuf,
    /// Buildpacks, in detection order.
    pub buildpacks: Vec<BuildpackLocator>,
    /// Passes `-skipCertVerify` to the builder.
    pub skip_cert_verify: bool,
}

impl StagingRequest {
    fn validate(&self) -> Result<()> {
        if self.image_ref.is_empty() {
            return Err(Error::InvalidRequest("image reference is empty".to_string()));
        }
        if self.buildpacks.is_empty() {
            return Err(Error::InvalidRequest(
                "at least one buildpack is required".to_string(),
            ));
        }
        if !self.app_dir.is_dir() {
            return Err(Error::InvalidRequest(format!(
                "application directory '{}' does not exist",
                self.app_dir.display()
            )));
        }
        for locator in &self.buildpacks {
            if let BuildpackLocator::Local(path) = locator {
                if !path.is_file() {
                    return Err(Error::InvalidRequest(format!(
                        "buildpack zip '{}' does not exist",
                        path.display()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Staging metadata written by the builder to `result.json`.
#[derive(Debug, Deserialize)]
struct BuildResult {
    #[serde(default)]
    process_types: HashMap<String, String>,
}

impl BuildResult {
    fn web_command(&self) -> Option<&str> {
        self.process_types
            .get("web")
            .map(String::as_str)
            .filter(|cmd| !cmd.is_empty())
    }
}

/// Outcome of a successful staging run.
#[derive(Debug, Clone)]
pub struct StagedImage {
    /// Reference the image was committed as.
    pub reference: String,
    /// Engine-assigned image ID.
    pub image_id: String,
    /// The `web` start command baked into the launcher invocation.
    pub start_command: String,
}

// =============================================================================
// Pipeline
// =============================================================================

/// Drives the build and launch containers through one staging run.
pub struct StagingPipeline {
    engine: Arc<dyn ContainerEngine>,
    cache: CacheStore,
    lifecycle: LifecycleBundle,
    run_timeout: Option<Duration>,
}

impl StagingPipeline {
    /// Assembles a pipeline from its collaborators.
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        cache: CacheStore,
        lifecycle: LifecycleBundle,
        run_timeout: Option<Duration>,
    ) -> Self {
        Self {
            engine,
            cache,
            lifecycle,
            run_timeout,
        }
    }

    /// Stages `request`, writing build output to `stdout`/`stderr`.
    pub async fn stage(
        &self,
        request: &StagingRequest,
        stdout: &mut (dyn Write + Send),
        stderr: &mut (dyn Write + Send),
    ) -> Result<StagedImage> {
        request.validate()?;
        info!(image = %request.image_ref, base = %request.base_image, "staging application");
        self.engine.pull_image(&request.base_image, stdout).await?;

        let build = ContainerSession::create(self.engine.clone(), &self.build_spec(request)).await?;
        let staged = self.build_then_launch(request, &build, stdout, stderr).await;
        build.remove().await;
        staged
    }

    async fn build_then_launch(
        &self,
        request: &StagingRequest,
        build: &ContainerSession,
        stdout: &mut (dyn Write + Send),
        stderr: &mut (dyn Write + Send),
    ) -> Result<StagedImage> {
        self.provision_build(request, build).await?;
        build.run_and_wait(stdout, stderr, self.run_timeout).await?;
        let start_command = self.read_start_command(build).await?;
        debug!(%start_command, "staging metadata resolved");

        let launch_spec = self.launch_spec(request, &start_command);
        let launch = ContainerSession::create(self.engine.clone(), &launch_spec).await?;
        let committed = self.provision_and_commit(request, build, &launch).await;
        launch.remove().await;
        committed.map(|image_id| StagedImage {
            reference: request.image_ref.clone(),
            image_id,
            start_command,
        })
    }

    /// Fills the build container with everything the builder reads.
    async fn provision_build(
        &self,
        request: &StagingRequest,
        build: &ContainerSession,
    ) -> Result<()> {
        build.inject("/", self.lifecycle.artifact_stream()?, false).await?;
        for dir in [BUILDPACKS_DIR, APP_DIR, TMP_DIR] {
            build.make_dir(dir).await?;
        }
        for locator in &request.buildpacks {
            match locator {
                BuildpackLocator::Remote(url) => {
                    info!(%url, "builder will fetch remote buildpack");
                }
                BuildpackLocator::Local(path) => {
                    info!(path = %path.display(), "injecting local buildpack");
                    let repacked = archive::repack_zip(path, &locator.prefix())?;
                    build.inject("/buildpacks/", repacked, false).await?;
                }
            }
        }
        if let Some(cached) = self.cache.load(&request.image_ref)? {
            info!("restoring build artifact cache");
            build.inject("/tmp/", cached, false).await?;
        }
        let app = archive::pack_directory(&request.app_dir)?;
        build.inject(APP_DIR, app, false).await?;
        Ok(())
    }

    /// Reads `result.json` out of the build container and resolves the
    /// `web` start command.
    async fn read_start_command(&self, build: &ContainerSession) -> Result<String> {
        let metadata = build.extract(RESULT_METADATA_PATH).await?;
        let bytes =
            archive::read_single_entry(metadata, RESULT_METADATA_PATH, MAX_METADATA_SIZE).await?;
        let result: BuildResult =
            serde_json::from_slice(&bytes).map_err(|e| Error::MalformedMetadata(e.to_string()))?;
        result
            .web_command()
            .map(str::to_string)
            .ok_or(Error::StartCommandMissing)
    }

    /// Moves the droplet into the launch container, persists the build
    /// cache, and commits the result.
    async fn provision_and_commit(
        &self,
        request: &StagingRequest,
        build: &ContainerSession,
        launch: &ContainerSession,
    ) -> Result<String> {
        launch
            .inject("/", self.lifecycle.artifact_stream()?, false)
            .await?;
        launch.make_dir(CONTAINER_HOME).await?;

        // The droplet comes out wrapped in a tar; the contents (a gzipped
        // tar themselves) go in as the upload body.
        let droplet = build.extract(DROPLET_PATH).await?;
        let contents = archive::single_entry_contents(droplet);
        launch.inject(CONTAINER_HOME, contents, true).await?;

        self.persist_cache(request, build).await?;

        let image_id = self
            .engine
            .commit_container(launch.id(), &request.image_ref)
            .await?;
        info!(image = %request.image_ref, id = %image_id, "committed staged image");
        Ok(image_id)
    }

    async fn persist_cache(&self, request: &StagingRequest, build: &ContainerSession) -> Result<()> {
        match build.extract(BUILD_CACHE_DIR).await {
            Ok(stream) => self.cache.save(&request.image_ref, stream).await,
            Err(Error::NotFoundInContainer { .. }) => {
                debug!("builder produced no artifact cache");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn build_spec(&self, request: &StagingRequest) -> ContainerSpec {
        let order = request
            .buildpacks
            .iter()
            .map(BuildpackLocator::order_entry)
            .collect::<Vec<_>>()
            .join(",");
        // Detection is skipped in multi-buildpack mode; each buildpack is
        // expected to run in order.
        let skip_detect = request.buildpacks.len() >= 2;
        ContainerSpec {
            image: request.base_image.clone(),
            cmd: lifecycle::builder_command(
                &request.stack,
                &order,
                skip_detect,
                request.skip_cert_verify,
            ),
            env: vec![format!("{CF_STACK_ENV}={}", request.stack)],
            working_dir: Some(CONTAINER_HOME.to_string()),
            exposed_ports: Vec::new(),
        }
    }

    fn launch_spec(&self, request: &StagingRequest, start_command: &str) -> ContainerSpec {
        ContainerSpec {
            image: request.base_image.clone(),
            cmd: lifecycle::launcher_command(&request.stack, start_command),
            env: vec![
                format!("PORT={APP_PORT}"),
                "VCAP_APP_HOST=0.0.0.0".to_string(),
                format!("VCAP_APP_PORT={APP_PORT}"),
                format!("{CF_STACK_ENV}={}", request.stack),
            ],
            working_dir: Some(CONTAINER_HOME.to_string()),
            exposed_ports: vec![APP_PORT.to_string()],
        }
    }
}

// =============================================================================
// Run Instructions
// =============================================================================

/// Shell instructions for running the staged image.
///
/// The container name is the MD5 of the image reference, so repeated runs
/// of the same image reuse one well-known name.
pub fn run_instructions(image_ref: &str) -> String {
    let name = hex::encode(Md5::digest(image_ref.as_bytes()));
    format!(
        "\nTo run:\n  docker run --rm --name={name} -d -e PORT={APP_PORT} -p {APP_PORT}:{APP_PORT} {image_ref}\nThen to stop:\n  docker kill {name}\n"
    )
}
