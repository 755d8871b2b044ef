//! Stagehand - buildpack staging CLI
//!
//! Stages an application directory into a runnable container image via
//! the buildpack lifecycle.
//!
//! ## Usage
//!
//! ```sh
//! stagehand --image myorg/myapp --base cloudfoundry/windows2016fs:1803 \
//!     --stack windows2016 --app ./myapp \
//!     --buildpack https://example.com/hwc-buildpack.zip
//! ```
//!
//! On success, prints the `docker run` invocation for the staged image.
//! Log verbosity follows `RUST_LOG`.

use clap::Parser;
use stagehand::{
    run_instructions, BuildpackLocator, CacheStore, DockerEngine, LifecycleBundle,
    StagingPipeline, StagingRequest, DEFAULT_LIFECYCLE_URL, DEFAULT_RUN_TIMEOUT,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Buildpack used when none is given on the command line.
const DEFAULT_BUILDPACK: &str =
    "https://github.com/cloudfoundry/hwc-buildpack/releases/download/v3.1.3/hwc-buildpack-windows2016-v3.1.3.zip";

#[derive(Debug, Parser)]
#[command(name = "stagehand", version, about = "Stage an application into a container image")]
struct Args {
    /// Name of the image to build.
    #[arg(long, default_value = "stagehand/myapp")]
    image: String,

    /// Base image staging runs on.
    #[arg(long, default_value = "cloudfoundry/windows2016fs:1803")]
    base: String,

    /// Stack name, exported as CF_STACK.
    #[arg(long, default_value = "windows2016")]
    stack: String,

    /// Path to the application to stage.
    #[arg(long, default_value = ".")]
    app: PathBuf,

    /// Buildpack to use: an http(s) URL or a local zip file. Repeatable;
    /// two or more switch the builder into multi-buildpack mode.
    #[arg(long = "buildpack")]
    buildpacks: Vec<String>,

    /// Pass -skipCertVerify to the builder.
    #[arg(long)]
    skip_cert_verify: bool,

    /// Wall-clock limit for each container run, in seconds. 0 disables.
    #[arg(long, default_value_t = DEFAULT_RUN_TIMEOUT.as_secs())]
    timeout: u64,

    /// Use an already-downloaded lifecycle bundle instead of fetching one.
    #[arg(long)]
    lifecycle: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(instructions) => {
            print!("{instructions}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> stagehand::Result<String> {
    let app_dir = args.app.canonicalize()?;
    let raw_buildpacks = if args.buildpacks.is_empty() {
        vec![DEFAULT_BUILDPACK.to_string()]
    } else {
        args.buildpacks
    };
    let request = StagingRequest {
        image_ref: args.image,
        base_image: args.base,
        stack: args.stack,
        app_dir,
        buildpacks: raw_buildpacks
            .iter()
            .map(|raw| BuildpackLocator::parse(raw))
            .collect(),
        skip_cert_verify: args.skip_cert_verify,
    };

    let engine: Arc<dyn stagehand::ContainerEngine> = Arc::new(DockerEngine::connect()?);
    let cache = CacheStore::new()?;
    let lifecycle = match args.lifecycle {
        Some(path) => LifecycleBundle::from_file(path)?,
        None => LifecycleBundle::ensure(DEFAULT_LIFECYCLE_URL, LifecycleBundle::default_path()).await?,
    };
    let run_timeout = match args.timeout {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };

    let pipeline = StagingPipeline::new(engine, cache, lifecycle, run_timeout);
    let mut stdout = std::io::stdout();
    let mut stderr = std::io::stderr();
    let staged = pipeline.stage(&request, &mut stdout, &mut stderr).await?;
    Ok(run_instructions(&staged.reference))
}
