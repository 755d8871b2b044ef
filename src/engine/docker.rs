//! Docker engine backend.
//!
//! Implements [`ContainerEngine`] against the Docker Engine API. Each trait
//! method is a thin mapping onto one endpoint; anything clever (wait/log
//! sequencing, teardown ordering) stays out of this file.

use crate::archive::ArtifactStream;
use crate::engine::{ContainerEngine, ContainerSpec, LogChunk, LogStream};
use crate::error::{Error, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, KillContainerOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, UploadToContainerOptions,
    WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::{CommitContainerOptions, CreateImageOptions};
use bollard::Docker;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::io;
use tracing::{debug, warn};

/// Engine endpoint used when `DOCKER_HOST` is unset.
const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";

/// Client-side timeout for individual engine requests, in seconds.
///
/// Long enough that a container wait outlasting the default client timeout
/// does not abort a legitimate build. Wall-clock bounding happens in the
/// session layer, not here.
const ENGINE_REQUEST_TIMEOUT_SECS: u64 = 3600;

/// [`ContainerEngine`] backed by a local Docker daemon.
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connects to the daemon named by `DOCKER_HOST`, falling back to the
    /// default unix socket.
    pub fn connect() -> Result<Self> {
        let host =
            std::env::var("DOCKER_HOST").unwrap_or_else(|_| DEFAULT_DOCKER_HOST.to_string());
        debug!(%host, "connecting to container engine");
        let docker = Docker::connect_with_local(
            &host,
            ENGINE_REQUEST_TIMEOUT_SECS,
            bollard::API_DEFAULT_VERSION,
        )
        .map_err(|e| engine_err("connect", &e))?;
        Ok(Self { docker })
    }
}

fn engine_err(operation: &str, err: &BollardError) -> Error {
    Error::Engine {
        operation: operation.to_string(),
        reason: err.to_string(),
    }
}

/// Splits an image reference into repository and tag.
///
/// A trailing `:segment` only counts as a tag when it contains no `/`,
/// so registry ports (`host:5000/app`) stay inside the repository.
fn split_reference(reference: &str) -> (&str, &str) {
    match reference.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, tag),
        _ => (reference, "latest"),
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn pull_image(
        &self,
        reference: &str,
        progress: &mut (dyn io::Write + Send),
    ) -> Result<()> {
        let options = CreateImageOptions {
            from_image: reference,
            ..Default::default()
        };
        let mut pull = self.docker.create_image(Some(options), None, None);
        while let Some(info) = pull.next().await {
            let info = info.map_err(|e| engine_err("pull image", &e))?;
            if let Some(error) = info.error {
                return Err(Error::Engine {
                    operation: "pull image".to_string(),
                    reason: error,
                });
            }
            if let Some(status) = info.status {
                match info.progress {
                    Some(detail) => writeln!(progress, "{status} {detail}")?,
                    None => writeln!(progress, "{status}")?,
                }
            }
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let exposed_ports = if spec.exposed_ports.is_empty() {
            None
        } else {
            Some(
                spec.exposed_ports
                    .iter()
                    .map(|port| (format!("{port}/tcp"), HashMap::new()))
                    .collect::<HashMap<String, HashMap<(), ()>>>(),
            )
        };
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            env: Some(spec.env.clone()),
            working_dir: spec.working_dir.clone(),
            exposed_ports,
            ..Default::default()
        };
        let created = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            .map_err(|e| engine_err("create container", &e))?;
        for warning in &created.warnings {
            warn!(%warning, "engine warning during container create");
        }
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| engine_err("start container", &e))
    }

    async fn wait_container(&self, id: &str) -> Result<i64> {
        // The "not-running" condition also resolves for containers that
        // already exited, so waiting after start has no lost-exit window.
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut wait = self.docker.wait_container(id, Some(options));
        match wait.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // A non-zero exit surfaces as an error item carrying the code.
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(engine_err("wait container", &e)),
            None => Err(Error::Engine {
                operation: "wait container".to_string(),
                reason: "wait stream ended without a status".to_string(),
            }),
        }
    }

    async fn container_logs(&self, id: &str) -> Result<LogStream> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let logs = self.docker.logs(id, Some(options)).filter_map(|item| async {
            match item {
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                    Some(Ok(LogChunk::Stdout(message)))
                }
                Ok(LogOutput::StdErr { message }) => Some(Ok(LogChunk::Stderr(message))),
                Ok(LogOutput::StdIn { .. }) => None,
                Err(e) => Some(Err(engine_err("container logs", &e))),
            }
        });
        Ok(Box::pin(logs))
    }

    async fn copy_in(
        &self,
        id: &str,
        dest: &str,
        content: ArtifactStream,
        allow_overwrite_dir_with_file: bool,
    ) -> Result<()> {
        let options = UploadToContainerOptions {
            path: dest.to_string(),
            no_overwrite_dir_non_dir: (!allow_overwrite_dir_with_file).to_string(),
        };
        let mut content = content;
        let mut buf = Vec::new();
        while let Some(chunk) = content.next().await {
            buf.extend_from_slice(&chunk?);
        }
        self.docker
            .upload_to_container(id, Some(options), buf.into())
            .await
            .map_err(|e| engine_err("copy into container", &e))
    }

    async fn copy_out(&self, id: &str, src: &str) -> Result<ArtifactStream> {
        let options = DownloadFromContainerOptions {
            path: src.to_string(),
        };
        let mut download = Box::pin(self.docker.download_from_container(id, Some(options)));
        // Poll the first chunk eagerly so a missing path fails the call
        // instead of erroring mid-stream.
        match download.next().await {
            Some(Ok(first)) => {
                let rest =
                    download.map(|item| item.map_err(|e| io::Error::new(io::ErrorKind::Other, e)));
                Ok(ArtifactStream::from_stream(
                    stream::once(async move { Ok(first) }).chain(rest),
                ))
            }
            Some(Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            })) => Err(Error::NotFoundInContainer {
                path: src.to_string(),
            }),
            Some(Err(e)) => Err(engine_err("copy out of container", &e)),
            None => Ok(ArtifactStream::from_bytes(Vec::new())),
        }
    }

    async fn commit_container(&self, id: &str, reference: &str) -> Result<String> {
        let (repo, tag) = split_reference(reference);
        let options = CommitContainerOptions {
            container: id.to_string(),
            repo: repo.to_string(),
            tag: tag.to_string(),
            comment: String::new(),
            author: String::new(),
            pause: true,
            changes: None,
        };
        self.docker
            .commit_container(options, Config::<String>::default())
            .await
            .map_err(|e| engine_err("commit container", &e))?;
        let inspected = self
            .docker
            .inspect_image(reference)
            .await
            .map_err(|e| engine_err("inspect committed image", &e))?;
        Ok(inspected.id.unwrap_or_default())
    }

    async fn kill_container(&self, id: &str) -> Result<()> {
        self.docker
            .kill_container(id, Some(KillContainerOptions { signal: "SIGKILL" }))
            .await
            .map_err(|e| engine_err("kill container", &e))
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| engine_err("remove container", &e))
    }
}
