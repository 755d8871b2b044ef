//! Shared test fixtures: an in-memory container engine and archive helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use stagehand::{
    ArtifactStream, ContainerEngine, ContainerSpec, Error, LogChunk, LogStream, Result,
};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Upper bound when buffering injected streams for inspection.
const INJECT_CAPTURE_LIMIT: usize = 64 * 1024 * 1024;

/// A container the fake engine has created.
pub struct CreatedContainer {
    pub spec: ContainerSpec,
    /// Injected artifacts as `(dest, allow_overwrite, bytes)`.
    pub injected: Vec<(String, bool, Vec<u8>)>,
    pub started: bool,
}

/// Mutable state behind the fake engine, shared with the test body.
#[derive(Default)]
pub struct EngineState {
    next_id: u32,
    /// Engine calls in invocation order, e.g. `"create ctr-1"`.
    pub operations: Vec<String>,
    pub containers: HashMap<String, CreatedContainer>,
    /// Scripted `copy_out` responses keyed by container path. Paths not
    /// present report `NotFoundInContainer`.
    pub extracts: HashMap<String, Vec<u8>>,
    /// Exit code every `wait_container` reports.
    pub exit_code: i64,
    /// Log chunks served to every container.
    pub log_chunks: Vec<LogChunk>,
    /// Keep the log stream open after the scripted chunks.
    pub logs_never_end: bool,
    /// Make `wait_container` fail with an engine error.
    pub fail_wait: bool,
    /// Make `wait_container` never resolve.
    pub wait_forever: bool,
    /// Make `remove_container` fail.
    pub fail_remove: bool,
    /// Commits as `(container id, image reference)`.
    pub committed: Vec<(String, String)>,
    pub killed: Vec<String>,
    pub removed: Vec<String>,
}

/// In-memory [`ContainerEngine`] recording every call.
#[derive(Clone, Default)]
pub struct FakeEngine {
    pub state: Arc<Mutex<EngineState>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_engine(&self) -> Arc<dyn ContainerEngine> {
        Arc::new(self.clone())
    }

    pub fn set_extract(&self, path: &str, bytes: Vec<u8>) {
        self.state
            .lock()
            .unwrap()
            .extracts
            .insert(path.to_string(), bytes);
    }

    pub fn set_exit_code(&self, code: i64) {
        self.state.lock().unwrap().exit_code = code;
    }

    pub fn set_logs(&self, chunks: Vec<LogChunk>) {
        self.state.lock().unwrap().log_chunks = chunks;
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn pull_image(
        &self,
        reference: &str,
        progress: &mut (dyn io::Write + Send),
    ) -> Result<()> {
        writeln!(progress, "Pulling {reference}")?;
        self.state
            .lock()
            .unwrap()
            .operations
            .push(format!("pull {reference}"));
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("ctr-{}", state.next_id);
        state.operations.push(format!("create {id}"));
        state.containers.insert(
            id.clone(),
            CreatedContainer {
                spec: spec.clone(),
                injected: Vec::new(),
                started: false,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.operations.push(format!("start {id}"));
        state
            .containers
            .get_mut(id)
            .expect("start of unknown container")
            .started = true;
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<i64> {
        let (wait_forever, fail_wait, exit_code) = {
            let mut state = self.state.lock().unwrap();
            state.operations.push(format!("wait {id}"));
            (state.wait_forever, state.fail_wait, state.exit_code)
        };
        if wait_forever {
            futures::future::pending::<()>().await;
        }
        if fail_wait {
            return Err(Error::Engine {
                operation: "wait container".to_string(),
                reason: "scripted wait failure".to_string(),
            });
        }
        Ok(exit_code)
    }

    async fn container_logs(&self, id: &str) -> Result<LogStream> {
        let (chunks, never_end) = {
            let mut state = self.state.lock().unwrap();
            state.operations.push(format!("logs {id}"));
            (state.log_chunks.clone(), state.logs_never_end)
        };
        let scripted = stream::iter(chunks.into_iter().map(Ok));
        if never_end {
            Ok(Box::pin(scripted.chain(stream::pending())))
        } else {
            Ok(Box::pin(scripted))
        }
    }

    async fn copy_in(
        &self,
        id: &str,
        dest: &str,
        content: ArtifactStream,
        allow_overwrite_dir_with_file: bool,
    ) -> Result<()> {
        // Drain the stream before taking the lock; producers may need the
        // consumer to make progress.
        let bytes = content.into_bytes(INJECT_CAPTURE_LIMIT).await?;
        let mut state = self.state.lock().unwrap();
        state.operations.push(format!("copy_in {id} {dest}"));
        state
            .containers
            .get_mut(id)
            .expect("copy_in to unknown container")
            .injected
            .push((dest.to_string(), allow_overwrite_dir_with_file, bytes));
        Ok(())
    }

    async fn copy_out(&self, id: &str, src: &str) -> Result<ArtifactStream> {
        let mut state = self.state.lock().unwrap();
        state.operations.push(format!("copy_out {id} {src}"));
        match state.extracts.get(src) {
            Some(bytes) => Ok(ArtifactStream::from_bytes(bytes.clone())),
            None => Err(Error::NotFoundInContainer {
                path: src.to_string(),
            }),
        }
    }

    async fn commit_container(&self, id: &str, reference: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.operations.push(format!("commit {id} {reference}"));
        state.committed.push((id.to_string(), reference.to_string()));
        Ok(format!("sha256:fake{}", state.committed.len()))
    }

    async fn kill_container(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.operations.push(format!("kill {id}"));
        state.killed.push(id.to_string());
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.operations.push(format!("remove {id}"));
        if state.fail_remove {
            return Err(Error::Engine {
                operation: "remove container".to_string(),
                reason: "scripted remove failure".to_string(),
            });
        }
        state.removed.push(id.to_string());
        Ok(())
    }
}

// =============================================================================
// Archive Fixtures
// =============================================================================

/// An in-memory tar containing a single file entry.
pub fn tar_with_file(name: &str, contents: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut buf);
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, contents).unwrap();
        builder.finish().unwrap();
    }
    buf
}

/// Writes a zip at `path`. Entry names ending in `/` become directories.
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default().unix_permissions(0o755);
    for (name, data) in entries {
        if name.ends_with('/') {
            writer
                .add_directory(name.trim_end_matches('/'), options)
                .unwrap();
        } else {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
    }
    writer.finish().unwrap();
}

/// Writes a minimal gzipped lifecycle bundle at `path`.
pub fn write_lifecycle_bundle(path: &Path) {
    let file = File::create(path).unwrap();
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for name in ["lifecycle/builder", "lifecycle/launcher"] {
        let mut header = tar::Header::new_gnu();
        header.set_size(4);
        header.set_mode(0o755);
        builder.append_data(&mut header, name, &b"bin\n"[..]).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}
