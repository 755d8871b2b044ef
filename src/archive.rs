//! Archive packing and repacking for container transfer.
//!
//! Everything that crosses the engine API boundary travels as a tar stream:
//! the application source, buildpack zips, the lifecycle bundle, the droplet,
//! and the build artifact cache. This module produces and consumes those
//! streams without materializing large archives in memory. Producers run on
//! blocking threads and feed a bounded channel; consumers poll an
//! [`ArtifactStream`] from async code.

use crate::constants::{STREAM_CHANNEL_CAPACITY, STREAM_CHUNK_SIZE};
use crate::error::{Error, Result};
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::debug;

/// A stream of tar (or gzipped tar) bytes moving in or out of a container.
///
/// Wraps whatever produces the bytes behind a uniform `Stream` of
/// [`Bytes`] chunks. Errors from the producer surface as items, so a
/// failed pack aborts the consuming upload rather than truncating it
/// silently.
pub struct ArtifactStream {
    inner: Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + 'static>>,
}

impl ArtifactStream {
    /// Wraps an existing byte stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// A fully buffered stream, for small artifacts like metadata blobs
    /// and synthetic directory entries.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::from_stream(stream::iter([Ok(Bytes::from(bytes))]))
    }

    /// Streams a file's contents from a blocking thread.
    pub fn from_file(file: File) -> Self {
        spawn_producer(move |mut writer| {
            let mut file = file;
            io::copy(&mut file, &mut writer)?;
            writer.flush()
        })
    }

    /// Collects the stream into memory, failing once `limit` bytes are
    /// exceeded.
    pub async fn into_bytes(mut self, limit: usize) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        while let Some(chunk) = self.next().await {
            let chunk = chunk?;
            if buf.len() + chunk.len() > limit {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("stream exceeds {limit} byte limit"),
                ));
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(buf)
    }
}

impl Stream for ArtifactStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for ArtifactStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ArtifactStream")
    }
}

// =============================================================================
// Producer Plumbing
// =============================================================================

/// Write half of the producer channel.
///
/// Implements [`io::Write`] so `tar::Builder`, `io::copy`, and friends can
/// drive it directly from a blocking thread. Bytes accumulate into
/// `STREAM_CHUNK_SIZE` chunks before crossing the channel.
pub struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
    buf: Vec<u8>,
}

impl ChannelWriter {
    fn new(tx: mpsc::Sender<io::Result<Bytes>>) -> Self {
        Self {
            tx,
            buf: Vec::with_capacity(STREAM_CHUNK_SIZE),
        }
    }

    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = Bytes::from(std::mem::replace(
            &mut self.buf,
            Vec::with_capacity(STREAM_CHUNK_SIZE),
        ));
        self.tx
            .blocking_send(Ok(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "stream consumer dropped"))
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        if self.buf.len() >= STREAM_CHUNK_SIZE {
            self.send_buffered()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}

/// Read half of the producer channel, for blocking consumers.
///
/// Lets `tar::Archive` parse a stream that originates in async code.
struct ChannelReader {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    current: Bytes,
}

impl ChannelReader {
    fn new(rx: mpsc::Receiver<io::Result<Bytes>>) -> Self {
        Self {
            rx,
            current: Bytes::new(),
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        while self.current.is_empty() {
            match self.rx.blocking_recv() {
                Some(Ok(chunk)) => self.current = chunk,
                Some(Err(e)) => return Err(e),
                None => return Ok(0),
            }
        }
        let n = self.current.len().min(out.len());
        out[..n].copy_from_slice(&self.current[..n]);
        self.current = self.current.slice(n..);
        Ok(n)
    }
}

/// Runs `produce` on a blocking thread, returning the stream it feeds.
///
/// The producer owns the writer and must flush before returning. A producer
/// error is forwarded as the stream's final item.
fn spawn_producer<F>(produce: F) -> ArtifactStream
where
    F: FnOnce(ChannelWriter) -> io::Result<()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
    let err_tx = tx.clone();
    tokio::task::spawn_blocking(move || {
        if let Err(e) = produce(ChannelWriter::new(tx)) {
            // The consumer may already be gone; nothing left to notify.
            let _ = err_tx.blocking_send(Err(e));
        }
    });
    ArtifactStream::from_stream(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }))
}

// =============================================================================
// Packing
// =============================================================================

/// Packs a local directory into a tar stream rooted at `.`.
///
/// Symlinks are stored as links rather than followed, matching how the
/// application would be archived by hand. The directory is probed eagerly
/// so an unreadable path fails before any container work starts.
pub fn pack_directory(path: &Path) -> Result<ArtifactStream> {
    std::fs::read_dir(path)?;
    let path = path.to_path_buf();
    debug!(path = %path.display(), "packing directory");
    Ok(spawn_producer(move |writer| {
        let mut builder = tar::Builder::new(writer);
        builder.follow_symlinks(false);
        builder.append_dir_all(".", &path)?;
        let mut writer = builder.into_inner()?;
        writer.flush()
    }))
}

/// Repacks a buildpack zip into a tar stream under `prefix`.
///
/// Every zip entry reappears in the tar as `<prefix><entry name>` with its
/// size and unix mode preserved. Entries without a recorded mode default to
/// `0o644` for files and `0o755` for directories. The zip is opened and
/// validated eagerly; entry-level corruption surfaces mid-stream.
pub fn repack_zip(path: &Path, prefix: &str) -> Result<ArtifactStream> {
    let file = File::open(path)?;
    let archive = zip::ZipArchive::new(file).map_err(|e| Error::MalformedArchive {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    debug!(path = %path.display(), entries = archive.len(), %prefix, "repacking zip");
    let prefix = prefix.to_string();
    Ok(spawn_producer(move |writer| {
        let mut archive = archive;
        let mut builder = tar::Builder::new(writer);
        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let name = format!("{}{}", prefix, entry.name());
            let mut header = tar::Header::new_gnu();
            // unix_mode carries file-type bits; only permissions go in the
            // tar header.
            if entry.is_dir() {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_size(0);
                header.set_mode(entry.unix_mode().unwrap_or(0o755) & 0o7777);
                builder.append_data(&mut header, &name, io::empty())?;
            } else {
                header.set_size(entry.size());
                header.set_mode(entry.unix_mode().unwrap_or(0o644) & 0o7777);
                builder.append_data(&mut header, &name, &mut entry)?;
            }
        }
        let mut writer = builder.into_inner()?;
        writer.flush()
    }))
}

/// A one-entry tar stream declaring a directory at `path`.
///
/// Injecting this into a container creates the directory, the same way
/// `mkdir -p` would, without shelling into the container.
pub fn dir_entry(path: &str) -> Result<ArtifactStream> {
    let name = if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    };
    let mut buf = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut buf);
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        header.set_mode(0o755);
        builder.append_data(&mut header, name.trim_start_matches('/'), io::empty())?;
        builder.finish()?;
    }
    Ok(ArtifactStream::from_bytes(buf))
}

// =============================================================================
// Unpacking
// =============================================================================

/// Unwraps a single-file tar stream, yielding the inner file's raw bytes.
///
/// The engine wraps any path copied out of a container in a tar archive.
/// For the droplet that wrapper must come off before the contents (itself
/// a gzipped tar) can be uploaded into the launch container. A wrapper
/// with no file entry surfaces as an error on the returned stream.
pub fn single_entry_contents(input: ArtifactStream) -> ArtifactStream {
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let mut input = input;
        while let Some(item) = input.next().await {
            if tx.send(item).await.is_err() {
                break;
            }
        }
    });
    spawn_producer(move |mut writer| {
        let mut archive = tar::Archive::new(ChannelReader::new(rx));
        for entry in archive.entries()? {
            let mut entry = entry?;
            if entry.header().entry_type().is_file() {
                io::copy(&mut entry, &mut writer)?;
                return writer.flush();
            }
        }
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            "archive contains no file entries",
        ))
    })
}

/// Reads the first file entry of a tar stream fully into memory.
///
/// Used for small artifacts like the staging metadata. Fails if the stream
/// outgrows `limit` or carries no file entry.
pub async fn read_single_entry(input: ArtifactStream, source: &str, limit: usize) -> Result<Vec<u8>> {
    let bytes = input.into_bytes(limit).await?;
    let mut archive = tar::Archive::new(io::Cursor::new(bytes));
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type().is_file() {
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents)?;
            return Ok(contents);
        }
    }
    Err(Error::MalformedArchive {
        path: PathBuf::from(source),
        reason: "archive contains no file entries".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn buffered_stream_round_trips() {
        let stream = ArtifactStream::from_bytes(b"hello".to_vec());
        let bytes = stream.into_bytes(64).await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn into_bytes_enforces_limit() {
        let stream = ArtifactStream::from_bytes(vec![0u8; 128]);
        let err = stream.into_bytes(64).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn dir_entry_is_a_directory_header() {
        let stream = dir_entry("/buildpacks").unwrap();
        let bytes = stream.into_bytes(4096).await.unwrap();
        let mut archive = tar::Archive::new(io::Cursor::new(bytes));
        let entries: Vec<_> = archive.entries().unwrap().map(|e| e.unwrap()).collect();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].header().entry_type().is_dir());
        assert_eq!(entries[0].header().mode().unwrap(), 0o755);
    }
}
