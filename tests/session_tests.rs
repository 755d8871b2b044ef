//! Tests for the container session layer.
//!
//! Validates log draining, exit code handling, timeout enforcement, and
//! best-effort removal against the in-memory engine.

mod common;

use bytes::Bytes;
use common::FakeEngine;
use stagehand::{ContainerSession, ContainerSpec, Error, LogChunk};
use std::time::Duration;

async fn new_session(engine: &FakeEngine) -> ContainerSession {
    let spec = ContainerSpec {
        image: "base:image".to_string(),
        cmd: vec!["/bin/true".to_string()],
        ..Default::default()
    };
    ContainerSession::create(engine.as_engine(), &spec)
        .await
        .unwrap()
}

// =============================================================================
// Run and Wait
// =============================================================================

#[tokio::test]
async fn test_run_drains_logs_to_sinks() {
    let engine = FakeEngine::new();
    engine.set_logs(vec![
        LogChunk::Stdout(Bytes::from_static(b"compiling\n")),
        LogChunk::Stderr(Bytes::from_static(b"warning: slow\n")),
        LogChunk::Stdout(Bytes::from_static(b"done\n")),
    ]);
    let session = new_session(&engine).await;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    session
        .run_and_wait(&mut stdout, &mut stderr, None)
        .await
        .unwrap();

    assert_eq!(stdout, b"compiling\ndone\n");
    assert_eq!(stderr, b"warning: slow\n");
    assert!(
        engine.state.lock().unwrap().containers[session.id()].started,
        "container should have been started"
    );
}

#[tokio::test]
async fn test_non_zero_exit_reported_after_drain() {
    let engine = FakeEngine::new();
    engine.set_exit_code(223);
    engine.set_logs(vec![LogChunk::Stderr(Bytes::from_static(b"boom\n"))]);
    let session = new_session(&engine).await;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let err = session
        .run_and_wait(&mut stdout, &mut stderr, None)
        .await
        .unwrap_err();

    match err {
        Error::NonZeroExit { code } => assert_eq!(code, 223),
        other => panic!("expected NonZeroExit, got {other:?}"),
    }
    assert_eq!(stderr, b"boom\n", "logs should drain before the error");
}

#[tokio::test]
async fn test_wait_error_returns_while_logs_still_open() {
    let engine = FakeEngine::new();
    {
        let mut state = engine.state.lock().unwrap();
        state.fail_wait = true;
        state.logs_never_end = true;
    }
    let session = new_session(&engine).await;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let err = session
        .run_and_wait(&mut stdout, &mut stderr, None)
        .await
        .unwrap_err();

    assert!(
        matches!(err, Error::Engine { .. }),
        "expected engine error, got {err:?}"
    );
}

// =============================================================================
// Timeout
// =============================================================================

#[tokio::test]
async fn test_timeout_kills_container() {
    let engine = FakeEngine::new();
    {
        let mut state = engine.state.lock().unwrap();
        state.wait_forever = true;
        state.logs_never_end = true;
    }
    let session = new_session(&engine).await;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let err = session
        .run_and_wait(&mut stdout, &mut stderr, Some(Duration::from_millis(50)))
        .await
        .unwrap_err();

    assert!(
        matches!(err, Error::Timeout { .. }),
        "expected timeout, got {err:?}"
    );
    assert_eq!(
        engine.state.lock().unwrap().killed,
        vec![session.id().to_string()],
        "timed-out container should be force-killed"
    );
}

// =============================================================================
// Injection and Removal
// =============================================================================

#[tokio::test]
async fn test_make_dir_injects_directory_entry_at_root() {
    let engine = FakeEngine::new();
    let session = new_session(&engine).await;

    session.make_dir("/buildpacks").await.unwrap();

    let state = engine.state.lock().unwrap();
    let injected = &state.containers[session.id()].injected;
    assert_eq!(injected.len(), 1);
    assert_eq!(injected[0].0, "/", "directory entries upload at the root");

    let mut archive = tar::Archive::new(std::io::Cursor::new(injected[0].2.clone()));
    let entries: Vec<_> = archive.entries().unwrap().map(|e| e.unwrap()).collect();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].header().entry_type().is_dir());
    assert_eq!(
        entries[0].path().unwrap().to_string_lossy(),
        "buildpacks/"
    );
}

#[tokio::test]
async fn test_remove_failure_is_swallowed() {
    let engine = FakeEngine::new();
    engine.state.lock().unwrap().fail_remove = true;
    let session = new_session(&engine).await;

    // Must not panic or propagate.
    session.remove().await;

    let state = engine.state.lock().unwrap();
    assert!(
        state.operations.iter().any(|op| op.starts_with("remove")),
        "removal should have been attempted"
    );
}
