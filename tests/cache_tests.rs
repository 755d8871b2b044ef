//! Tests for the on-disk build artifact cache.

use stagehand::{ArtifactStream, CacheStore};
use tempfile::TempDir;

// =============================================================================
// Keys
// =============================================================================

#[test]
fn test_key_is_a_stable_hex_digest() {
    assert_eq!(
        CacheStore::key("abc"),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
    assert_ne!(CacheStore::key("myorg/myapp"), CacheStore::key("myorg/other"));
}

// =============================================================================
// Load and Save
// =============================================================================

#[test]
fn test_absent_entry_is_a_cold_start() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::with_path(dir.path().to_path_buf()).unwrap();

    assert!(!store.has("myorg/myapp"));
    assert!(store.load("myorg/myapp").unwrap().is_none());
}

#[tokio::test]
async fn test_save_then_load_round_trips() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::with_path(dir.path().to_path_buf()).unwrap();

    store
        .save(
            "myorg/myapp",
            ArtifactStream::from_bytes(b"cache-tar-bytes".to_vec()),
        )
        .await
        .unwrap();

    assert!(store.has("myorg/myapp"));
    let loaded = store.load("myorg/myapp").unwrap().expect("entry saved above");
    let bytes = loaded.into_bytes(1 << 20).await.unwrap();
    assert_eq!(bytes, b"cache-tar-bytes");

    let leftovers: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".tmp"))
        .collect();
    assert!(
        leftovers.is_empty(),
        "temp files should be renamed away: {leftovers:?}"
    );
}

#[tokio::test]
async fn test_save_overwrites_previous_entry() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::with_path(dir.path().to_path_buf()).unwrap();

    store
        .save("myorg/myapp", ArtifactStream::from_bytes(b"first".to_vec()))
        .await
        .unwrap();
    store
        .save("myorg/myapp", ArtifactStream::from_bytes(b"second".to_vec()))
        .await
        .unwrap();

    let loaded = store.load("myorg/myapp").unwrap().unwrap();
    assert_eq!(loaded.into_bytes(1 << 20).await.unwrap(), b"second");
}
