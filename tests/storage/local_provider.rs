//! Local storage provider: byte round-trips, traversal rejection, and
//! cross-provider copy (the migration primitive).

use spax::storage::{LocalProvider, StorageError, StorageProvider};
use tempfile::TempDir;

#[tokio::test]
async fn write_read_delete_round_trip() {
    let dir = TempDir::new().unwrap();
    let provider = LocalProvider::new(dir.path()).unwrap();

    let payload = bytes::Bytes::from_static(b"\x00\x01DICM-ish payload");
    provider.write("h1/2026/a/b/file.dcm", payload.clone()).await.unwrap();

    assert!(provider.exists("h1/2026/a/b/file.dcm").await.unwrap());
    assert_eq!(
        provider.size("h1/2026/a/b/file.dcm").await.unwrap(),
        payload.len() as i64
    );
    let read_back = provider.read_all("h1/2026/a/b/file.dcm").await.unwrap();
    assert_eq!(read_back, payload);

    provider.delete("h1/2026/a/b/file.dcm").await.unwrap();
    assert!(!provider.exists("h1/2026/a/b/file.dcm").await.unwrap());
}

#[tokio::test]
async fn overwrite_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let provider = LocalProvider::new(dir.path()).unwrap();

    provider
        .write("h1/file.dcm", bytes::Bytes::from_static(b"one"))
        .await
        .unwrap();
    provider
        .write("h1/file.dcm", bytes::Bytes::from_static(b"two"))
        .await
        .unwrap();
    assert_eq!(
        provider.read_all("h1/file.dcm").await.unwrap().as_ref(),
        b"two"
    );
}

#[tokio::test]
async fn traversal_paths_are_refused() {
    let dir = TempDir::new().unwrap();
    let provider = LocalProvider::new(dir.path()).unwrap();

    for bad in ["../escape.dcm", "h1/../../etc/passwd", "/abs/path.dcm"] {
        let err = provider
            .write(bad, bytes::Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, StorageError::PathTraversal(_)),
            "{} was not refused",
            bad
        );
    }
}

#[tokio::test]
async fn copy_from_preserves_bytes_across_volumes() {
    let source_dir = TempDir::new().unwrap();
    let target_dir = TempDir::new().unwrap();
    let source = LocalProvider::new(source_dir.path()).unwrap();
    let target = LocalProvider::new(target_dir.path()).unwrap();

    let payload = bytes::Bytes::from(vec![7u8; 4096]);
    source.write("h1/scan.dcm", payload.clone()).await.unwrap();

    target
        .copy_from(&source, "h1/scan.dcm", "h1/scan.dcm")
        .await
        .unwrap();

    assert_eq!(target.read_all("h1/scan.dcm").await.unwrap(), payload);
    assert_eq!(
        target.size("h1/scan.dcm").await.unwrap(),
        source.size("h1/scan.dcm").await.unwrap()
    );
    // Source untouched until a migration task decides to delete it.
    assert!(source.exists("h1/scan.dcm").await.unwrap());
}

#[tokio::test]
async fn reader_streams_the_file() {
    use tokio::io::AsyncReadExt;

    let dir = TempDir::new().unwrap();
    let provider = LocalProvider::new(dir.path()).unwrap();
    provider
        .write("h1/big.dcm", bytes::Bytes::from(vec![3u8; 100_000]))
        .await
        .unwrap();

    let mut reader = provider.reader("h1/big.dcm").await.unwrap();
    let mut collected = Vec::new();
    reader.read_to_end(&mut collected).await.unwrap();
    assert_eq!(collected.len(), 100_000);
}

#[test]
fn free_space_probes_report_something() {
    let dir = TempDir::new().unwrap();
    let provider = LocalProvider::new(dir.path()).unwrap();
    let free = provider.available_bytes().expect("statvfs should work");
    let total = provider.total_bytes().expect("statvfs should work");
    assert!(total >= free);
}
