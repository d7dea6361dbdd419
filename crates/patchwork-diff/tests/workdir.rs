//! Comparing stored content against files in a working tree.

use std::fs;
use std::sync::Arc;

use patchwork_diff::{
    ContentOrigin, ContentSource, Delta, DeltaStatus, DiffContext, DiffList, DiffOptions, DiffDriver,
    DigestWhitespace, FileDescriptor, PatchFormat, SimilarityDigest,
};
use patchwork_store::InMemoryObjectStore;
use patchwork_types::FileMode;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn workdir_delta(store: &InMemoryObjectStore, path: &str, stored: &str) -> Delta {
    let id = store.insert_blob(stored.to_string()).unwrap();
    Delta::new(
        DeltaStatus::Modified,
        FileDescriptor::new(path, id, FileMode::BLOB),
        FileDescriptor::unhashed(path, FileMode::BLOB),
    )
}

#[test]
fn stored_blob_against_workdir_file() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("greeting.txt"), "hello\nworld\n").unwrap();
    fs::write(dir.path().join("same.txt"), "unchanged\n").unwrap();

    let store = Arc::new(InMemoryObjectStore::new());
    let ctx = Arc::new(
        DiffContext::new(DiffOptions::default())
            .with_store(store.clone())
            .with_workdir(dir.path()),
    );
    let mut list = DiffList::new(ctx);
    list.push(
        workdir_delta(&store, "greeting.txt", "hello\n"),
        ContentOrigin::Store,
        ContentOrigin::Workdir,
    );
    list.push(
        workdir_delta(&store, "same.txt", "unchanged\n"),
        ContentOrigin::Store,
        ContentOrigin::Workdir,
    );

    let changed = list.patch(0).unwrap();
    let text = changed.to_text().unwrap();
    assert!(text.contains("@@ -1 +1,2 @@\n hello\n+world\n"), "{text}");
    // The working-tree side was hashed while loading.
    assert!(changed.delta().new.flags.valid_id);

    let same = list.patch(1).unwrap();
    assert_eq!(same.delta().status, DeltaStatus::Unmodified);
    assert_eq!(list.to_text(PatchFormat::Patch).unwrap(), text);

    let totals = list.stats().unwrap().totals();
    assert_eq!((totals.files_changed, totals.insertions), (1, 1));
}

#[test]
fn workdir_load_is_idempotent() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f.txt");
    fs::write(&path, "first\n").unwrap();

    let mut source = ContentSource::new(
        FileDescriptor::unhashed("f.txt", FileMode::BLOB),
        ContentOrigin::Workdir,
        DiffDriver::Auto,
    )
    .with_workdir(dir.path());
    source.load().unwrap();
    let first = source.data().cloned().unwrap();

    // A second load must not touch the file system again.
    fs::remove_file(&path).unwrap();
    source.load().unwrap();
    assert_eq!(source.data(), Some(&first));
    assert_eq!(source.size(), 6);

    source.unload();
    assert!(source.data().is_none());
    assert_eq!(source.size(), 6);
    assert!(source.load().is_err());
}

#[test]
fn oversized_workdir_file_is_binary() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("big.txt"), "plenty of text\n".repeat(10)).unwrap();
    let mut source = ContentSource::new(
        FileDescriptor::unhashed("big.txt", FileMode::BLOB),
        ContentOrigin::Workdir,
        DiffDriver::Auto,
    )
    .with_workdir(dir.path())
    .with_big_file_threshold(16);
    source.load().unwrap();
    assert!(source.data().is_none());
    assert!(source.file().flags.binary);
    assert_eq!(source.size(), 150);
}

#[cfg(unix)]
#[test]
fn symlinks_compare_by_target() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    std::os::unix::fs::symlink("target/one", dir.path().join("link")).unwrap();
    let mut source = ContentSource::new(
        FileDescriptor::unhashed("link", FileMode::LINK),
        ContentOrigin::Workdir,
        DiffDriver::Auto,
    )
    .with_workdir(dir.path());
    source.load().unwrap();
    assert_eq!(source.data().map(|d| d.as_ref()), Some(&b"target/one"[..]));
}

#[test]
fn file_digest_matches_buffer_digest() {
    let dir = tempfile::tempdir().unwrap();
    let body: String = (0..50).map(|i| format!("fn item_{i}() {{}}\n")).collect();
    let path = dir.path().join("lib.rs");
    fs::write(&path, &body).unwrap();

    let from_file = SimilarityDigest::from_file(&path, DigestWhitespace::Smart).unwrap();
    let from_bytes = SimilarityDigest::from_bytes(body.as_bytes(), DigestWhitespace::Smart).unwrap();
    assert_eq!(from_file, from_bytes);
    assert_eq!(from_file.compare(&from_bytes), 100);
}
