use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use bytes::Bytes;
use patchwork_types::ObjectId;
use tracing::trace;

use crate::error::{StoreError, StoreResult};
use crate::object::StoredObject;
use crate::traits::ObjectStore;

/// `HashMap`-backed store for tests and embedding.
///
/// Every `read` is counted, so callers can check that content is fetched
/// once however many times a patch is rendered.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<ObjectId, StoredObject>>,
    reads: AtomicU64,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` as a blob and return its id.
    pub fn insert_blob(&self, data: impl Into<Bytes>) -> StoreResult<ObjectId> {
        self.write(&StoredObject::blob(data))
    }

    pub fn object_count(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    /// Number of `read` calls served so far, hits and misses alike.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn read(&self, id: &ObjectId) -> StoreResult<Option<StoredObject>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let found = self.objects.read().expect("lock poisoned").get(id).cloned();
        trace!(id = %id.to_hex_abbrev(8), hit = found.is_some(), "store read");
        Ok(found)
    }

    fn write(&self, object: &StoredObject) -> StoreResult<ObjectId> {
        let id = object.id();
        if id.is_zero() {
            return Err(StoreError::NullObjectId);
        }
        self.objects
            .write()
            .expect("lock poisoned")
            .entry(id)
            .or_insert_with(|| object.clone());
        Ok(id)
    }

    fn exists(&self, id: &ObjectId) -> StoreResult<bool> {
        Ok(self.objects.read().expect("lock poisoned").contains_key(id))
    }
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("objects", &self.object_count())
            .field("reads", &self.read_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Tree, TreeEntry};
    use patchwork_types::FileMode;

    #[test]
    fn blob_content_is_shared() {
        let store = InMemoryObjectStore::new();
        let id = store.insert_blob(&b"hello world"[..]).unwrap();
        assert_eq!(id, ObjectId::for_blob(b"hello world"));
        let first = store.read_blob(&id).unwrap();
        let second = store.read_blob(&id).unwrap();
        assert_eq!(first.as_ptr(), second.as_ptr());
    }

    #[test]
    fn unknown_blob_is_not_found() {
        let store = InMemoryObjectStore::new();
        let id = ObjectId::for_blob(b"missing");
        assert!(!store.exists(&id).unwrap());
        assert!(matches!(store.read_blob(&id), Err(StoreError::NotFound(x)) if x == id));
        assert!(matches!(store.read_tree(&id), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn kinds_are_checked_on_read() {
        let store = InMemoryObjectStore::new();
        let blob = store.insert_blob(&b"text\n"[..]).unwrap();
        let tree = Tree::new(vec![TreeEntry::new(FileMode::BLOB, "a", blob)]);
        let tree_id = store.write(&tree.to_stored_object().unwrap()).unwrap();

        assert_eq!(store.read_tree(&tree_id).unwrap(), tree);
        assert!(matches!(store.read_blob(&tree_id), Err(StoreError::CorruptObject { .. })));
        assert!(matches!(store.read_tree(&blob), Err(StoreError::CorruptObject { .. })));
    }

    #[test]
    fn writes_are_idempotent() {
        let store = InMemoryObjectStore::new();
        let a = store.insert_blob(&b"same"[..]).unwrap();
        let b = store.insert_blob(&b"same"[..]).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.object_count(), 1);
    }

    #[test]
    fn only_reads_are_counted() {
        let store = InMemoryObjectStore::new();
        let id = store.insert_blob(&b"x"[..]).unwrap();
        store.exists(&id).unwrap();
        assert_eq!(store.read_count(), 0);
        store.read_blob(&id).unwrap();
        store.read(&ObjectId::for_blob(b"nope")).unwrap();
        assert_eq!(store.read_count(), 2);
        assert_eq!(format!("{store:?}"), "InMemoryObjectStore { objects: 1, reads: 2 }");
    }

    #[test]
    fn concurrent_readers() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(InMemoryObjectStore::new());
        let id = store.insert_blob(&b"shared data"[..]).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || ObjectId::for_blob(&store.read_blob(&id).unwrap()))
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), id);
        }
        assert_eq!(store.read_count(), 8);
    }
}
