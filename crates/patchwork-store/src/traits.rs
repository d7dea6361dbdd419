use bytes::Bytes;
use patchwork_types::ObjectId;

use crate::error::{StoreError, StoreResult};
use crate::object::{ObjectKind, StoredObject, Tree};

/// Content-addressed object store the diff engine resolves ids through.
///
/// Objects are immutable: an id always maps to the same data, and reads may
/// run concurrently with each other and with writes.
pub trait ObjectStore: Send + Sync {
    /// Fetch an object. `Ok(None)` when the id is unknown.
    fn read(&self, id: &ObjectId) -> StoreResult<Option<StoredObject>>;

    /// Store an object under its content id. Writing an existing object is a
    /// no-op.
    fn write(&self, object: &StoredObject) -> StoreResult<ObjectId>;

    fn exists(&self, id: &ObjectId) -> StoreResult<bool>;

    /// Resolve a blob id to its content.
    ///
    /// Fails with [`StoreError::NotFound`] when the id is unknown and with
    /// [`StoreError::CorruptObject`] when the id names a tree.
    fn read_blob(&self, id: &ObjectId) -> StoreResult<Bytes> {
        let obj = self.read(id)?.ok_or(StoreError::NotFound(*id))?;
        obj.expect_kind(*id, ObjectKind::Blob)?;
        Ok(obj.data)
    }

    /// Resolve and decode a tree id.
    fn read_tree(&self, id: &ObjectId) -> StoreResult<Tree> {
        let obj = self.read(id)?.ok_or(StoreError::NotFound(*id))?;
        Tree::decode(*id, &obj)
    }
}
