use bytes::Bytes;
use patchwork_types::{FileMode, ObjectId};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Blob,
    Tree,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
        })
    }
}

/// Tagged bytes as held by a store. The store never looks inside `data`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub kind: ObjectKind,
    pub data: Bytes,
}

impl StoredObject {
    pub fn blob(data: impl Into<Bytes>) -> Self {
        Self {
            kind: ObjectKind::Blob,
            data: data.into(),
        }
    }

    /// The id this object is stored under. Blobs hash the same way the diff
    /// engine hashes working-tree content, so the two are comparable.
    pub fn id(&self) -> ObjectId {
        match self.kind {
            ObjectKind::Blob => ObjectId::for_blob(&self.data),
            ObjectKind::Tree => ObjectId::for_tree(&self.data),
        }
    }

    pub(crate) fn expect_kind(&self, id: ObjectId, kind: ObjectKind) -> StoreResult<()> {
        if self.kind == kind {
            return Ok(());
        }
        Err(StoreError::CorruptObject {
            id,
            reason: format!("expected {kind}, got {}", self.kind),
        })
    }
}

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

/// One name in a directory listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub mode: FileMode,
    pub name: String,
    pub object_id: ObjectId,
}

impl TreeEntry {
    pub fn new(mode: FileMode, name: impl Into<String>, object_id: ObjectId) -> Self {
        Self {
            mode,
            name: name.into(),
            object_id,
        }
    }

    pub fn is_tree(&self) -> bool {
        self.mode.is_tree()
    }
}

/// Directory listing, kept sorted by name so equal listings hash equally.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    pub fn new(mut entries: Vec<TreeEntry>) -> Self {
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Self { entries }
    }

    pub fn to_stored_object(&self) -> StoreResult<StoredObject> {
        let data =
            serde_json::to_vec(self).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(StoredObject {
            kind: ObjectKind::Tree,
            data: data.into(),
        })
    }

    /// Decode the object stored under `id`.
    pub fn decode(id: ObjectId, obj: &StoredObject) -> StoreResult<Self> {
        obj.expect_kind(id, ObjectKind::Tree)?;
        serde_json::from_slice(&obj.data).map_err(|e| StoreError::CorruptObject {
            id,
            reason: format!("undecodable tree: {e}"),
        })
    }
}
