//! Delta records: how one path changed between the two sides of a diff.

use patchwork_types::{FileMode, ObjectId};
use serde::{Deserialize, Serialize};

/// What is known about one side's content.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFlags {
    /// Bytes are currently loaded.
    pub has_data: bool,
    /// Content is known to be binary.
    pub binary: bool,
    /// Content is known to be text.
    pub not_binary: bool,
    /// `id` is the full, verified content id.
    pub valid_id: bool,
}

/// One side of a comparison.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub path: Option<String>,
    pub id: ObjectId,
    /// Hex digits of `id` that are known. Full length unless the id was
    /// parsed from an abbreviated `index` line.
    pub id_abbrev: u16,
    pub size: u64,
    pub mode: FileMode,
    pub flags: FileFlags,
}

impl FileDescriptor {
    /// A side whose content id is known.
    pub fn new(path: impl Into<String>, id: ObjectId, mode: FileMode) -> Self {
        Self {
            path: Some(path.into()),
            id,
            id_abbrev: ObjectId::HEX_LEN as u16,
            size: 0,
            mode,
            flags: FileFlags {
                valid_id: true,
                ..Default::default()
            },
        }
    }

    /// A side whose content id will be computed when it is loaded, such as a
    /// working-tree file.
    pub fn unhashed(path: impl Into<String>, mode: FileMode) -> Self {
        Self {
            path: Some(path.into()),
            id_abbrev: 0,
            mode,
            ..Default::default()
        }
    }

    /// The missing side of an addition or deletion.
    pub fn absent(path: Option<String>) -> Self {
        Self {
            path,
            flags: FileFlags {
                valid_id: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// `false` for the missing side of an addition or deletion.
    pub fn exists(&self) -> bool {
        !self.mode.is_absent()
    }
}

/// Kind of change recorded by a [`Delta`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeltaStatus {
    Added,
    Deleted,
    Modified,
    Renamed,
    Copied,
    TypeChange,
    Unmodified,
    Ignored,
    Untracked,
}

impl DeltaStatus {
    /// Single-letter code used by name-status and raw output.
    pub fn status_char(&self) -> char {
        match self {
            Self::Added => 'A',
            Self::Deleted => 'D',
            Self::Modified => 'M',
            Self::Renamed => 'R',
            Self::Copied => 'C',
            Self::TypeChange => 'T',
            Self::Unmodified => ' ',
            Self::Ignored => 'I',
            Self::Untracked => '?',
        }
    }
}

/// Binary classification of a whole delta.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaFlags {
    /// At least one side is binary.
    pub binary: bool,
    /// Both sides are known to be text.
    pub not_binary: bool,
}

/// How one path changed between the old and new side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub old: FileDescriptor,
    pub new: FileDescriptor,
    pub status: DeltaStatus,
    /// 0-100; meaningful only for renames and copies.
    pub similarity: u16,
    pub flags: DeltaFlags,
}

impl Delta {
    pub fn new(status: DeltaStatus, old: FileDescriptor, new: FileDescriptor) -> Self {
        Self {
            old,
            new,
            status,
            similarity: 0,
            flags: DeltaFlags::default(),
        }
    }

    pub fn added(path: &str, id: ObjectId, mode: FileMode) -> Self {
        Self::new(
            DeltaStatus::Added,
            FileDescriptor::absent(Some(path.to_string())),
            FileDescriptor::new(path, id, mode),
        )
    }

    pub fn deleted(path: &str, id: ObjectId, mode: FileMode) -> Self {
        Self::new(
            DeltaStatus::Deleted,
            FileDescriptor::new(path, id, mode),
            FileDescriptor::absent(Some(path.to_string())),
        )
    }

    pub fn modified(path: &str, old_id: ObjectId, new_id: ObjectId, mode: FileMode) -> Self {
        Self::new(
            DeltaStatus::Modified,
            FileDescriptor::new(path, old_id, mode),
            FileDescriptor::new(path, new_id, mode),
        )
    }

    /// Display path: the new side's, falling back to the old side's.
    pub fn path(&self) -> Option<&str> {
        self.new.path.as_deref().or(self.old.path.as_deref())
    }

    pub fn is_binary(&self) -> bool {
        self.flags.binary
    }

    /// Both ids are missing, or they are equal and neither side is a
    /// submodule commit.
    pub fn is_unchanged(&self) -> bool {
        if self.old.id.is_zero() && self.new.id.is_zero() {
            return true;
        }
        if self.old.mode == FileMode::COMMIT || self.new.mode == FileMode::COMMIT {
            return false;
        }
        self.old.id == self.new.id
    }

    /// Returns `true` when the old and new paths name different files.
    pub fn is_rename_like(&self) -> bool {
        matches!(
            (&self.old.path, &self.new.path),
            (Some(a), Some(b)) if a != b
        )
    }
}
