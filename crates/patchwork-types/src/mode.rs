use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Platform file-mode bits of one side of a comparison.
///
/// Zero means the side does not exist (the old side of an addition or the new
/// side of a deletion).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileMode(u32);

/// Coarse object type behind a mode, used for type-change detection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModeKind {
    Absent,
    Tree,
    Blob,
    Link,
    Commit,
    Unknown,
}

impl FileMode {
    pub const UNREADABLE: Self = Self(0);
    pub const TREE: Self = Self(0o040000);
    pub const BLOB: Self = Self(0o100644);
    pub const BLOB_EXECUTABLE: Self = Self(0o100755);
    pub const LINK: Self = Self(0o120000);
    pub const COMMIT: Self = Self(0o160000);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Returns `true` for mode zero.
    pub fn is_absent(&self) -> bool {
        self.0 == 0
    }

    pub fn is_tree(&self) -> bool {
        self.kind() == ModeKind::Tree
    }

    pub fn kind(&self) -> ModeKind {
        match self.0 & 0o170000 {
            0 if self.0 == 0 => ModeKind::Absent,
            0o040000 => ModeKind::Tree,
            0o100000 => ModeKind::Blob,
            0o120000 => ModeKind::Link,
            0o160000 => ModeKind::Commit,
            _ => ModeKind::Unknown,
        }
    }

    /// Parse octal digits as they appear in patch headers (`100644`).
    pub fn from_octal(s: &str) -> Result<Self, TypeError> {
        if s.is_empty() || !s.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
            return Err(TypeError::InvalidMode(s.to_string()));
        }
        u32::from_str_radix(s, 8)
            .map(Self)
            .map_err(|_| TypeError::InvalidMode(s.to_string()))
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:o}", self.0)
    }
}

impl From<u32> for FileMode {
    fn from(bits: u32) -> Self {
        Self(bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_plain_octal() {
        assert_eq!(FileMode::BLOB.to_string(), "100644");
        assert_eq!(FileMode::BLOB_EXECUTABLE.to_string(), "100755");
        assert_eq!(FileMode::TREE.to_string(), "40000");
    }

    #[test]
    fn octal_parse() {
        assert_eq!(FileMode::from_octal("100755").unwrap(), FileMode::BLOB_EXECUTABLE);
        assert_eq!(FileMode::from_octal("120000").unwrap(), FileMode::LINK);
        assert!(FileMode::from_octal("10064x").is_err());
        assert!(FileMode::from_octal("").is_err());
        assert!(FileMode::from_octal("100689").is_err());
    }

    #[test]
    fn kinds() {
        assert_eq!(FileMode::UNREADABLE.kind(), ModeKind::Absent);
        assert_eq!(FileMode::BLOB.kind(), ModeKind::Blob);
        assert_eq!(FileMode::BLOB_EXECUTABLE.kind(), ModeKind::Blob);
        assert_eq!(FileMode::LINK.kind(), ModeKind::Link);
        assert_eq!(FileMode::COMMIT.kind(), ModeKind::Commit);
        assert!(FileMode::TREE.is_tree());
        assert!(FileMode::default().is_absent());
    }
}
