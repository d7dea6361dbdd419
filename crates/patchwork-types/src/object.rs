use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Domain tags prepended to object content before hashing.
const BLOB_DOMAIN: &str = "patchwork-blob-v1";
const TREE_DOMAIN: &str = "patchwork-tree-v1";

/// Content-addressed identifier for any stored object.
///
/// An `ObjectId` is a BLAKE3 hash. Identical content always produces the same
/// `ObjectId`. The all-zero id is reserved to mean "no object" and is what a
/// missing side of a comparison carries.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId([u8; 32]);

impl ObjectId {
    /// Length of the raw hash in bytes.
    pub const RAW_LEN: usize = 32;

    /// Length of the full hex representation.
    pub const HEX_LEN: usize = 64;

    /// Compute the id a blob with this content is stored under.
    pub fn for_blob(data: &[u8]) -> Self {
        Self::hash_domain(BLOB_DOMAIN, data)
    }

    /// Compute the id of a serialized tree.
    pub fn for_tree(data: &[u8]) -> Self {
        Self::hash_domain(TREE_DOMAIN, data)
    }

    fn hash_domain(domain: &str, data: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        Self(*hasher.finalize().as_bytes())
    }

    /// Create an `ObjectId` from a pre-computed hash.
    pub fn from_hash(hash: [u8; 32]) -> Self {
        Self(hash)
    }

    /// The zero object ID. Represents "no object".
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Returns `true` if every byte is zero.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// The raw 32-byte hash.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The first `len` hex digits, clamped to the full length.
    pub fn to_hex_abbrev(&self, len: usize) -> String {
        let mut hex = self.to_hex();
        hex.truncate(len.min(Self::HEX_LEN));
        hex
    }

    /// Parse a full-length hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != Self::RAW_LEN {
            return Err(TypeError::InvalidLength {
                expected: Self::RAW_LEN,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Parse an abbreviated hex id (any length from 1 to [`Self::HEX_LEN`]).
    ///
    /// The digits not covered by the prefix are zero. Returns the id together
    /// with the number of hex digits that were given.
    pub fn from_hex_prefix(s: &str) -> Result<(Self, usize), TypeError> {
        if s.is_empty() || s.len() > Self::HEX_LEN {
            return Err(TypeError::InvalidLength {
                expected: Self::HEX_LEN,
                actual: s.len(),
            });
        }
        let mut arr = [0u8; 32];
        for (i, c) in s.bytes().enumerate() {
            let nibble = (c as char)
                .to_digit(16)
                .ok_or_else(|| TypeError::InvalidHex(format!("invalid digit {:?} in {s}", c as char)))?
                as u8;
            if i % 2 == 0 {
                arr[i / 2] = nibble << 4;
            } else {
                arr[i / 2] |= nibble;
            }
        }
        Ok((Self(arr), s.len()))
    }

    /// Returns `true` if the first `len` hex digits of both ids agree.
    pub fn prefix_eq(&self, other: &ObjectId, len: usize) -> bool {
        let len = len.min(Self::HEX_LEN);
        let full = len / 2;
        if self.0[..full] != other.0[..full] {
            return false;
        }
        len % 2 == 0 || (self.0[full] >> 4) == (other.0[full] >> 4)
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex_abbrev(8))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; 32]> for ObjectId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl From<ObjectId> for [u8; 32] {
    fn from(id: ObjectId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn blob_id_is_deterministic() {
        assert_eq!(ObjectId::for_blob(b"hello world"), ObjectId::for_blob(b"hello world"));
        assert_ne!(ObjectId::for_blob(b"hello"), ObjectId::for_blob(b"world"));
    }

    #[test]
    fn blob_id_is_domain_separated() {
        let raw = *blake3::hash(b"content").as_bytes();
        assert_ne!(ObjectId::for_blob(b"content"), ObjectId::from_hash(raw));
        assert_ne!(ObjectId::for_blob(b"content"), ObjectId::for_tree(b"content"));
    }

    #[test]
    fn zero_is_all_zeros() {
        let zero = ObjectId::zero();
        assert!(zero.is_zero());
        assert_eq!(zero.as_bytes(), &[0u8; 32]);
        assert_eq!(ObjectId::default(), zero);
    }

    #[test]
    fn abbreviation_is_clamped() {
        let id = ObjectId::for_blob(b"test");
        assert_eq!(id.to_hex_abbrev(7).len(), 7);
        assert_eq!(id.to_hex_abbrev(500).len(), ObjectId::HEX_LEN);
        assert!(id.to_hex().starts_with(&id.to_hex_abbrev(12)));
    }

    #[test]
    fn odd_length_prefix_parses() {
        let id = ObjectId::for_blob(b"prefix");
        let abbrev = id.to_hex_abbrev(7);
        let (parsed, len) = ObjectId::from_hex_prefix(&abbrev).unwrap();
        assert_eq!(len, 7);
        assert!(parsed.prefix_eq(&id, 7));
        assert_eq!(parsed.to_hex_abbrev(7), abbrev);
    }

    #[test]
    fn prefix_rejects_garbage() {
        assert!(matches!(
            ObjectId::from_hex_prefix("12xz"),
            Err(TypeError::InvalidHex(_))
        ));
        assert!(matches!(
            ObjectId::from_hex_prefix(""),
            Err(TypeError::InvalidLength { .. })
        ));
    }

    #[test]
    fn zero_prefix_is_zero() {
        let (id, len) = ObjectId::from_hex_prefix("0000000").unwrap();
        assert!(id.is_zero());
        assert_eq!(len, 7);
    }

    #[test]
    fn full_hex_roundtrip() {
        let id = ObjectId::for_blob(b"test");
        assert_eq!(ObjectId::from_hex(&id.to_hex()).unwrap(), id);
        assert_eq!(format!("{id}"), id.to_hex());
    }

    #[test]
    fn serde_roundtrip() {
        let id = ObjectId::for_blob(b"serde test");
        let json = serde_json::to_string(&id).unwrap();
        let parsed: ObjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    proptest! {
        #[test]
        fn any_prefix_matches_its_source(data in proptest::collection::vec(any::<u8>(), 0..64), len in 1usize..=64) {
            let id = ObjectId::for_blob(&data);
            let (parsed, parsed_len) = ObjectId::from_hex_prefix(&id.to_hex_abbrev(len)).unwrap();
            prop_assert_eq!(parsed_len, len);
            prop_assert!(parsed.prefix_eq(&id, len));
        }
    }
}
