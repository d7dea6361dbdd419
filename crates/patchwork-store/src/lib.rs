//! Content-addressed object storage for patchwork.
//!
//! The diff engine never reads storage directly; it resolves content ids
//! through the [`ObjectStore`] trait. Blobs hold file content and trees map
//! names to blobs or subtrees.
//!
//! # Object Types
//!
//! - blobs -- raw file content, read with [`ObjectStore::read_blob`]
//! - [`Tree`] -- directory listing mapping names to object references
//!
//! # Storage Backends
//!
//! - [`InMemoryObjectStore`] -- `HashMap`-based store for tests and embedding
//!
//! # Design Rules
//!
//! 1. Objects are immutable once written.
//! 2. Concurrent reads are always safe.
//! 3. Object data is handed out as [`bytes::Bytes`]; readers share the stored
//!    buffer instead of copying it.

pub mod error;
pub mod memory;
pub mod object;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryObjectStore;
pub use object::{ObjectKind, StoredObject, Tree, TreeEntry};
pub use traits::ObjectStore;
