//! Foundation types for patchwork.
//!
//! Every other patchwork crate depends on `patchwork-types`.
//!
//! # Key Types
//!
//! - [`ObjectId`] -- Content-addressed identifier (BLAKE3 hash), with support
//!   for the abbreviated forms that appear in patch text
//! - [`FileMode`] -- Mode bits of one side of a comparison

pub mod error;
pub mod mode;
pub mod object;

pub use error::TypeError;
pub use mode::{FileMode, ModeKind};
pub use object::ObjectId;
