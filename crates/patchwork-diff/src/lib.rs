//! Diff and patch engine for the patchwork object store.
//!
//! Compares two versions of files, turns the differences into structured
//! patches, renders them as unified diff text and reads that text back.
//!
//! # Key Types
//!
//! - [`ContentSource`] -- one side of a comparison, loaded on demand
//! - [`DiffDriver`] / [`DriverRegistry`] -- per-path text/binary and function-context rules
//! - [`SimilarityDigest`] -- rolling-hash fingerprint used for rename scoring
//! - [`LineEngine`] -- line matcher adapter, [`SimilarEngine`] by default
//! - [`Patch`] -- one delta with its hunks and lines, driven through [`PatchState`]
//! - [`PatchFormatter`] / [`PatchParser`] -- unified diff text out and in
//! - [`StatsAggregator`] -- diffstat rendering
//! - [`DiffList`] / [`DiffContext`] -- tree comparison and rename detection

pub mod codec;
pub mod config;
pub mod content;
pub mod delta;
pub mod diff;
pub mod driver;
pub mod error;
pub mod patch;
pub mod similarity;
pub mod stats;
pub mod xdiff;

pub use codec::{parse_patch, parse_patches, ParseOptions, PatchFormat, PatchFormatter, PatchParser};
pub use config::{DiffAlgorithm, DiffConfig, DiffOptions, DriverConfig, WhitespaceFlags};
pub use content::{ContentOrigin, ContentSource};
pub use delta::{Delta, DeltaFlags, DeltaStatus, FileDescriptor, FileFlags};
pub use diff::{DiffContext, DiffList, FindOptions};
pub use driver::{AttributeMap, AttributeSource, Binary, CustomDriver, DiffAttribute, DiffDriver, DriverRegistry, NoAttributes};
pub use error::{DiffError, DiffResult};
pub use patch::{
    BinaryKind, BinaryPatch, BinaryPatchSide, Callbacks, Hunk, Line, LineOrigin, LineStats, Patch,
    PatchState, PatchVisitor,
};
pub use similarity::{DigestBuilder, DigestWhitespace, SimilarityDigest};
pub use stats::{DiffTotals, StatsAggregator, StatsFormat};
pub use xdiff::{EngineOptions, EngineSink, LineEngine, SimilarEngine};
