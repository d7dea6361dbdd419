//! Patch text: unified diff output and the parser that reads it back.

pub mod base85;
pub mod binary;
mod format;
mod parse;
pub mod quote;

pub use format::{PatchFormat, PatchFormatter};
pub use parse::{parse_patch, parse_patches, ParseOptions, PatchParser};
