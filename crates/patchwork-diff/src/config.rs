//! Diff configuration.
//!
//! [`DiffConfig`] is the persisted, TOML-loadable form. [`DiffOptions`] is
//! the validated per-call record derived from it that the pipeline consumes.

use std::collections::BTreeMap;

use patchwork_types::ObjectId;
use serde::{Deserialize, Serialize};

use crate::driver::DriverRegistry;
use crate::error::{DiffError, DiffResult};

/// Shortest abbreviation accepted for ids in `index` lines.
pub const MIN_ABBREV: usize = 2;

/// Abbreviation used when nothing is configured.
pub const DEFAULT_ABBREV: usize = 7;

/// Line-matching algorithm handed to the line engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffAlgorithm {
    #[default]
    Myers,
    Patience,
    Lcs,
}

/// Whitespace rules applied when comparing lines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhitespaceFlags {
    /// Ignore all whitespace.
    pub ignore_all: bool,
    /// Treat runs of whitespace as a single space and ignore it at line end.
    pub ignore_change: bool,
    /// Ignore whitespace at line end.
    pub ignore_eol: bool,
    /// Ignore a carriage return before the line feed.
    pub ignore_cr_at_eol: bool,
}

impl WhitespaceFlags {
    pub fn is_empty(&self) -> bool {
        !(self.ignore_all || self.ignore_change || self.ignore_eol || self.ignore_cr_at_eol)
    }
}

/// Configuration of one named driver (`[drivers.<name>]`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Force binary (`true`) or text (`false`) handling for matching paths.
    pub binary: Option<bool>,
    /// Regular expressions that recognise function-definition lines. The
    /// first capture group (or the whole match) becomes the hunk label.
    pub xfuncname: Vec<String>,
}

/// Persisted diff configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    /// Unchanged lines shown around each change.
    pub context_lines: u16,
    /// Extra unchanged lines allowed between two changes before they are
    /// split into separate hunks.
    pub interhunk_lines: u16,
    /// Hex digits shown for ids in `index` lines.
    pub abbrev: usize,
    /// Prefix for old paths in headers.
    pub old_prefix: String,
    /// Prefix for new paths in headers.
    pub new_prefix: String,
    /// Line-matching algorithm.
    pub algorithm: DiffAlgorithm,
    /// Files larger than this are treated as binary without being read.
    pub big_file_threshold: u64,
    /// Minimum similarity (0-100) for a delete/add pair to become a rename.
    pub rename_threshold: u16,
    /// Minimum similarity (0-100) for an add to become a copy.
    pub copy_threshold: u16,
    /// Above `rename_limit` sources x targets, only exact renames are found.
    pub rename_limit: usize,
    /// Whitespace rules for line comparison.
    pub whitespace: WhitespaceFlags,
    /// Named drivers referenced by the attribute source.
    pub drivers: BTreeMap<String, DriverConfig>,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            context_lines: 3,
            interhunk_lines: 0,
            abbrev: DEFAULT_ABBREV,
            old_prefix: "a/".to_string(),
            new_prefix: "b/".to_string(),
            algorithm: DiffAlgorithm::Myers,
            big_file_threshold: 512 * 1024 * 1024,
            rename_threshold: 50,
            copy_threshold: 50,
            rename_limit: 200,
            whitespace: WhitespaceFlags::default(),
            drivers: BTreeMap::new(),
        }
    }
}

impl DiffConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> DiffResult<Self> {
        toml::from_str(s).map_err(|e| DiffError::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> DiffResult<String> {
        toml::to_string(self).map_err(|e| DiffError::Config(e.to_string()))
    }

    /// Build the validated per-call options.
    pub fn diff_options(&self) -> DiffResult<DiffOptions> {
        DiffOptions {
            context_lines: self.context_lines,
            interhunk_lines: self.interhunk_lines,
            algorithm: self.algorithm,
            whitespace: self.whitespace,
            old_prefix: self.old_prefix.clone(),
            new_prefix: self.new_prefix.clone(),
            big_file_threshold: self.big_file_threshold,
            ..DiffOptions::default()
        }
        .with_abbrev(self.abbrev)
    }

    /// Compile the configured drivers.
    pub fn driver_registry(&self) -> DiffResult<DriverRegistry> {
        DriverRegistry::from_config(&self.drivers)
    }

    /// Rename/copy detection settings.
    pub fn find_options(&self) -> crate::diff::FindOptions {
        crate::diff::FindOptions {
            rename_threshold: self.rename_threshold,
            copy_threshold: self.copy_threshold,
            rename_limit: self.rename_limit,
            ..Default::default()
        }
    }
}

/// Validated options for one diff operation.
#[derive(Clone, Debug, PartialEq)]
pub struct DiffOptions {
    pub context_lines: u16,
    pub interhunk_lines: u16,
    pub algorithm: DiffAlgorithm,
    pub whitespace: WhitespaceFlags,
    /// Treat every file as text.
    pub force_text: bool,
    /// Treat every file as binary.
    pub force_binary: bool,
    /// Do not load content just to classify it when nobody asks for hunks.
    pub skip_binary_check: bool,
    /// Carry literal data for binary files (`GIT binary patch`).
    pub show_binary: bool,
    /// Keep unmodified entries when enumerating trees.
    pub include_unmodified: bool,
    pub old_prefix: String,
    pub new_prefix: String,
    pub big_file_threshold: u64,
    pub(crate) abbrev: usize,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            context_lines: 3,
            interhunk_lines: 0,
            algorithm: DiffAlgorithm::Myers,
            whitespace: WhitespaceFlags::default(),
            force_text: false,
            force_binary: false,
            skip_binary_check: false,
            show_binary: false,
            include_unmodified: false,
            old_prefix: "a/".to_string(),
            new_prefix: "b/".to_string(),
            big_file_threshold: 512 * 1024 * 1024,
            abbrev: DEFAULT_ABBREV,
        }
    }
}

impl DiffOptions {
    /// Hex digits shown for ids in `index` lines.
    pub fn abbrev(&self) -> usize {
        self.abbrev
    }

    /// Set the id abbreviation, which must lie in `2..=64`.
    pub fn with_abbrev(mut self, abbrev: usize) -> DiffResult<Self> {
        if !(MIN_ABBREV..=ObjectId::HEX_LEN).contains(&abbrev) {
            return Err(DiffError::Config(format!(
                "abbrev must be between {MIN_ABBREV} and {}, got {abbrev}",
                ObjectId::HEX_LEN
            )));
        }
        self.abbrev = abbrev;
        Ok(self)
    }

    pub fn with_context_lines(mut self, n: u16) -> Self {
        self.context_lines = n;
        self
    }

    pub fn with_show_binary(mut self, show: bool) -> Self {
        self.show_binary = show;
        self
    }
}
