//! Per-path diff drivers.
//!
//! A driver decides whether a path is forced to text or binary and how hunk
//! headers are labelled with the enclosing function. Drivers are looked up
//! through an [`AttributeSource`]; the lookup is pure and never mutates
//! content.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use regex::bytes::Regex;
use tracing::{debug, warn};

use crate::config::DriverConfig;
use crate::error::{DiffError, DiffResult};

/// Longest function label placed in a hunk header.
pub const FUNCTION_CONTEXT_MAX: usize = 80;

/// Tri-state binary classification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Binary {
    #[default]
    Unknown,
    Yes,
    No,
}

/// The `diff` attribute of a path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum DiffAttribute {
    #[default]
    Unspecified,
    /// `diff`: always treat as text.
    Text,
    /// `-diff`: always treat as binary.
    Binary,
    /// `diff=<name>`: use the named driver.
    Driver(String),
}

/// Supplies per-path attributes. Errors are reported as text; the lookup
/// falls back to the automatic driver when one occurs.
pub trait AttributeSource: Send + Sync {
    fn diff_attribute(&self, path: &str) -> Result<DiffAttribute, String>;
}

/// An attribute source that never specifies anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAttributes;

impl AttributeSource for NoAttributes {
    fn diff_attribute(&self, _path: &str) -> Result<DiffAttribute, String> {
        Ok(DiffAttribute::Unspecified)
    }
}

/// Pattern-based attributes. Later rules override earlier ones.
///
/// Patterns: an exact path, `*` (everything), `*.ext` (basename suffix) or
/// `dir/*` (everything below `dir/`).
#[derive(Clone, Debug, Default)]
pub struct AttributeMap {
    rules: Vec<(String, DiffAttribute)>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, pattern: impl Into<String>, attr: DiffAttribute) -> Self {
        self.insert(pattern, attr);
        self
    }

    pub fn insert(&mut self, pattern: impl Into<String>, attr: DiffAttribute) {
        self.rules.push((pattern.into(), attr));
    }

    fn matches(pattern: &str, path: &str) -> bool {
        if pattern == "*" || pattern == path {
            return true;
        }
        if let Some(ext) = pattern.strip_prefix('*') {
            let base = path.rsplit('/').next().unwrap_or(path);
            return !ext.contains('/') && base.ends_with(ext);
        }
        if let Some(dir) = pattern.strip_suffix("/*") {
            return path
                .strip_prefix(dir)
                .is_some_and(|rest| rest.starts_with('/'));
        }
        false
    }
}

impl AttributeSource for AttributeMap {
    fn diff_attribute(&self, path: &str) -> Result<DiffAttribute, String> {
        Ok(self
            .rules
            .iter()
            .rev()
            .find(|(pattern, _)| Self::matches(pattern, path))
            .map(|(_, attr)| attr.clone())
            .unwrap_or_default())
    }
}

/// A named driver compiled from configuration.
pub struct CustomDriver {
    name: String,
    binary: Option<bool>,
    patterns: Vec<Regex>,
}

impl CustomDriver {
    pub fn new(name: impl Into<String>, binary: Option<bool>, patterns: &[String]) -> DiffResult<Self> {
        let name = name.into();
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    DiffError::Config(format!("driver {name}: bad xfuncname {p:?}: {e}"))
                })
            })
            .collect::<DiffResult<Vec<_>>>()?;
        Ok(Self {
            name,
            binary,
            patterns,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for CustomDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomDriver")
            .field("name", &self.name)
            .field("binary", &self.binary)
            .field("patterns", &self.patterns.len())
            .finish()
    }
}

/// The driver governing one path.
#[derive(Clone, Debug, Default)]
pub enum DiffDriver {
    /// Classify by content.
    #[default]
    Auto,
    ForceText,
    ForceBinary,
    Custom(Arc<CustomDriver>),
}

impl DiffDriver {
    /// The explicit classification, or [`Binary::Unknown`].
    pub fn is_binary(&self) -> Binary {
        match self {
            Self::Auto => Binary::Unknown,
            Self::ForceText => Binary::No,
            Self::ForceBinary => Binary::Yes,
            Self::Custom(d) => match d.binary {
                Some(true) => Binary::Yes,
                Some(false) => Binary::No,
                None => Binary::Unknown,
            },
        }
    }

    /// Label for a hunk header if `line` starts a function definition.
    pub fn find_function_context(&self, line: &[u8]) -> Option<Vec<u8>> {
        match self {
            Self::Custom(d) if !d.patterns.is_empty() => {
                let line = trim_newline(line);
                d.patterns.iter().find_map(|re| {
                    let caps = re.captures(line)?;
                    let m = caps.get(1).or_else(|| caps.get(0))?;
                    let label = clamp_label(m.as_bytes());
                    (!label.is_empty()).then(|| label.to_vec())
                })
            }
            _ => default_function_context(line),
        }
    }
}

/// Lines starting with a letter, `_` or `$` open a function.
fn default_function_context(line: &[u8]) -> Option<Vec<u8>> {
    let first = *line.first()?;
    if !(first.is_ascii_alphabetic() || first == b'_' || first == b'$') {
        return None;
    }
    Some(clamp_label(line).to_vec())
}

fn trim_newline(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\n").unwrap_or(line)
}

/// Strip trailing whitespace, then cut to the label budget.
fn clamp_label(label: &[u8]) -> &[u8] {
    let label = trim_trailing_ws(label);
    trim_trailing_ws(&label[..label.len().min(FUNCTION_CONTEXT_MAX)])
}

fn trim_trailing_ws(mut s: &[u8]) -> &[u8] {
    while let [rest @ .., last] = s {
        if !last.is_ascii_whitespace() {
            break;
        }
        s = rest;
    }
    s
}

/// Named drivers available to attribute lookups.
#[derive(Clone, Debug, Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<CustomDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &BTreeMap<String, DriverConfig>) -> DiffResult<Self> {
        let mut registry = Self::new();
        for (name, cfg) in config {
            registry.register(CustomDriver::new(name, cfg.binary, &cfg.xfuncname)?);
        }
        Ok(registry)
    }

    pub fn register(&mut self, driver: CustomDriver) {
        self.drivers.insert(driver.name.clone(), Arc::new(driver));
    }

    /// Driver for `path`. Attribute failures and unknown driver names fall
    /// back to [`DiffDriver::Auto`].
    pub fn lookup(&self, attrs: &dyn AttributeSource, path: &str) -> DiffDriver {
        match attrs.diff_attribute(path) {
            Ok(DiffAttribute::Unspecified) => DiffDriver::Auto,
            Ok(DiffAttribute::Text) => DiffDriver::ForceText,
            Ok(DiffAttribute::Binary) => DiffDriver::ForceBinary,
            Ok(DiffAttribute::Driver(name)) => match self.drivers.get(&name) {
                Some(d) => DiffDriver::Custom(Arc::clone(d)),
                None => {
                    debug!(path, driver = %name, "unknown diff driver, using auto");
                    DiffDriver::Auto
                }
            },
            Err(error) => {
                warn!(path, %error, "attribute lookup failed, using auto driver");
                DiffDriver::Auto
            }
        }
    }
}
