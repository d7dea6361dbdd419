//! One side of a comparison: where its bytes come from, loading them on
//! demand and classifying them as text or binary.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use patchwork_store::ObjectStore;
use patchwork_types::{FileMode, ObjectId};
use tracing::debug;

use crate::delta::FileDescriptor;
use crate::driver::{Binary, DiffDriver};
use crate::error::{DiffError, DiffResult};

/// Bytes scanned for NUL when classifying content.
pub const BINARY_SCAN_LEN: usize = 4000;

/// Where a side's bytes come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContentOrigin {
    /// Resolve the descriptor's id through the object store.
    Store,
    /// Read the descriptor's path below the working-tree root.
    Workdir,
    /// Caller-supplied bytes.
    Buffer(Bytes),
}

impl ContentOrigin {
    pub fn is_workdir(&self) -> bool {
        matches!(self, Self::Workdir)
    }
}

/// Lazily loaded content of one side of a comparison.
pub struct ContentSource {
    file: FileDescriptor,
    origin: ContentOrigin,
    driver: DiffDriver,
    store: Option<Arc<dyn ObjectStore>>,
    workdir: Option<PathBuf>,
    big_file_threshold: u64,
    data: Option<Bytes>,
    loaded: bool,
}

impl ContentSource {
    pub fn new(file: FileDescriptor, origin: ContentOrigin, driver: DiffDriver) -> Self {
        Self {
            file,
            origin,
            driver,
            store: None,
            workdir: None,
            big_file_threshold: u64::MAX,
            data: None,
            loaded: false,
        }
    }

    /// Content held in memory. The descriptor's id is computed on load.
    pub fn from_buffer(path: Option<&str>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let file = FileDescriptor {
            path: path.map(str::to_string),
            mode: FileMode::BLOB,
            size: data.len() as u64,
            ..Default::default()
        };
        Self::new(file, ContentOrigin::Buffer(data), DiffDriver::Auto)
    }

    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_workdir(mut self, root: impl Into<PathBuf>) -> Self {
        self.workdir = Some(root.into());
        self
    }

    pub fn with_big_file_threshold(mut self, threshold: u64) -> Self {
        self.big_file_threshold = threshold;
        self
    }

    pub fn file(&self) -> &FileDescriptor {
        &self.file
    }

    pub fn origin(&self) -> &ContentOrigin {
        &self.origin
    }

    pub fn driver(&self) -> &DiffDriver {
        &self.driver
    }

    /// Loaded bytes, if any.
    pub fn data(&self) -> Option<&Bytes> {
        self.data.as_ref()
    }

    pub fn size(&self) -> u64 {
        self.file.size
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Populate the bytes from the configured origin. A second call is a
    /// no-op until [`unload`](Self::unload) is called.
    pub fn load(&mut self) -> DiffResult<()> {
        if self.loaded {
            return Ok(());
        }

        let data = if !self.file.exists() {
            Some(Bytes::new())
        } else if let ContentOrigin::Buffer(buf) = &self.origin {
            Some(buf.clone())
        } else if self.origin.is_workdir() {
            self.load_from_workdir()?
        } else {
            self.load_from_store()?
        };

        if let Some(data) = &data {
            self.file.size = data.len() as u64;
            if !self.file.flags.valid_id {
                self.file.id = if self.file.exists() {
                    ObjectId::for_blob(data)
                } else {
                    ObjectId::zero()
                };
                self.file.id_abbrev = ObjectId::HEX_LEN as u16;
                self.file.flags.valid_id = true;
            }
            self.file.flags.has_data = true;
        }
        self.data = data;
        self.loaded = true;
        self.classify();
        Ok(())
    }

    fn load_from_store(&mut self) -> DiffResult<Option<Bytes>> {
        let id = self.file.id;
        if id.is_zero() {
            return Ok(Some(Bytes::new()));
        }
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| DiffError::Config("store-backed content without a store".into()))?;
        let data = store.read_blob(&id).map_err(DiffError::from_store)?;
        debug!(id = %id.to_hex_abbrev(8), size = data.len(), "loaded blob");
        if data.len() as u64 > self.big_file_threshold {
            self.file.size = data.len() as u64;
            self.file.flags.binary = true;
            return Ok(None);
        }
        Ok(Some(data))
    }

    fn load_from_workdir(&mut self) -> DiffResult<Option<Bytes>> {
        let root = self
            .workdir
            .as_ref()
            .ok_or_else(|| DiffError::Config("workdir content without a workdir root".into()))?;
        let rel = self.file.path.as_deref().unwrap_or_default();
        let full = root.join(rel);
        let io_err = |source: std::io::Error| DiffError::Io {
            path: full.clone(),
            source,
        };

        if self.file.mode == FileMode::LINK {
            let target = std::fs::read_link(&full).map_err(io_err)?;
            let data = Bytes::from(target.to_string_lossy().into_owned());
            debug!(path = %full.display(), size = data.len(), "loaded symlink target");
            return Ok(Some(data));
        }

        let meta = std::fs::metadata(&full).map_err(io_err)?;
        if meta.len() > self.big_file_threshold {
            debug!(path = %full.display(), size = meta.len(), "file over size threshold, treating as binary");
            self.file.size = meta.len();
            self.file.flags.binary = true;
            return Ok(None);
        }
        let data = Bytes::from(std::fs::read(&full).map_err(io_err)?);
        debug!(path = %full.display(), size = data.len(), "loaded workdir file");
        Ok(Some(data))
    }

    /// Release the bytes, keeping size and id.
    pub fn unload(&mut self) {
        self.data = None;
        self.loaded = false;
        self.file.flags.has_data = false;
    }

    /// Driver flag first, then known flags, then a NUL scan of loaded bytes.
    pub fn is_binary(&self) -> Binary {
        match self.driver.is_binary() {
            Binary::Unknown => {}
            known => return known,
        }
        if self.file.flags.binary {
            return Binary::Yes;
        }
        if self.file.flags.not_binary {
            return Binary::No;
        }
        match &self.data {
            Some(data) => contains_nul(data),
            None => Binary::Unknown,
        }
    }

    fn classify(&mut self) {
        match self.is_binary() {
            Binary::Yes => {
                self.file.flags.binary = true;
                self.file.flags.not_binary = false;
            }
            Binary::No => {
                self.file.flags.not_binary = true;
                self.file.flags.binary = false;
            }
            Binary::Unknown => {}
        }
    }

    /// Full path this source reads from, for workdir origins.
    pub fn workdir_path(&self) -> Option<PathBuf> {
        match (&self.origin, &self.workdir, &self.file.path) {
            (ContentOrigin::Workdir, Some(root), Some(path)) => Some(Path::new(root).join(path)),
            _ => None,
        }
    }
}

fn contains_nul(data: &[u8]) -> Binary {
    let scan = &data[..data.len().min(BINARY_SCAN_LEN)];
    if scan.contains(&0) {
        Binary::Yes
    } else {
        Binary::No
    }
}

impl fmt::Debug for ContentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentSource")
            .field("path", &self.file.path)
            .field("origin", &self.origin)
            .field("driver", &self.driver)
            .field("loaded", &self.loaded)
            .field("size", &self.file.size)
            .finish()
    }
}
