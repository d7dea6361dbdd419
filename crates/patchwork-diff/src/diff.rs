//! A list of deltas between two sides, and the shared context their patches
//! are generated in.
//!
//! [`DiffContext`] carries everything a patch needs to load and diff
//! content: the object store, an optional working-tree root, attribute and
//! driver lookup, options and the line engine. [`DiffList`] collects deltas
//! (from two trees or pushed one at a time), pairs up renames and copies,
//! and hands out patches on demand.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use patchwork_store::{ObjectStore, Tree, TreeEntry};
use patchwork_types::ObjectId;
use tracing::{debug, info, trace};

use crate::codec::{PatchFormat, PatchFormatter};
use crate::config::DiffOptions;
use crate::content::{ContentOrigin, ContentSource};
use crate::delta::{Delta, DeltaStatus, FileDescriptor};
use crate::driver::{AttributeSource, DiffDriver, DriverRegistry, NoAttributes};
use crate::error::{DiffError, DiffResult};
use crate::patch::{Patch, PatchVisitor};
use crate::similarity::{DigestWhitespace, SimilarityDigest};
use crate::stats::StatsAggregator;
use crate::xdiff::{LineEngine, SimilarEngine};

// ---------------------------------------------------------------------------
// DiffContext
// ---------------------------------------------------------------------------

/// Shared environment for generating patches.
pub struct DiffContext {
    store: Option<Arc<dyn ObjectStore>>,
    workdir: Option<PathBuf>,
    attributes: Arc<dyn AttributeSource>,
    drivers: DriverRegistry,
    pub options: DiffOptions,
    pub engine: Arc<dyn LineEngine>,
}

impl DiffContext {
    pub fn new(options: DiffOptions) -> Self {
        Self {
            store: None,
            workdir: None,
            attributes: Arc::new(NoAttributes),
            drivers: DriverRegistry::new(),
            options,
            engine: Arc::new(SimilarEngine),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Root that [`ContentOrigin::Workdir`] paths are resolved against.
    pub fn with_workdir(mut self, root: impl Into<PathBuf>) -> Self {
        self.workdir = Some(root.into());
        self
    }

    pub fn with_attributes(mut self, attributes: Arc<dyn AttributeSource>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_drivers(mut self, drivers: DriverRegistry) -> Self {
        self.drivers = drivers;
        self
    }

    pub fn with_engine(mut self, engine: Arc<dyn LineEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn store(&self) -> Option<&Arc<dyn ObjectStore>> {
        self.store.as_ref()
    }

    /// Driver for `path`: forced by the options, else from attributes.
    pub fn driver_for(&self, path: Option<&str>) -> DiffDriver {
        if self.options.force_text {
            DiffDriver::ForceText
        } else if self.options.force_binary {
            DiffDriver::ForceBinary
        } else {
            match path {
                Some(path) => self.drivers.lookup(self.attributes.as_ref(), path),
                None => DiffDriver::Auto,
            }
        }
    }

    /// A content source for `file`, wired to this context's store, working
    /// tree and size threshold.
    pub fn source(&self, file: FileDescriptor, origin: ContentOrigin) -> ContentSource {
        let driver = self.driver_for(file.path.as_deref());
        let mut source = ContentSource::new(file, origin, driver)
            .with_big_file_threshold(self.options.big_file_threshold);
        if let Some(store) = &self.store {
            source = source.with_store(Arc::clone(store));
        }
        if let Some(root) = &self.workdir {
            source = source.with_workdir(root.clone());
        }
        source
    }
}

impl fmt::Debug for DiffContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiffContext")
            .field("has_store", &self.store.is_some())
            .field("workdir", &self.workdir)
            .field("options", &self.options)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Rename and copy detection options
// ---------------------------------------------------------------------------

/// Settings for [`DiffList::find_similar`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FindOptions {
    /// Pair deleted files with added ones.
    pub renames: bool,
    /// Pair added files with modified or unmodified sources.
    pub copies: bool,
    /// Minimum score (0-100) for a rename.
    pub rename_threshold: u16,
    /// Minimum score (0-100) for a copy.
    pub copy_threshold: u16,
    /// Above this many source x target pairs, only exact matches are found.
    pub rename_limit: usize,
    /// Whitespace handling for similarity digests.
    pub whitespace: DigestWhitespace,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            renames: true,
            copies: false,
            rename_threshold: 50,
            copy_threshold: 50,
            rename_limit: 200,
            whitespace: DigestWhitespace::Smart,
        }
    }
}

// ---------------------------------------------------------------------------
// DiffList
// ---------------------------------------------------------------------------

struct DiffEntry {
    delta: Delta,
    old_origin: ContentOrigin,
    new_origin: ContentOrigin,
    patch: OnceLock<Arc<Patch>>,
}

impl DiffEntry {
    fn new(delta: Delta, old_origin: ContentOrigin, new_origin: ContentOrigin) -> Self {
        Self {
            delta,
            old_origin,
            new_origin,
            patch: OnceLock::new(),
        }
    }
}

/// Ordered deltas sharing one [`DiffContext`].
pub struct DiffList {
    ctx: Arc<DiffContext>,
    entries: Vec<DiffEntry>,
}

/// A matched pair found by [`DiffList::find_similar`].
#[derive(Clone, Copy, Debug)]
struct Pairing {
    source: usize,
    target: usize,
    status: DeltaStatus,
    similarity: u16,
}

impl DiffList {
    pub fn new(ctx: Arc<DiffContext>) -> Self {
        Self {
            ctx,
            entries: Vec::new(),
        }
    }

    pub fn context(&self) -> &Arc<DiffContext> {
        &self.ctx
    }

    /// Append a delta whose sides are read from the given origins.
    pub fn push(&mut self, delta: Delta, old_origin: ContentOrigin, new_origin: ContentOrigin) {
        self.entries.push(DiffEntry::new(delta, old_origin, new_origin));
    }

    /// Compare two stored trees, recursing into subtrees. `None` stands for
    /// an empty tree.
    pub fn from_trees(
        ctx: Arc<DiffContext>,
        old_tree: Option<&ObjectId>,
        new_tree: Option<&ObjectId>,
    ) -> DiffResult<Self> {
        let mut list = Self::new(ctx);
        let old = old_tree.map(|id| list.load_tree(id)).transpose()?;
        let new = new_tree.map(|id| list.load_tree(id)).transpose()?;
        list.walk("", old.as_ref(), new.as_ref())?;
        info!(deltas = list.entries.len(), "tree diff complete");
        Ok(list)
    }

    fn load_tree(&self, id: &ObjectId) -> DiffResult<Tree> {
        let store = self
            .ctx
            .store()
            .ok_or_else(|| DiffError::Config("tree diff without a store".into()))?;
        store.read_tree(id).map_err(DiffError::from_store)
    }

    fn walk(&mut self, prefix: &str, old: Option<&Tree>, new: Option<&Tree>) -> DiffResult<()> {
        let mut names: BTreeMap<&str, (Option<&TreeEntry>, Option<&TreeEntry>)> = BTreeMap::new();
        for entry in old.iter().flat_map(|t| &t.entries) {
            names.entry(entry.name.as_str()).or_default().0 = Some(entry);
        }
        for entry in new.iter().flat_map(|t| &t.entries) {
            names.entry(entry.name.as_str()).or_default().1 = Some(entry);
        }

        for (name, (old_entry, new_entry)) in names {
            let path = format!("{prefix}{name}");
            match (old_entry, new_entry) {
                (Some(o), Some(n)) if o.is_tree() && n.is_tree() => {
                    if o.object_id != n.object_id {
                        self.walk_subtrees(&path, Some(o), Some(n))?;
                    }
                }
                (Some(o), Some(n)) if o.is_tree() => {
                    self.walk_subtrees(&path, Some(o), None)?;
                    self.push_side(&path, None, Some(n));
                }
                (Some(o), Some(n)) if n.is_tree() => {
                    self.push_side(&path, Some(o), None);
                    self.walk_subtrees(&path, None, Some(n))?;
                }
                (Some(o), Some(n)) => self.push_pair(&path, o, n),
                (Some(o), None) if o.is_tree() => self.walk_subtrees(&path, Some(o), None)?,
                (None, Some(n)) if n.is_tree() => self.walk_subtrees(&path, None, Some(n))?,
                (o, n) => self.push_side(&path, o, n),
            }
        }
        Ok(())
    }

    fn walk_subtrees(
        &mut self,
        path: &str,
        old: Option<&TreeEntry>,
        new: Option<&TreeEntry>,
    ) -> DiffResult<()> {
        trace!(path, "descending into subtree");
        let old = old.map(|e| self.load_tree(&e.object_id)).transpose()?;
        let new = new.map(|e| self.load_tree(&e.object_id)).transpose()?;
        self.walk(&format!("{path}/"), old.as_ref(), new.as_ref())
    }

    /// An entry present on only one side.
    fn push_side(&mut self, path: &str, old: Option<&TreeEntry>, new: Option<&TreeEntry>) {
        let delta = match (old, new) {
            (Some(o), None) => Delta::deleted(path, o.object_id, o.mode),
            (None, Some(n)) => Delta::added(path, n.object_id, n.mode),
            _ => return,
        };
        self.push(delta, ContentOrigin::Store, ContentOrigin::Store);
    }

    fn push_pair(&mut self, path: &str, old: &TreeEntry, new: &TreeEntry) {
        let status = if old.object_id == new.object_id && old.mode == new.mode {
            if !self.ctx.options.include_unmodified {
                return;
            }
            DeltaStatus::Unmodified
        } else if old.mode.kind() != new.mode.kind() {
            DeltaStatus::TypeChange
        } else {
            DeltaStatus::Modified
        };
        let delta = Delta::new(
            status,
            FileDescriptor::new(path, old.object_id, old.mode),
            FileDescriptor::new(path, new.object_id, new.mode),
        );
        self.push(delta, ContentOrigin::Store, ContentOrigin::Store);
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn deltas(&self) -> impl Iterator<Item = &Delta> {
        self.entries.iter().map(|e| &e.delta)
    }

    pub fn num_deltas(&self) -> usize {
        self.entries.len()
    }

    pub fn num_deltas_of_type(&self, status: DeltaStatus) -> usize {
        self.entries.iter().filter(|e| e.delta.status == status).count()
    }

    pub fn get_delta(&self, index: usize) -> DiffResult<&Delta> {
        self.entry(index).map(|e| &e.delta)
    }

    fn entry(&self, index: usize) -> DiffResult<&DiffEntry> {
        self.entries.get(index).ok_or(DiffError::IndexOutOfRange {
            what: "delta",
            index,
            len: self.entries.len(),
        })
    }

    fn build_patch(&self, entry: &DiffEntry) -> Patch {
        let old = self.ctx.source(entry.delta.old.clone(), entry.old_origin.clone());
        let new = self.ctx.source(entry.delta.new.clone(), entry.new_origin.clone());
        Patch::new(entry.delta.clone(), old, new, Arc::clone(&self.ctx))
    }

    /// The generated patch for delta `index`. Generated once and shared.
    pub fn patch(&self, index: usize) -> DiffResult<Arc<Patch>> {
        let entry = self.entry(index)?;
        if let Some(patch) = entry.patch.get() {
            return Ok(Arc::clone(patch));
        }
        let mut patch = self.build_patch(entry);
        patch.generate()?;
        // A concurrent caller may have filled the slot first; theirs wins.
        Ok(Arc::clone(entry.patch.get_or_init(|| Arc::new(patch))))
    }

    /// Stream every delta through `visitor`, reporting progress as the
    /// fraction of deltas already visited.
    pub fn foreach(&self, visitor: &mut dyn PatchVisitor) -> DiffResult<()> {
        let total = self.entries.len();
        for (i, entry) in self.entries.iter().enumerate() {
            let progress = i as f32 / total as f32;
            let mut patch = self.build_patch(entry);
            patch.foreach_progress(visitor, progress)?;
        }
        Ok(())
    }

    /// Line statistics over every delta.
    pub fn stats(&self) -> DiffResult<StatsAggregator> {
        let mut stats = StatsAggregator::new();
        for i in 0..self.entries.len() {
            stats.add(&*self.patch(i)?)?;
        }
        Ok(stats)
    }

    /// Render every delta in `format`.
    pub fn to_buf(&self, format: PatchFormat) -> DiffResult<Vec<u8>> {
        let formatter = PatchFormatter::new(format, &self.ctx.options);
        let mut out = Vec::new();
        for (i, entry) in self.entries.iter().enumerate() {
            if format.needs_content() {
                formatter.write(&*self.patch(i)?, &mut out)?;
            } else {
                formatter.write_delta(&entry.delta, &mut out);
            }
        }
        Ok(out)
    }

    pub fn to_text(&self, format: PatchFormat) -> DiffResult<String> {
        Ok(String::from_utf8_lossy(&self.to_buf(format)?).into_owned())
    }

    // -----------------------------------------------------------------------
    // Rename and copy detection
    // -----------------------------------------------------------------------

    /// Rewrite added files as renames or copies of other entries.
    ///
    /// Exact id matches are paired first. Remaining candidates are scored
    /// with similarity digests when the number of source x target pairs is
    /// within `rename_limit`.
    pub fn find_similar(&mut self, opts: &FindOptions) -> DiffResult<()> {
        if !opts.renames && !opts.copies {
            return Ok(());
        }
        let targets: Vec<usize> = self.indices(|s| s == DeltaStatus::Added);
        let rename_sources: Vec<usize> = if opts.renames {
            self.indices(|s| s == DeltaStatus::Deleted)
        } else {
            Vec::new()
        };
        let copy_sources: Vec<usize> = if opts.copies {
            self.indices(|s| matches!(s, DeltaStatus::Modified | DeltaStatus::Unmodified))
        } else {
            Vec::new()
        };

        let mut pairings = Vec::new();
        let mut used_sources = HashSet::new();
        let mut matched_targets = HashSet::new();

        // Exact id matches.
        for &t in &targets {
            let id = self.entries[t].delta.new.id;
            if id.is_zero() {
                continue;
            }
            let rename = rename_sources
                .iter()
                .find(|&&s| !used_sources.contains(&s) && self.entries[s].delta.old.id == id);
            if let Some(&s) = rename {
                used_sources.insert(s);
                matched_targets.insert(t);
                pairings.push(Pairing::exact(s, t, DeltaStatus::Renamed));
                continue;
            }
            let copy = copy_sources
                .iter()
                .chain(&rename_sources)
                .find(|&&s| self.entries[s].delta.old.id == id);
            if let Some(&s) = copy {
                if opts.copies {
                    matched_targets.insert(t);
                    pairings.push(Pairing::exact(s, t, DeltaStatus::Copied));
                }
            }
        }

        let open_targets: Vec<usize> =
            targets.into_iter().filter(|t| !matched_targets.contains(t)).collect();
        let open_renames: Vec<usize> =
            rename_sources.into_iter().filter(|s| !used_sources.contains(s)).collect();
        let pairs = open_targets.len() * (open_renames.len() + copy_sources.len());
        if pairs > opts.rename_limit {
            debug!(pairs, limit = opts.rename_limit, "too many candidates, exact matches only");
        } else if pairs > 0 {
            self.score_inexact(opts, &open_renames, &copy_sources, &open_targets, &mut pairings)?;
        }

        self.apply_pairings(pairings);
        Ok(())
    }

    fn indices(&self, pred: impl Fn(DeltaStatus) -> bool) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| pred(e.delta.status))
            .map(|(i, _)| i)
            .collect()
    }

    fn score_inexact(
        &self,
        opts: &FindOptions,
        renames: &[usize],
        copies: &[usize],
        targets: &[usize],
        pairings: &mut Vec<Pairing>,
    ) -> DiffResult<()> {
        let mut target_digests = Vec::with_capacity(targets.len());
        for &t in targets {
            let e = &self.entries[t];
            target_digests.push((t, self.digest(&e.delta.new, &e.new_origin, opts)?));
        }

        // Every candidate rename, best first; each side used at most once.
        let mut candidates = Vec::new();
        for &s in renames {
            let e = &self.entries[s];
            let Some(source) = self.digest(&e.delta.old, &e.old_origin, opts)? else {
                continue;
            };
            for (t, target) in &target_digests {
                if let Some(target) = target {
                    let score = source.compare(target);
                    if score >= opts.rename_threshold {
                        candidates.push((score, s, *t));
                    }
                }
            }
        }
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));
        let mut used_sources = HashSet::new();
        let mut matched_targets = HashSet::new();
        for (score, s, t) in candidates {
            if used_sources.contains(&s) || matched_targets.contains(&t) {
                continue;
            }
            trace!(score, source = s, target = t, "rename candidate accepted");
            used_sources.insert(s);
            matched_targets.insert(t);
            pairings.push(Pairing {
                source: s,
                target: t,
                status: DeltaStatus::Renamed,
                similarity: score,
            });
        }

        if copies.is_empty() {
            return Ok(());
        }
        let mut copy_digests = Vec::with_capacity(copies.len());
        for &s in copies {
            let e = &self.entries[s];
            if let Some(d) = self.digest(&e.delta.old, &e.old_origin, opts)? {
                copy_digests.push((s, d));
            }
        }
        for (t, target) in &target_digests {
            let Some(target) = target else { continue };
            if matched_targets.contains(t) {
                continue;
            }
            let best = copy_digests
                .iter()
                .map(|(s, d)| (d.compare(target), *s))
                .filter(|(score, _)| *score >= opts.copy_threshold)
                .max_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));
            if let Some((score, s)) = best {
                pairings.push(Pairing {
                    source: s,
                    target: *t,
                    status: DeltaStatus::Copied,
                    similarity: score,
                });
            }
        }
        Ok(())
    }

    /// Digest of one side, or `None` when it is too small or unreadable as
    /// a whole.
    fn digest(
        &self,
        file: &FileDescriptor,
        origin: &ContentOrigin,
        opts: &FindOptions,
    ) -> DiffResult<Option<SimilarityDigest>> {
        let mut source = self.ctx.source(file.clone(), origin.clone());
        source.load()?;
        let Some(data) = source.data() else {
            return Ok(None);
        };
        match SimilarityDigest::from_bytes(data, opts.whitespace) {
            Ok(digest) => Ok(Some(digest)),
            Err(DiffError::ContentTooSmall { considered }) => {
                trace!(path = ?file.path, considered, "too small to fingerprint");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Replace each paired target with a rename or copy delta and drop the
    /// sources of renames.
    fn apply_pairings(&mut self, pairings: Vec<Pairing>) {
        if pairings.is_empty() {
            return;
        }
        let renamed_sources: HashSet<usize> = pairings
            .iter()
            .filter(|p| p.status == DeltaStatus::Renamed)
            .map(|p| p.source)
            .collect();
        let by_target: BTreeMap<usize, Pairing> =
            pairings.into_iter().map(|p| (p.target, p)).collect();

        let mut merged = Vec::with_capacity(self.entries.len());
        for (i, entry) in self.entries.iter().enumerate() {
            if renamed_sources.contains(&i) {
                continue;
            }
            match by_target.get(&i) {
                Some(p) => {
                    let source = &self.entries[p.source];
                    let mut delta =
                        Delta::new(p.status, source.delta.old.clone(), entry.delta.new.clone());
                    delta.similarity = p.similarity;
                    debug!(
                        from = ?delta.old.path,
                        to = ?delta.new.path,
                        status = ?p.status,
                        similarity = p.similarity,
                        "paired"
                    );
                    merged.push(DiffEntry::new(
                        delta,
                        source.old_origin.clone(),
                        entry.new_origin.clone(),
                    ));
                }
                None => merged.push(DiffEntry::new(
                    entry.delta.clone(),
                    entry.old_origin.clone(),
                    entry.new_origin.clone(),
                )),
            }
        }
        self.entries = merged;
    }
}

impl Pairing {
    fn exact(source: usize, target: usize, status: DeltaStatus) -> Self {
        Self {
            source,
            target,
            status,
            similarity: 100,
        }
    }
}

impl fmt::Debug for DiffList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiffList")
            .field("deltas", &self.entries.iter().map(|e| &e.delta).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::ControlFlow;

    use patchwork_store::InMemoryObjectStore;
    use patchwork_types::FileMode;

    use crate::patch::Callbacks;

    fn lines(n: usize, tag: &str) -> String {
        (0..n).map(|i| format!("{tag} line number {i}\n")).collect()
    }

    struct Fixture {
        store: Arc<InMemoryObjectStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: Arc::new(InMemoryObjectStore::new()),
            }
        }

        fn blob(&self, data: &str) -> ObjectId {
            self.store.insert_blob(data.to_string()).unwrap()
        }

        fn tree(&self, entries: Vec<TreeEntry>) -> ObjectId {
            let tree = Tree::new(entries);
            self.store.write(&tree.to_stored_object().unwrap()).unwrap()
        }

        fn ctx(&self, options: DiffOptions) -> Arc<DiffContext> {
            Arc::new(DiffContext::new(options).with_store(self.store.clone()))
        }

        fn diff(&self, old: Option<ObjectId>, new: Option<ObjectId>) -> DiffList {
            DiffList::from_trees(self.ctx(DiffOptions::default()), old.as_ref(), new.as_ref()).unwrap()
        }
    }

    fn file(name: &str, id: ObjectId) -> TreeEntry {
        TreeEntry::new(FileMode::BLOB, name, id)
    }

    fn statuses(list: &DiffList) -> Vec<(String, DeltaStatus)> {
        list.deltas()
            .map(|d| (d.path().unwrap_or_default().to_string(), d.status))
            .collect()
    }

    #[test]
    fn empty_to_populated_is_all_additions() {
        let fx = Fixture::new();
        let a = fx.blob("a\n");
        let new = fx.tree(vec![file("a.txt", a), file("b.txt", a)]);
        let list = fx.diff(None, Some(new));
        assert_eq!(list.num_deltas(), 2);
        assert_eq!(list.num_deltas_of_type(DeltaStatus::Added), 2);
    }

    #[test]
    fn identical_trees_have_no_deltas() {
        let fx = Fixture::new();
        let tree = fx.tree(vec![file("f", fx.blob("x\n"))]);
        assert_eq!(fx.diff(Some(tree), Some(tree)).num_deltas(), 0);

        let ctx = fx.ctx(DiffOptions {
            include_unmodified: true,
            ..DiffOptions::default()
        });
        let list = DiffList::from_trees(ctx, Some(&tree), Some(&tree)).unwrap();
        // Same tree id at the root is still walked entry by entry.
        assert_eq!(statuses(&list), vec![("f".to_string(), DeltaStatus::Unmodified)]);
    }

    #[test]
    fn unknown_tree_is_not_found() {
        let fx = Fixture::new();
        let missing = ObjectId::for_tree(b"never stored");
        let err = DiffList::from_trees(fx.ctx(DiffOptions::default()), None, Some(&missing)).unwrap_err();
        assert!(matches!(err, DiffError::ObjectNotFound(id) if id == missing));

        let blob = fx.blob("not a tree\n");
        let err = DiffList::from_trees(fx.ctx(DiffOptions::default()), Some(&blob), None).unwrap_err();
        assert!(matches!(err, DiffError::Store(_)), "{err:?}");
    }

    #[test]
    fn nested_trees_are_walked() {
        let fx = Fixture::new();
        let one = fx.blob("one\n");
        let two = fx.blob("two\n");
        let old_sub = fx.tree(vec![file("lib.rs", one), file("gone.rs", one)]);
        let new_sub = fx.tree(vec![file("lib.rs", two)]);
        let old = fx.tree(vec![TreeEntry::new(FileMode::TREE, "src", old_sub), file("README", one)]);
        let new = fx.tree(vec![
            TreeEntry::new(FileMode::TREE, "src", new_sub),
            TreeEntry::new(FileMode::BLOB_EXECUTABLE, "README", one),
        ]);
        let list = fx.diff(Some(old), Some(new));
        assert_eq!(
            statuses(&list),
            vec![
                ("README".to_string(), DeltaStatus::Modified),
                ("src/gone.rs".to_string(), DeltaStatus::Deleted),
                ("src/lib.rs".to_string(), DeltaStatus::Modified),
            ]
        );
    }

    #[test]
    fn blob_to_tree_splits_into_delete_and_add() {
        let fx = Fixture::new();
        let x = fx.blob("x\n");
        let sub = fx.tree(vec![file("inner", x)]);
        let old = fx.tree(vec![file("thing", x)]);
        let new = fx.tree(vec![TreeEntry::new(FileMode::TREE, "thing", sub)]);
        let list = fx.diff(Some(old), Some(new));
        assert_eq!(
            statuses(&list),
            vec![
                ("thing".to_string(), DeltaStatus::Deleted),
                ("thing/inner".to_string(), DeltaStatus::Added),
            ]
        );
    }

    #[test]
    fn link_replacing_file_is_type_change() {
        let fx = Fixture::new();
        let x = fx.blob("target\n");
        let old = fx.tree(vec![file("l", x)]);
        let new = fx.tree(vec![TreeEntry::new(FileMode::LINK, "l", x)]);
        let list = fx.diff(Some(old), Some(new));
        assert_eq!(list.num_deltas_of_type(DeltaStatus::TypeChange), 1);
    }

    #[test]
    fn patches_are_cached_and_shared() {
        let fx = Fixture::new();
        let old = fx.tree(vec![file("f", fx.blob("a\n"))]);
        let new = fx.tree(vec![file("f", fx.blob("b\n"))]);
        let list = fx.diff(Some(old), Some(new));
        let first = list.patch(0).unwrap();
        let reads = fx.store.read_count();
        let second = list.patch(0).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fx.store.read_count(), reads);
        assert!(matches!(list.patch(1), Err(DiffError::IndexOutOfRange { index: 1, len: 1, .. })));
    }

    #[test]
    fn patch_outlives_list() {
        let fx = Fixture::new();
        let old = fx.tree(vec![file("f", fx.blob("a\n"))]);
        let new = fx.tree(vec![file("f", fx.blob("b\n"))]);
        let patch = fx.diff(Some(old), Some(new)).patch(0).unwrap();
        assert!(patch.to_text().unwrap().contains("-a\n+b\n"));
    }

    #[test]
    fn foreach_reports_progress() {
        let fx = Fixture::new();
        let a = fx.blob("a\n");
        let new = fx.tree(vec![file("1", a), file("2", a), file("3", a), file("4", a)]);
        let list = fx.diff(None, Some(new));
        let mut progress = Vec::new();
        let mut lines = 0;
        let mut visitor = Callbacks::new()
            .on_file(|_, p| {
                progress.push(p);
                ControlFlow::Continue(())
            })
            .on_line(|_, _, _| {
                lines += 1;
                ControlFlow::Continue(())
            });
        list.foreach(&mut visitor).unwrap();
        drop(visitor);
        assert_eq!(progress, vec![0.0, 0.25, 0.5, 0.75]);
        assert_eq!(lines, 4);
    }

    #[test]
    fn foreach_stops_on_break() {
        let fx = Fixture::new();
        let a = fx.blob("a\n");
        let new = fx.tree(vec![file("1", a), file("2", a)]);
        let list = fx.diff(None, Some(new));
        let mut files = 0;
        let mut visitor = Callbacks::new().on_file(|_, _| {
            files += 1;
            ControlFlow::Break(())
        });
        let err = list.foreach(&mut visitor).unwrap_err();
        drop(visitor);
        assert!(err.is_user_abort());
        assert_eq!(files, 1);
    }

    #[test]
    fn exact_rename() {
        let fx = Fixture::new();
        let content = fx.blob("same\n");
        let old = fx.tree(vec![file("a.txt", content)]);
        let new = fx.tree(vec![file("b.txt", content)]);
        let mut list = fx.diff(Some(old), Some(new));
        list.find_similar(&FindOptions::default()).unwrap();
        assert_eq!(list.num_deltas(), 1);
        let delta = list.get_delta(0).unwrap();
        assert_eq!(delta.status, DeltaStatus::Renamed);
        assert_eq!(delta.similarity, 100);
        assert_eq!(
            list.to_text(PatchFormat::Patch).unwrap(),
            "diff --git a/a.txt b/b.txt\nsimilarity index 100%\nrename from a.txt\nrename to b.txt\n"
        );
        assert_eq!(list.to_text(PatchFormat::NameStatus).unwrap(), "R\ta.txt\tb.txt\n");
    }

    #[test]
    fn similar_rename() {
        let fx = Fixture::new();
        let body = lines(40, "shared");
        let edited = body.replace("shared line number 20\n", "changed line\n");
        let old = fx.tree(vec![file("old.txt", fx.blob(&body))]);
        let new = fx.tree(vec![file("new.txt", fx.blob(&edited))]);
        let mut list = fx.diff(Some(old), Some(new));
        list.find_similar(&FindOptions::default()).unwrap();
        assert_eq!(list.num_deltas(), 1);
        let delta = list.get_delta(0).unwrap().clone();
        assert_eq!(delta.status, DeltaStatus::Renamed);
        assert!(delta.similarity >= 50 && delta.similarity < 100, "{}", delta.similarity);
        let text = list.patch(0).unwrap().to_text().unwrap();
        assert!(text.contains("rename from old.txt\nrename to new.txt\n"), "{text}");
        assert!(text.contains("-shared line number 20\n+changed line\n"), "{text}");
    }

    #[test]
    fn unrelated_files_stay_apart() {
        let fx = Fixture::new();
        let old = fx.tree(vec![file("a", fx.blob(&lines(40, "alpha")))]);
        let new = fx.tree(vec![file("b", fx.blob(&lines(40, "omega")))]);
        let mut list = fx.diff(Some(old), Some(new));
        list.find_similar(&FindOptions::default()).unwrap();
        assert_eq!(list.num_deltas(), 2);
        assert_eq!(list.num_deltas_of_type(DeltaStatus::Renamed), 0);
    }

    #[test]
    fn rename_limit_keeps_exact_matches_only() {
        let fx = Fixture::new();
        let body = lines(40, "shared");
        let same = fx.blob("exact\n");
        let old = fx.tree(vec![file("a", fx.blob(&body)), file("x", same)]);
        let new = fx.tree(vec![file("b", fx.blob(&body.replace("10", "ten"))), file("y", same)]);
        let mut list = fx.diff(Some(old), Some(new));
        list.find_similar(&FindOptions {
            rename_limit: 0,
            ..FindOptions::default()
        })
        .unwrap();
        assert_eq!(list.num_deltas_of_type(DeltaStatus::Renamed), 1);
        assert_eq!(list.num_deltas_of_type(DeltaStatus::Added), 1);
        assert_eq!(list.num_deltas_of_type(DeltaStatus::Deleted), 1);
    }

    #[test]
    fn copies_keep_their_source() {
        let fx = Fixture::new();
        let body = fx.blob("original\n");
        let old = fx.tree(vec![file("a", body)]);
        let new = fx.tree(vec![file("a", fx.blob("edited\n")), file("c", body)]);
        let mut list = fx.diff(Some(old), Some(new));
        list.find_similar(&FindOptions {
            copies: true,
            ..FindOptions::default()
        })
        .unwrap();
        assert_eq!(
            statuses(&list),
            vec![
                ("a".to_string(), DeltaStatus::Modified),
                ("c".to_string(), DeltaStatus::Copied),
            ]
        );
        let copy = list.get_delta(1).unwrap();
        assert_eq!(copy.old.path.as_deref(), Some("a"));
        assert_eq!(copy.similarity, 100);
    }

    #[test]
    fn stats_over_list() {
        let fx = Fixture::new();
        let old = fx.tree(vec![file("f", fx.blob("a\nb\n"))]);
        let new = fx.tree(vec![file("f", fx.blob("a\nc\n")), file("g", fx.blob("new\n"))]);
        let list = fx.diff(Some(old), Some(new));
        let totals = list.stats().unwrap().totals();
        assert_eq!((totals.files_changed, totals.insertions, totals.deletions), (2, 2, 1));

        // Rendering reuses the patches generated for the stats.
        let reads = fx.store.read_count();
        let text = list.to_text(PatchFormat::Patch).unwrap();
        assert_eq!(fx.store.read_count(), reads);
        assert!(text.contains("diff --git a/f b/f\n"), "{text}");
        assert!(text.contains("diff --git a/g b/g\nnew file mode 100644\n"), "{text}");
        assert!(Arc::ptr_eq(&list.patch(1).unwrap(), &list.patch(1).unwrap()));
    }

    #[test]
    fn name_only_does_not_read_content() {
        let fx = Fixture::new();
        let old = fx.tree(vec![file("f", fx.blob("a\n"))]);
        let new = fx.tree(vec![file("f", fx.blob("b\n"))]);
        let list = fx.diff(Some(old), Some(new));
        let reads = fx.store.read_count();
        assert_eq!(list.to_text(PatchFormat::NameOnly).unwrap(), "f\n");
        assert_eq!(fx.store.read_count(), reads);
    }

    #[test]
    fn forced_drivers() {
        let ctx = DiffContext::new(DiffOptions {
            force_binary: true,
            ..DiffOptions::default()
        });
        assert!(matches!(ctx.driver_for(Some("a.txt")), DiffDriver::ForceBinary));
        let ctx = DiffContext::new(DiffOptions::default());
        assert!(matches!(ctx.driver_for(Some("a.txt")), DiffDriver::Auto));
    }
}
