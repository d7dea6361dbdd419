//! The patch aggregate: one delta plus the hunks and lines computed for it.
//!
//! A generated patch moves through an explicit state machine:
//!
//! ```text
//! Initialized -> Loaded -> Diffable -> Diffed -> Flattened
//!                       \-> NotDiffable
//! ```
//!
//! Loading pulls both [`ContentSource`]s into memory (unless the delta is
//! already known to be binary), the diffable check decides whether the line
//! engine runs, and a `Diffed` patch exposes its records through the
//! accessors. Parsed patches are built directly in the `Diffed` state.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use patchwork_store::ObjectStore;
use patchwork_types::{FileMode, ObjectId};
use tracing::{debug, trace};

use crate::codec::{binary, PatchFormat, PatchFormatter};
use crate::config::DiffOptions;
use crate::content::{ContentOrigin, ContentSource};
use crate::delta::{Delta, DeltaStatus, FileDescriptor};
use crate::diff::DiffContext;
use crate::driver::Binary;
use crate::error::{DiffError, DiffResult};
use crate::xdiff::{EngineOptions, HunkSink};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Where a line came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LineOrigin {
    Context,
    Addition,
    Deletion,
    /// Both sides lack a newline at end of file.
    ContextNoNewlineAtEof,
    /// The new side lacks a newline at end of file.
    AddNoNewlineAtEof,
    /// The old side lacks a newline at end of file.
    DelNoNewlineAtEof,
    FileHeader,
    HunkHeader,
    Binary,
}

impl LineOrigin {
    pub fn as_char(&self) -> char {
        match self {
            Self::Context => ' ',
            Self::Addition => '+',
            Self::Deletion => '-',
            Self::ContextNoNewlineAtEof => '=',
            Self::AddNoNewlineAtEof => '>',
            Self::DelNoNewlineAtEof => '<',
            Self::FileHeader => 'F',
            Self::HunkHeader => 'H',
            Self::Binary => 'B',
        }
    }

    /// The end-of-file marker that follows a line of this origin.
    pub fn no_newline_variant(self) -> Self {
        match self {
            Self::Context => Self::ContextNoNewlineAtEof,
            Self::Addition => Self::AddNoNewlineAtEof,
            Self::Deletion => Self::DelNoNewlineAtEof,
            other => other,
        }
    }

    /// Content lines are printed with their origin character as prefix.
    pub fn is_content(&self) -> bool {
        matches!(self, Self::Context | Self::Addition | Self::Deletion)
    }

    pub fn is_eof_marker(&self) -> bool {
        matches!(
            self,
            Self::ContextNoNewlineAtEof | Self::AddNoNewlineAtEof | Self::DelNoNewlineAtEof
        )
    }
}

/// One contiguous region of difference plus its context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: i64,
    pub old_lines: i64,
    pub new_start: i64,
    pub new_lines: i64,
    /// Header text including its trailing newline.
    pub header: Bytes,
    /// Index of the first line in the patch's line array.
    pub line_start: usize,
    pub line_count: usize,
}

/// One line of a hunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Line {
    pub origin: LineOrigin,
    /// -1 when the line has no old-side position.
    pub old_lineno: i64,
    /// -1 when the line has no new-side position.
    pub new_lineno: i64,
    pub num_lines: i64,
    /// Shares the loaded content or parsed text buffer.
    pub content: Bytes,
    /// Offset of `content` in its source buffer, -1 when not applicable.
    pub content_offset: i64,
}

/// Counts of the primary line kinds in a patch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LineStats {
    pub context: usize,
    pub additions: usize,
    pub deletions: usize,
}

/// Encoding of one side of a binary patch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BinaryKind {
    /// No data carried.
    #[default]
    None,
    /// The full content.
    Literal,
    /// A delta against the other side.
    Delta,
}

/// One side of a binary patch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BinaryPatchSide {
    pub kind: BinaryKind,
    pub inflated_len: u64,
    /// zlib-deflated payload.
    pub data: Bytes,
}

/// Binary data attached to a patch whose content is binary.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BinaryPatch {
    /// `false` renders as `Binary files ... differ`.
    pub contains_data: bool,
    pub old: BinaryPatchSide,
    pub new: BinaryPatchSide,
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Lifecycle of a patch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchState {
    Initialized,
    Loaded,
    Diffable,
    NotDiffable,
    Diffed,
    Flattened,
}

impl PatchState {
    fn can_move_to(self, next: PatchState) -> bool {
        use PatchState::*;
        matches!(
            (self, next),
            (Initialized, Loaded)
                | (Loaded, Diffable)
                | (Loaded, NotDiffable)
                | (Diffable, Diffed)
                | (Diffable, Loaded)
                | (Diffed, Flattened)
        )
    }

    /// State an operation moving to `self` has to start from.
    fn required_before(self) -> &'static str {
        match self {
            Self::Initialized => "nothing",
            Self::Loaded => "Initialized or Diffable",
            Self::Diffable | Self::NotDiffable => "Loaded",
            Self::Diffed => "Diffable",
            Self::Flattened => "Diffed",
        }
    }

    /// Hunk and line records may be read.
    pub fn is_readable(self) -> bool {
        matches!(self, Self::Diffed | Self::Flattened | Self::NotDiffable)
    }
}

// ---------------------------------------------------------------------------
// Visitors
// ---------------------------------------------------------------------------

/// Receives a patch as it is produced or replayed. Every method may return
/// `Break` to stop; the caller then sees [`DiffError::UserAborted`].
pub trait PatchVisitor {
    /// Called once per patch with the fraction of the collection done.
    fn file(&mut self, _delta: &Delta, _progress: f32) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    fn binary(&mut self, _delta: &Delta, _binary: &BinaryPatch) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    fn hunk(&mut self, _delta: &Delta, _hunk: &Hunk) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    fn line(&mut self, _delta: &Delta, _hunk: &Hunk, _line: &Line) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    /// `false` lets a patch skip loading content when options allow it.
    fn wants_content(&self) -> bool {
        true
    }
}

type FileFn<'a> = Box<dyn FnMut(&Delta, f32) -> ControlFlow<()> + 'a>;
type BinaryFn<'a> = Box<dyn FnMut(&Delta, &BinaryPatch) -> ControlFlow<()> + 'a>;
type HunkFn<'a> = Box<dyn FnMut(&Delta, &Hunk) -> ControlFlow<()> + 'a>;
type LineFn<'a> = Box<dyn FnMut(&Delta, &Hunk, &Line) -> ControlFlow<()> + 'a>;

/// A [`PatchVisitor`] assembled from closures.
#[derive(Default)]
pub struct Callbacks<'a> {
    file: Option<FileFn<'a>>,
    binary: Option<BinaryFn<'a>>,
    hunk: Option<HunkFn<'a>>,
    line: Option<LineFn<'a>>,
}

impl<'a> Callbacks<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_file(mut self, f: impl FnMut(&Delta, f32) -> ControlFlow<()> + 'a) -> Self {
        self.file = Some(Box::new(f));
        self
    }

    pub fn on_binary(mut self, f: impl FnMut(&Delta, &BinaryPatch) -> ControlFlow<()> + 'a) -> Self {
        self.binary = Some(Box::new(f));
        self
    }

    pub fn on_hunk(mut self, f: impl FnMut(&Delta, &Hunk) -> ControlFlow<()> + 'a) -> Self {
        self.hunk = Some(Box::new(f));
        self
    }

    pub fn on_line(mut self, f: impl FnMut(&Delta, &Hunk, &Line) -> ControlFlow<()> + 'a) -> Self {
        self.line = Some(Box::new(f));
        self
    }
}

impl PatchVisitor for Callbacks<'_> {
    fn file(&mut self, delta: &Delta, progress: f32) -> ControlFlow<()> {
        self.file.as_mut().map_or(ControlFlow::Continue(()), |f| f(delta, progress))
    }

    fn binary(&mut self, delta: &Delta, binary: &BinaryPatch) -> ControlFlow<()> {
        self.binary.as_mut().map_or(ControlFlow::Continue(()), |f| f(delta, binary))
    }

    fn hunk(&mut self, delta: &Delta, hunk: &Hunk) -> ControlFlow<()> {
        self.hunk.as_mut().map_or(ControlFlow::Continue(()), |f| f(delta, hunk))
    }

    fn line(&mut self, delta: &Delta, hunk: &Hunk, line: &Line) -> ControlFlow<()> {
        self.line.as_mut().map_or(ControlFlow::Continue(()), |f| f(delta, hunk, line))
    }

    fn wants_content(&self) -> bool {
        self.binary.is_some() || self.hunk.is_some() || self.line.is_some()
    }
}

impl fmt::Debug for Callbacks<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("file", &self.file.is_some())
            .field("binary", &self.binary.is_some())
            .field("hunk", &self.hunk.is_some())
            .field("line", &self.line.is_some())
            .finish()
    }
}

struct ClosureVisitor<F, H, L> {
    file: F,
    hunk: H,
    line: L,
}

impl<F, H, L> PatchVisitor for ClosureVisitor<F, H, L>
where
    F: FnMut(&Delta, f32) -> ControlFlow<()>,
    H: FnMut(&Delta, &Hunk) -> ControlFlow<()>,
    L: FnMut(&Delta, &Hunk, &Line) -> ControlFlow<()>,
{
    fn file(&mut self, delta: &Delta, progress: f32) -> ControlFlow<()> {
        (self.file)(delta, progress)
    }

    fn hunk(&mut self, delta: &Delta, hunk: &Hunk) -> ControlFlow<()> {
        (self.hunk)(delta, hunk)
    }

    fn line(&mut self, delta: &Delta, hunk: &Hunk, line: &Line) -> ControlFlow<()> {
        (self.line)(delta, hunk, line)
    }
}

fn visit(flow: ControlFlow<()>) -> DiffResult<()> {
    match flow {
        ControlFlow::Continue(()) => Ok(()),
        ControlFlow::Break(()) => Err(DiffError::UserAborted),
    }
}

// ---------------------------------------------------------------------------
// Patch
// ---------------------------------------------------------------------------

enum PatchKind {
    Generated {
        old: ContentSource,
        new: ContentSource,
    },
    Parsed {
        text: Bytes,
    },
}

/// A delta together with its hunks and lines.
pub struct Patch {
    delta: Delta,
    kind: PatchKind,
    ctx: Arc<DiffContext>,
    state: PatchState,
    hunks: Vec<Hunk>,
    lines: Vec<Line>,
    binary: Option<BinaryPatch>,
}

impl Patch {
    /// A patch over two content sources. Nothing is loaded until the patch
    /// is driven.
    pub fn new(delta: Delta, old: ContentSource, new: ContentSource, ctx: Arc<DiffContext>) -> Self {
        let mut delta = delta;
        apply_driver_hint(&mut delta.old, &old);
        apply_driver_hint(&mut delta.new, &new);
        refresh_binary_flags(&mut delta);
        Self {
            delta,
            kind: PatchKind::Generated { old, new },
            ctx,
            state: PatchState::Initialized,
            hunks: Vec::new(),
            lines: Vec::new(),
            binary: None,
        }
    }

    /// A patch reconstructed from text; already `Diffed`.
    pub(crate) fn from_parsed(
        delta: Delta,
        hunks: Vec<Hunk>,
        lines: Vec<Line>,
        binary: Option<BinaryPatch>,
        text: Bytes,
        ctx: Arc<DiffContext>,
    ) -> Self {
        Self {
            delta,
            kind: PatchKind::Parsed { text },
            ctx,
            state: PatchState::Diffed,
            hunks,
            lines,
            binary,
        }
    }

    /// Diff two in-memory buffers. `None` marks a missing side, making the
    /// patch an addition or deletion. A missing path falls back to the
    /// other side's.
    pub fn from_buffers(
        old: Option<&[u8]>,
        old_path: Option<&str>,
        new: Option<&[u8]>,
        new_path: Option<&str>,
        opts: &DiffOptions,
    ) -> DiffResult<Self> {
        let ctx = Arc::new(DiffContext::new(opts.clone()));
        let old_path = old_path.or(new_path);
        let new_path = new_path.or(old_path);
        let side = |data: Option<&[u8]>, path: Option<&str>| match data {
            Some(data) => {
                let file = FileDescriptor {
                    path: path.map(str::to_string),
                    mode: FileMode::BLOB,
                    size: data.len() as u64,
                    ..Default::default()
                };
                ctx.source(file, ContentOrigin::Buffer(Bytes::copy_from_slice(data)))
            }
            None => ctx.source(
                FileDescriptor::absent(path.map(str::to_string)),
                ContentOrigin::Buffer(Bytes::new()),
            ),
        };
        let old_src = side(old, old_path);
        let new_src = side(new, new_path);
        let status = match (old, new) {
            (None, None) => DeltaStatus::Unmodified,
            (None, Some(_)) => DeltaStatus::Added,
            (Some(_), None) => DeltaStatus::Deleted,
            (Some(_), Some(_)) => DeltaStatus::Modified,
        };
        let delta = Delta::new(status, old_src.file().clone(), new_src.file().clone());
        let mut patch = Self::new(delta, old_src, new_src, Arc::clone(&ctx));
        patch.generate()?;
        Ok(patch)
    }

    /// Diff two stored blobs. `None` marks a missing side.
    pub fn from_blobs(
        store: Arc<dyn ObjectStore>,
        old_id: Option<ObjectId>,
        old_path: Option<&str>,
        new_id: Option<ObjectId>,
        new_path: Option<&str>,
        opts: &DiffOptions,
    ) -> DiffResult<Self> {
        let ctx = Arc::new(DiffContext::new(opts.clone()).with_store(store));
        let old_path = old_path.or(new_path);
        let new_path = new_path.or(old_path);
        let side = |id: Option<ObjectId>, path: Option<&str>| {
            let file = match id {
                Some(id) => FileDescriptor {
                    path: path.map(str::to_string),
                    ..FileDescriptor::new("", id, FileMode::BLOB)
                },
                None => FileDescriptor::absent(path.map(str::to_string)),
            };
            ctx.source(file, ContentOrigin::Store)
        };
        let old_src = side(old_id, old_path);
        let new_src = side(new_id, new_path);
        let status = match (old_id, new_id) {
            (None, None) => DeltaStatus::Unmodified,
            (None, Some(_)) => DeltaStatus::Added,
            (Some(_), None) => DeltaStatus::Deleted,
            (Some(a), Some(b)) if a == b => DeltaStatus::Unmodified,
            (Some(_), Some(_)) => DeltaStatus::Modified,
        };
        let delta = Delta::new(status, old_src.file().clone(), new_src.file().clone());
        let mut patch = Self::new(delta, old_src, new_src, Arc::clone(&ctx));
        patch.generate()?;
        Ok(patch)
    }

    pub fn delta(&self) -> &Delta {
        &self.delta
    }

    pub fn state(&self) -> PatchState {
        self.state
    }

    pub fn context(&self) -> &Arc<DiffContext> {
        &self.ctx
    }

    pub fn options(&self) -> &DiffOptions {
        &self.ctx.options
    }

    /// Binary data, present for patches whose content is binary.
    pub fn binary(&self) -> Option<&BinaryPatch> {
        self.binary.as_ref()
    }

    /// Old-side content source, for generated patches.
    pub fn old_source(&self) -> Option<&ContentSource> {
        match &self.kind {
            PatchKind::Generated { old, .. } => Some(old),
            PatchKind::Parsed { .. } => None,
        }
    }

    pub fn new_source(&self) -> Option<&ContentSource> {
        match &self.kind {
            PatchKind::Generated { new, .. } => Some(new),
            PatchKind::Parsed { .. } => None,
        }
    }

    /// The text a parsed patch was read from.
    pub fn source_text(&self) -> Option<&Bytes> {
        match &self.kind {
            PatchKind::Parsed { text } => Some(text),
            PatchKind::Generated { .. } => None,
        }
    }

    fn transition(&mut self, next: PatchState) -> DiffResult<()> {
        if !self.state.can_move_to(next) {
            return Err(DiffError::NotReady {
                state: self.state,
                required: next.required_before(),
            });
        }
        trace!(path = ?self.delta.path(), from = ?self.state, to = ?next, "patch state");
        self.state = next;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Pipeline
    // -----------------------------------------------------------------------

    /// Load both sides and decide whether the line engine has work to do.
    /// Calling it again is a no-op.
    pub fn load(&mut self) -> DiffResult<()> {
        if self.state == PatchState::Initialized {
            if let PatchKind::Generated { old, new } = &mut self.kind {
                let show_binary = self.ctx.options.show_binary;
                if self.delta.flags.binary && !show_binary {
                    trace!(path = ?self.delta.path(), "binary delta, content not read");
                } else {
                    load_sides(&mut self.delta, old, new, show_binary)?;
                }
            }
            self.transition(PatchState::Loaded)?;
        }

        if self.state == PatchState::Loaded {
            if self.delta.flags.binary {
                self.binary = Some(self.build_binary()?);
            }
            let next = if self.is_diffable() {
                PatchState::Diffable
            } else {
                PatchState::NotDiffable
            };
            self.transition(next)?;
        }
        Ok(())
    }

    fn is_diffable(&self) -> bool {
        let (old, new) = (&self.delta.old, &self.delta.new);
        !self.delta.flags.binary
            && self.delta.status != DeltaStatus::Unmodified
            && (old.size > 0 || new.size > 0)
            && (old.size != new.size || old.id != new.id)
    }

    fn build_binary(&self) -> DiffResult<BinaryPatch> {
        let PatchKind::Generated { old, new } = &self.kind else {
            return Ok(BinaryPatch::default());
        };
        let (Some(old_data), Some(new_data)) = (old.data(), new.data()) else {
            return Ok(BinaryPatch::default());
        };
        if !self.ctx.options.show_binary {
            return Ok(BinaryPatch::default());
        }
        let literal = |data: &Bytes| -> DiffResult<BinaryPatchSide> {
            Ok(BinaryPatchSide {
                kind: BinaryKind::Literal,
                inflated_len: data.len() as u64,
                data: Bytes::from(binary::deflate(data)?),
            })
        };
        Ok(BinaryPatch {
            contains_data: true,
            old: literal(old_data)?,
            new: literal(new_data)?,
        })
    }

    /// Run the pipeline to completion without a visitor.
    pub fn generate(&mut self) -> DiffResult<()> {
        self.load()?;
        if self.state == PatchState::Diffable {
            self.run_engine(None)?;
        }
        Ok(())
    }

    fn run_engine(&mut self, visitor: Option<&mut dyn PatchVisitor>) -> DiffResult<()> {
        let PatchKind::Generated { old, new } = &self.kind else {
            return Ok(());
        };
        let old_data = old.data().cloned().unwrap_or_default();
        let new_data = new.data().cloned().unwrap_or_default();
        let driver = old.driver().clone();
        let find = move |line: &[u8]| driver.find_function_context(line);
        let opts = &self.ctx.options;
        let engine_opts = EngineOptions {
            context_lines: opts.context_lines,
            interhunk_lines: opts.interhunk_lines,
            whitespace: opts.whitespace,
            algorithm: opts.algorithm,
            function_context: Some(&find),
        };

        let result = HunkSink::new(
            &old_data,
            &new_data,
            &self.delta,
            &mut self.hunks,
            &mut self.lines,
            visitor,
        )
        .run(self.ctx.engine.as_ref(), &engine_opts);

        match result {
            Ok(()) => {
                debug!(
                    path = ?self.delta.path(),
                    hunks = self.hunks.len(),
                    lines = self.lines.len(),
                    "patch generated"
                );
                self.transition(PatchState::Diffed)
            }
            Err(err) => {
                self.hunks.clear();
                self.lines.clear();
                self.transition(PatchState::Loaded)?;
                Err(err)
            }
        }
    }

    /// Drive the pipeline, streaming records to `visitor` as they are
    /// produced. A patch that was already generated is replayed.
    pub fn foreach_with(&mut self, visitor: &mut dyn PatchVisitor) -> DiffResult<()> {
        self.foreach_progress(visitor, 1.0)
    }

    /// Closure form of [`foreach_with`](Self::foreach_with).
    pub fn foreach<F, H, L>(&mut self, file_cb: F, hunk_cb: H, line_cb: L) -> DiffResult<()>
    where
        F: FnMut(&Delta, f32) -> ControlFlow<()>,
        H: FnMut(&Delta, &Hunk) -> ControlFlow<()>,
        L: FnMut(&Delta, &Hunk, &Line) -> ControlFlow<()>,
    {
        let mut visitor = ClosureVisitor {
            file: file_cb,
            hunk: hunk_cb,
            line: line_cb,
        };
        self.foreach_with(&mut visitor)
    }

    pub(crate) fn foreach_progress(
        &mut self,
        visitor: &mut dyn PatchVisitor,
        progress: f32,
    ) -> DiffResult<()> {
        if self.state == PatchState::Initialized
            && self.ctx.options.skip_binary_check
            && !visitor.wants_content()
        {
            return visit(visitor.file(&self.delta, progress));
        }

        self.load()?;
        visit(visitor.file(&self.delta, progress))?;
        if self.state == PatchState::Diffable {
            self.run_engine(Some(visitor))
        } else {
            self.replay_body(visitor)
        }
    }

    /// Walk an already generated patch.
    pub fn replay(&self, visitor: &mut dyn PatchVisitor) -> DiffResult<()> {
        self.ensure_readable()?;
        visit(visitor.file(&self.delta, 1.0))?;
        self.replay_body(visitor)
    }

    fn replay_body(&self, visitor: &mut dyn PatchVisitor) -> DiffResult<()> {
        if let Some(binary) = &self.binary {
            return visit(visitor.binary(&self.delta, binary));
        }
        for hunk in &self.hunks {
            visit(visitor.hunk(&self.delta, hunk))?;
            for line in &self.lines[hunk.line_start..hunk.line_start + hunk.line_count] {
                visit(visitor.line(&self.delta, hunk, line))?;
            }
        }
        Ok(())
    }

    /// Copy every line into one buffer and release both sources.
    pub fn flatten(&mut self) -> DiffResult<()> {
        if self.state != PatchState::Diffed {
            return Err(DiffError::NotReady {
                state: self.state,
                required: "Diffed",
            });
        }
        let total: usize = self.lines.iter().map(|l| l.content.len()).sum();
        let mut arena = BytesMut::with_capacity(total);
        for line in &self.lines {
            arena.extend_from_slice(&line.content);
        }
        let arena = arena.freeze();
        let mut offset = 0;
        for line in &mut self.lines {
            let len = line.content.len();
            line.content = arena.slice(offset..offset + len);
            offset += len;
        }
        if let PatchKind::Generated { old, new } = &mut self.kind {
            old.unload();
            new.unload();
        }
        self.transition(PatchState::Flattened)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    fn ensure_readable(&self) -> DiffResult<()> {
        if self.state.is_readable() {
            Ok(())
        } else {
            Err(DiffError::NotReady {
                state: self.state,
                required: "Diffed",
            })
        }
    }

    pub fn num_hunks(&self) -> DiffResult<usize> {
        self.ensure_readable()?;
        Ok(self.hunks.len())
    }

    /// Context, addition and deletion counts. End-of-file markers are not
    /// counted.
    pub fn line_stats(&self) -> DiffResult<LineStats> {
        self.ensure_readable()?;
        let mut stats = LineStats::default();
        for line in &self.lines {
            match line.origin {
                LineOrigin::Context => stats.context += 1,
                LineOrigin::Addition => stats.additions += 1,
                LineOrigin::Deletion => stats.deletions += 1,
                _ => {}
            }
        }
        Ok(stats)
    }

    pub fn get_hunk(&self, index: usize) -> DiffResult<&Hunk> {
        self.ensure_readable()?;
        self.hunks.get(index).ok_or(DiffError::IndexOutOfRange {
            what: "hunk",
            index,
            len: self.hunks.len(),
        })
    }

    pub fn num_lines_in_hunk(&self, hunk_index: usize) -> DiffResult<usize> {
        Ok(self.get_hunk(hunk_index)?.line_count)
    }

    pub fn hunk_lines(&self, hunk_index: usize) -> DiffResult<&[Line]> {
        let hunk = self.get_hunk(hunk_index)?;
        Ok(&self.lines[hunk.line_start..hunk.line_start + hunk.line_count])
    }

    pub fn get_line(&self, hunk_index: usize, line_index: usize) -> DiffResult<&Line> {
        let lines = self.hunk_lines(hunk_index)?;
        lines.get(line_index).ok_or(DiffError::IndexOutOfRange {
            what: "line",
            index: line_index,
            len: lines.len(),
        })
    }

    /// Bytes the patch would take as text, counting one origin character
    /// per content line.
    pub fn size(
        &self,
        include_context: bool,
        include_hunk_headers: bool,
        include_file_headers: bool,
    ) -> DiffResult<usize> {
        self.ensure_readable()?;
        let mut size = 0;
        for line in &self.lines {
            let len = line.content.len();
            size += match line.origin {
                LineOrigin::Context if !include_context => 0,
                LineOrigin::ContextNoNewlineAtEof if !include_context => 0,
                origin if origin.is_content() => len + 1,
                _ => len,
            };
        }
        if include_hunk_headers {
            size += self.hunks.iter().map(|h| h.header.len()).sum::<usize>();
        }
        if include_file_headers {
            let mut header = Vec::new();
            PatchFormatter::new(PatchFormat::PatchHeader, self.options()).write(self, &mut header)?;
            size += header.len();
        }
        Ok(size)
    }

    // -----------------------------------------------------------------------
    // Text
    // -----------------------------------------------------------------------

    /// Unified diff text of this patch.
    pub fn to_buf(&self) -> DiffResult<Vec<u8>> {
        let mut out = Vec::new();
        PatchFormatter::new(PatchFormat::Patch, self.options()).write(self, &mut out)?;
        Ok(out)
    }

    /// [`to_buf`](Self::to_buf) decoded lossily as UTF-8.
    pub fn to_text(&self) -> DiffResult<String> {
        Ok(String::from_utf8_lossy(&self.to_buf()?).into_owned())
    }
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self.to_text().map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

impl fmt::Debug for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Patch")
            .field("path", &self.delta.path())
            .field("status", &self.delta.status)
            .field("state", &self.state)
            .field("hunks", &self.hunks.len())
            .field("lines", &self.lines.len())
            .finish()
    }
}

/// Record a driver's forced classification on the delta side.
fn apply_driver_hint(file: &mut FileDescriptor, source: &ContentSource) {
    match source.driver().is_binary() {
        Binary::Yes => file.flags.binary = true,
        Binary::No => file.flags.not_binary = true,
        Binary::Unknown => {}
    }
}

fn refresh_binary_flags(delta: &mut Delta) {
    delta.flags.binary = delta.old.flags.binary || delta.new.flags.binary;
    delta.flags.not_binary =
        !delta.flags.binary && delta.old.flags.not_binary && delta.new.flags.not_binary;
}

/// Load working-tree sides first, then the rest unless a side turned out
/// binary and its bytes are not wanted. Collapses a `Modified` delta whose
/// ids were incomplete but turn out equal.
fn load_sides(
    delta: &mut Delta,
    old: &mut ContentSource,
    new: &mut ContentSource,
    load_binary: bool,
) -> DiffResult<()> {
    let incomplete = !delta.old.flags.valid_id || !delta.new.flags.valid_id;

    if old.origin().is_workdir() {
        old.load()?;
    }
    if new.origin().is_workdir() {
        new.load()?;
    }
    let binary_known = old.file().flags.binary || new.file().flags.binary;
    if !binary_known || load_binary {
        old.load()?;
        new.load()?;
    }

    delta.old = old.file().clone();
    delta.new = new.file().clone();
    refresh_binary_flags(delta);

    if incomplete
        && delta.status == DeltaStatus::Modified
        && delta.old.flags.valid_id
        && delta.new.flags.valid_id
        && delta.old.mode == delta.new.mode
        && delta.old.id == delta.new.id
    {
        debug!(path = ?delta.path(), "content identical, delta is unmodified");
        delta.status = DeltaStatus::Unmodified;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchwork_store::InMemoryObjectStore;

    fn opts() -> DiffOptions {
        DiffOptions::default()
    }

    fn text_patch(old: &str, new: &str) -> Patch {
        Patch::from_buffers(
            Some(old.as_bytes()),
            Some("file.txt"),
            Some(new.as_bytes()),
            Some("file.txt"),
            &opts(),
        )
        .unwrap()
    }

    #[test]
    fn buffers_produce_one_hunk() {
        let patch = text_patch("one\ntwo\nthree\n", "one\ntwo\nTHREE\n");
        assert_eq!(patch.state(), PatchState::Diffed);
        assert_eq!(patch.num_hunks().unwrap(), 1);
        let hunk = patch.get_hunk(0).unwrap();
        assert_eq!(hunk.header.as_ref(), b"@@ -1,3 +1,3 @@\n");
        let rendered: Vec<String> = patch
            .hunk_lines(0)
            .unwrap()
            .iter()
            .map(|l| format!("{}{}", l.origin.as_char(), String::from_utf8_lossy(&l.content)))
            .collect();
        assert_eq!(rendered, [" one\n", " two\n", "-three\n", "+THREE\n"]);
        assert_eq!(
            patch.line_stats().unwrap(),
            LineStats {
                context: 2,
                additions: 1,
                deletions: 1
            }
        );
    }

    #[test]
    fn identical_buffers_collapse_to_unmodified() {
        let patch = text_patch("same\n", "same\n");
        assert_eq!(patch.delta().status, DeltaStatus::Unmodified);
        assert_eq!(patch.state(), PatchState::NotDiffable);
        assert_eq!(patch.num_hunks().unwrap(), 0);
        assert_eq!(patch.line_stats().unwrap(), LineStats::default());
    }

    #[test]
    fn missing_side_is_addition() {
        let patch =
            Patch::from_buffers(None, None, Some(&b"a\nb\n"[..]), Some("new.txt"), &opts())
                .unwrap();
        assert_eq!(patch.delta().status, DeltaStatus::Added);
        assert_eq!(patch.delta().old.path.as_deref(), Some("new.txt"));
        assert!(patch.delta().old.id.is_zero());
        assert_eq!(patch.line_stats().unwrap().additions, 2);
        assert_eq!(patch.get_hunk(0).unwrap().header.as_ref(), b"@@ -0,0 +1,2 @@\n");
    }

    #[test]
    fn nul_bytes_make_patch_binary() {
        let patch = Patch::from_buffers(
            Some(&b"a\0b"[..]),
            Some("x.bin"),
            Some(&b"a\0c"[..]),
            Some("x.bin"),
            &opts(),
        )
        .unwrap();
        assert!(patch.delta().is_binary());
        assert_eq!(patch.state(), PatchState::NotDiffable);
        let binary = patch.binary().unwrap();
        assert!(!binary.contains_data);
    }

    #[test]
    fn show_binary_carries_literal_data() {
        let options = opts().with_show_binary(true);
        let patch =
            Patch::from_buffers(
            Some(&b"\0\x01"[..]),
            Some("x"),
            Some(&b"\0\x02\x03"[..]),
            Some("x"),
            &options,
        )
        .unwrap();
        let binary = patch.binary().unwrap();
        assert!(binary.contains_data);
        assert_eq!(binary.old.kind, BinaryKind::Literal);
        assert_eq!(binary.old.inflated_len, 2);
        assert_eq!(binary.new.inflated_len, 3);
        assert_eq!(binary::inflate(&binary.new.data, 3).unwrap(), b"\0\x02\x03");
    }

    #[test]
    fn accessors_reject_out_of_range() {
        let patch = text_patch("a\n", "b\n");
        assert!(matches!(
            patch.get_hunk(1),
            Err(DiffError::IndexOutOfRange { what: "hunk", index: 1, len: 1 })
        ));
        assert!(matches!(
            patch.get_line(0, 9),
            Err(DiffError::IndexOutOfRange { what: "line", .. })
        ));
        assert_eq!(patch.num_lines_in_hunk(0).unwrap(), 2);
    }

    #[test]
    fn accessors_require_generation() {
        let ctx = Arc::new(DiffContext::new(opts()));
        let old = ContentSource::from_buffer(Some("f"), &b"a\n"[..]);
        let new = ContentSource::from_buffer(Some("f"), &b"b\n"[..]);
        let delta = Delta::new(DeltaStatus::Modified, old.file().clone(), new.file().clone());
        let mut patch = Patch::new(delta, old, new, ctx);
        assert!(matches!(
            patch.num_hunks(),
            Err(DiffError::NotReady {
                state: PatchState::Initialized,
                ..
            })
        ));
        patch.load().unwrap();
        assert_eq!(patch.state(), PatchState::Diffable);
        assert!(patch.get_hunk(0).is_err());
        patch.generate().unwrap();
        assert_eq!(patch.num_hunks().unwrap(), 1);
    }

    #[test]
    fn abort_clears_records_and_allows_retry() {
        let ctx = Arc::new(DiffContext::new(opts()));
        let old = ContentSource::from_buffer(Some("f"), &b"a\nb\nc\n"[..]);
        let new = ContentSource::from_buffer(Some("f"), &b"a\nB\nc\n"[..]);
        let delta = Delta::new(DeltaStatus::Modified, old.file().clone(), new.file().clone());
        let mut patch = Patch::new(delta, old, new, ctx);

        let mut seen = 0;
        let err = patch
            .foreach(
                |_, _| ControlFlow::Continue(()),
                |_, _| ControlFlow::Continue(()),
                |_, _, _| {
                    seen += 1;
                    if seen == 2 {
                        ControlFlow::Break(())
                    } else {
                        ControlFlow::Continue(())
                    }
                },
            )
            .unwrap_err();
        assert!(err.is_user_abort());
        assert_eq!(patch.state(), PatchState::Loaded);

        let mut lines = 0;
        patch
            .foreach(
                |_, progress| {
                    assert_eq!(progress, 1.0);
                    ControlFlow::Continue(())
                },
                |_, _| ControlFlow::Continue(()),
                |_, _, _| {
                    lines += 1;
                    ControlFlow::Continue(())
                },
            )
            .unwrap();
        assert_eq!(lines, 4);
        assert_eq!(patch.state(), PatchState::Diffed);
        assert_eq!(patch.line_stats().unwrap().additions, 1);
    }

    #[test]
    fn foreach_replays_generated_patch() {
        let mut patch = text_patch("x\n", "y\n");
        let mut hunks = 0;
        patch
            .foreach(
                |_, _| ControlFlow::Continue(()),
                |_, hunk| {
                    hunks += 1;
                    assert_eq!(hunk.header.as_ref(), b"@@ -1 +1 @@\n");
                    ControlFlow::Continue(())
                },
                |_, _, _| ControlFlow::Continue(()),
            )
            .unwrap();
        assert_eq!(hunks, 1);
    }

    #[test]
    fn skip_binary_check_avoids_loading() {
        let store = Arc::new(InMemoryObjectStore::new());
        let old_id = store.insert_blob(&b"old\n"[..]).unwrap();
        let new_id = store.insert_blob(&b"new\n"[..]).unwrap();
        let options = DiffOptions {
            skip_binary_check: true,
            ..opts()
        };
        let ctx = Arc::new(DiffContext::new(options).with_store(store.clone()));
        let delta = Delta::modified("f", old_id, new_id, FileMode::BLOB);
        let old = ctx.source(delta.old.clone(), ContentOrigin::Store);
        let new = ctx.source(delta.new.clone(), ContentOrigin::Store);
        let mut patch = Patch::new(delta, old, new, ctx);

        let mut files = 0;
        let mut only_files = Callbacks::new().on_file(|_, _| {
            files += 1;
            ControlFlow::Continue(())
        });
        patch.foreach_with(&mut only_files).unwrap();
        drop(only_files);
        assert_eq!(files, 1);
        assert_eq!(store.read_count(), 0);
        assert_eq!(patch.state(), PatchState::Initialized);
    }

    #[test]
    fn blobs_from_store() {
        let store = Arc::new(InMemoryObjectStore::new());
        let old_id = store.insert_blob(&b"a\nb\n"[..]).unwrap();
        let new_id = store.insert_blob(&b"a\nc\n"[..]).unwrap();
        let patch = Patch::from_blobs(
            store.clone(),
            Some(old_id),
            Some("f.txt"),
            Some(new_id),
            None,
            &opts(),
        )
        .unwrap();
        assert_eq!(patch.delta().new.path.as_deref(), Some("f.txt"));
        assert_eq!(patch.line_stats().unwrap().deletions, 1);
        assert_eq!(store.read_count(), 2);

        let missing = Patch::from_blobs(
            store,
            Some(ObjectId::for_blob(b"nope")),
            Some("g"),
            Some(new_id),
            Some("g"),
            &opts(),
        );
        assert!(matches!(missing, Err(DiffError::ObjectNotFound(_))));
    }

    #[test]
    fn flatten_keeps_content_and_releases_sources() {
        let mut patch = text_patch("one\ntwo\n", "one\n2\n");
        let before: Vec<Bytes> = patch.hunk_lines(0).unwrap().iter().map(|l| l.content.clone()).collect();
        patch.flatten().unwrap();
        assert_eq!(patch.state(), PatchState::Flattened);
        assert!(!patch.old_source().unwrap().is_loaded());
        let after: Vec<Bytes> = patch.hunk_lines(0).unwrap().iter().map(|l| l.content.clone()).collect();
        assert_eq!(before, after);
        assert!(patch.flatten().is_err());
    }

    #[test]
    fn size_accounting() {
        let patch = text_patch("one\ntwo\nthree\n", "one\ntwo\nTHREE\n");
        // " one\n" + " two\n" + "-three\n" + "+THREE\n"
        assert_eq!(patch.size(true, false, false).unwrap(), 5 + 5 + 7 + 7);
        assert_eq!(patch.size(false, false, false).unwrap(), 14);
        assert_eq!(patch.size(false, true, false).unwrap(), 14 + 16);
        let with_headers = patch.size(true, true, true).unwrap();
        assert_eq!(with_headers, patch.to_buf().unwrap().len());
    }

    #[test]
    fn state_transitions() {
        use PatchState::*;
        assert!(Initialized.can_move_to(Loaded));
        assert!(Diffable.can_move_to(Loaded));
        assert!(!Initialized.can_move_to(Diffed));
        assert!(!NotDiffable.can_move_to(Diffed));
        assert!(!Flattened.can_move_to(Diffed));
    }

    #[test]
    fn origin_chars() {
        assert_eq!(LineOrigin::ContextNoNewlineAtEof.as_char(), '=');
        assert_eq!(LineOrigin::AddNoNewlineAtEof.as_char(), '>');
        assert_eq!(LineOrigin::DelNoNewlineAtEof.as_char(), '<');
        assert_eq!(LineOrigin::Addition.no_newline_variant(), LineOrigin::AddNoNewlineAtEof);
    }
}
