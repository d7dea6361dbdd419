//! Line-engine protocol and the adapter that turns its events into hunks
//! and lines.
//!
//! An engine receives two buffers and reports its result through a single
//! callback: one buffer is a hunk header (`@@ -a,b +c,d @@ label\n`), two
//! buffers are an origin byte plus a line, and a third buffer marks a line
//! that lacks its trailing newline.

use std::borrow::Cow;
use std::ops::{ControlFlow, Range};

use bytes::Bytes;
use similar::{Algorithm, DiffTag};

use crate::config::{DiffAlgorithm, WhitespaceFlags};
use crate::delta::Delta;
use crate::error::{DiffError, DiffResult};
use crate::patch::{Hunk, Line, LineOrigin, PatchVisitor};

/// Hunk headers, including their newline, never exceed this many bytes.
pub const HUNK_HEADER_MAX: usize = 127;

/// Third buffer of a line event for a line without a trailing newline.
pub const NO_NEWLINE_MARKER: &[u8] = b"\n\\ No newline at end of file\n";

/// Options handed to a [`LineEngine`].
#[derive(Clone, Copy, Default)]
pub struct EngineOptions<'a> {
    pub context_lines: u16,
    pub interhunk_lines: u16,
    pub whitespace: WhitespaceFlags,
    pub algorithm: DiffAlgorithm,
    /// Labels a hunk with the nearest preceding function line.
    pub function_context: Option<&'a dyn Fn(&[u8]) -> Option<Vec<u8>>>,
}

/// Receiver of engine events.
pub trait EngineSink {
    fn consume(&mut self, bufs: &[&[u8]]) -> ControlFlow<()>;
}

/// A line-level diff algorithm.
pub trait LineEngine: Send + Sync {
    /// Diff `old` against `new`, reporting through `sink`. Stops early when
    /// the sink breaks.
    fn diff(
        &self,
        old: &[u8],
        new: &[u8],
        opts: &EngineOptions<'_>,
        sink: &mut dyn EngineSink,
    ) -> ControlFlow<()>;
}

// ---------------------------------------------------------------------------
// Engine backed by `similar`
// ---------------------------------------------------------------------------

/// The default engine, built on the `similar` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimilarEngine;

struct Change {
    old: Range<usize>,
    new: Range<usize>,
}

impl LineEngine for SimilarEngine {
    fn diff(
        &self,
        old: &[u8],
        new: &[u8],
        opts: &EngineOptions<'_>,
        sink: &mut dyn EngineSink,
    ) -> ControlFlow<()> {
        let old_lines: Vec<&[u8]> = old.split_inclusive(|&b| b == b'\n').collect();
        let new_lines: Vec<&[u8]> = new.split_inclusive(|&b| b == b'\n').collect();
        let old_keys: Vec<Cow<'_, [u8]>> =
            old_lines.iter().map(|l| line_key(l, &opts.whitespace)).collect();
        let new_keys: Vec<Cow<'_, [u8]>> =
            new_lines.iter().map(|l| line_key(l, &opts.whitespace)).collect();

        let algorithm = match opts.algorithm {
            DiffAlgorithm::Myers => Algorithm::Myers,
            DiffAlgorithm::Patience => Algorithm::Patience,
            DiffAlgorithm::Lcs => Algorithm::Lcs,
        };

        let mut changes: Vec<Change> = Vec::new();
        for op in similar::capture_diff_slices(algorithm, &old_keys, &new_keys) {
            let (tag, o, n) = op.as_tag_tuple();
            if tag == DiffTag::Equal {
                continue;
            }
            match changes.last_mut() {
                Some(last) if last.old.end == o.start && last.new.end == n.start => {
                    last.old.end = o.end;
                    last.new.end = n.end;
                }
                _ => changes.push(Change { old: o, new: n }),
            }
        }

        let ctx = opts.context_lines as usize;
        let max_gap = 2 * ctx + opts.interhunk_lines as usize;
        let mut start = 0;
        while start < changes.len() {
            let mut end = start + 1;
            while end < changes.len() && changes[end].old.start - changes[end - 1].old.end <= max_gap {
                end += 1;
            }
            emit_hunk(&changes[start..end], &old_lines, &new_lines, ctx, opts, sink)?;
            start = end;
        }
        ControlFlow::Continue(())
    }
}

fn emit_hunk(
    group: &[Change],
    old_lines: &[&[u8]],
    new_lines: &[&[u8]],
    ctx: usize,
    opts: &EngineOptions<'_>,
    sink: &mut dyn EngineSink,
) -> ControlFlow<()> {
    let (first, last) = match (group.first(), group.last()) {
        (Some(f), Some(l)) => (f, l),
        _ => return ControlFlow::Continue(()),
    };
    let old_begin = first.old.start.saturating_sub(ctx);
    let new_begin = first.new.start - (first.old.start - old_begin);
    let old_end = (last.old.end + ctx).min(old_lines.len());
    let new_end = last.new.end + (old_end - last.old.end);

    let label = opts.function_context.and_then(|find| {
        old_lines[..old_begin].iter().rev().find_map(|line| find(line))
    });
    let header = format_hunk_header(
        old_begin,
        old_end - old_begin,
        new_begin,
        new_end - new_begin,
        label.as_deref(),
    );
    sink.consume(&[header.as_slice()])?;

    let mut new_pos = new_begin;
    for change in group {
        let lead = change.new.start - new_pos;
        for line in &new_lines[new_pos..new_pos + lead] {
            emit_line(sink, b" ", line)?;
        }
        for line in &old_lines[change.old.clone()] {
            emit_line(sink, b"-", line)?;
        }
        for line in &new_lines[change.new.clone()] {
            emit_line(sink, b"+", line)?;
        }
        new_pos = change.new.end;
    }
    for line in &new_lines[new_pos..new_end] {
        emit_line(sink, b" ", line)?;
    }
    ControlFlow::Continue(())
}

fn emit_line(sink: &mut dyn EngineSink, origin: &[u8], line: &[u8]) -> ControlFlow<()> {
    if line.ends_with(b"\n") {
        sink.consume(&[origin, line])
    } else {
        sink.consume(&[origin, line, NO_NEWLINE_MARKER])
    }
}

/// `@@ -a[,b] +c[,d] @@[ label]\n`, with `,1` omitted and the start of an
/// empty range naming the line before it. The label is cut so the whole
/// header fits in [`HUNK_HEADER_MAX`] bytes.
pub fn format_hunk_header(
    old_begin: usize,
    old_count: usize,
    new_begin: usize,
    new_count: usize,
    label: Option<&[u8]>,
) -> Vec<u8> {
    fn range(begin: usize, count: usize) -> String {
        let start = if count == 0 { begin } else { begin + 1 };
        if count == 1 {
            format!("{start}")
        } else {
            format!("{start},{count}")
        }
    }
    let mut header = format!(
        "@@ -{} +{} @@",
        range(old_begin, old_count),
        range(new_begin, new_count)
    )
    .into_bytes();
    if let Some(label) = label.filter(|l| !l.is_empty()) {
        let room = HUNK_HEADER_MAX.saturating_sub(header.len() + 2);
        header.push(b' ');
        header.extend_from_slice(&label[..label.len().min(room)]);
    }
    header.push(b'\n');
    header
}

/// Comparison key of a line under the whitespace rules.
fn line_key<'a>(line: &'a [u8], ws: &WhitespaceFlags) -> Cow<'a, [u8]> {
    if ws.is_empty() {
        return Cow::Borrowed(line);
    }
    if ws.ignore_all {
        return Cow::Owned(line.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect());
    }
    let (mut body, newline) = match line.strip_suffix(b"\n") {
        Some(body) => (body, true),
        None => (line, false),
    };
    if ws.ignore_cr_at_eol {
        body = body.strip_suffix(b"\r").unwrap_or(body);
    }
    if ws.ignore_change || ws.ignore_eol {
        while let [rest @ .., last] = body {
            if !last.is_ascii_whitespace() {
                break;
            }
            body = rest;
        }
    }
    let mut key = Vec::with_capacity(line.len());
    if ws.ignore_change {
        let mut in_space = false;
        for &b in body {
            if b.is_ascii_whitespace() {
                if !in_space {
                    key.push(b' ');
                }
                in_space = true;
            } else {
                key.push(b);
                in_space = false;
            }
        }
    } else {
        key.extend_from_slice(body);
    }
    if newline {
        key.push(b'\n');
    }
    Cow::Owned(key)
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Parse the numbers out of an engine hunk header. A missing `,count`
/// means one line.
pub fn scan_hunk_header(header: &[u8]) -> Option<(i64, i64, i64, i64)> {
    if header.first() != Some(&b'@') {
        return None;
    }
    let mut pos = 0;
    let old_start = scan_int(header, &mut pos)?;
    let old_lines = if header.get(pos) == Some(&b',') {
        scan_int(header, &mut pos)?
    } else {
        1
    };
    let new_start = scan_int(header, &mut pos)?;
    let new_lines = if header.get(pos) == Some(&b',') {
        scan_int(header, &mut pos)?
    } else {
        1
    };
    Some((old_start, old_lines, new_start, new_lines))
}

/// Skip to the next digit run and read it.
fn scan_int(buf: &[u8], pos: &mut usize) -> Option<i64> {
    while *pos < buf.len() && !buf[*pos].is_ascii_digit() {
        *pos += 1;
    }
    if *pos >= buf.len() {
        return None;
    }
    let mut value: i64 = 0;
    while let Some(d) = buf.get(*pos).filter(|b| b.is_ascii_digit()) {
        value = value.checked_mul(10)?.checked_add(i64::from(d - b'0'))?;
        *pos += 1;
    }
    Some(value)
}

/// Lines covered by `content`: one per newline, plus a final unterminated
/// fragment.
pub(crate) fn count_lines(content: &[u8]) -> i64 {
    let newlines = content.iter().filter(|&&b| b == b'\n').count() as i64;
    if content.last().is_some_and(|&b| b != b'\n') {
        newlines + 1
    } else {
        newlines
    }
}

/// Share `sub` out of `src` when it lies inside it.
fn share(src: &Bytes, sub: &[u8]) -> Option<(Bytes, i64)> {
    let base = src.as_ptr() as usize;
    let ptr = sub.as_ptr() as usize;
    if ptr >= base && ptr + sub.len() <= base + src.len() {
        Some((src.slice_ref(sub), (ptr - base) as i64))
    } else {
        None
    }
}

/// Collects engine events into a patch's hunk and line arrays, forwarding
/// each record to an optional visitor as it is produced.
pub(crate) struct HunkSink<'a, 'v> {
    old: &'a Bytes,
    new: &'a Bytes,
    delta: &'a Delta,
    hunks: &'a mut Vec<Hunk>,
    lines: &'a mut Vec<Line>,
    visitor: Option<&'v mut dyn PatchVisitor>,
    old_lineno: i64,
    new_lineno: i64,
    error: Option<DiffError>,
    aborted: bool,
}

impl<'a, 'v> HunkSink<'a, 'v> {
    pub(crate) fn new(
        old: &'a Bytes,
        new: &'a Bytes,
        delta: &'a Delta,
        hunks: &'a mut Vec<Hunk>,
        lines: &'a mut Vec<Line>,
        visitor: Option<&'v mut dyn PatchVisitor>,
    ) -> Self {
        Self {
            old,
            new,
            delta,
            hunks,
            lines,
            visitor,
            old_lineno: 0,
            new_lineno: 0,
            error: None,
            aborted: false,
        }
    }

    /// Run `engine` and translate how it stopped.
    pub(crate) fn run(mut self, engine: &dyn LineEngine, opts: &EngineOptions<'_>) -> DiffResult<()> {
        let flow = engine.diff(self.old, self.new, opts, &mut self);
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        if self.aborted {
            return Err(DiffError::UserAborted);
        }
        if flow.is_break() {
            return Err(DiffError::Engine("engine stopped without a reason".into()));
        }
        Ok(())
    }

    fn fail(&mut self, message: String) -> ControlFlow<()> {
        self.error = Some(DiffError::Engine(message));
        ControlFlow::Break(())
    }

    fn on_hunk(&mut self, buf: &[u8]) -> ControlFlow<()> {
        let Some((old_start, old_lines, new_start, new_lines)) = scan_hunk_header(buf) else {
            return self.fail(format!(
                "unparsable hunk header {:?}",
                String::from_utf8_lossy(buf)
            ));
        };
        let header = Bytes::copy_from_slice(&buf[..buf.len().min(HUNK_HEADER_MAX)]);
        self.hunks.push(Hunk {
            old_start,
            old_lines,
            new_start,
            new_lines,
            header,
            line_start: self.lines.len(),
            line_count: 0,
        });
        self.old_lineno = old_start;
        self.new_lineno = new_start;

        if let (Some(visitor), Some(hunk)) = (self.visitor.as_deref_mut(), self.hunks.last()) {
            if visitor.hunk(self.delta, hunk).is_break() {
                self.aborted = true;
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn on_line(&mut self, bufs: &[&[u8]]) -> ControlFlow<()> {
        if self.hunks.is_empty() {
            return self.fail("line event before any hunk header".into());
        }
        let origin = match bufs[0].first() {
            Some(b' ') => LineOrigin::Context,
            Some(b'-') => LineOrigin::Deletion,
            Some(b'+') => LineOrigin::Addition,
            other => return self.fail(format!("unknown line origin {other:?}")),
        };

        let (preferred, fallback) = match origin {
            LineOrigin::Deletion => (self.old, self.new),
            _ => (self.new, self.old),
        };
        let (content, content_offset) = share(preferred, bufs[1])
            .or_else(|| share(fallback, bufs[1]))
            .unwrap_or_else(|| (Bytes::copy_from_slice(bufs[1]), -1));
        let num_lines = count_lines(&content);
        let (old_lineno, new_lineno) = match origin {
            LineOrigin::Addition => {
                let n = self.new_lineno;
                self.new_lineno += num_lines;
                (-1, n)
            }
            LineOrigin::Deletion => {
                let o = self.old_lineno;
                self.old_lineno += num_lines;
                (o, -1)
            }
            _ => {
                let (o, n) = (self.old_lineno, self.new_lineno);
                self.old_lineno += num_lines;
                self.new_lineno += num_lines;
                (o, n)
            }
        };
        self.push_line(Line {
            origin,
            old_lineno,
            new_lineno,
            num_lines,
            content,
            content_offset,
        })?;

        if let Some(marker) = bufs.get(2) {
            self.push_line(Line {
                origin: origin.no_newline_variant(),
                old_lineno: -1,
                new_lineno: -1,
                num_lines: 0,
                content: Bytes::copy_from_slice(marker),
                content_offset: -1,
            })?;
        }
        ControlFlow::Continue(())
    }

    fn push_line(&mut self, line: Line) -> ControlFlow<()> {
        self.lines.push(line);
        let Some(hunk) = self.hunks.last_mut() else {
            return ControlFlow::Continue(());
        };
        hunk.line_count += 1;
        if let (Some(visitor), Some(hunk), Some(line)) =
            (self.visitor.as_deref_mut(), self.hunks.last(), self.lines.last())
        {
            if visitor.line(self.delta, hunk, line).is_break() {
                self.aborted = true;
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }
}

impl EngineSink for HunkSink<'_, '_> {
    fn consume(&mut self, bufs: &[&[u8]]) -> ControlFlow<()> {
        match bufs.len() {
            1 => self.on_hunk(bufs[0]),
            2 | 3 => self.on_line(bufs),
            n => self.fail(format!("unexpected {n}-buffer event")),
        }
    }
}
