//! Reading unified diff text back into [`Patch`] values.
//!
//! Headers are recognised by a small state machine keyed on line prefixes.
//! Anything before the first `diff --git` line (mail headers, commit
//! messages) is skipped, as is anything between patches.

use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;
use patchwork_types::{FileMode, ObjectId};
use tracing::debug;

use super::binary;
use super::quote::{read_path, unquote};
use crate::config::{DiffOptions, MIN_ABBREV};
use crate::delta::{Delta, DeltaFlags, DeltaStatus, FileDescriptor, FileFlags};
use crate::diff::DiffContext;
use crate::error::{DiffError, DiffResult};
use crate::patch::{BinaryKind, BinaryPatch, BinaryPatchSide, Hunk, Line, LineOrigin, Patch};
use crate::xdiff::HUNK_HEADER_MAX;

/// Options for [`PatchParser`].
#[derive(Clone, Debug)]
pub struct ParseOptions {
    /// Leading path components removed from header paths (`a/`, `b/`).
    pub strip_components: usize,
    /// Options carried by the parsed patches, used when they are rendered.
    pub diff_options: DiffOptions,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            strip_components: 1,
            diff_options: DiffOptions::default(),
        }
    }
}

/// Parse the first patch in `text` with default options.
pub fn parse_patch(text: impl Into<Bytes>) -> DiffResult<Patch> {
    PatchParser::new(ParseOptions::default()).parse(text)
}

/// Parse every patch in `text` with default options.
pub fn parse_patches(text: impl Into<Bytes>) -> DiffResult<Vec<Patch>> {
    PatchParser::new(ParseOptions::default()).parse_all(text)
}

/// Reads patches out of diff text.
pub struct PatchParser {
    options: ParseOptions,
    ctx: Arc<DiffContext>,
}

impl PatchParser {
    pub fn new(options: ParseOptions) -> Self {
        let ctx = Arc::new(DiffContext::new(options.diff_options.clone()));
        Self { options, ctx }
    }

    /// The first patch in `text`.
    pub fn parse(&self, text: impl Into<Bytes>) -> DiffResult<Patch> {
        let text = text.into();
        let mut cursor = Cursor::new(&text);
        let patch = self.next_patch(&text, &mut cursor).and_then(|patch| {
            patch.ok_or_else(|| DiffError::parse(cursor.line_no, "no patch found"))
        });
        patch.inspect_err(|e| debug!(line = ?e.line(), error = %e, "patch parse failed"))
    }

    /// Every patch in `text`, in order.
    pub fn parse_all(&self, text: impl Into<Bytes>) -> DiffResult<Vec<Patch>> {
        let text = text.into();
        let mut cursor = Cursor::new(&text);
        let mut patches = Vec::new();
        loop {
            match self.next_patch(&text, &mut cursor) {
                Ok(Some(patch)) => patches.push(patch),
                Ok(None) => break,
                Err(e) => {
                    debug!(line = ?e.line(), error = %e, "patch parse failed");
                    return Err(e);
                }
            }
        }
        if patches.is_empty() {
            return Err(DiffError::parse(cursor.line_no, "no patch found"));
        }
        Ok(patches)
    }

    fn next_patch(&self, text: &Bytes, cursor: &mut Cursor<'_>) -> DiffResult<Option<Patch>> {
        if !skip_to_header(cursor)? {
            return Ok(None);
        }
        let start = cursor.pos;
        let start_line = cursor.line_no;

        let mut header = Header::default();
        if let Some(line) = cursor.line() {
            let rest = trim_newline(&line[b"diff --git ".len()..]);
            let (old, new) = split_git_header(rest, self.options.strip_components);
            header.header_old = old;
            header.header_new = new;
        }
        cursor.advance();
        parse_header_lines(&mut header, cursor)?;

        let mut hunks = Vec::new();
        let mut lines = Vec::new();
        let mut binary = None;
        match cursor.line() {
            Some(line) if line.starts_with(b"@@ -") => {
                while cursor.line().is_some_and(|l| l.starts_with(b"@@ -")) {
                    parse_hunk(text, start, cursor, &mut hunks, &mut lines)?;
                }
            }
            Some(line) if line.starts_with(b"GIT binary patch") => {
                binary = Some(parse_binary(cursor)?);
            }
            Some(line) if line.starts_with(b"Binary files ") => {
                if !trim_newline(line).ends_with(b" differ") {
                    return Err(DiffError::parse(cursor.line_no, "malformed binary notice"));
                }
                cursor.advance();
                binary = Some(BinaryPatch::default());
            }
            _ => {}
        }

        let delta = self.build_delta(&header, binary.as_ref(), !hunks.is_empty(), start_line)?;
        debug!(
            path = ?delta.path(),
            status = ?delta.status,
            hunks = hunks.len(),
            line = start_line,
            "parsed patch"
        );
        let source = text.slice(start..cursor.pos);
        Ok(Some(Patch::from_parsed(
            delta,
            hunks,
            lines,
            binary,
            source,
            Arc::clone(&self.ctx),
        )))
    }

    fn build_delta(
        &self,
        h: &Header,
        binary: Option<&BinaryPatch>,
        has_hunks: bool,
        line: usize,
    ) -> DiffResult<Delta> {
        let added = h.status == DeltaStatus::Added;
        let deleted = h.status == DeltaStatus::Deleted;

        match (&h.old_path, &h.new_path) {
            (Some(_), None) => return Err(DiffError::parse(line, "missing new path")),
            (None, Some(_)) => return Err(DiffError::parse(line, "missing old path")),
            _ => {}
        }
        check_header_name(h.header_old.as_deref(), h.old_path.as_deref(), added, line)?;
        check_header_name(h.header_new.as_deref(), h.new_path.as_deref(), deleted, line)?;

        let prefixed_old = if added {
            h.header_old.as_deref()
        } else {
            h.old_path.as_deref().or(h.header_old.as_deref())
        };
        let prefixed_new = if deleted {
            h.header_new.as_deref()
        } else {
            h.new_path.as_deref().or(h.header_new.as_deref())
        };
        let strip = |path: Option<&str>| -> DiffResult<Option<String>> {
            path.map(|p| {
                strip_components(p, self.options.strip_components)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        DiffError::parse(
                            line,
                            format!(
                                "{p} has fewer than {} leading path components",
                                self.options.strip_components
                            ),
                        )
                    })
            })
            .transpose()
        };
        let old_path = match &h.rename_old {
            Some(path) => Some(path.clone()),
            None => strip(prefixed_old)?,
        };
        let new_path = match &h.rename_new {
            Some(path) => Some(path.clone()),
            None => strip(prefixed_new)?,
        };
        if old_path.is_none() && new_path.is_none() {
            return Err(DiffError::parse(line, "patch header lacks old and new paths"));
        }

        let old_mode = h.old_mode;
        let new_mode = if h.new_mode.is_absent() && !deleted {
            old_mode
        } else {
            h.new_mode
        };
        if h.status == DeltaStatus::Modified && binary.is_none() && old_mode == new_mode && !has_hunks {
            return Err(DiffError::parse(line, "patch with no hunks"));
        }

        let is_binary = binary.is_some();
        let side = |path: Option<String>, id: ObjectId, abbrev: u16, mode: FileMode, cleared: bool| {
            let (id, abbrev) = if cleared { (ObjectId::zero(), 0) } else { (id, abbrev) };
            FileDescriptor {
                path,
                id,
                id_abbrev: abbrev,
                size: 0,
                mode,
                flags: FileFlags {
                    valid_id: cleared || abbrev as usize == ObjectId::HEX_LEN,
                    binary: is_binary,
                    not_binary: !is_binary,
                    ..Default::default()
                },
            }
        };
        let mut old = side(old_path, h.old_id, h.old_abbrev, old_mode, added);
        let mut new = side(new_path, h.new_id, h.new_abbrev, new_mode, deleted);
        if let Some(binary) = binary.filter(|b| b.contains_data) {
            old.size = literal_size(&binary.old).unwrap_or(old.size);
            new.size = literal_size(&binary.new).unwrap_or(new.size);
        }

        let mut delta = Delta::new(h.status, old, new);
        delta.similarity = h.similarity;
        delta.flags = DeltaFlags {
            binary: is_binary,
            not_binary: !is_binary,
        };
        Ok(delta)
    }
}

fn literal_size(side: &BinaryPatchSide) -> Option<u64> {
    (side.kind == BinaryKind::Literal).then_some(side.inflated_len)
}

// ---------------------------------------------------------------------------
// Line cursor
// ---------------------------------------------------------------------------

struct Cursor<'t> {
    text: &'t Bytes,
    pos: usize,
    /// 1-based number of the current line.
    line_no: usize,
}

impl<'t> Cursor<'t> {
    fn new(text: &'t Bytes) -> Self {
        Self {
            text,
            pos: 0,
            line_no: 1,
        }
    }

    /// The current line including its newline.
    fn range(&self) -> Option<Range<usize>> {
        if self.pos >= self.text.len() {
            return None;
        }
        let end = self.text[self.pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(self.text.len(), |i| self.pos + i + 1);
        Some(self.pos..end)
    }

    fn line(&self) -> Option<&'t [u8]> {
        let text: &'t Bytes = self.text;
        self.range().map(|r| &text[r])
    }

    fn advance(&mut self) {
        if let Some(r) = self.range() {
            self.pos = r.end;
            self.line_no += 1;
        }
    }
}

fn trim_newline(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\n").unwrap_or(line)
}

/// Move to the next `diff --git` line. Returns `false` at end of input.
fn skip_to_header(cursor: &mut Cursor<'_>) -> DiffResult<bool> {
    while let Some(line) = cursor.line() {
        if line.starts_with(b"diff --git ") {
            return Ok(true);
        }
        if parse_hunk_header(line).is_some() {
            return Err(DiffError::parse(cursor.line_no, "hunk header outside patch"));
        }
        cursor.advance();
    }
    Ok(false)
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Header {
    /// Prefixed paths from the `diff --git` line.
    header_old: Option<String>,
    header_new: Option<String>,
    /// Prefixed paths from `---` / `+++`, possibly `/dev/null`.
    old_path: Option<String>,
    new_path: Option<String>,
    rename_old: Option<String>,
    rename_new: Option<String>,
    old_mode: FileMode,
    new_mode: FileMode,
    old_id: ObjectId,
    new_id: ObjectId,
    old_abbrev: u16,
    new_abbrev: u16,
    status: DeltaStatus,
    similarity: u16,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            header_old: None,
            header_new: None,
            old_path: None,
            new_path: None,
            rename_old: None,
            rename_new: None,
            old_mode: FileMode::UNREADABLE,
            new_mode: FileMode::UNREADABLE,
            old_id: ObjectId::zero(),
            new_id: ObjectId::zero(),
            old_abbrev: 0,
            new_abbrev: 0,
            status: DeltaStatus::Modified,
            similarity: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HeaderState {
    Diff,
    FileMode,
    Mode,
    Index,
    Path,
    Similarity,
    Rename,
    Copy,
    End,
}

impl HeaderState {
    /// States in which the header may stop.
    fn can_end(self) -> bool {
        matches!(self, Self::FileMode | Self::Index | Self::End)
    }
}

type Handler = fn(&mut Header, &[u8], usize) -> DiffResult<()>;

struct Transition {
    prefix: &'static [u8],
    from: &'static [HeaderState],
    to: HeaderState,
    handler: Handler,
}

use HeaderState as S;

const TRANSITIONS: &[Transition] = &[
    Transition { prefix: b"--- ", from: &[S::Diff, S::Index], to: S::Path, handler: old_path },
    Transition { prefix: b"+++ ", from: &[S::Path], to: S::End, handler: new_path },
    Transition { prefix: b"old mode ", from: &[S::Diff, S::End], to: S::Mode, handler: old_mode },
    Transition { prefix: b"new mode ", from: &[S::Mode], to: S::End, handler: new_mode },
    Transition { prefix: b"deleted file mode ", from: &[S::Diff], to: S::FileMode, handler: deleted_file_mode },
    Transition { prefix: b"new file mode ", from: &[S::Diff], to: S::FileMode, handler: new_file_mode },
    Transition { prefix: b"index ", from: &[S::Diff, S::FileMode, S::End], to: S::Index, handler: index },
    Transition { prefix: b"similarity index ", from: &[S::Diff, S::End], to: S::Similarity, handler: similarity },
    Transition { prefix: b"dissimilarity index ", from: &[S::Diff, S::End], to: S::Similarity, handler: dissimilarity },
    Transition { prefix: b"rename from ", from: &[S::Similarity], to: S::Rename, handler: rename_from },
    Transition { prefix: b"rename old ", from: &[S::Similarity], to: S::Rename, handler: rename_from },
    Transition { prefix: b"copy from ", from: &[S::Similarity], to: S::Copy, handler: copy_from },
    Transition { prefix: b"rename to ", from: &[S::Rename], to: S::End, handler: rename_to },
    Transition { prefix: b"rename new ", from: &[S::Rename], to: S::End, handler: rename_to },
    Transition { prefix: b"copy to ", from: &[S::Copy], to: S::End, handler: copy_to },
];

fn parse_header_lines(header: &mut Header, cursor: &mut Cursor<'_>) -> DiffResult<()> {
    let mut state = HeaderState::Diff;
    while let Some(line) = cursor.line() {
        let found = TRANSITIONS
            .iter()
            .find(|t| line.starts_with(t.prefix) && t.from.contains(&state));
        match found {
            Some(t) => {
                (t.handler)(header, trim_newline(&line[t.prefix.len()..]), cursor.line_no)?;
                state = t.to;
                cursor.advance();
            }
            None if state.can_end() => return Ok(()),
            None => {
                return Err(DiffError::parse(
                    cursor.line_no,
                    format!("unexpected header line {:?}", String::from_utf8_lossy(trim_newline(line))),
                ))
            }
        }
    }
    if state.can_end() {
        Ok(())
    } else {
        Err(DiffError::parse(cursor.line_no, "unexpected end of patch header"))
    }
}

fn path_arg(rest: &[u8], line: usize) -> DiffResult<String> {
    read_path(rest).ok_or_else(|| DiffError::parse(line, "invalid path"))
}

fn mode_arg(rest: &[u8], line: usize) -> DiffResult<FileMode> {
    let text = std::str::from_utf8(rest).map_err(|_| DiffError::header(line, "invalid mode"))?;
    FileMode::from_octal(text.trim()).map_err(|e| DiffError::header(line, e.to_string()))
}

fn old_path(h: &mut Header, rest: &[u8], line: usize) -> DiffResult<()> {
    h.old_path = Some(path_arg(rest, line)?);
    Ok(())
}

fn new_path(h: &mut Header, rest: &[u8], line: usize) -> DiffResult<()> {
    h.new_path = Some(path_arg(rest, line)?);
    Ok(())
}

fn old_mode(h: &mut Header, rest: &[u8], line: usize) -> DiffResult<()> {
    h.old_mode = mode_arg(rest, line)?;
    Ok(())
}

fn new_mode(h: &mut Header, rest: &[u8], line: usize) -> DiffResult<()> {
    h.new_mode = mode_arg(rest, line)?;
    Ok(())
}

fn deleted_file_mode(h: &mut Header, rest: &[u8], line: usize) -> DiffResult<()> {
    h.old_mode = mode_arg(rest, line)?;
    h.new_mode = FileMode::UNREADABLE;
    h.status = DeltaStatus::Deleted;
    Ok(())
}

fn new_file_mode(h: &mut Header, rest: &[u8], line: usize) -> DiffResult<()> {
    h.old_mode = FileMode::UNREADABLE;
    h.new_mode = mode_arg(rest, line)?;
    h.status = DeltaStatus::Added;
    Ok(())
}

fn abbrev_id(hex: &str, line: usize) -> DiffResult<(ObjectId, u16)> {
    let (id, len) = ObjectId::from_hex_prefix(hex).map_err(|e| DiffError::header(line, e.to_string()))?;
    if len < MIN_ABBREV {
        return Err(DiffError::header(line, format!("abbreviated id {hex:?} is too short")));
    }
    Ok((id, len as u16))
}

/// `index <old>..<new>[ <mode>]`
fn index(h: &mut Header, rest: &[u8], line: usize) -> DiffResult<()> {
    let text = std::str::from_utf8(rest).map_err(|_| DiffError::header(line, "invalid index line"))?;
    let (ids, mode) = match text.split_once(' ') {
        Some((ids, mode)) => (ids, Some(mode)),
        None => (text, None),
    };
    let (old, new) = ids
        .split_once("..")
        .ok_or_else(|| DiffError::header(line, "index line lacks '..'"))?;
    (h.old_id, h.old_abbrev) = abbrev_id(old, line)?;
    (h.new_id, h.new_abbrev) = abbrev_id(new, line)?;
    if let Some(mode) = mode {
        let mode = mode_arg(mode.as_bytes(), line)?;
        h.old_mode = mode;
        h.new_mode = mode;
    }
    Ok(())
}

fn percentage(rest: &[u8], line: usize) -> DiffResult<u16> {
    let digits = rest
        .strip_suffix(b"%")
        .filter(|d| !d.is_empty() && d.iter().all(u8::is_ascii_digit))
        .ok_or_else(|| DiffError::parse(line, "invalid similarity percentage"))?;
    let value: u32 = std::str::from_utf8(digits)
        .ok()
        .and_then(|d| d.parse().ok())
        .ok_or_else(|| DiffError::parse(line, "invalid similarity percentage"))?;
    if value > 100 {
        return Err(DiffError::header(line, format!("similarity {value}% exceeds 100%")));
    }
    Ok(value as u16)
}

fn similarity(h: &mut Header, rest: &[u8], line: usize) -> DiffResult<()> {
    h.similarity = percentage(rest, line)?;
    Ok(())
}

fn dissimilarity(h: &mut Header, rest: &[u8], line: usize) -> DiffResult<()> {
    h.similarity = 100 - percentage(rest, line)?;
    Ok(())
}

/// A rename or copy path must name the same file as the `diff --git` line.
fn checked_rename_path(rest: &[u8], header: Option<&str>, line: usize) -> DiffResult<String> {
    let path = path_arg(rest, line)?;
    if let Some(header) = header {
        let matches = header == path
            || header
                .strip_suffix(path.as_str())
                .is_some_and(|lead| lead.ends_with('/'));
        if !matches {
            return Err(DiffError::header(
                line,
                format!("{path:?} does not match the diff --git path {header:?}"),
            ));
        }
    }
    Ok(path)
}

fn rename_from(h: &mut Header, rest: &[u8], line: usize) -> DiffResult<()> {
    h.rename_old = Some(checked_rename_path(rest, h.header_old.as_deref(), line)?);
    h.status = DeltaStatus::Renamed;
    Ok(())
}

fn rename_to(h: &mut Header, rest: &[u8], line: usize) -> DiffResult<()> {
    h.rename_new = Some(checked_rename_path(rest, h.header_new.as_deref(), line)?);
    Ok(())
}

fn copy_from(h: &mut Header, rest: &[u8], line: usize) -> DiffResult<()> {
    h.rename_old = Some(checked_rename_path(rest, h.header_old.as_deref(), line)?);
    h.status = DeltaStatus::Copied;
    Ok(())
}

fn copy_to(h: &mut Header, rest: &[u8], line: usize) -> DiffResult<()> {
    h.rename_new = Some(checked_rename_path(rest, h.header_new.as_deref(), line)?);
    Ok(())
}

/// `---`/`+++` must repeat the `diff --git` paths unless that side is
/// `/dev/null`.
fn check_header_name(header: Option<&str>, name: Option<&str>, skip: bool, line: usize) -> DiffResult<()> {
    match (header, name) {
        (Some(header), Some(name)) if !skip && header != name => Err(DiffError::header(
            line,
            format!("file name {name:?} does not match the diff --git path {header:?}"),
        )),
        _ => Ok(()),
    }
}

fn strip_components(path: &str, n: usize) -> Option<&str> {
    let mut rest = path;
    for _ in 0..n {
        let slash = rest.find('/')?;
        rest = &rest[slash + 1..];
    }
    (!rest.is_empty()).then_some(rest)
}

/// Split `a/x b/x`. Quoted names are unambiguous; unquoted names with
/// spaces are accepted when both halves name the same file.
fn split_git_header(rest: &[u8], strip: usize) -> (Option<String>, Option<String>) {
    if rest.first() == Some(&b'"') {
        let Some((old, used)) = unquote(rest) else {
            return (None, None);
        };
        let Some(tail) = rest[used..].strip_prefix(b" ") else {
            return (None, None);
        };
        return (String::from_utf8(old).ok(), read_path(tail));
    }

    if rest.last() == Some(&b'"') {
        for i in 0..rest.len().saturating_sub(1) {
            if rest[i] == b' ' && rest[i + 1] == b'"' {
                if let Some(new) = read_path(&rest[i + 1..]) {
                    return (String::from_utf8(rest[..i].to_vec()).ok(), Some(new));
                }
            }
        }
    }

    let as_string = |b: &[u8]| String::from_utf8(b.to_vec()).ok();
    let spaces = rest.iter().filter(|&&b| b == b' ').count();
    if spaces == 1 {
        if let Some(i) = rest.iter().position(|&b| b == b' ') {
            return (as_string(&rest[..i]), as_string(&rest[i + 1..]));
        }
    }
    if rest.len() % 2 == 1 && rest[rest.len() / 2] == b' ' {
        let mid = rest.len() / 2;
        let (old, new) = (as_string(&rest[..mid]), as_string(&rest[mid + 1..]));
        if let (Some(o), Some(n)) = (&old, &new) {
            if strip_components(o, strip).is_some() && strip_components(o, strip) == strip_components(n, strip) {
                return (old, new);
            }
        }
    }
    (None, None)
}

// ---------------------------------------------------------------------------
// Hunks
// ---------------------------------------------------------------------------

/// Strict form of `@@ -a[,b] +c[,d] @@`.
fn parse_hunk_header(line: &[u8]) -> Option<(i64, i64, i64, i64)> {
    let rest = line.strip_prefix(b"@@ -")?;
    let (old_start, old_lines, rest) = parse_range(rest)?;
    let rest = rest.strip_prefix(b" +")?;
    let (new_start, new_lines, rest) = parse_range(rest)?;
    rest.strip_prefix(b" @@")?;
    Some((old_start, old_lines, new_start, new_lines))
}

fn parse_range(s: &[u8]) -> Option<(i64, i64, &[u8])> {
    let (start, rest) = parse_int(s)?;
    match rest.strip_prefix(b",") {
        Some(rest) => {
            let (count, rest) = parse_int(rest)?;
            Some((start, count, rest))
        }
        None => Some((start, 1, rest)),
    }
}

fn parse_int(s: &[u8]) -> Option<(i64, &[u8])> {
    let len = s.iter().take_while(|b| b.is_ascii_digit()).count();
    if len == 0 {
        return None;
    }
    let value = std::str::from_utf8(&s[..len]).ok()?.parse().ok()?;
    Some((value, &s[len..]))
}

fn parse_hunk(
    text: &Bytes,
    base: usize,
    cursor: &mut Cursor<'_>,
    hunks: &mut Vec<Hunk>,
    lines: &mut Vec<Line>,
) -> DiffResult<()> {
    let header_line = cursor.line_no;
    let Some(range) = cursor.range() else {
        return Ok(());
    };
    let (old_start, old_lines, new_start, new_lines) = parse_hunk_header(&text[range.clone()])
        .ok_or_else(|| DiffError::parse(header_line, "invalid hunk header"))?;
    if range.len() > HUNK_HEADER_MAX {
        return Err(DiffError::header(header_line, "hunk header too long"));
    }
    let header = text.slice(range);
    cursor.advance();

    let line_start = lines.len();
    let (mut old_left, mut new_left) = (old_lines, new_lines);
    let (mut old_no, mut new_no) = (old_start, new_start);

    while old_left > 0 || new_left > 0 {
        let Some(range) = cursor.range() else {
            break;
        };
        let line_no = cursor.line_no;
        let line = &text[range.clone()];
        if !line.ends_with(b"\n") {
            return Err(DiffError::parse(line_no, "hunk line lacks a trailing newline"));
        }
        let (origin, content_start) = match line[0] {
            b'\n' => (LineOrigin::Context, range.start),
            b' ' => (LineOrigin::Context, range.start + 1),
            b'-' => (LineOrigin::Deletion, range.start + 1),
            b'+' => (LineOrigin::Addition, range.start + 1),
            b'\\' if old_left == 0 => {
                push_eof_marker(text, base, range, line_no, lines, line_start)?;
                cursor.advance();
                continue;
            }
            _ => return Err(DiffError::parse(line_no, "invalid hunk line")),
        };

        let (old_lineno, new_lineno) = match origin {
            LineOrigin::Deletion => {
                old_left -= 1;
                old_no += 1;
                (old_no - 1, -1)
            }
            LineOrigin::Addition => {
                new_left -= 1;
                new_no += 1;
                (-1, new_no - 1)
            }
            _ => {
                old_left -= 1;
                new_left -= 1;
                old_no += 1;
                new_no += 1;
                (old_no - 1, new_no - 1)
            }
        };
        if old_left < 0 || new_left < 0 {
            return Err(DiffError::header(line_no, "hunk has more lines than its header declares"));
        }

        lines.push(Line {
            origin,
            old_lineno,
            new_lineno,
            num_lines: 1,
            content: text.slice(content_start..range.end),
            content_offset: (content_start - base) as i64,
        });
        cursor.advance();
    }

    if old_left != 0 || new_left != 0 {
        return Err(DiffError::header(cursor.line_no, "hunk has fewer lines than its header declares"));
    }
    if lines.len() > line_start && cursor.line().is_some_and(|l| l.starts_with(b"\\ ")) {
        if let Some(range) = cursor.range() {
            push_eof_marker(text, base, range, cursor.line_no, lines, line_start)?;
            cursor.advance();
        }
    }

    hunks.push(Hunk {
        old_start,
        old_lines,
        new_start,
        new_lines,
        header,
        line_start,
        line_count: lines.len() - line_start,
    });
    Ok(())
}

/// `\ No newline at end of file`: the previous line loses its newline, which
/// moves into the marker's content.
fn push_eof_marker(
    text: &Bytes,
    base: usize,
    range: Range<usize>,
    line_no: usize,
    lines: &mut Vec<Line>,
    hunk_start: usize,
) -> DiffResult<()> {
    let prev = lines[hunk_start..]
        .last_mut()
        .filter(|l| l.origin.is_content() && l.content.ends_with(b"\n"))
        .ok_or_else(|| DiffError::parse(line_no, "end-of-file marker without a preceding line"))?;
    let trimmed = prev.content.len() - 1;
    prev.content.truncate(trimmed);
    let origin = prev.origin.no_newline_variant();

    let start = range.start - 1;
    lines.push(Line {
        origin,
        old_lineno: -1,
        new_lineno: -1,
        num_lines: 0,
        content: text.slice(start..range.end),
        content_offset: (start - base) as i64,
    });
    Ok(())
}

// ---------------------------------------------------------------------------
// Binary
// ---------------------------------------------------------------------------

fn parse_binary(cursor: &mut Cursor<'_>) -> DiffResult<BinaryPatch> {
    let line_no = cursor.line_no;
    cursor.advance();
    let new = parse_binary_side(cursor)?
        .ok_or_else(|| DiffError::parse(line_no + 1, "binary patch without data"))?;
    let old = parse_binary_side(cursor)?.unwrap_or_default();
    Ok(BinaryPatch {
        contains_data: true,
        old,
        new,
    })
}

fn parse_binary_side(cursor: &mut Cursor<'_>) -> DiffResult<Option<BinaryPatchSide>> {
    let Some((kind, len)) = cursor.line().and_then(binary::parse_block_header) else {
        return Ok(None);
    };
    let header_line = cursor.line_no;
    cursor.advance();

    let mut data = Vec::new();
    while let Some(line) = cursor.line() {
        let line_no = cursor.line_no;
        cursor.advance();
        let line = trim_newline(line);
        if line.is_empty() {
            break;
        }
        binary::decode_line(line, &mut data).map_err(|m| DiffError::header(line_no, m))?;
    }

    let expected = usize::try_from(len)
        .map_err(|_| DiffError::header(header_line, "binary size does not fit in memory"))?;
    binary::inflate(&data, expected).map_err(|m| DiffError::header(header_line, m))?;
    Ok(Some(BinaryPatchSide {
        kind,
        inflated_len: len,
        data: Bytes::from(data),
    }))
}
