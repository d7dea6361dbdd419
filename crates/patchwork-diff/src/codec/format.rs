//! Rendering patches and deltas as text.

use patchwork_types::{FileMode, ObjectId};

use super::binary;
use super::quote::write_quoted;
use crate::config::DiffOptions;
use crate::delta::{Delta, DeltaStatus, FileDescriptor};
use crate::error::DiffResult;
use crate::patch::{BinaryKind, BinaryPatch, Patch};

/// Text layout produced by [`PatchFormatter`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PatchFormat {
    /// Full unified diff.
    #[default]
    Patch,
    /// File headers only.
    PatchHeader,
    /// `:old-mode new-mode old-id new-id status\tpath`.
    Raw,
    /// One path per line.
    NameOnly,
    /// Status letter and path.
    NameStatus,
}

impl PatchFormat {
    /// Formats that can be written from a delta alone.
    pub fn needs_content(&self) -> bool {
        matches!(self, Self::Patch | Self::PatchHeader)
    }
}

/// Writes patches in one [`PatchFormat`].
#[derive(Clone, Copy, Debug)]
pub struct PatchFormatter<'o> {
    format: PatchFormat,
    options: &'o DiffOptions,
}

impl<'o> PatchFormatter<'o> {
    pub fn new(format: PatchFormat, options: &'o DiffOptions) -> Self {
        Self { format, options }
    }

    pub fn format(&self) -> PatchFormat {
        self.format
    }

    /// Append the text of `patch` to `out`.
    pub fn write(&self, patch: &Patch, out: &mut Vec<u8>) -> DiffResult<()> {
        match self.format {
            PatchFormat::Patch => self.write_patch(patch, true, out),
            PatchFormat::PatchHeader => self.write_patch(patch, false, out),
            _ => {
                self.write_delta(patch.delta(), out);
                Ok(())
            }
        }
    }

    /// Append a delta-only rendering. Formats that need hunks print the file
    /// header as if the patch had none.
    pub fn write_delta(&self, delta: &Delta, out: &mut Vec<u8>) {
        match self.format {
            PatchFormat::Raw => self.write_raw(delta, out),
            PatchFormat::NameOnly => write_name_only(delta, out),
            PatchFormat::NameStatus => write_name_status(delta, out),
            PatchFormat::Patch | PatchFormat::PatchHeader => {
                if is_printable(delta) {
                    self.write_file_header(delta, false, false, false, out);
                }
            }
        }
    }

    fn write_patch(&self, patch: &Patch, with_body: bool, out: &mut Vec<u8>) -> DiffResult<()> {
        let delta = patch.delta();
        if !is_printable(delta) {
            return Ok(());
        }
        let parsed = patch.source_text().is_some();
        let binary = patch.binary().filter(|_| delta.is_binary());
        let shows_data = binary.is_some_and(|b| b.contains_data);
        let has_hunks = patch.num_hunks()? > 0;
        self.write_file_header(delta, has_hunks, shows_data, parsed, out);
        if !with_body {
            return Ok(());
        }

        if let Some(binary) = binary {
            if !delta.is_unchanged() || parsed {
                self.write_binary(delta, binary, out);
            }
            return Ok(());
        }
        for index in 0..patch.num_hunks()? {
            out.extend_from_slice(&patch.get_hunk(index)?.header);
            for line in patch.hunk_lines(index)? {
                if line.origin.is_content() {
                    out.push(line.origin.as_char() as u8);
                }
                out.extend_from_slice(&line.content);
            }
        }
        Ok(())
    }

    fn write_file_header(
        &self,
        delta: &Delta,
        has_hunks: bool,
        shows_data: bool,
        parsed: bool,
        out: &mut Vec<u8>,
    ) {
        let (old, new) = (&delta.old, &delta.new);
        let old_path = old.path.as_deref().or(new.path.as_deref()).unwrap_or_default();
        let new_path = new.path.as_deref().or(old.path.as_deref()).unwrap_or_default();
        let unchanged = delta.is_unchanged();

        out.extend_from_slice(b"diff --git ");
        write_quoted(&self.options.old_prefix, old_path, out);
        out.push(b' ');
        write_quoted(&self.options.new_prefix, new_path, out);
        out.push(b'\n');

        if unchanged && old.mode != new.mode {
            write_mode_pair(old.mode, new.mode, out);
        }

        match delta.status {
            DeltaStatus::Renamed | DeltaStatus::Copied => {
                let verb = if delta.status == DeltaStatus::Renamed {
                    "rename"
                } else {
                    "copy"
                };
                out.extend_from_slice(format!("similarity index {}%\n", delta.similarity).as_bytes());
                out.extend_from_slice(format!("{verb} from ").as_bytes());
                write_quoted("", old_path, out);
                out.extend_from_slice(format!("\n{verb} to ").as_bytes());
                write_quoted("", new_path, out);
                out.push(b'\n');
            }
            _ => {}
        }

        if !unchanged {
            self.write_index(delta, shows_data, out);
        }
        if !delta.is_binary() && (!unchanged || (parsed && has_hunks)) {
            out.extend_from_slice(b"--- ");
            self.write_side_path(old, &self.options.old_prefix, out);
            out.extend_from_slice(b"\n+++ ");
            self.write_side_path(new, &self.options.new_prefix, out);
            out.push(b'\n');
        }
    }

    fn write_index(&self, delta: &Delta, shows_data: bool, out: &mut Vec<u8>) {
        let (old, new) = (&delta.old, &delta.new);
        let len = self.id_len(delta, shows_data);
        if old.mode != new.mode {
            if old.mode.is_absent() {
                out.extend_from_slice(format!("new file mode {}\n", new.mode).as_bytes());
            } else if new.mode.is_absent() {
                out.extend_from_slice(format!("deleted file mode {}\n", old.mode).as_bytes());
            } else {
                write_mode_pair(old.mode, new.mode, out);
            }
        }
        out.extend_from_slice(
            format!("index {}..{}", old.id.to_hex_abbrev(len), new.id.to_hex_abbrev(len)).as_bytes(),
        );
        if old.mode == new.mode {
            out.extend_from_slice(format!(" {}", old.mode).as_bytes());
        }
        out.push(b'\n');
    }

    /// Hex digits shown for ids. Sides whose id is only partly known limit
    /// the length to what is known; binary data shows full ids.
    fn id_len(&self, delta: &Delta, shows_data: bool) -> usize {
        let partial = [&delta.old, &delta.new]
            .into_iter()
            .filter(|f| !f.flags.valid_id && f.id_abbrev > 0)
            .map(|f| f.id_abbrev as usize)
            .min();
        match partial {
            Some(len) => len,
            None if shows_data => ObjectId::HEX_LEN,
            None => self.options.abbrev(),
        }
    }

    fn write_side_path(&self, file: &FileDescriptor, prefix: &str, out: &mut Vec<u8>) {
        match file.path.as_deref() {
            Some(path) if !file.id.is_zero() => write_quoted(prefix, path, out),
            _ => out.extend_from_slice(b"/dev/null"),
        }
    }

    fn write_binary(&self, delta: &Delta, binary: &BinaryPatch, out: &mut Vec<u8>) {
        if binary.contains_data {
            out.extend_from_slice(b"GIT binary patch\n");
            binary::write_block(&binary.new, out);
            if binary.old.kind != BinaryKind::None {
                binary::write_block(&binary.old, out);
            }
            return;
        }
        out.extend_from_slice(b"Binary files ");
        self.write_side_path(&delta.old, &self.options.old_prefix, out);
        out.extend_from_slice(b" and ");
        self.write_side_path(&delta.new, &self.options.new_prefix, out);
        out.extend_from_slice(b" differ\n");
    }

    fn write_raw(&self, delta: &Delta, out: &mut Vec<u8>) {
        if delta.status == DeltaStatus::Unmodified {
            return;
        }
        let len = self.id_len(delta, false);
        let mut line = format!(
            ":{:06o} {:06o} {} {} {}",
            delta.old.mode.bits(),
            delta.new.mode.bits(),
            delta.old.id.to_hex_abbrev(len),
            delta.new.id.to_hex_abbrev(len),
            delta.status.status_char()
        );
        if delta.similarity > 0 {
            line.push_str(&format!("{:03}", delta.similarity));
        }
        out.extend_from_slice(line.as_bytes());
        out.push(b'\t');
        write_paths(delta, out);
    }
}

/// Unmodified and ignored entries, and trees, have no text.
fn is_printable(delta: &Delta) -> bool {
    !matches!(delta.status, DeltaStatus::Unmodified | DeltaStatus::Ignored)
        && !delta.old.mode.is_tree()
        && !delta.new.mode.is_tree()
}

fn write_mode_pair(old: FileMode, new: FileMode, out: &mut Vec<u8>) {
    out.extend_from_slice(format!("old mode {old}\nnew mode {new}\n").as_bytes());
}

fn write_name_only(delta: &Delta, out: &mut Vec<u8>) {
    if delta.status == DeltaStatus::Unmodified {
        return;
    }
    write_quoted("", delta.path().unwrap_or_default(), out);
    out.push(b'\n');
}

fn write_name_status(delta: &Delta, out: &mut Vec<u8>) {
    if delta.status == DeltaStatus::Unmodified {
        return;
    }
    out.push(delta.status.status_char() as u8);
    out.push(b'\t');
    write_paths(delta, out);
}

/// `old\tnew` for renames and copies, else the single path.
fn write_paths(delta: &Delta, out: &mut Vec<u8>) {
    match (&delta.old.path, &delta.new.path) {
        (Some(old), Some(new)) if old != new => {
            write_quoted("", old, out);
            out.push(b'\t');
            write_quoted("", new, out);
        }
        _ => write_quoted("", delta.path().unwrap_or_default(), out),
    }
    out.push(b'\n');
}
