//! Diffstat: per-file insertion and deletion counts over a set of patches.

use patchwork_types::FileMode;
use serde::{Deserialize, Serialize};

use crate::delta::DeltaStatus;
use crate::error::DiffResult;
use crate::patch::Patch;

/// Narrowest bar the scaled full format draws.
pub const MIN_SCALE: usize = 7;

/// Layout produced by [`StatsAggregator::render`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatsFormat {
    /// One line per file with a `+`/`-` bar, then the summary line.
    Full,
    /// `insertions\tdeletions\tpath` per file.
    Number,
    /// Only the summary line.
    Shortstat,
}

/// Sums over every recorded file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffTotals {
    pub files_changed: usize,
    pub insertions: usize,
    pub deletions: usize,
}

#[derive(Clone, Debug)]
struct FileStat {
    old_path: Option<String>,
    new_path: Option<String>,
    old_mode: FileMode,
    new_mode: FileMode,
    old_size: u64,
    new_size: u64,
    binary: bool,
    insertions: usize,
    deletions: usize,
}

impl FileStat {
    /// `(old, new)` when the paths differ.
    fn rename(&self) -> Option<(&str, &str)> {
        match (&self.old_path, &self.new_path) {
            (Some(old), Some(new)) if old != new => Some((old, new)),
            _ => None,
        }
    }

    fn path(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or_default()
    }

    /// Width this entry claims in the name column.
    fn name_len(&self) -> usize {
        match self.rename() {
            Some((old, new)) => old.len() + new.len(),
            None => self.path().len(),
        }
    }

    fn changes(&self) -> usize {
        self.insertions + self.deletions
    }
}

/// Collects line statistics from patches and renders them.
#[derive(Clone, Debug, Default)]
pub struct StatsAggregator {
    files: Vec<FileStat>,
    totals: DiffTotals,
    renames: usize,
    max_name: usize,
    max_changes: usize,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one patch. Unmodified patches are ignored; binary patches
    /// count as a changed file without lines.
    pub fn add(&mut self, patch: &Patch) -> DiffResult<()> {
        let delta = patch.delta();
        if delta.status == DeltaStatus::Unmodified {
            return Ok(());
        }
        let binary = delta.is_binary();
        let (insertions, deletions) = if binary {
            (0, 0)
        } else {
            let stats = patch.line_stats()?;
            (stats.additions, stats.deletions)
        };
        let file = FileStat {
            old_path: delta.old.path.clone(),
            new_path: delta.new.path.clone(),
            old_mode: delta.old.mode,
            new_mode: delta.new.mode,
            old_size: delta.old.size,
            new_size: delta.new.size,
            binary,
            insertions,
            deletions,
        };

        self.totals.files_changed += 1;
        self.totals.insertions += insertions;
        self.totals.deletions += deletions;
        if file.rename().is_some() {
            self.renames += 1;
        }
        self.max_name = self.max_name.max(file.name_len());
        self.max_changes = self.max_changes.max(file.changes());
        self.files.push(file);
        Ok(())
    }

    pub fn totals(&self) -> DiffTotals {
        self.totals
    }

    /// Files recorded with differing old and new paths.
    pub fn renames(&self) -> usize {
        self.renames
    }

    pub fn render(&self, format: StatsFormat, include_summary: bool) -> String {
        self.render_width(format, include_summary, 0)
    }

    /// Render with the full format's bars scaled to fit `width` columns.
    /// A width of 0 draws one character per changed line.
    pub fn render_width(&self, format: StatsFormat, include_summary: bool, width: usize) -> String {
        let mut out = String::new();
        match format {
            StatsFormat::Number => {
                for file in &self.files {
                    self.write_number(file, &mut out);
                }
            }
            StatsFormat::Full => {
                let scale = self.bar_scale(width);
                for file in &self.files {
                    self.write_full(file, scale, &mut out);
                }
                self.write_totals(&mut out);
            }
            StatsFormat::Shortstat => self.write_totals(&mut out),
        }
        if include_summary {
            for file in &self.files {
                write_mode_summary(file, &mut out);
            }
        }
        out
    }

    fn digits(&self) -> usize {
        self.max_changes.to_string().len()
    }

    /// Columns left for bars, or 0 when no scaling is needed.
    fn bar_scale(&self, width: usize) -> usize {
        if width == 0 {
            return 0;
        }
        let fixed = self.max_name + self.digits() + 5;
        let mut scale = if width > fixed { width - fixed } else { width };
        scale = scale.max(MIN_SCALE);
        if scale > self.max_changes {
            0
        } else {
            scale
        }
    }

    fn write_full(&self, file: &FileStat, scale: usize, out: &mut String) {
        let padding = self.max_name - file.name_len();
        match file.rename() {
            Some((old, new)) => {
                let common = common_dir_len(old, new);
                if common > 0 {
                    out.push_str(&format!(" {}{{{} => {}}}", &old[..common], &old[common..], &new[common..]));
                } else {
                    out.push_str(&format!(" {old} => {new}"));
                }
            }
            None => {
                out.push_str(&format!(" {}", file.path()));
            }
        }
        out.extend(std::iter::repeat(' ').take(padding));
        out.push_str(" | ");

        if file.binary {
            out.push_str(&format!("Bin {} -> {} bytes", file.old_size, file.new_size));
        } else {
            out.push_str(&format!("{:>width$}", file.changes(), width = self.digits()));
            if file.changes() > 0 {
                out.push(' ');
                let (plus, minus) = if scale == 0 {
                    (file.insertions, file.deletions)
                } else {
                    scaled_bar(file, scale, self.max_changes)
                };
                out.extend(std::iter::repeat('+').take(plus));
                out.extend(std::iter::repeat('-').take(minus));
            }
        }
        out.push('\n');
    }

    fn write_number(&self, file: &FileStat, out: &mut String) {
        if file.binary {
            out.push_str("-\t-\t");
        } else {
            out.push_str(&format!("{}\t{}\t", file.insertions, file.deletions));
        }
        match file.rename() {
            Some((old, new)) => {
                out.push_str(&format!("{old} => {new}\n"));
            }
            None => {
                out.push_str(&format!("{}\n", file.path()));
            }
        }
    }

    fn write_totals(&self, out: &mut String) {
        let t = &self.totals;
        out.push_str(&format!(" {} file{} changed", t.files_changed, plural(t.files_changed)));
        if t.insertions > 0 || t.deletions == 0 {
            out.push_str(&format!(", {} insertion{}(+)", t.insertions, plural(t.insertions)));
        }
        if t.deletions > 0 || t.insertions == 0 {
            out.push_str(&format!(", {} deletion{}(-)", t.deletions, plural(t.deletions)));
        }
        out.push('\n');
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

/// Bar lengths for a file scaled against the largest change. Each non-zero
/// side keeps at least one character.
fn scaled_bar(file: &FileStat, scale: usize, max_changes: usize) -> (usize, usize) {
    let total = file.changes();
    let full = (total * scale + max_changes / 2) / max_changes;
    let plus = full * file.insertions / total;
    let minus = full - plus;
    let plus = if file.insertions > 0 { plus.max(1) } else { 0 };
    let minus = if file.deletions > 0 { minus.max(1) } else { 0 };
    (plus, minus)
}

/// Length of the directory prefix two paths share, including its slash.
fn common_dir_len(a: &str, b: &str) -> usize {
    let mut last_slash = 0;
    for (i, (x, y)) in a.bytes().zip(b.bytes()).enumerate() {
        if x != y {
            break;
        }
        if x == b'/' {
            last_slash = i + 1;
        }
    }
    last_slash
}

fn write_mode_summary(file: &FileStat, out: &mut String) {
    if file.old_mode == file.new_mode {
        return;
    }
    let line = if file.old_mode.is_absent() {
        format!(" create mode {:06o} {}\n", file.new_mode.bits(), file.path())
    } else if file.new_mode.is_absent() {
        format!(
            " delete mode {:06o} {}\n",
            file.old_mode.bits(),
            file.old_path.as_deref().unwrap_or_default()
        )
    } else {
        format!(
            " mode change {:06o} => {:06o} {}\n",
            file.old_mode.bits(),
            file.new_mode.bits(),
            file.path()
        )
    };
    out.push_str(&line);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiffOptions;
    use crate::codec::parse_patch;

    fn buffers(path: &str, old: Option<&str>, new: Option<&str>) -> Patch {
        Patch::from_buffers(
            old.map(str::as_bytes),
            Some(path),
            new.map(str::as_bytes),
            Some(path),
            &DiffOptions::default(),
        )
        .unwrap()
    }

    fn aggregate(patches: &[Patch]) -> StatsAggregator {
        let mut stats = StatsAggregator::new();
        for p in patches {
            stats.add(p).unwrap();
        }
        stats
    }

    #[test]
    fn totals_sum_line_stats() {
        let stats = aggregate(&[
            buffers("a.txt", Some("1\n2\n"), Some("1\nTWO\n")),
            buffers("b.txt", None, Some("x\ny\n")),
        ]);
        assert_eq!(
            stats.totals(),
            DiffTotals {
                files_changed: 2,
                insertions: 3,
                deletions: 1
            }
        );
    }

    #[test]
    fn full_format() {
        let stats = aggregate(&[
            buffers("a.txt", Some("1\n2\n"), Some("1\nTWO\n")),
            buffers("long_name.txt", None, Some("x\ny\n")),
        ]);
        assert_eq!(
            stats.render(StatsFormat::Full, false),
            " a.txt         | 2 +-\n \
             long_name.txt | 2 ++\n \
             2 files changed, 3 insertions(+), 1 deletion(-)\n"
        );
    }

    #[test]
    fn number_format_has_no_summary_line() {
        let stats = aggregate(&[
            buffers("a.txt", Some("1\n"), Some("2\n")),
            buffers("img", Some("\0a"), Some("\0b")),
        ]);
        assert_eq!(stats.render(StatsFormat::Number, false), "1\t1\ta.txt\n-\t-\timg\n");
    }

    #[test]
    fn binary_in_full_format() {
        let stats = aggregate(&[buffers("img", Some("\0abc"), Some("\0abcde"))]);
        assert_eq!(
            stats.render(StatsFormat::Full, false),
            " img | Bin 4 -> 6 bytes\n 1 file changed, 0 insertions(+), 0 deletions(-)\n"
        );
    }

    #[test]
    fn shortstat_wording() {
        let one = aggregate(&[buffers("a", Some("x\n"), Some("y\n"))]);
        assert_eq!(
            one.render(StatsFormat::Shortstat, false),
            " 1 file changed, 1 insertion(+), 1 deletion(-)\n"
        );
        let adds = aggregate(&[buffers("a", None, Some("x\ny\n"))]);
        assert_eq!(
            adds.render(StatsFormat::Shortstat, false),
            " 1 file changed, 2 insertions(+)\n"
        );
        let dels = aggregate(&[buffers("a", Some("x\n"), None)]);
        assert_eq!(
            dels.render(StatsFormat::Shortstat, false),
            " 1 file changed, 1 deletion(-)\n"
        );
    }

    #[test]
    fn mode_summary_lines() {
        let stats = aggregate(&[
            buffers("new.txt", None, Some("x\n")),
            buffers("old.txt", Some("x\n"), None),
            parse_patch("diff --git a/run.sh b/run.sh\nold mode 100644\nnew mode 100755\n").unwrap(),
        ]);
        let text = stats.render(StatsFormat::Shortstat, true);
        assert_eq!(
            text,
            " 3 files changed, 1 insertion(+), 1 deletion(-)\n \
             create mode 100644 new.txt\n \
             delete mode 100644 old.txt\n \
             mode change 100644 => 100755 run.sh\n"
        );
    }

    #[test]
    fn renames_use_common_directory() {
        let text = "\
diff --git a/src/old.rs b/src/new.rs
similarity index 90%
rename from src/old.rs
rename to src/new.rs
index 1234567..89abcde 100644
--- a/src/old.rs
+++ b/src/new.rs
@@ -1 +1 @@
-a
+b
";
        let stats = aggregate(&[parse_patch(text).unwrap()]);
        assert_eq!(stats.renames(), 1);
        let full = stats.render(StatsFormat::Full, false);
        assert!(full.starts_with(" src/{old.rs => new.rs} | 2 +-\n"), "{full}");
        let number = stats.render(StatsFormat::Number, false);
        assert_eq!(number, "1\t1\tsrc/old.rs => src/new.rs\n");
    }

    #[test]
    fn scaled_bars() {
        let big_old: String = (0..100).map(|i| format!("{i}\n")).collect();
        let stats = aggregate(&[
            buffers("big", None, Some(&big_old)),
            buffers("small", Some("a\n"), Some("b\n")),
        ]);
        let text = stats.render_width(StatsFormat::Full, false, 30);
        let lines: Vec<&str> = text.lines().collect();
        // 30 columns minus name (5), digits (3) and separators (5).
        assert!(lines[0].ends_with(&format!("| 100 {}", "+".repeat(17))), "{text}");
        assert!(lines[1].ends_with("|   2 +-"), "{text}");
        // Narrow terminals still get the minimum scale.
        let narrow = stats.render_width(StatsFormat::Full, false, 5);
        assert!(narrow.lines().next().unwrap_or_default().ends_with(&"+".repeat(MIN_SCALE)));
    }

    #[test]
    fn unmodified_is_ignored() {
        let stats = aggregate(&[buffers("same", Some("x\n"), Some("x\n"))]);
        assert_eq!(stats.totals(), DiffTotals::default());
    }

    #[test]
    fn common_dir() {
        assert_eq!(common_dir_len("src/a.rs", "src/b.rs"), 4);
        assert_eq!(common_dir_len("a/b/c", "a/b/d"), 4);
        assert_eq!(common_dir_len("x", "y"), 0);
        assert_eq!(common_dir_len("srcx/a", "srcy/a"), 0);
    }
}
