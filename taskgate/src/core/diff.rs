//! Line-oriented diff used for previews and change statistics.
//!
//! The walk is a greedy single-lookahead heuristic, not LCS/Myers: at each
//! mismatch it peeks one line ahead in each sequence to decide between a pure
//! removal, a pure addition, or a paired modification. It is good enough for
//! display and line counts but is not guaranteed to be minimal (a block moved
//! by two or more lines shows up as modifications).
//!
//! Lines are split on `\n` only. A trailing `\r` stays part of the line, so
//! converting line endings shows up as modified lines.

use std::path::PathBuf;

use crate::core::types::{FileDiff, LineChanges};

/// One entry of a computed diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffLine<'a> {
    Context(&'a str),
    Added(&'a str),
    Removed(&'a str),
}

impl DiffLine<'_> {
    fn prefix(&self) -> char {
        match self {
            DiffLine::Context(_) => ' ',
            DiffLine::Added(_) => '+',
            DiffLine::Removed(_) => '-',
        }
    }

    fn text(&self) -> &str {
        match self {
            DiffLine::Context(text) | DiffLine::Added(text) | DiffLine::Removed(text) => text,
        }
    }
}

/// Compute the diff between `old_content` and `new_content` for `file_path`.
///
/// Empty content has zero lines, so a new file diffs as pure additions.
pub fn diff(old_content: &str, new_content: &str, file_path: impl Into<PathBuf>) -> FileDiff {
    let old: Vec<&str> = old_content.split_terminator('\n').collect();
    let new: Vec<&str> = new_content.split_terminator('\n').collect();
    let (lines, line_changes) = diff_lines(&old, &new);

    FileDiff {
        file_path: file_path.into(),
        old_content: old_content.to_string(),
        new_content: new_content.to_string(),
        unified_diff_text: render(&lines),
        line_changes,
    }
}

/// Walk both line sequences and classify every line.
pub fn diff_lines<'a>(old: &[&'a str], new: &[&'a str]) -> (Vec<DiffLine<'a>>, LineChanges) {
    let mut lines = Vec::with_capacity(old.len().max(new.len()));
    let mut changes = LineChanges::default();
    let (mut i, mut j) = (0, 0);

    while i < old.len() && j < new.len() {
        if old[i] == new[j] {
            lines.push(DiffLine::Context(old[i]));
            i += 1;
            j += 1;
        } else if old.get(i + 1) == Some(&new[j]) {
            lines.push(DiffLine::Removed(old[i]));
            changes.removed += 1;
            i += 1;
        } else if new.get(j + 1) == Some(&old[i]) {
            lines.push(DiffLine::Added(new[j]));
            changes.added += 1;
            j += 1;
        } else {
            lines.push(DiffLine::Removed(old[i]));
            lines.push(DiffLine::Added(new[j]));
            changes.modified += 1;
            i += 1;
            j += 1;
        }
    }

    for &line in &old[i..] {
        lines.push(DiffLine::Removed(line));
        changes.removed += 1;
    }
    for &line in &new[j..] {
        lines.push(DiffLine::Added(line));
        changes.added += 1;
    }

    (lines, changes)
}

fn render(lines: &[DiffLine<'_>]) -> String {
    let mut buf = String::new();
    for line in lines {
        buf.push(line.prefix());
        buf.push_str(line.text());
        buf.push('\n');
    }
    buf
}
