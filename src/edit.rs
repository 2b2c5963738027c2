//! Edit scripts: how a reference file became the current file.
//!
//! An edit script is produced by a diff collaborator (see [`crate::diff`])
//! and consumed by the line remapper and the changed-line attachment.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::error::{CovdeltaError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EditKind {
    Insert,
    Delete,
    Replace,
}

impl EditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditKind::Insert => "INSERT",
            EditKind::Delete => "DELETE",
            EditKind::Replace => "REPLACE",
        }
    }
}

impl fmt::Display for EditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single line-range edit.
///
/// The `new_*` range is in current-revision line numbers, the `old_*` range in
/// reference-revision line numbers. For an INSERT the old range names the
/// reference line after which the new lines appear (0 for the top of the
/// file); for a DELETE the new range names the current line after which the
/// removed lines used to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edit {
    pub kind: EditKind,
    pub new_start: u32,
    pub new_end: u32,
    pub old_start: u32,
    pub old_end: u32,
}

impl Edit {
    /// New lines `new` inserted after reference line `after`.
    pub fn insert(after: u32, new: RangeInclusive<u32>) -> Self {
        Self {
            kind: EditKind::Insert,
            new_start: *new.start(),
            new_end: *new.end(),
            old_start: after,
            old_end: after,
        }
    }

    /// Reference lines `old` removed; they used to follow current line `after`.
    pub fn delete(old: RangeInclusive<u32>, after: u32) -> Self {
        Self {
            kind: EditKind::Delete,
            new_start: after,
            new_end: after,
            old_start: *old.start(),
            old_end: *old.end(),
        }
    }

    /// Reference lines `old` replaced by current lines `new`.
    pub fn replace(old: RangeInclusive<u32>, new: RangeInclusive<u32>) -> Self {
        Self {
            kind: EditKind::Replace,
            new_start: *new.start(),
            new_end: *new.end(),
            old_start: *old.start(),
            old_end: *old.end(),
        }
    }

    /// Number of current lines this edit introduces (zero for a DELETE).
    #[must_use]
    pub fn inserted_lines(&self) -> u32 {
        match self.kind {
            EditKind::Delete => 0,
            EditKind::Insert | EditKind::Replace => self.new_end - self.new_start + 1,
        }
    }

    /// Number of reference lines this edit removes (zero for an INSERT).
    #[must_use]
    pub fn removed_lines(&self) -> u32 {
        match self.kind {
            EditKind::Insert => 0,
            EditKind::Delete | EditKind::Replace => self.old_end - self.old_start + 1,
        }
    }

    /// Current lines directly touched by this edit.
    pub fn new_lines(&self) -> RangeInclusive<u32> {
        match self.kind {
            // An empty range: deletions leave no current line behind.
            EditKind::Delete => 1..=0,
            EditKind::Insert | EditKind::Replace => self.new_start..=self.new_end,
        }
    }

    fn check(&self) -> Result<()> {
        let invalid = |reason| {
            Err(CovdeltaError::InvalidEdit {
                edit: *self,
                reason,
            })
        };
        if self.new_start > self.new_end {
            return invalid("new range is inverted");
        }
        if self.old_start > self.old_end {
            return invalid("old range is inverted");
        }
        match self.kind {
            EditKind::Insert => {
                if self.new_start == 0 {
                    return invalid("inserted lines are 1-indexed");
                }
                if self.old_start != self.old_end {
                    return invalid("an insertion anchors on a single reference line");
                }
            }
            EditKind::Delete => {
                if self.old_start == 0 {
                    return invalid("deleted lines are 1-indexed");
                }
            }
            EditKind::Replace => {
                if self.old_start == 0 || self.new_start == 0 {
                    return invalid("replaced lines are 1-indexed");
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Edit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} old {}-{} new {}-{}",
            self.kind, self.old_start, self.old_end, self.new_start, self.new_end
        )
    }
}

/// The edit script of one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileChanges {
    edits: Vec<Edit>,
}

impl FileChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, edit: Edit) {
        self.edits.push(edit);
    }

    pub fn edits(&self) -> &[Edit] {
        &self.edits
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// All edits of one kind, ordered by their reference position.
    pub fn by_kind(&self, kind: EditKind) -> Vec<&Edit> {
        let mut edits: Vec<&Edit> = self.edits.iter().filter(|e| e.kind == kind).collect();
        edits.sort_by_key(|e| (e.old_start, e.old_end));
        edits
    }

    /// Current lines inside INSERT and REPLACE ranges.
    pub fn changed_lines(&self) -> BTreeSet<u32> {
        self.edits.iter().flat_map(Edit::new_lines).collect()
    }

    /// Reject scripts the remapper cannot apply without misaligning lines:
    /// inverted or zero-based ranges, and overlapping edits of one kind.
    pub fn validate(&self) -> Result<()> {
        for edit in &self.edits {
            edit.check()?;
        }
        for kind in [EditKind::Delete, EditKind::Insert, EditKind::Replace] {
            let edits = self.by_kind(kind);
            for pair in edits.windows(2) {
                if pair[0].old_end >= pair[1].old_start {
                    return Err(CovdeltaError::OverlappingEdits {
                        kind,
                        first: *pair[0],
                        second: *pair[1],
                    });
                }
            }
        }
        Ok(())
    }
}

impl FromIterator<Edit> for FileChanges {
    fn from_iter<I: IntoIterator<Item = Edit>>(iter: I) -> Self {
        Self {
            edits: iter.into_iter().collect(),
        }
    }
}

/// Everything a diff collaborator knows about the change between two builds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeDelta {
    /// Edit scripts keyed by current path.
    pub files: HashMap<String, FileChanges>,
    /// Reference path of each renamed file, keyed by current path.
    pub old_paths: HashMap<String, String>,
}

impl CodeDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.old_paths.is_empty()
    }

    /// The path a current file had in the reference build.
    pub fn reference_path<'a>(&'a self, current_path: &'a str) -> &'a str {
        self.old_paths
            .get(current_path)
            .map(String::as_str)
            .unwrap_or(current_path)
    }

    pub fn changes(&self, current_path: &str) -> Option<&FileChanges> {
        self.files.get(current_path)
    }
}
