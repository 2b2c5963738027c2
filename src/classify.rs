//! Change classification: find lines whose coverage changed between the
//! reference build and the current build although their text did not.
//!
//! Two modes exist. The edit-aware mode first remaps the reference file
//! through its edit script and writes *indirect changes*. The simple mode
//! compares both files line by line without remapping and writes
//! *unexpected changes*; it is only sound for files that were not edited.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, info, warn};

use crate::edit::{CodeDelta, FileChanges};
use crate::error::{CovdeltaError, Result};
use crate::model::{Coverage, Metric};
use crate::remap::remap_coverage_per_line;
use crate::tree::{FileNode, Node};
use crate::views::{build_changed_lines_view, build_indirect_changes_view};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierMode {
    EditAware,
    Simple,
}

impl ClassifierMode {
    /// Pick the mode for one file, or `None` when the file cannot be
    /// classified without risking false positives.
    ///
    /// * `edit_script`: the file's edits, if the diff touched it.
    /// * `delta_available`: whether a diff was supplied for the build at all.
    ///   With a diff, a file it does not mention is textually unchanged and
    ///   is remapped through an empty script.
    pub fn select(
        edit_script: Option<&FileChanges>,
        changed_lines: &BTreeSet<u32>,
        delta_available: bool,
    ) -> Option<Self> {
        match (delta_available, edit_script) {
            (true, Some(_)) => Some(Self::EditAware),
            (true, None) if changed_lines.is_empty() => Some(Self::EditAware),
            (false, None) if changed_lines.is_empty() => Some(Self::Simple),
            _ => None,
        }
    }
}

/// Lines of `current` whose covered count differs from `reference` at the
/// same line number. Lines missing from `reference` have no baseline and are
/// skipped, as are lines for which `skip` returns true.
fn covered_deltas<F>(
    current: &BTreeMap<u32, Coverage>,
    reference: &BTreeMap<u32, Coverage>,
    skip: F,
) -> BTreeMap<u32, i64>
where
    F: Fn(u32) -> bool,
{
    current
        .iter()
        .filter(|(line, _)| !skip(**line))
        .filter_map(|(&line, coverage)| {
            let baseline = reference.get(&line)?;
            let delta = i64::from(coverage.covered) - i64::from(baseline.covered);
            (delta != 0).then_some((line, delta))
        })
        .collect()
}

/// Edit-aware comparison against a reference mapping that was already
/// remapped to current line numbers. Directly changed lines are never
/// reported.
pub fn find_indirect_changes(
    current: &FileNode,
    adjusted_reference: &BTreeMap<u32, Coverage>,
) -> BTreeMap<u32, i64> {
    covered_deltas(current.coverage_per_line(), adjusted_reference, |line| {
        current.has_changed_line(line)
    })
}

/// Remap `reference` through `changes` and compare it against `current`.
pub fn classify_file(
    current: &FileNode,
    reference: &FileNode,
    changes: &FileChanges,
) -> Result<BTreeMap<u32, i64>> {
    let adjusted = remap_coverage_per_line(reference.coverage_per_line(), changes)?;
    Ok(find_indirect_changes(current, &adjusted))
}

/// Simple comparison without remapping. Yields nothing for files with
/// changed lines, since their line numbers no longer line up.
pub fn find_unexpected_changes(current: &FileNode, reference: &FileNode) -> BTreeMap<u32, i64> {
    if !current.changed_lines().is_empty() {
        return BTreeMap::new();
    }
    covered_deltas(current.coverage_per_line(), reference.coverage_per_line(), |_| {
        false
    })
}

/// A file whose classification failed. Other files are unaffected.
#[derive(Debug)]
pub struct FileFailure {
    pub path: String,
    pub error: CovdeltaError,
}

/// What happened during one classification pass.
#[derive(Debug, Default)]
pub struct ClassifyOutcome {
    /// Files compared against their reference counterpart.
    pub compared: usize,
    /// Files without a reference counterpart.
    pub missing_reference: usize,
    /// Files with changed lines but no edit script to align them.
    pub unaligned: usize,
    pub failures: Vec<FileFailure>,
}

fn index_by_path(root: &Node) -> HashMap<&str, &FileNode> {
    root.all_file_nodes()
        .into_iter()
        .map(|file| (file.path(), file))
        .collect()
}

/// Classify every file of `root` against `reference`, writing indirect or
/// unexpected changes into the file nodes of `root`.
///
/// `delta` is the diff between both builds. Without one, only the simple
/// mode is available.
pub fn classify_tree(
    root: &mut Node,
    reference: &Node,
    delta: Option<&CodeDelta>,
) -> ClassifyOutcome {
    info!(
        edit_aware = delta.is_some(),
        "Obtaining coverage changes against the reference build"
    );
    let reference_files = index_by_path(reference);
    let no_edits = FileChanges::new();
    let mut outcome = ClassifyOutcome::default();

    for file in root.all_file_nodes_mut() {
        let reference_path = delta.map_or(file.path(), |d| d.reference_path(file.path()));
        let Some(reference_file) = reference_files.get(reference_path).copied() else {
            debug!(path = file.path(), "no reference file, skipping");
            outcome.missing_reference += 1;
            continue;
        };
        if reference_file.coverage_per_line().is_empty() {
            outcome.missing_reference += 1;
            continue;
        }

        let script = delta.and_then(|d| d.changes(file.path()));
        match ClassifierMode::select(script, file.changed_lines(), delta.is_some()) {
            Some(ClassifierMode::EditAware) => {
                match classify_file(file, reference_file, script.unwrap_or(&no_edits)) {
                    Ok(changes) => {
                        for (line, change) in changes {
                            file.put_indirect_change(line, change);
                        }
                        outcome.compared += 1;
                    }
                    Err(error) => {
                        warn!(path = file.path(), %error, "cannot remap reference coverage");
                        outcome.failures.push(FileFailure {
                            path: file.path().to_string(),
                            error,
                        });
                    }
                }
            }
            Some(ClassifierMode::Simple) => {
                for (line, change) in find_unexpected_changes(file, reference_file) {
                    file.put_unexpected_change(line, change);
                }
                outcome.compared += 1;
            }
            None => {
                debug!(path = file.path(), "changed lines without an edit script, skipping");
                outcome.unaligned += 1;
            }
        }
    }

    info!(
        compared = outcome.compared,
        missing_reference = outcome.missing_reference,
        unaligned = outcome.unaligned,
        failed = outcome.failures.len(),
        "Coverage changes obtained"
    );
    outcome
}

/// Mark every current line inside an INSERT or REPLACE edit as changed.
pub fn attach_changed_lines(root: &mut Node, delta: &CodeDelta) {
    for file in root.all_file_nodes_mut() {
        if let Some(changes) = delta.changes(file.path()) {
            for line in changes.changed_lines() {
                file.add_changed_line(line);
            }
        }
    }
}

/// Store, per metric, how many percentage points each file's coverage rate
/// moved against its reference counterpart.
pub fn attach_file_coverage_deltas(
    root: &mut Node,
    reference: &Node,
    old_paths: &HashMap<String, String>,
) {
    let reference_files = index_by_path(reference);
    for file in root.all_file_nodes_mut() {
        let reference_path = old_paths
            .get(file.path())
            .map(String::as_str)
            .unwrap_or(file.path());
        let Some(reference_file) = reference_files.get(reference_path).copied() else {
            continue;
        };

        let (line, branch) = file.line_and_branch_totals();
        let (reference_line, reference_branch) = reference_file.line_and_branch_totals();
        for (metric, current, baseline) in [
            (Metric::Line, line, reference_line),
            (Metric::Branch, branch, reference_branch),
        ] {
            if current.is_set() && baseline.is_set() {
                file.put_coverage_delta(metric, (current.rate() - baseline.rate()) * 100.0);
            }
        }
    }
}

/// One build compared against its reference.
#[derive(Debug)]
pub struct Analysis {
    /// The current tree with changed lines, coverage deltas and classified
    /// changes attached.
    pub tree: Node,
    pub outcome: ClassifyOutcome,
    pub changed_lines_view: Node,
    pub indirect_changes_view: Node,
}

/// Run the whole comparison: attach changed lines and file coverage deltas,
/// classify every file, then derive both views.
pub fn analyze(mut current: Node, reference: &Node, delta: Option<&CodeDelta>) -> Analysis {
    let no_renames = HashMap::new();
    if let Some(delta) = delta {
        attach_changed_lines(&mut current, delta);
    }
    attach_file_coverage_deltas(
        &mut current,
        reference,
        delta.map_or(&no_renames, |d| &d.old_paths),
    );

    let outcome = classify_tree(&mut current, reference, delta);
    let changed_lines_view = build_changed_lines_view(&current);
    let indirect_changes_view = build_indirect_changes_view(&current);
    debug!(
        changed_files = changed_lines_view.all_file_nodes().len(),
        indirect_files = indirect_changes_view.all_file_nodes().len(),
        "Views built"
    );

    Analysis {
        tree: current,
        outcome,
        changed_lines_view,
        indirect_changes_view,
    }
}
