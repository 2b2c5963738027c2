//! Derived trees that only keep the files worth looking at.
//!
//! A view is a pruned copy of the coverage tree: files without anything to
//! report are dropped, aggregation nodes without surviving files are dropped,
//! and the surviving file nodes get new LINE and BRANCH leaves that count only
//! the lines the view is about. Aggregated values of any node then sum over
//! exactly those lines.

use crate::model::{Coverage, Metric};
use crate::tree::{FileNode, Node};

type Predicate = fn(&FileNode) -> bool;
type LeafSynthesizer = fn(&FileNode) -> (Coverage, Coverage);

/// Files whose directly edited lines are instrumented, with leaves counting
/// the coverage of those lines.
pub fn build_changed_lines_view(tree: &Node) -> Node {
    build_view(
        tree,
        FileNode::has_coverage_in_changed_lines,
        changed_lines_leaves,
    )
}

/// Files with indirect coverage changes, with leaves counting how many lines
/// and branch arms gained or lost coverage.
pub fn build_indirect_changes_view(tree: &Node) -> Node {
    build_view(tree, FileNode::has_indirect_changes, indirect_changes_leaves)
}

fn build_view(tree: &Node, keep: Predicate, leaves: LeafSynthesizer) -> Node {
    let mut view = tree.copy_tree();
    if !prune(&mut view, keep) {
        view.clear();
        return view;
    }

    for node in view.all_file_tree_nodes_mut() {
        let Some(file) = node.as_file() else {
            continue;
        };
        let (line, branch) = leaves(file);
        if line.is_set() {
            node.add_leaf(Metric::Line, line);
        }
        if branch.is_set() {
            node.add_leaf(Metric::Branch, branch);
        }
    }
    view
}

/// Returns whether `node` survives. File nodes lose their children and
/// leaves either way.
fn prune(node: &mut Node, keep: Predicate) -> bool {
    if let Some(file) = node.as_file() {
        let survives = keep(file);
        node.clear();
        return survives;
    }
    node.clear_leaves();
    node.retain_children(|child| prune(child, keep));
    node.has_children()
}

fn changed_lines_leaves(file: &FileNode) -> (Coverage, Coverage) {
    let mut line = Coverage::NO_COVERAGE;
    let mut branch = Coverage::NO_COVERAGE;
    for coverage in file.coverage_of_changed_lines() {
        if coverage.is_branch() {
            branch += coverage;
            line += coverage.binarized();
        } else {
            line += coverage;
        }
    }
    (line, branch)
}

fn indirect_changes_leaves(file: &FileNode) -> (Coverage, Coverage) {
    let mut line = Coverage::NO_COVERAGE;
    let mut branch = Coverage::NO_COVERAGE;
    for (&number, &delta) in file.indirect_changes() {
        let Some(coverage) = file.line_coverage(number) else {
            continue;
        };
        let arms = u32::try_from(delta.unsigned_abs()).unwrap_or(u32::MAX);
        if delta > 0 {
            // the line went from not covered to covered
            if delta == i64::from(coverage.covered) {
                line += Coverage::hit();
            }
            if coverage.is_branch() {
                branch += Coverage::new(arms, 0);
            }
        } else if delta < 0 {
            if coverage.covered == 0 {
                line += Coverage::miss();
            }
            if coverage.is_branch() {
                branch += Coverage::new(0, arms);
            }
        }
    }
    (line, branch)
}
