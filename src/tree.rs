//! The coverage tree: module, package, class and method aggregation nodes
//! with file nodes that own per-line coverage.
//!
//! Nodes own their children outright and keep no back-references, so a
//! `Clone` is a complete, independent copy of a subtree.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CovdeltaError, Result};
use crate::model::{Coverage, CoverageData, FileCoverage, Metric};

/// What a node aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeKind {
    Module,
    Package,
    File,
    Class,
    Method,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Module => "MODULE",
            NodeKind::Package => "PACKAGE",
            NodeKind::File => "FILE",
            NodeKind::Class => "CLASS",
            NodeKind::Method => "METHOD",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-line data owned by a node of kind [`NodeKind::File`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    path: String,
    #[serde(default)]
    coverage_per_line: BTreeMap<u32, Coverage>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    changed_lines: BTreeSet<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    indirect_changes: BTreeMap<u32, i64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    unexpected_changes: BTreeMap<u32, i64>,
    /// Coverage rate change against the reference file, in percentage points.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    coverage_deltas: BTreeMap<Metric, f64>,
}

impl FileNode {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn coverage_per_line(&self) -> &BTreeMap<u32, Coverage> {
        &self.coverage_per_line
    }

    pub fn set_coverage_per_line(&mut self, coverage: BTreeMap<u32, Coverage>) {
        self.coverage_per_line = coverage;
    }

    pub fn put_coverage(&mut self, line: u32, coverage: Coverage) {
        self.coverage_per_line.insert(line, coverage);
    }

    pub fn line_coverage(&self, line: u32) -> Option<Coverage> {
        self.coverage_per_line.get(&line).copied()
    }

    pub fn changed_lines(&self) -> &BTreeSet<u32> {
        &self.changed_lines
    }

    pub fn add_changed_line(&mut self, line: u32) {
        self.changed_lines.insert(line);
    }

    pub fn has_changed_line(&self, line: u32) -> bool {
        self.changed_lines.contains(&line)
    }

    /// Coverage of every instrumented line that was directly edited.
    pub fn coverage_of_changed_lines(&self) -> Vec<Coverage> {
        self.coverage_per_line
            .iter()
            .filter(|(line, _)| self.changed_lines.contains(line))
            .map(|(_, coverage)| *coverage)
            .collect()
    }

    /// Whether at least one directly edited line is instrumented. Edits that
    /// only touch comments or blank lines do not count.
    pub fn has_coverage_in_changed_lines(&self) -> bool {
        self.coverage_per_line
            .keys()
            .any(|line| self.changed_lines.contains(line))
    }

    pub fn indirect_changes(&self) -> &BTreeMap<u32, i64> {
        &self.indirect_changes
    }

    pub fn put_indirect_change(&mut self, line: u32, delta: i64) {
        self.indirect_changes.insert(line, delta);
    }

    pub fn has_indirect_changes(&self) -> bool {
        !self.indirect_changes.is_empty()
    }

    pub fn unexpected_changes(&self) -> &BTreeMap<u32, i64> {
        &self.unexpected_changes
    }

    pub fn put_unexpected_change(&mut self, line: u32, delta: i64) {
        self.unexpected_changes.insert(line, delta);
    }

    pub fn coverage_deltas(&self) -> &BTreeMap<Metric, f64> {
        &self.coverage_deltas
    }

    pub fn put_coverage_delta(&mut self, metric: Metric, delta: f64) {
        self.coverage_deltas.insert(metric, delta);
    }

    /// LINE and BRANCH totals over the whole file: one binarized count per
    /// line, and the arms of every line that has branches.
    pub fn line_and_branch_totals(&self) -> (Coverage, Coverage) {
        let mut line = Coverage::NO_COVERAGE;
        let mut branch = Coverage::NO_COVERAGE;
        for coverage in self.coverage_per_line.values() {
            line += coverage.binarized();
            if coverage.is_branch() {
                branch += *coverage;
            }
        }
        (line, branch)
    }
}

/// A node of the coverage tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    kind: NodeKind,
    name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<Node>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    leaves: BTreeMap<Metric, Coverage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file: Option<FileNode>,
}

impl Node {
    /// Create an aggregation node. A file node is built by [`Node::file`]
    /// with `name` taken as its source path.
    pub fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        if kind == NodeKind::File {
            return Self::file(FileNode::new(name));
        }
        Self {
            kind,
            name: name.into(),
            children: Vec::new(),
            leaves: BTreeMap::new(),
            file: None,
        }
    }

    /// Create a file node named after the last component of `file.path()`.
    pub fn file(file: FileNode) -> Self {
        let name = file
            .path()
            .rsplit('/')
            .next()
            .unwrap_or(file.path())
            .to_string();
        Self {
            kind: NodeKind::File,
            name,
            children: Vec::new(),
            leaves: BTreeMap::new(),
            file: Some(file),
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The source path for file nodes, the name otherwise.
    pub fn path(&self) -> &str {
        match &self.file {
            Some(file) => file.path(),
            None => &self.name,
        }
    }

    pub fn is_file(&self) -> bool {
        self.file.is_some()
    }

    pub fn as_file(&self) -> Option<&FileNode> {
        self.file.as_ref()
    }

    pub fn as_file_mut(&mut self) -> Option<&mut FileNode> {
        self.file.as_mut()
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn add_child(&mut self, child: Node) {
        self.children.push(child);
    }

    pub fn leaves(&self) -> &BTreeMap<Metric, Coverage> {
        &self.leaves
    }

    /// Add a leaf, summing with any existing leaf of the same metric.
    pub fn add_leaf(&mut self, metric: Metric, coverage: Coverage) {
        *self.leaves.entry(metric).or_default() += coverage;
    }

    /// Remove all children and leaves, keeping the node itself (and, for a
    /// file node, its per-line data).
    pub fn clear(&mut self) {
        self.children.clear();
        self.leaves.clear();
    }

    /// Keep only the children for which `keep` returns true. `keep` may
    /// mutate each child before deciding.
    pub(crate) fn retain_children<F>(&mut self, mut keep: F)
    where
        F: FnMut(&mut Node) -> bool,
    {
        let children = std::mem::take(&mut self.children);
        self.children = children
            .into_iter()
            .filter_map(|mut child| keep(&mut child).then_some(child))
            .collect();
    }

    pub(crate) fn clear_leaves(&mut self) {
        self.leaves.clear();
    }

    /// An independent copy of this subtree.
    #[must_use]
    pub fn copy_tree(&self) -> Node {
        self.clone()
    }

    /// The aggregated value of `metric`: this node's own leaf plus the
    /// values of all children.
    pub fn value(&self, metric: Metric) -> Coverage {
        let own = self.leaves.get(&metric).copied().unwrap_or_default();
        own + self
            .children
            .iter()
            .map(|child| child.value(metric))
            .sum::<Coverage>()
    }

    /// Aggregated values of every metric present in this subtree.
    pub fn values(&self) -> BTreeMap<Metric, Coverage> {
        let mut values = self.leaves.clone();
        for child in &self.children {
            for (metric, coverage) in child.values() {
                *values.entry(metric).or_default() += coverage;
            }
        }
        values
    }

    /// Depth-first search for a node of the given kind and name, starting
    /// with this node.
    pub fn find(&self, kind: NodeKind, name: &str) -> Option<&Node> {
        if self.kind == kind && self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(kind, name))
    }

    /// The file node with the given source path.
    pub fn find_file(&self, path: &str) -> Option<&FileNode> {
        if let Some(file) = &self.file {
            if file.path() == path {
                return Some(file);
            }
        }
        self.children.iter().find_map(|child| child.find_file(path))
    }

    /// All file nodes in this subtree, in depth-first order.
    pub fn all_file_nodes(&self) -> Vec<&FileNode> {
        let mut files = Vec::new();
        collect_files(self, &mut files);
        files
    }

    pub fn all_file_nodes_mut(&mut self) -> Vec<&mut FileNode> {
        let mut files = Vec::new();
        collect_files_mut(self, &mut files);
        files
    }

    /// All nodes of kind FILE in this subtree, in depth-first order.
    pub fn all_file_tree_nodes_mut(&mut self) -> Vec<&mut Node> {
        let mut nodes = Vec::new();
        collect_file_tree_nodes_mut(self, &mut nodes);
        nodes
    }
}

fn collect_files<'a>(node: &'a Node, out: &mut Vec<&'a FileNode>) {
    if let Some(file) = &node.file {
        out.push(file);
    }
    for child in &node.children {
        collect_files(child, out);
    }
}

fn collect_files_mut<'a>(node: &'a mut Node, out: &mut Vec<&'a mut FileNode>) {
    let Node { file, children, .. } = node;
    if let Some(file) = file.as_mut() {
        out.push(file);
    }
    for child in children.iter_mut() {
        collect_files_mut(child, out);
    }
}

fn collect_file_tree_nodes_mut<'a>(node: &'a mut Node, out: &mut Vec<&'a mut Node>) {
    if node.is_file() {
        // File nodes only have class and method children; nothing below
        // them is another file.
        out.push(node);
        return;
    }
    for child in node.children.iter_mut() {
        collect_file_tree_nodes_mut(child, out);
    }
}

/// Per-line coverage of one file: lines with branch arms count the arms,
/// every other line counts as a single hit or miss.
pub fn coverage_per_line(file: &FileCoverage) -> BTreeMap<u32, Coverage> {
    let mut branches: BTreeMap<u32, Coverage> = BTreeMap::new();
    for branch in &file.branches {
        let arm = if branch.hit_count > 0 {
            Coverage::hit()
        } else {
            Coverage::miss()
        };
        *branches.entry(branch.line_number).or_default() += arm;
    }

    let mut result = BTreeMap::new();
    for line in &file.lines {
        let coverage = match branches.get(&line.line_number) {
            Some(arms) => *arms,
            None if line.hit_count > 0 => Coverage::hit(),
            None => Coverage::miss(),
        };
        result.insert(line.line_number, coverage);
    }
    // Some generators only report branch arms for a line.
    for (line_number, arms) in branches {
        result.entry(line_number).or_insert(arms);
    }
    result
}

/// Build a coverage tree from a snapshot: a module root, one package per
/// directory, and a file node per source file carrying LINE and BRANCH
/// leaves.
pub fn build_tree(root_name: &str, data: &CoverageData) -> Result<Node> {
    let mut packages: BTreeMap<&str, Vec<&FileCoverage>> = BTreeMap::new();
    for file in &data.files {
        let zero_line = file.lines.iter().any(|l| l.line_number == 0)
            || file.branches.iter().any(|b| b.line_number == 0);
        if zero_line {
            return Err(CovdeltaError::Parse(format!(
                "source lines must be 1-indexed: '{}'",
                file.path
            )));
        }
        let package = match file.path.rsplit_once('/') {
            Some((dir, _)) => dir,
            None => ".",
        };
        packages.entry(package).or_default().push(file);
    }

    let mut root = Node::new(NodeKind::Module, root_name);
    for (package_name, mut files) in packages {
        files.sort_by(|a, b| a.path.cmp(&b.path));
        let mut package = Node::new(NodeKind::Package, package_name);
        for file in files {
            let mut file_node = FileNode::new(file.path.clone());
            file_node.set_coverage_per_line(coverage_per_line(file));

            let (line, branch) = file_node.line_and_branch_totals();
            let mut node = Node::file(file_node);
            if line.is_set() {
                node.add_leaf(Metric::Line, line);
            }
            if branch.is_set() {
                node.add_leaf(Metric::Branch, branch);
            }
            package.add_child(node);
        }
        root.add_child(package);
    }
    Ok(root)
}
