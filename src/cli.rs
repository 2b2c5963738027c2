//! Command handler functions for the covdelta CLI.
//!
//! Each `cmd_*` function returns its output as a `String`, making them easy
//! to test without capturing stdout.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::ValueEnum;
use serde::Serialize;

use crate::classify::{analyze, Analysis};
use crate::edit::CodeDelta;
use crate::ingest;
use crate::model::{Coverage, Metric};
use crate::tree::{FileNode, Node};

/// Output style for the `classify` command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Style {
    Json,
    Text,
}

/// Which derived tree the `view` command prints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewKind {
    /// Files whose edited lines are instrumented.
    Changed,
    /// Files with indirect coverage changes.
    Indirect,
}

/// The two builds being compared.
pub struct Builds<'a> {
    pub current: &'a Path,
    pub reference: &'a Path,
    /// Name of the module node at the root of both trees.
    pub root: &'a str,
}

fn run_analysis(builds: &Builds<'_>, delta: Option<&CodeDelta>) -> Result<Analysis> {
    let current = ingest::load_tree(builds.current, builds.root)
        .with_context(|| format!("Failed to load {}", builds.current.display()))?;
    let reference = ingest::load_tree(builds.reference, builds.root)
        .with_context(|| format!("Failed to load {}", builds.reference.display()))?;
    Ok(analyze(current, &reference, delta))
}

fn to_json<T: Serialize>(value: &T, pretty: bool) -> Result<String> {
    let mut out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    out.push('\n');
    Ok(out)
}

#[derive(Serialize)]
struct FileReport<'a> {
    path: &'a str,
    changed_lines: &'a BTreeSet<u32>,
    indirect_changes: &'a BTreeMap<u32, i64>,
    unexpected_changes: &'a BTreeMap<u32, i64>,
    coverage_deltas: &'a BTreeMap<Metric, f64>,
}

impl<'a> FileReport<'a> {
    fn from_file(file: &'a FileNode) -> Option<Self> {
        let moved = file.coverage_deltas().values().any(|d| *d != 0.0);
        let interesting = !file.changed_lines().is_empty()
            || file.has_indirect_changes()
            || !file.unexpected_changes().is_empty()
            || moved;
        interesting.then(|| FileReport {
            path: file.path(),
            changed_lines: file.changed_lines(),
            indirect_changes: file.indirect_changes(),
            unexpected_changes: file.unexpected_changes(),
            coverage_deltas: file.coverage_deltas(),
        })
    }
}

#[derive(Serialize)]
struct FailureReport<'a> {
    path: &'a str,
    error: String,
}

#[derive(Serialize)]
struct ClassifyReport<'a> {
    generated_at: String,
    compared: usize,
    missing_reference: usize,
    unaligned: usize,
    files: Vec<FileReport<'a>>,
    failures: Vec<FailureReport<'a>>,
}

pub fn cmd_classify(
    builds: &Builds<'_>,
    delta: Option<&CodeDelta>,
    style: Style,
    pretty: bool,
) -> Result<String> {
    let analysis = run_analysis(builds, delta)?;
    let outcome = &analysis.outcome;
    let report = ClassifyReport {
        generated_at: Utc::now().to_rfc3339(),
        compared: outcome.compared,
        missing_reference: outcome.missing_reference,
        unaligned: outcome.unaligned,
        files: analysis
            .tree
            .all_file_nodes()
            .into_iter()
            .filter_map(FileReport::from_file)
            .collect(),
        failures: outcome
            .failures
            .iter()
            .map(|f| FailureReport {
                path: &f.path,
                error: f.error.to_string(),
            })
            .collect(),
    };

    match style {
        Style::Json => to_json(&report, pretty),
        Style::Text => format_classify_text(&report),
    }
}

fn format_changes(changes: &BTreeMap<u32, i64>) -> String {
    changes
        .iter()
        .map(|(line, delta)| format!("{line}:{delta:+}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_classify_text(report: &ClassifyReport<'_>) -> Result<String> {
    let mut out = String::new();
    writeln!(
        out,
        "Compared {} files ({} without reference, {} unaligned)",
        report.compared, report.missing_reference, report.unaligned
    )?;

    let flagged: Vec<&FileReport<'_>> = report
        .files
        .iter()
        .filter(|f| !f.indirect_changes.is_empty() || !f.unexpected_changes.is_empty())
        .collect();
    if flagged.is_empty() {
        writeln!(out, "No indirect coverage changes.")?;
    } else {
        writeln!(out, "{:<50} {:>8} {:>8}  LINES", "FILE", "CHANGED", "LINE Δ")?;
        writeln!(out, "{}", "-".repeat(88))?;
        for file in flagged {
            let line_delta = file
                .coverage_deltas
                .get(&Metric::Line)
                .map(|d| format!("{d:+.1}%"))
                .unwrap_or_else(|| "-".to_string());
            let lines = if file.indirect_changes.is_empty() {
                format!("{} (unexpected)", format_changes(file.unexpected_changes))
            } else {
                format_changes(file.indirect_changes)
            };
            writeln!(
                out,
                "{:<50} {:>8} {:>8}  {}",
                file.path,
                file.changed_lines.len(),
                line_delta,
                lines
            )?;
        }
    }

    for failure in &report.failures {
        writeln!(out, "Failed: {}: {}", failure.path, failure.error)?;
    }
    Ok(out)
}

#[derive(Serialize)]
struct ViewReport<'a> {
    generated_at: String,
    view: ViewKind,
    totals: BTreeMap<Metric, Coverage>,
    tree: &'a Node,
}

pub fn cmd_view(
    builds: &Builds<'_>,
    delta: Option<&CodeDelta>,
    view: ViewKind,
    pretty: bool,
) -> Result<String> {
    let analysis = run_analysis(builds, delta)?;
    let tree = match view {
        ViewKind::Changed => &analysis.changed_lines_view,
        ViewKind::Indirect => &analysis.indirect_changes_view,
    };
    let report = ViewReport {
        generated_at: Utc::now().to_rfc3339(),
        view,
        totals: tree.values(),
        tree,
    };
    to_json(&report, pretty)
}
