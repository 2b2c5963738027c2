mod common;

use covdelta::classify::analyze;
use covdelta::diff::parse_diff;
use covdelta::model::{Coverage, Metric};
use covdelta::tree::{Node, NodeKind};

fn indirect(tree: &Node, path: &str) -> Vec<(u32, i64)> {
    tree.find_file(path)
        .unwrap()
        .indirect_changes()
        .iter()
        .map(|(&line, &delta)| (line, delta))
        .collect()
}

/// Every aggregation node's value equals the sum over its file nodes' leaves.
fn assert_aggregates_files(node: &Node) {
    for metric in [Metric::Line, Metric::Branch] {
        let mut files = Vec::new();
        collect_file_leaves(node, metric, &mut files);
        let sum: Coverage = files.into_iter().sum();
        assert_eq!(node.value(metric), sum, "{} {metric}", node.name());
    }
    for child in node.children() {
        assert_aggregates_files(child);
    }
}

fn collect_file_leaves(node: &Node, metric: Metric, out: &mut Vec<Coverage>) {
    if node.is_file() {
        out.push(node.leaves().get(&metric).copied().unwrap_or_default());
        return;
    }
    for child in node.children() {
        collect_file_leaves(child, metric, out);
    }
}

/// End-to-end: diff fixture, two snapshots, full analysis.
#[test]
fn modified_file_end_to_end() {
    let reference = common::snapshot(&[
        (
            "src/main.rs",
            &[(2, 1), (9, 1), (10, 1), (11, 1), (13, 1), (20, 0), (31, 1), (32, 1)],
        ),
        ("src/lib.rs", &[(1, 1), (2, 0)]),
    ]);
    let current = common::snapshot(&[
        (
            "src/main.rs",
            &[
                (2, 1),
                (9, 1),
                (10, 1),
                (11, 1),
                (12, 0),
                (14, 1),
                (15, 1),
                (22, 1),
                (33, 0),
            ],
        ),
        ("src/lib.rs", &[(1, 1), (2, 0)]),
        ("src/added.rs", &[(1, 1)]),
    ]);
    let delta = parse_diff(include_str!("fixtures/diffs/modified_file.diff")).unwrap();

    let analysis = analyze(
        common::tree(&current),
        &common::tree(&reference),
        Some(&delta),
    );

    assert_eq!(analysis.outcome.compared, 2);
    assert_eq!(analysis.outcome.missing_reference, 1);
    assert!(analysis.outcome.failures.is_empty());

    // old 20 moved to 22 and became covered, old 32 moved to 33 and lost it
    assert_eq!(indirect(&analysis.tree, "src/main.rs"), vec![(22, 1), (33, -1)]);
    assert!(indirect(&analysis.tree, "src/lib.rs").is_empty());

    let changed = &analysis.changed_lines_view;
    assert_eq!(changed.all_file_nodes().len(), 1);
    assert_eq!(changed.value(Metric::Line), Coverage::new(2, 1));
    assert_aggregates_files(changed);

    let view = &analysis.indirect_changes_view;
    let main = view.find(NodeKind::File, "main.rs").unwrap();
    assert_eq!(main.leaves()[&Metric::Line], Coverage::new(1, 1));
    assert!(view.find(NodeKind::File, "lib.rs").is_none());
    assert_aggregates_files(view);
}

#[test]
fn renamed_files_compare_against_old_path() {
    let reference = common::snapshot(&[
        ("src/util.rs", &[(1, 1), (2, 1), (3, 1)]),
        ("src/pure.rs", &[(1, 0)]),
    ]);
    let current = common::snapshot(&[
        ("src/helpers.rs", &[(1, 0), (2, 1), (3, 1)]),
        ("src/moved/pure.rs", &[(1, 3)]),
    ]);
    let delta = parse_diff(include_str!("fixtures/diffs/renamed_file.diff")).unwrap();

    let analysis = analyze(
        common::tree(&current),
        &common::tree(&reference),
        Some(&delta),
    );

    assert_eq!(analysis.outcome.compared, 2);
    assert_eq!(indirect(&analysis.tree, "src/helpers.rs"), vec![(1, -1)]);
    assert_eq!(indirect(&analysis.tree, "src/moved/pure.rs"), vec![(1, 1)]);

    let helpers = analysis.tree.find_file("src/helpers.rs").unwrap();
    let line_delta = helpers.coverage_deltas()[&Metric::Line];
    assert!((line_delta + 33.333).abs() < 0.01, "{line_delta}");
}

#[test]
fn quoted_path_keeps_its_edit_script() {
    let reference = common::snapshot(&[("src/my file.rs", &[(1, 1), (2, 0), (3, 1)])]);
    let current = common::snapshot(&[("src/my file.rs", &[(1, 0), (2, 1), (3, 0), (4, 1)])]);
    let delta = parse_diff(include_str!("fixtures/diffs/quoted_paths.diff")).unwrap();

    let analysis = analyze(
        common::tree(&current),
        &common::tree(&reference),
        Some(&delta),
    );

    assert_eq!(analysis.outcome.compared, 1);
    let file = analysis.tree.find_file("src/my file.rs").unwrap();
    assert_eq!(file.changed_lines().iter().copied().collect::<Vec<_>>(), vec![1]);
    // every reference line moved down by one and kept its coverage
    assert!(file.indirect_changes().is_empty());
    assert!(!analysis.indirect_changes_view.has_children());
}

#[test]
fn branch_arms_flow_into_views() {
    let reference = common::with_branches(
        common::snapshot(&[("src/a.rs", &[(1, 1), (2, 1)])]),
        "src/a.rs",
        &[(2, &[1, 0, 0, 0])],
    );
    let current = common::with_branches(
        common::snapshot(&[("src/a.rs", &[(1, 1), (2, 1)])]),
        "src/a.rs",
        &[(2, &[1, 1, 1, 0])],
    );

    let analysis = analyze(common::tree(&current), &common::tree(&reference), None);

    // no diff at all: the simple mode reports unexpected changes only
    let a = analysis.tree.find_file("src/a.rs").unwrap();
    assert_eq!(a.unexpected_changes().get(&2), Some(&2));
    assert!(a.indirect_changes().is_empty());
    assert!(!analysis.indirect_changes_view.has_children());

    // with an empty diff the same change is indirect
    let analysis = analyze(
        common::tree(&current),
        &common::tree(&reference),
        Some(&parse_diff("").unwrap()),
    );
    let view = &analysis.indirect_changes_view;
    assert_eq!(view.value(Metric::Branch), Coverage::new(2, 0));
    // the line was already covered
    assert_eq!(view.value(Metric::Line), Coverage::NO_COVERAGE);
    assert!(!view.values().contains_key(&Metric::Line));
}

#[test]
fn nothing_changed_gives_empty_views() {
    let data = common::snapshot(&[
        ("src/a.rs", &[(1, 1), (2, 0)]),
        ("src/b.rs", &[(1, 1)]),
        ("lib/c.rs", &[(4, 0)]),
    ]);

    let analysis = analyze(common::tree(&data), &common::tree(&data), None);

    assert_eq!(analysis.outcome.compared, 3);
    for view in [&analysis.changed_lines_view, &analysis.indirect_changes_view] {
        assert_eq!(view.name(), "project");
        assert!(!view.has_children());
        assert!(view.leaves().is_empty());
    }
    // the analyzed tree itself keeps everything
    assert_eq!(analysis.tree.all_file_nodes().len(), 3);
}
