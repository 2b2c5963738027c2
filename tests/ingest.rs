mod common;

use covdelta::error::CovdeltaError;
use covdelta::ingest;
use covdelta::model::{Coverage, Metric};
use covdelta::tree::NodeKind;

/// Test the full `ingest::load_tree()` pipeline: read file from disk, parse, build.
#[test]
fn load_tree_from_snapshot_file() {
    let dir = tempfile::tempdir().unwrap();
    let data = common::with_branches(
        common::snapshot(&[
            ("src/lib.rs", &[(1, 3), (2, 0), (5, 1)]),
            ("src/cli/args.rs", &[(10, 0)]),
        ]),
        "src/lib.rs",
        &[(5, &[2, 0])],
    );
    let path = common::write_snapshot(dir.path(), "coverage.json", &data);

    let tree = ingest::load_tree(&path, "app").unwrap();

    assert_eq!(tree.name(), "app");
    assert_eq!(tree.kind(), NodeKind::Module);
    let lib = tree.find(NodeKind::File, "lib.rs").unwrap();
    assert_eq!(lib.leaves()[&Metric::Line], Coverage::new(2, 1));
    assert_eq!(lib.leaves()[&Metric::Branch], Coverage::new(1, 1));
    assert_eq!(
        lib.as_file().unwrap().line_coverage(5),
        Some(Coverage::new(1, 1))
    );
    assert!(tree.find(NodeKind::Package, "src/cli").is_some());
    assert_eq!(tree.value(Metric::Line), Coverage::new(2, 2));
}

#[test]
fn load_tree_hand_written_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.json");
    std::fs::write(
        &path,
        r#"{
  "files": [
    {
      "path": "main.py",
      "lines": [
        {"line_number": 1, "hit_count": 0},
        {"line_number": 2, "hit_count": 7}
      ]
    }
  ]
}"#,
    )
    .unwrap();

    let tree = ingest::load_tree(&path, "project").unwrap();
    let file = tree.find_file("main.py").unwrap();
    assert_eq!(file.line_coverage(1), Some(Coverage::miss()));
    assert_eq!(file.line_coverage(2), Some(Coverage::hit()));
    assert!(tree.find(NodeKind::Package, ".").is_some());
}

#[test]
fn load_tree_rejects_line_zero() {
    let dir = tempfile::tempdir().unwrap();
    let data = common::snapshot(&[("a.rs", &[(0, 1)])]);
    let path = common::write_snapshot(dir.path(), "bad.json", &data);

    let err = ingest::load_tree(&path, "project").unwrap_err();
    assert!(matches!(err, CovdeltaError::Parse(_)), "{err}");
}

#[test]
fn load_snapshot_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = ingest::load_snapshot(&dir.path().join("absent.json")).unwrap_err();
    assert!(err.to_string().contains("absent.json"));
}
