#![allow(dead_code)]

use std::path::{Path, PathBuf};

use covdelta::model::{BranchCoverage, CoverageData, FileCoverage, LineCoverage};
use covdelta::tree::{build_tree, Node};

/// A snapshot from `(path, [(line, hits)])` pairs, without branch data.
pub fn snapshot(files: &[(&str, &[(u32, u64)])]) -> CoverageData {
    CoverageData {
        files: files
            .iter()
            .map(|(path, lines)| FileCoverage {
                path: path.to_string(),
                lines: lines
                    .iter()
                    .map(|&(line_number, hit_count)| LineCoverage {
                        line_number,
                        hit_count,
                    })
                    .collect(),
                branches: vec![],
            })
            .collect(),
    }
}

/// Add branch arms `(line, [hits per arm])` to the file at `path`.
pub fn with_branches(mut data: CoverageData, path: &str, arms: &[(u32, &[u64])]) -> CoverageData {
    let file = data
        .files
        .iter_mut()
        .find(|f| f.path == path)
        .expect("file in snapshot");
    for &(line_number, hits) in arms {
        for (index, &hit_count) in hits.iter().enumerate() {
            file.branches.push(BranchCoverage {
                line_number,
                branch_index: index as u32,
                hit_count,
            });
        }
    }
    data
}

pub fn tree(data: &CoverageData) -> Node {
    build_tree("project", data).unwrap()
}

/// Write `data` as JSON into `dir/name`, returning the path.
pub fn write_snapshot(dir: &Path, name: &str, data: &CoverageData) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_vec_pretty(data).unwrap()).unwrap();
    path
}
