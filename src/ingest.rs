use std::path::Path;

use tracing::debug;

use crate::error::{CovdeltaError, Result};
use crate::model::CoverageData;
use crate::tree::{build_tree, Node};

/// Parse a JSON coverage snapshot.
pub fn parse_snapshot(content: &[u8]) -> Result<CoverageData> {
    Ok(serde_json::from_slice(content)?)
}

/// Read a JSON coverage snapshot from disk.
pub fn load_snapshot(path: &Path) -> Result<CoverageData> {
    if !path.is_file() {
        return Err(CovdeltaError::FileNotFound(path.display().to_string()));
    }
    let content = std::fs::read(path)?;
    parse_snapshot(&content)
}

/// Read a snapshot and turn it into a coverage tree rooted at `root_name`.
pub fn load_tree(path: &Path, root_name: &str) -> Result<Node> {
    let data = load_snapshot(path)?;
    debug!(path = %path.display(), files = data.files.len(), "Loaded coverage snapshot");
    build_tree(root_name, &data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_snapshot_defaults() {
        let data = parse_snapshot(br#"{"files": [{"path": "src/a.rs"}]}"#).unwrap();
        assert_eq!(data.files.len(), 1);
        assert!(data.files[0].lines.is_empty());
        assert!(data.files[0].branches.is_empty());
    }

    #[test]
    fn test_parse_snapshot_rejects_garbage() {
        let err = parse_snapshot(b"SF:src/a.rs\nend_of_record\n").unwrap_err();
        assert!(matches!(err, CovdeltaError::Json(_)));
    }

    #[test]
    fn test_load_snapshot_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_snapshot(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, CovdeltaError::FileNotFound(_)));
    }
}
