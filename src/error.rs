use thiserror::Error;

use crate::edit::{Edit, EditKind};

#[derive(Error, Debug)]
pub enum CovdeltaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid edit {edit}: {reason}")]
    InvalidEdit { edit: Edit, reason: &'static str },

    #[error("Overlapping {kind} edits: {first} and {second}")]
    OverlappingEdits {
        kind: EditKind,
        first: Edit,
        second: Edit,
    },

    #[error("Coverage snapshot not found: {0}")]
    FileNotFound(String),
}

pub type Result<T> = std::result::Result<T, CovdeltaError>;
