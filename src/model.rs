//! Uniform in-memory representation of coverage data, independent of any
//! specific report format. A `CoverageData` snapshot is what the host hands
//! us for each build; it is turned into a coverage tree by [`crate::tree`].

use std::fmt;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Compute a coverage rate, returning 0.0 when the total is zero.
#[must_use]
pub fn rate(covered: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        covered as f64 / total as f64
    }
}

/// A single line that was instrumentable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineCoverage {
    pub line_number: u32,
    pub hit_count: u64,
}

/// A single branch arm on a given line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchCoverage {
    pub line_number: u32,
    pub branch_index: u32,
    pub hit_count: u64,
}

/// Coverage data for a single source file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileCoverage {
    pub path: String,
    #[serde(default)]
    pub lines: Vec<LineCoverage>,
    #[serde(default)]
    pub branches: Vec<BranchCoverage>,
}

/// The complete coverage snapshot of one build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoverageData {
    pub files: Vec<FileCoverage>,
}

/// The metrics a coverage leaf can summarize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Metric {
    Line,
    Branch,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Line => "LINE",
            Metric::Branch => "BRANCH",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(covered, missed)` counter pair for one line, one metric or an aggregate.
///
/// A pair whose total is greater than one describes a line with branches;
/// a total of exactly one is plain line coverage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coverage {
    pub covered: u32,
    pub missed: u32,
}

impl Coverage {
    /// The empty pair, neutral for addition.
    pub const NO_COVERAGE: Coverage = Coverage {
        covered: 0,
        missed: 0,
    };

    pub const fn new(covered: u32, missed: u32) -> Self {
        Self { covered, missed }
    }

    /// A single covered line.
    pub const fn hit() -> Self {
        Self::new(1, 0)
    }

    /// A single missed line.
    pub const fn miss() -> Self {
        Self::new(0, 1)
    }

    #[must_use]
    pub fn total(&self) -> u32 {
        self.covered + self.missed
    }

    /// Whether any element was counted at all.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.total() > 0
    }

    /// Whether this pair describes branch arms rather than a single line.
    #[must_use]
    pub fn is_branch(&self) -> bool {
        self.total() > 1
    }

    /// Collapse this pair into a single line: covered if anything was hit.
    #[must_use]
    pub fn binarized(&self) -> Coverage {
        if self.covered > 0 {
            Self::hit()
        } else {
            Self::miss()
        }
    }

    #[must_use]
    pub fn rate(&self) -> f64 {
        rate(u64::from(self.covered), u64::from(self.total()))
    }
}

impl Add for Coverage {
    type Output = Coverage;

    fn add(self, other: Coverage) -> Coverage {
        Coverage::new(self.covered + other.covered, self.missed + other.missed)
    }
}

impl AddAssign for Coverage {
    fn add_assign(&mut self, other: Coverage) {
        *self = *self + other;
    }
}

impl std::iter::Sum for Coverage {
    fn sum<I: Iterator<Item = Coverage>>(iter: I) -> Coverage {
        iter.fold(Coverage::NO_COVERAGE, Add::add)
    }
}

impl fmt::Display for Coverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.covered, self.total())
    }
}
