//! Extraction outcome types

use crate::{CoordBound, FileRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use tracing::{info, warn};

/// One materialized block on temporary storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBlock {
    /// 1-based block number
    pub ordinal: usize,
    /// Temporary file holding the block
    pub file: FileRef,
    /// Covered indices of the ordering dimension
    pub range: Range<usize>,
}

/// Outcome of an extraction that produced a merged file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Short description (dataset and selection)
    pub description: String,
    /// Whether every planned block was fetched
    pub complete: bool,
    /// Merged output file
    pub file: FileRef,
    /// Realized lower bound of the ordering dimension
    pub time_min: Option<CoordBound>,
    /// Realized upper bound of the ordering dimension
    pub time_max: Option<CoordBound>,
    /// Blocks in the plan
    pub blocks_planned: usize,
    /// Blocks merged into `file`
    pub blocks_fetched: usize,
    /// Human readable trail of the run
    pub logs: Vec<String>,
}

impl fmt::Display for ExtractionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.complete { "complete" } else { "partial" };
        write!(
            f,
            "{} [{status}, {}/{} blocks] -> {}",
            self.description, self.blocks_fetched, self.blocks_planned, self.file
        )?;
        if let (Some(min), Some(max)) = (&self.time_min, &self.time_max) {
            write!(f, " ({min} .. {max})")?;
        }
        Ok(())
    }
}

/// Ordered log trail of one run.
///
/// Every line is also emitted as a tracing event in the current span.
#[derive(Debug, Default)]
pub struct ExtractionLog {
    lines: Vec<String>,
}

impl ExtractionLog {
    /// Create an empty trail
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a progress line
    pub fn info(&mut self, line: impl Into<String>) {
        let line = line.into();
        info!("{line}");
        self.lines.push(line);
    }

    /// Record a problem line
    pub fn warn(&mut self, line: impl Into<String>) {
        let line = line.into();
        warn!("{line}");
        self.lines.push(line);
    }

    /// Consume the trail
    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}
