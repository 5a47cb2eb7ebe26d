//! Chunked extraction engine
//!
//! Sizes the requested subset, splits the ordering dimension into blocks
//! that stay under the configured payload cap, fetches the blocks one after
//! another with in-place retries, merges them and reads the realized extent
//! back from the merged file.
//!
//! A block that exhausts its attempts ends the fetch loop. If at least one
//! block was fetched before it, the fetched prefix is merged and returned as
//! a partial result; otherwise the extraction fails with
//! [`ExtractError::FirstBlockExhausted`]. Temporary block files are removed
//! on every exit path.

use super::config::{ExtractionConfig, TEMP_FILE_PREFIX};
use super::planner::{self, BlockPlan};
use super::result::{ExtractionLog, ExtractionResult, FetchedBlock};
use super::{ExtractError, ExtractResult};
use crate::dataset::time::TimeUnits;
use crate::dataset::{find_ordering_dimension, DatasetError, DatasetHandle, DatasetResult, DimensionInfo};
use crate::metrics::{record_cleanup_failure, BlockAttemptMetrics, ExtractionMetrics};
use crate::{CoordBound, CoordValue, DimensionConstraint, FileRef, Selection, SizeEstimate};
use std::io::ErrorKind;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info_span, warn, Instrument};

/// Runs one extraction against an open handle
pub struct ChunkedExtractionEngine {
    handle: Arc<dyn DatasetHandle>,
    config: ExtractionConfig,
    description: String,
}

/// What the fetch loop produced before merging
struct FetchOutcome {
    blocks: Vec<FetchedBlock>,
    complete: bool,
}

impl ChunkedExtractionEngine {
    /// Create an engine over `handle`
    pub fn new(handle: Arc<dyn DatasetHandle>, config: ExtractionConfig) -> Self {
        Self {
            handle,
            config,
            description: "dataset".to_string(),
        }
    }

    /// Set the description carried into results and metrics
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Extract `selection` into `destination`
    pub async fn run(&self, selection: &Selection, destination: &Path) -> ExtractResult<ExtractionResult> {
        let metrics = ExtractionMetrics::start(&self.description);
        let result = self.execute(selection, destination).await;

        match &result {
            Ok(r) if r.complete => metrics.record_complete(r.blocks_fetched),
            Ok(r) => metrics.record_partial(r.blocks_fetched, r.blocks_planned),
            Err(e) => metrics.record_failure(&e.to_string()),
        }
        result
    }

    async fn execute(&self, selection: &Selection, destination: &Path) -> ExtractResult<ExtractionResult> {
        self.config.validate()?;
        let mut log = ExtractionLog::new();

        let dimensions = self.handle.dimensions()?;
        let ordering = find_ordering_dimension(&dimensions)
            .cloned()
            .ok_or(ExtractError::NoOrderingDimension)?;

        let size = SizeEstimate::from_bytes(self.handle.size_bytes(selection).await?, self.config.size_unit);
        let coords = self.handle.coordinates(selection, &ordering.name).await?;
        let plan = planner::plan(size.size, self.config.max_block_size, coords.len())?;

        log.info(format!(
            "Extracting {size} along '{}' ({} steps) in {} block(s) of up to {} step(s)",
            ordering.name, plan.len, plan.block_count, plan.block_length
        ));

        let directory = temp_directory(destination);
        tokio::fs::create_dir_all(&directory).await.map_err(|e| {
            DatasetError::Write(format!("failed to create {}: {e}", directory.display()))
        })?;

        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let temp_paths: Vec<PathBuf> = (1..=plan.block_count)
            .map(|ordinal| directory.join(format!("{TEMP_FILE_PREFIX}_{stamp}_{ordinal}.json")))
            .collect();

        let outcome = self
            .fetch_blocks(selection, &ordering, &coords, &plan, &temp_paths, &mut log)
            .await;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                remove_temp_files(&temp_paths, &mut log).await;
                return Err(e);
            }
        };

        let merged = self.merge(&outcome.blocks, &ordering, destination, &mut log).await;
        remove_temp_files(&temp_paths, &mut log).await;
        let (file, bounds) = merged?;

        let units = ordering.units.as_deref().and_then(TimeUnits::parse);
        let to_bound = |value: f64| CoordBound {
            value,
            datetime: units.and_then(|u| u.decode(value)),
        };
        let time_min = bounds.map(|(lo, _)| to_bound(lo));
        let time_max = bounds.map(|(_, hi)| to_bound(hi));

        match (&time_min, &time_max) {
            (Some(min), Some(max)) => log.info(format!("Wrote {file} covering {min} .. {max}")),
            _ => log.info(format!("Wrote {file}")),
        }

        Ok(ExtractionResult {
            description: self.description.clone(),
            complete: outcome.complete,
            file,
            time_min,
            time_max,
            blocks_planned: plan.block_count,
            blocks_fetched: outcome.blocks.len(),
            logs: log.into_lines(),
        })
    }

    async fn fetch_blocks(
        &self,
        selection: &Selection,
        ordering: &DimensionInfo,
        coords: &[f64],
        plan: &BlockPlan,
        temp_paths: &[PathBuf],
        log: &mut ExtractionLog,
    ) -> ExtractResult<FetchOutcome> {
        let mut blocks: Vec<FetchedBlock> = Vec::with_capacity(plan.block_count);

        for ((index, range), path) in plan.blocks().enumerate().zip(temp_paths) {
            let ordinal = index + 1;
            let snapshot = block_selection(selection, &ordering.name, coords, &range);
            let span = info_span!("block", block = ordinal, of = plan.block_count);

            log.info(format!(
                "Fetching block {ordinal}/{} (steps {}..{})",
                plan.block_count, range.start, range.end
            ));

            match self.fetch_block(&snapshot, path, ordinal, log).instrument(span).await {
                Ok(file) => blocks.push(FetchedBlock { ordinal, file, range }),
                Err(last_error) if blocks.is_empty() => {
                    log.warn(format!(
                        "Block {ordinal} failed after {} attempt(s); nothing fetched",
                        self.config.max_attempts
                    ));
                    return Err(ExtractError::FirstBlockExhausted {
                        attempts: self.config.max_attempts,
                        last_error,
                    });
                }
                Err(_) => {
                    log.warn(format!(
                        "Block {ordinal} failed after {} attempt(s); keeping {} fetched block(s)",
                        self.config.max_attempts,
                        blocks.len()
                    ));
                    return Ok(FetchOutcome {
                        blocks,
                        complete: false,
                    });
                }
            }
        }

        Ok(FetchOutcome {
            blocks,
            complete: true,
        })
    }

    /// Materialize one block, retrying immediately with the same snapshot
    /// and path until the attempt budget is spent
    async fn fetch_block(
        &self,
        snapshot: &Selection,
        path: &Path,
        ordinal: usize,
        log: &mut ExtractionLog,
    ) -> DatasetResult<FileRef> {
        let mut attempt = 1;
        loop {
            let metrics = BlockAttemptMetrics::start(ordinal, attempt);
            match self.handle.materialize(snapshot, path).await {
                Ok(file) => {
                    metrics.record_success();
                    return Ok(file);
                }
                Err(e) => {
                    metrics.record_failure();
                    log.warn(format!(
                        "Block {ordinal}: attempt {attempt}/{} failed: {e}",
                        self.config.max_attempts
                    ));
                    if attempt >= self.config.max_attempts {
                        return Err(e);
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn merge(
        &self,
        blocks: &[FetchedBlock],
        ordering: &DimensionInfo,
        destination: &Path,
        log: &mut ExtractionLog,
    ) -> ExtractResult<(FileRef, Option<(f64, f64)>)> {
        let steps = match (blocks.first(), blocks.last()) {
            (Some(first), Some(last)) => first.range.start..last.range.end,
            _ => 0..0,
        };
        log.info(format!(
            "Merging {} block(s) (steps {}..{}) into {}",
            blocks.len(),
            steps.start,
            steps.end,
            destination.display()
        ));

        let parts: Vec<FileRef> = blocks.iter().map(|b| b.file.clone()).collect();
        let merged = self.handle.merge(&parts, &ordering.name, destination).await?;
        let bounds = self.handle.bounds_of(&merged, &ordering.name).await?;
        Ok((merged, bounds))
    }
}

/// Directory receiving the temporary block files: the destination's own
fn temp_directory(destination: &Path) -> PathBuf {
    match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Base selection restricted to the coordinates at `range` on the ordering
/// dimension. An empty range leaves the base selection as is.
///
/// A discrete value set on the ordering dimension stays discrete: the block
/// lists its own coordinates, since a range spanning them would also pick up
/// every step in between.
fn block_selection(base: &Selection, ordering: &str, coords: &[f64], range: &Range<usize>) -> Selection {
    let end = range.end.min(coords.len());
    if range.start >= end {
        return base.clone();
    }
    let block = &coords[range.start..end];
    let constraint = match base.constraint(ordering) {
        Some(DimensionConstraint::Values(_)) => {
            DimensionConstraint::Values(block.iter().copied().map(CoordValue::Number).collect())
        }
        _ => DimensionConstraint::Range(
            CoordValue::Number(block[0]),
            CoordValue::Number(block[block.len() - 1]),
        ),
    };
    base.clone().with_constraint(ordering, constraint)
}

async fn remove_temp_files(paths: &[PathBuf], log: &mut ExtractionLog) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "Removed temporary file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                record_cleanup_failure();
                warn!(path = %path.display(), error = %e, "Failed to remove temporary file");
                log.warn(format!("Could not remove {}: {e}", path.display()));
            }
        }
    }
}
