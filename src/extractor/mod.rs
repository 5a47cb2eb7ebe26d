//! Chunked extraction
//!
//! # Overview
//!
//! 1. **Planning**: size the requested subset and split the ordering (time)
//!    dimension with [`planner::plan`]
//! 2. **Fetching**: materialize each block to a temporary file, retrying in
//!    place ([`engine::ChunkedExtractionEngine`])
//! 3. **Merging**: combine the fetched blocks into the destination and read
//!    the realized extent back ([`result::ExtractionResult`])
//!
//! [`ChunkedExtractor`] wraps the engine with a dataset connection and the
//! single-flight `connect` / `extract` runners, and implements the
//! [`DatasetExtractor`] capability set.
//!
//! # Error Handling
//!
//! All operations return `Result<T, ExtractError>`:
//! - Block-level transport and write failures are retried, never surfaced one by one
//! - A block running out of attempts after earlier successes yields a partial
//!   result, not an error
//! - Planning failures and a first block running out of attempts are fatal

use crate::dataset::DatasetError;
use crate::runner::RunnerError;
use crate::{SizeEstimate, SizeUnit};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod chunked;
pub mod config;
pub mod engine;
pub mod planner;
pub mod result;

pub use chunked::{ChunkedExtractor, ConnectionInfo};
pub use config::ExtractionConfig;
pub use engine::ChunkedExtractionEngine;
pub use planner::BlockPlan;
pub use result::{ExtractionResult, FetchedBlock};

/// Extraction errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractError {
    /// No dataset handle is open
    #[error("not connected to a dataset")]
    NotConnected,

    /// No dimension qualifies as the ordering dimension
    #[error("dataset has no temporal ordering dimension")]
    NoOrderingDimension,

    /// Runner slot error (busy, unknown...)
    #[error(transparent)]
    Runner(#[from] RunnerError),

    /// Dataset operation failed outside the block retry loop
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    /// The first block failed every attempt, so nothing can be returned
    #[error("first block failed after {attempts} attempt(s): {last_error}")]
    FirstBlockExhausted {
        /// Attempts made
        attempts: u32,
        /// Error of the final attempt
        last_error: DatasetError,
    },

    /// Invalid extraction configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for extraction operations
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Completion callback of a background operation
pub type Callback<T> = Box<dyn FnOnce(T) + Send + 'static>;

/// Capabilities shared by every extractor.
///
/// The callback forms start the operation on a background task through a
/// single-flight runner and return immediately; a second call while one is
/// in flight fails with [`RunnerError::Busy`]. The `*_now` forms run inline
/// in the caller's task.
#[async_trait]
pub trait DatasetExtractor: Send + Sync {
    /// Open the dataset in the background, closing any open handle first
    fn connect(
        &self,
        on_success: Callback<ConnectionInfo>,
        on_failure: Callback<ExtractError>,
    ) -> ExtractResult<()>;

    /// Open the dataset inline, closing any open handle first
    async fn connect_now(&self) -> ExtractResult<ConnectionInfo>;

    /// Payload size of the configured selection
    async fn size(&self, unit: SizeUnit) -> ExtractResult<SizeEstimate>;

    /// Dimension names of the open dataset, in declared order
    async fn dimension_names(&self) -> ExtractResult<Vec<String>>;

    /// Variable names of the open dataset, in declared order
    async fn variable_names(&self) -> ExtractResult<Vec<String>>;

    /// Extract the configured selection in the background
    fn extract(
        &self,
        destination: PathBuf,
        on_success: Callback<ExtractionResult>,
        on_failure: Callback<ExtractError>,
    ) -> ExtractResult<()>;

    /// Extract the configured selection inline
    async fn extract_now(&self, destination: &Path) -> ExtractResult<ExtractionResult>;

    /// Wait until no background operation is in flight; `false` on timeout
    async fn wait(&self, timeout: Option<Duration>) -> bool;

    /// Whether a background operation is in flight
    fn still_working(&self) -> bool;

    /// Release the dataset handle. Safe to call repeatedly or before connecting.
    async fn close(&self);
}
