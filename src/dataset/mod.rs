//! Dataset handles and sources
//!
//! The extraction engine never talks to a remote store directly. It works
//! against two narrow contracts:
//!
//! - [`DatasetSource`] opens a connection and yields a [`DatasetHandle`]
//! - [`DatasetHandle`] sizes, lists, materializes, merges and reads bounds
//!
//! The crate ships one store behind these contracts: JSON grid documents
//! ([`grid`]), read from disk ([`local::LocalSource`]) or over HTTP
//! ([`http::HttpSource`]). [`create_source`] picks one from a URL.

use crate::{Credential, FileRef, Selection};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

pub mod grid;
pub mod http;
pub mod local;
pub mod time;

pub use grid::{GridDataset, GridDimension, GridHandle, GridVariable};
pub use http::HttpSource;
pub use local::LocalSource;

/// Dataset errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DatasetError {
    /// Network or remote failure (open, size query, materialize, merge)
    #[error("transport error: {0}")]
    Transport(String),

    /// Local disk write failure
    #[error("write error: {0}")]
    Write(String),

    /// Malformed dataset content
    #[error("decode error: {0}")]
    Decode(String),

    /// Constraint or lookup on a dimension the dataset does not have
    #[error("unknown dimension: {0}")]
    UnknownDimension(String),

    /// Requested variable is not in the dataset
    #[error("unknown variable: {0}")]
    UnknownVariable(String),

    /// Constraint value cannot be applied to its dimension
    #[error("invalid constraint: {0}")]
    InvalidConstraint(String),

    /// Unsupported URL scheme
    #[error("unsupported source: {0}")]
    Unsupported(String),

    /// Handle has been closed
    #[error("dataset handle is closed")]
    Closed,
}

/// Result type for dataset operations
pub type DatasetResult<T> = Result<T, DatasetError>;

/// Metadata of one dimension as declared by the dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionInfo {
    /// Dimension name
    pub name: String,
    /// `axis` attribute (`T` marks time)
    pub axis: Option<String>,
    /// `units` attribute (`days since 1950-01-01`...)
    pub units: Option<String>,
    /// Number of coordinates
    pub length: usize,
}

impl DimensionInfo {
    /// Whether the dimension carries a temporal marker: an axis attribute of
    /// `T`, or units of the form `<unit> since YYYY-MM-DD`
    pub fn is_temporal(&self) -> bool {
        if let Some(axis) = &self.axis {
            if axis.eq_ignore_ascii_case("t") {
                return true;
            }
        }
        self.units.as_deref().is_some_and(time::is_time_units)
    }
}

/// Pick the ordering dimension: the first temporal dimension in declared
/// order, falling back to a dimension named `time`
pub fn find_ordering_dimension(dimensions: &[DimensionInfo]) -> Option<&DimensionInfo> {
    dimensions
        .iter()
        .find(|d| d.is_temporal())
        .or_else(|| dimensions.iter().find(|d| d.name == "time"))
}

/// An open connection to an array store
#[async_trait]
pub trait DatasetHandle: Send + Sync {
    /// Dimensions in declared order
    fn dimensions(&self) -> DatasetResult<Vec<DimensionInfo>>;

    /// Variable names in declared order
    fn variable_names(&self) -> DatasetResult<Vec<String>>;

    /// Dimension names in declared order
    fn dimension_names(&self) -> DatasetResult<Vec<String>> {
        Ok(self.dimensions()?.into_iter().map(|d| d.name).collect())
    }

    /// Payload size of `selection` in bytes
    async fn size_bytes(&self, selection: &Selection) -> DatasetResult<u64>;

    /// Coordinates of `dimension` after applying `selection`
    async fn coordinates(&self, selection: &Selection, dimension: &str) -> DatasetResult<Vec<f64>>;

    /// Fetch `selection` and write it to `destination`
    async fn materialize(&self, selection: &Selection, destination: &Path) -> DatasetResult<FileRef>;

    /// Combine `parts` along `ordering_dimension` into one file at `destination`
    async fn merge(
        &self,
        parts: &[FileRef],
        ordering_dimension: &str,
        destination: &Path,
    ) -> DatasetResult<FileRef>;

    /// Minimum and maximum of `dimension` in a materialized file, `None` when
    /// it has no coordinates
    async fn bounds_of(&self, file: &FileRef, dimension: &str) -> DatasetResult<Option<(f64, f64)>>;

    /// Release the connection; later calls fail with [`DatasetError::Closed`]
    async fn close(&self);
}

/// Something that can open a [`DatasetHandle`]
#[async_trait]
pub trait DatasetSource: Send + Sync {
    /// Open the dataset
    async fn open(&self) -> DatasetResult<Box<dyn DatasetHandle>>;

    /// Human readable location, for logs
    fn describe(&self) -> String;
}

/// Create a source from a URL or path.
///
/// - `http://` / `https://` → [`HttpSource`] (credential used for basic auth)
/// - `file://` or a plain path → [`LocalSource`]
pub fn create_source(url: &str, credential: Option<Credential>) -> DatasetResult<Arc<dyn DatasetSource>> {
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(Arc::new(HttpSource::new(url, credential)?));
    }

    let path = match url.strip_prefix("file://") {
        Some(path) => path,
        None if url.contains("://") => return Err(DatasetError::Unsupported(url.to_string())),
        None => url,
    };
    if credential.is_some() {
        warn!(path = %path, "Ignoring credential for local dataset");
    }
    Ok(Arc::new(LocalSource::new(path)))
}
