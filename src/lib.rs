//! # Grid Extract Library
//!
//! Chunked, retry-tolerant extraction of large gridded scientific datasets
//! (arrays addressed by time, latitude, longitude, depth...) from remote
//! array stores.
//!
//! ## Features
//!
//! - **Bounded requests**: the requested subset is sized up front and split into
//!   blocks along the ordering (time) dimension so that no single request
//!   exceeds a configured payload
//! - **Block-level retry**: each block is retried in place; a block that runs out
//!   of attempts ends the extraction with a partial result instead of losing the
//!   blocks already fetched
//! - **Merging**: fetched blocks are merged into one output file and the realized
//!   time extent is read back from it
//! - **Single-flight background tasks**: `connect` and `extract` run on background
//!   tasks, at most one execution per operation at a time, reporting through
//!   callbacks
//!
//! ## Quick Start
//!
//! ```no_run
//! use grid_extract::extractor::{ChunkedExtractor, DatasetExtractor, ExtractionConfig};
//! use grid_extract::dataset::create_source;
//! use grid_extract::{DimensionConstraint, Selection};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let source = create_source("./ocean_currents.json", None)?;
//! let selection = Selection::new()
//!     .with_constraint("time", DimensionConstraint::range("2023-03-06", "2023-04-06"))
//!     .with_constraint("depth", DimensionConstraint::values([0.49]))
//!     .with_variables(["uo"]);
//!
//! let extractor = ChunkedExtractor::new(source, selection, ExtractionConfig::default());
//! extractor.connect_now().await?;
//! let result = extractor.extract_now(Path::new("./uo_subset.json")).await?;
//! println!("complete={} bounds={:?}..{:?}", result.complete, result.time_min, result.time_max);
//! extractor.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`runner`] - Single-flight background task slots and their registry
//! - [`dataset`] - The dataset handle contract and the grid document store
//! - [`extractor`] - Block planning, the chunked extraction engine and the extractor
//! - [`metrics`] - Extraction metrics
//! - [`cli`] - Command line interface

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};

/// CLI command implementations
pub mod cli;

/// Dataset handles and sources
pub mod dataset;

/// Chunked extraction engine and extractor
pub mod extractor;

/// Extraction metrics
pub mod metrics;

/// Single-flight asynchronous task runners
pub mod runner;

// Re-export commonly used types
pub use extractor::{ChunkedExtractor, DatasetExtractor, ExtractError, ExtractionConfig, ExtractionResult};
pub use runner::{RunnerError, RunnerRegistry, SingleFlightRunner};

/// Unit used to express payload sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SizeUnit {
    /// Bytes
    #[serde(rename = "B")]
    Byte,
    /// Kilobytes (10^3 bytes)
    #[serde(rename = "KB")]
    KiloByte,
    /// Megabytes (10^6 bytes)
    #[default]
    #[serde(rename = "MB")]
    MegaByte,
    /// Gigabytes (10^9 bytes)
    #[serde(rename = "GB")]
    GigaByte,
}

impl SizeUnit {
    /// Number of bytes in one unit
    pub fn bytes_per_unit(&self) -> f64 {
        match self {
            SizeUnit::Byte => 1.0,
            SizeUnit::KiloByte => 1e3,
            SizeUnit::MegaByte => 1e6,
            SizeUnit::GigaByte => 1e9,
        }
    }
}

impl fmt::Display for SizeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SizeUnit::Byte => "B",
            SizeUnit::KiloByte => "KB",
            SizeUnit::MegaByte => "MB",
            SizeUnit::GigaByte => "GB",
        };
        write!(f, "{s}")
    }
}

impl FromStr for SizeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "B" | "BYTE" | "BYTES" => Ok(SizeUnit::Byte),
            "KB" => Ok(SizeUnit::KiloByte),
            "MB" => Ok(SizeUnit::MegaByte),
            "GB" => Ok(SizeUnit::GigaByte),
            _ => Err(format!("Invalid size unit: {s}. Valid options: B, KB, MB, GB")),
        }
    }
}

/// Payload size of a constrained subset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeEstimate {
    /// Magnitude in `unit`
    pub size: f64,
    /// Unit of `size`
    pub unit: SizeUnit,
}

impl SizeEstimate {
    /// Convert a raw byte count into the requested unit
    pub fn from_bytes(bytes: u64, unit: SizeUnit) -> Self {
        Self {
            size: bytes as f64 / unit.bytes_per_unit(),
            unit,
        }
    }

    /// Express this estimate in another unit
    pub fn to_unit(&self, unit: SizeUnit) -> Self {
        Self {
            size: self.size * self.unit.bytes_per_unit() / unit.bytes_per_unit(),
            unit,
        }
    }
}

impl fmt::Display for SizeEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.size, self.unit)
    }
}

/// A coordinate value supplied by the caller.
///
/// Dates are encoded against the units of the temporal dimension they
/// constrain, so `"2023-03-06"` can be used directly on a
/// `days since 1950-01-01` axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CoordValue {
    /// Raw coordinate value
    Number(f64),
    /// ISO-8601 date or datetime
    Date(String),
}

impl From<f64> for CoordValue {
    fn from(value: f64) -> Self {
        CoordValue::Number(value)
    }
}

impl From<&str> for CoordValue {
    fn from(value: &str) -> Self {
        CoordValue::Date(value.to_string())
    }
}

impl fmt::Display for CoordValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordValue::Number(v) => write!(f, "{v}"),
            CoordValue::Date(d) => write!(f, "{d}"),
        }
    }
}

/// Selection rule applied to one named dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionConstraint {
    /// Closed coordinate range; bound order does not matter
    Range(CoordValue, CoordValue),
    /// Discrete set of values, each matched to the nearest coordinate
    Values(Vec<CoordValue>),
}

impl DimensionConstraint {
    /// Closed range constraint
    pub fn range(start: impl Into<CoordValue>, end: impl Into<CoordValue>) -> Self {
        DimensionConstraint::Range(start.into(), end.into())
    }

    /// Discrete value constraint
    pub fn values<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<CoordValue>,
    {
        DimensionConstraint::Values(values.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for DimensionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimensionConstraint::Range(a, b) => write!(f, "[{a}, {b}]"),
            DimensionConstraint::Values(values) => {
                let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

/// Constraints keyed by dimension name; a dimension appears at most once
pub type ConstraintSet = BTreeMap<String, DimensionConstraint>;

/// Dimension constraints plus an optional variable filter.
///
/// A selection is a value: deriving a block selection with
/// [`Selection::with_constraint`] produces a new snapshot and leaves the
/// original untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    /// Constraints by dimension name
    #[serde(default)]
    pub constraints: ConstraintSet,
    /// Requested variables (all variables when `None`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Vec<String>>,
}

impl Selection {
    /// Empty selection (whole dataset)
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy with `constraint` set on `dimension`, replacing any
    /// previous constraint on it
    pub fn with_constraint(mut self, dimension: impl Into<String>, constraint: DimensionConstraint) -> Self {
        self.constraints.insert(dimension.into(), constraint);
        self
    }

    /// Return a copy restricted to the given variables
    pub fn with_variables<I, S>(mut self, variables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variables = Some(variables.into_iter().map(Into::into).collect());
        self
    }

    /// Constraint on `dimension`, if any
    pub fn constraint(&self, dimension: &str) -> Option<&DimensionConstraint> {
        self.constraints.get(dimension)
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .constraints
            .iter()
            .map(|(dim, c)| format!("{dim}={c}"))
            .collect();
        write!(f, "{{{}}}", parts.join("; "))?;
        if let Some(vars) = &self.variables {
            write!(f, " vars=[{}]", vars.join(", "))?;
        }
        Ok(())
    }
}

/// A file produced by an extraction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    /// Short description of the content
    pub description: String,
    /// Location on disk
    pub path: PathBuf,
}

impl FileRef {
    /// Create a file reference
    pub fn new(description: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            description: description.into(),
            path: path.into(),
        }
    }

    /// Location on disk
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}: {}>", self.description, self.path.display())
    }
}

/// Basic authentication credential for a remote store
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// User name
    pub user: String,
    /// Password
    pub password: String,
}

impl Credential {
    /// Create a credential
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One end of the realized ordering-dimension extent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoordBound {
    /// Raw coordinate value as stored in the dataset
    pub value: f64,
    /// Decoded timestamp when the dimension carries CF time units
    pub datetime: Option<DateTime<Utc>>,
}

impl fmt::Display for CoordBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.datetime {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "{}", self.value),
        }
    }
}
