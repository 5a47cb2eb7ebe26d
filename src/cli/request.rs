//! Request files
//!
//! A request file describes one extraction as JSON:
//!
//! ```json
//! {
//!   "url": "https://data.example.org/ocean_currents.json",
//!   "user": "alice",
//!   "password": "s3cret",
//!   "constraints": {
//!     "time": {"range": ["2023-03-06", "2023-04-06"]},
//!     "depth": {"values": [0.49]}
//!   },
//!   "variables": ["uo", "vo"],
//!   "output": "uo_vo.json",
//!   "max_attempts": 3,
//!   "max_block_size": 32
//! }
//! ```

use super::CliError;
use crate::extractor::ExtractionConfig;
use crate::{ConstraintSet, Credential, Selection, SizeUnit};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default output file when neither the request nor the CLI names one
pub const DEFAULT_OUTPUT: &str = "extraction.json";

/// One extraction request
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestFile {
    /// Dataset URL or path
    pub url: String,
    /// Basic auth user
    #[serde(default)]
    pub user: Option<String>,
    /// Basic auth password
    #[serde(default)]
    pub password: Option<String>,
    /// Constraints by dimension name
    #[serde(default)]
    pub constraints: ConstraintSet,
    /// Requested variables (all when absent)
    #[serde(default)]
    pub variables: Option<Vec<String>>,
    /// Output file
    #[serde(default)]
    pub output: Option<PathBuf>,
    /// Attempts per block
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Block size cap
    #[serde(default)]
    pub max_block_size: Option<f64>,
}

impl RequestFile {
    /// Read and parse a request file
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CliError::InvalidArgument(format!("cannot read request file {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    /// Parse request JSON
    pub fn parse(content: &str) -> Result<Self, CliError> {
        serde_json::from_str(content)
            .map_err(|e| CliError::ConfigurationError(format!("invalid request file: {e}")))
    }

    /// Credential, when both user and password are given
    pub fn credential(&self) -> Result<Option<Credential>, CliError> {
        match (&self.user, &self.password) {
            (Some(user), Some(password)) => Ok(Some(Credential::new(user, password))),
            (None, None) => Ok(None),
            _ => Err(CliError::ConfigurationError(
                "user and password must be given together".to_string(),
            )),
        }
    }

    /// Requested selection
    pub fn selection(&self) -> Selection {
        Selection {
            constraints: self.constraints.clone(),
            variables: self.variables.clone(),
        }
    }

    /// Extraction configuration; CLI values win over request values
    pub fn config(
        &self,
        max_attempts: Option<u32>,
        max_block_size: Option<f64>,
        unit: Option<SizeUnit>,
    ) -> ExtractionConfig {
        let defaults = ExtractionConfig::default();
        ExtractionConfig {
            max_attempts: max_attempts.or(self.max_attempts).unwrap_or(defaults.max_attempts),
            max_block_size: max_block_size
                .or(self.max_block_size)
                .unwrap_or(defaults.max_block_size),
            size_unit: unit.unwrap_or(defaults.size_unit),
        }
    }

    /// Output path; the CLI value wins over the request value
    pub fn output(&self, cli_output: Option<&Path>) -> PathBuf {
        cli_output
            .map(Path::to_path_buf)
            .or_else(|| self.output.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT))
    }
}
