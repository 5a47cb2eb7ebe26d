//! Extraction configuration

use super::{ExtractError, ExtractResult};
use crate::SizeUnit;
use serde::{Deserialize, Serialize};

/// Total attempts per block (the first try included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Largest payload requested in one block, in [`DEFAULT_SIZE_UNIT`].
pub const DEFAULT_MAX_BLOCK_SIZE: f64 = 64.0;

/// Unit of [`DEFAULT_MAX_BLOCK_SIZE`] and of size arithmetic during planning.
pub const DEFAULT_SIZE_UNIT: SizeUnit = SizeUnit::MegaByte;

/// Prefix of temporary block files
pub const TEMP_FILE_PREFIX: &str = "tmp_dataset";

/// Knobs of one extraction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Total attempts per block
    pub max_attempts: u32,
    /// Largest payload per block, in `size_unit`
    pub max_block_size: f64,
    /// Unit used for sizing and planning
    pub size_unit: SizeUnit,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            size_unit: DEFAULT_SIZE_UNIT,
        }
    }
}

impl ExtractionConfig {
    /// Set the attempt budget per block
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the block size cap (in the configured unit)
    pub fn with_max_block_size(mut self, max_block_size: f64) -> Self {
        self.max_block_size = max_block_size;
        self
    }

    /// Set the sizing unit
    pub fn with_size_unit(mut self, size_unit: SizeUnit) -> Self {
        self.size_unit = size_unit;
        self
    }

    /// Reject a zero attempt budget and a non-positive or non-finite block size
    pub fn validate(&self) -> ExtractResult<()> {
        if self.max_attempts == 0 {
            return Err(ExtractError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.max_block_size.is_finite() || self.max_block_size <= 0.0 {
            return Err(ExtractError::InvalidConfig(format!(
                "max_block_size must be a positive number, got {}",
                self.max_block_size
            )));
        }
        Ok(())
    }
}
