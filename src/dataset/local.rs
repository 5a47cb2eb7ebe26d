//! Grid documents on the local filesystem

use super::{DatasetError, DatasetHandle, DatasetResult, DatasetSource, GridDataset, GridHandle};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

/// Opens a grid document from disk
#[derive(Debug, Clone)]
pub struct LocalSource {
    path: PathBuf,
}

impl LocalSource {
    /// Create a source for the document at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Document location
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DatasetSource for LocalSource {
    async fn open(&self) -> DatasetResult<Box<dyn DatasetHandle>> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            DatasetError::Transport(format!("failed to open {}: {e}", self.path.display()))
        })?;
        let dataset = GridDataset::from_slice(&bytes)?;

        info!(
            path = %self.path.display(),
            dimensions = dataset.dimensions.len(),
            variables = dataset.variables.len(),
            "Opened local dataset"
        );
        Ok(Box::new(GridHandle::new(self.describe(), dataset)))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
