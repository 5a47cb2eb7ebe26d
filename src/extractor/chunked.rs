//! Extractor over a [`DatasetSource`]

use super::engine::ChunkedExtractionEngine;
use super::{Callback, DatasetExtractor, ExtractError, ExtractResult, ExtractionConfig, ExtractionResult};
use crate::dataset::{DatasetHandle, DatasetSource};
use crate::runner::{RunnerRegistry, SingleFlightRunner};
use crate::{Selection, SizeEstimate, SizeUnit};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, info_span, Instrument, Span};

/// Runner slot of `connect`
pub const CONNECT_RUNNER: &str = "connect";

/// Runner slot of `extract`
pub const EXTRACT_RUNNER: &str = "extract";

type HandleSlot = Arc<RwLock<Option<Arc<dyn DatasetHandle>>>>;

/// What a successful connect reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    /// Dimension names in declared order
    pub dimensions: Vec<String>,
    /// Variable names in declared order
    pub variables: Vec<String>,
}

/// Extracts one selection from one dataset source.
///
/// Owns the open handle and the `connect` / `extract` runners. Every
/// operation runs inside the extractor's span (see [`ChunkedExtractor::with_span`]).
pub struct ChunkedExtractor {
    source: Arc<dyn DatasetSource>,
    selection: Selection,
    config: ExtractionConfig,
    handle: HandleSlot,
    runners: RunnerRegistry,
    span: Span,
}

impl ChunkedExtractor {
    /// Create an unconnected extractor
    pub fn new(source: Arc<dyn DatasetSource>, selection: Selection, config: ExtractionConfig) -> Self {
        let runners = RunnerRegistry::with_runners([CONNECT_RUNNER, EXTRACT_RUNNER]);
        let span = info_span!("extractor", source = %source.describe());

        Self {
            source,
            selection,
            config,
            handle: Arc::new(RwLock::new(None)),
            runners,
            span,
        }
    }

    /// Run every operation inside `span` instead of the default one
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// The requested selection
    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// The extraction configuration
    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// The runner slots (`connect`, `extract`)
    pub fn runners(&self) -> &RunnerRegistry {
        &self.runners
    }

    /// Wait for one runner slot to become idle
    pub async fn wait_for(&self, runner: &str, timeout: Option<Duration>) -> ExtractResult<bool> {
        Ok(self.runners.get_runner(runner)?.wait(timeout).await)
    }

    fn runner(&self, name: &str) -> ExtractResult<&SingleFlightRunner> {
        Ok(self.runners.get_runner(name)?)
    }

    async fn current_handle(&self) -> ExtractResult<Arc<dyn DatasetHandle>> {
        current_handle(&self.handle).await
    }
}

async fn current_handle(slot: &HandleSlot) -> ExtractResult<Arc<dyn DatasetHandle>> {
    slot.read().await.clone().ok_or(ExtractError::NotConnected)
}

async fn open_handle(source: Arc<dyn DatasetSource>, slot: HandleSlot) -> ExtractResult<ConnectionInfo> {
    let mut guard = slot.write().await;
    if let Some(previous) = guard.take() {
        debug!("Closing previous dataset handle");
        previous.close().await;
    }

    let handle: Arc<dyn DatasetHandle> = Arc::from(source.open().await?);
    let info = ConnectionInfo {
        dimensions: handle.dimension_names()?,
        variables: handle.variable_names()?,
    };
    *guard = Some(handle);

    info!(
        dimensions = ?info.dimensions,
        variables = info.variables.len(),
        "Connected to dataset"
    );
    Ok(info)
}

async fn run_extraction(
    slot: HandleSlot,
    selection: Selection,
    config: ExtractionConfig,
    description: String,
    destination: PathBuf,
) -> ExtractResult<ExtractionResult> {
    let handle = current_handle(&slot).await?;
    ChunkedExtractionEngine::new(handle, config)
        .with_description(description)
        .run(&selection, &destination)
        .await
}

#[async_trait]
impl DatasetExtractor for ChunkedExtractor {
    fn connect(
        &self,
        on_success: Callback<ConnectionInfo>,
        on_failure: Callback<ExtractError>,
    ) -> ExtractResult<()> {
        let operation = open_handle(self.source.clone(), self.handle.clone()).instrument(self.span.clone());
        self.runner(CONNECT_RUNNER)?.run(operation, on_success, on_failure)?;
        Ok(())
    }

    async fn connect_now(&self) -> ExtractResult<ConnectionInfo> {
        open_handle(self.source.clone(), self.handle.clone())
            .instrument(self.span.clone())
            .await
    }

    async fn size(&self, unit: SizeUnit) -> ExtractResult<SizeEstimate> {
        async {
            let handle = self.current_handle().await?;
            let bytes = handle.size_bytes(&self.selection).await?;
            let estimate = SizeEstimate::from_bytes(bytes, unit);
            debug!(bytes, estimate = %estimate, "Sized selection");
            Ok(estimate)
        }
        .instrument(self.span.clone())
        .await
    }

    async fn dimension_names(&self) -> ExtractResult<Vec<String>> {
        Ok(self.current_handle().await?.dimension_names()?)
    }

    async fn variable_names(&self) -> ExtractResult<Vec<String>> {
        Ok(self.current_handle().await?.variable_names()?)
    }

    fn extract(
        &self,
        destination: PathBuf,
        on_success: Callback<ExtractionResult>,
        on_failure: Callback<ExtractError>,
    ) -> ExtractResult<()> {
        let operation = run_extraction(
            self.handle.clone(),
            self.selection.clone(),
            self.config,
            self.source.describe(),
            destination,
        )
        .instrument(self.span.clone());
        self.runner(EXTRACT_RUNNER)?.run(operation, on_success, on_failure)?;
        Ok(())
    }

    async fn extract_now(&self, destination: &Path) -> ExtractResult<ExtractionResult> {
        run_extraction(
            self.handle.clone(),
            self.selection.clone(),
            self.config,
            self.source.describe(),
            destination.to_path_buf(),
        )
        .instrument(self.span.clone())
        .await
    }

    async fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        for name in self.runners.names() {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            let idle = match self.runners.get_runner(name) {
                Ok(runner) => runner.wait(remaining).await,
                Err(_) => true,
            };
            if !idle {
                return false;
            }
        }
        true
    }

    fn still_working(&self) -> bool {
        self.runners.any_running()
    }

    async fn close(&self) {
        let previous = self.handle.write().await.take();
        if let Some(handle) = previous {
            handle.close().instrument(self.span.clone()).await;
            info!(parent: &self.span, "Closed dataset");
        }
    }
}
