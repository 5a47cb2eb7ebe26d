//! Shared fixtures: sample grids and an instrumented dataset handle

#![allow(dead_code)]

use async_trait::async_trait;
use grid_extract::dataset::{
    DatasetError, DatasetHandle, DatasetResult, DatasetSource, DimensionInfo, GridDataset,
    GridDimension, GridHandle, GridVariable,
};
use grid_extract::extractor::ExtractionConfig;
use grid_extract::{FileRef, Selection, SizeUnit};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// `len` daily steps from 2000-01-01 and `uo[t] = t`: `(2 * len) * 8` bytes
pub fn daily_grid(len: usize) -> GridDataset {
    let values: Vec<f64> = (0..len).map(|i| i as f64).collect();
    GridDataset::new(
        vec![GridDimension::new("time", values.clone())
            .with_attribute("units", "days since 2000-01-01")
            .with_attribute("axis", "T")],
        vec![GridVariable::new("uo", &["time"], values)],
    )
    .unwrap()
}

/// 160 bytes at 40 bytes per block: 4 blocks of 3 steps over 10 steps
pub fn four_block_config(max_attempts: u32) -> ExtractionConfig {
    ExtractionConfig::default()
        .with_size_unit(SizeUnit::Byte)
        .with_max_block_size(40.0)
        .with_max_attempts(max_attempts)
}

/// Temporary block files left in `dir`
pub fn leftover_temp_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("tmp_dataset"))
        })
        .collect()
}

/// Shared counters of a [`FlakyHandle`]
#[derive(Default)]
pub struct Tally {
    attempts: Mutex<HashMap<usize, u32>>,
    failures: Mutex<HashMap<usize, u32>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl Tally {
    /// Make block `ordinal` fail its first `times` attempts (`u32::MAX`: always)
    pub fn fail_block(&self, ordinal: usize, times: u32) {
        self.failures.lock().unwrap().insert(ordinal, times);
    }

    /// Attempts made on block `ordinal`
    pub fn attempts(&self, ordinal: usize) -> u32 {
        self.attempts.lock().unwrap().get(&ordinal).copied().unwrap_or(0)
    }

    /// Highest number of concurrent materializations observed
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

/// Block number encoded in a temporary file name (`tmp_dataset_<stamp>_<n>.json`)
fn ordinal_of(destination: &Path) -> usize {
    destination
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.rsplit('_').next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

/// Grid handle with injectable block failures and an optional gate that
/// holds every materialization until permits are added
pub struct FlakyHandle {
    inner: GridHandle,
    tally: Arc<Tally>,
    gate: Option<Arc<Semaphore>>,
}

impl FlakyHandle {
    pub fn new(dataset: GridDataset, tally: Arc<Tally>) -> Self {
        Self {
            inner: GridHandle::new("flaky", dataset),
            tally,
            gate: None,
        }
    }

    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }
}

#[async_trait]
impl DatasetHandle for FlakyHandle {
    fn dimensions(&self) -> DatasetResult<Vec<DimensionInfo>> {
        self.inner.dimensions()
    }

    fn variable_names(&self) -> DatasetResult<Vec<String>> {
        self.inner.variable_names()
    }

    async fn size_bytes(&self, selection: &Selection) -> DatasetResult<u64> {
        self.inner.size_bytes(selection).await
    }

    async fn coordinates(&self, selection: &Selection, dimension: &str) -> DatasetResult<Vec<f64>> {
        self.inner.coordinates(selection, dimension).await
    }

    async fn materialize(&self, selection: &Selection, destination: &Path) -> DatasetResult<FileRef> {
        let now = self.tally.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.tally.max_active.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await;
        }

        let ordinal = ordinal_of(destination);
        let attempt = {
            let mut attempts = self.tally.attempts.lock().unwrap();
            let entry = attempts.entry(ordinal).or_insert(0);
            *entry += 1;
            *entry
        };
        let fail_times = self.tally.failures.lock().unwrap().get(&ordinal).copied().unwrap_or(0);

        let result = if attempt <= fail_times {
            Err(DatasetError::Transport(format!(
                "injected failure on block {ordinal} attempt {attempt}"
            )))
        } else {
            self.inner.materialize(selection, destination).await
        };

        self.tally.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn merge(&self, parts: &[FileRef], ordering_dimension: &str, destination: &Path) -> DatasetResult<FileRef> {
        self.inner.merge(parts, ordering_dimension, destination).await
    }

    async fn bounds_of(&self, file: &FileRef, dimension: &str) -> DatasetResult<Option<(f64, f64)>> {
        self.inner.bounds_of(file, dimension).await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

/// Source opening a fresh [`FlakyHandle`] over the same grid on every connect
pub struct FlakySource {
    dataset: GridDataset,
    tally: Arc<Tally>,
    gate: Option<Arc<Semaphore>>,
    opens: AtomicUsize,
}

impl FlakySource {
    pub fn new(dataset: GridDataset, tally: Arc<Tally>) -> Self {
        Self {
            dataset,
            tally,
            gate: None,
            opens: AtomicUsize::new(0),
        }
    }

    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatasetSource for FlakySource {
    async fn open(&self) -> DatasetResult<Box<dyn DatasetHandle>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let mut handle = FlakyHandle::new(self.dataset.clone(), self.tally.clone());
        if let Some(gate) = &self.gate {
            handle = handle.with_gate(gate.clone());
        }
        Ok(Box::new(handle))
    }

    fn describe(&self) -> String {
        "flaky".to_string()
    }
}
