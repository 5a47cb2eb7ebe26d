//! Integration tests for the chunked extraction engine

use crate::common::{daily_grid, four_block_config, leftover_temp_files, FlakyHandle, Tally};
use chrono::{TimeZone, Utc};
use grid_extract::dataset::{DatasetError, GridDataset, GridDimension, GridHandle, GridVariable};
use grid_extract::extractor::{ChunkedExtractionEngine, ExtractionConfig};
use grid_extract::{DimensionConstraint, ExtractError, Selection, SizeUnit};
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_complete_extraction_covers_everything() {
    let dir = TempDir::new().unwrap();
    let destination = dir.path().join("merged.json");
    let tally = Arc::new(Tally::default());
    let handle = Arc::new(FlakyHandle::new(daily_grid(10), tally.clone()));

    let result = ChunkedExtractionEngine::new(handle, four_block_config(3))
        .run(&Selection::new(), &destination)
        .await
        .unwrap();

    assert!(result.complete);
    assert_eq!(result.blocks_planned, 4);
    assert_eq!(result.blocks_fetched, 4);
    assert_eq!(result.time_min.unwrap().value, 0.0);
    assert_eq!(result.time_max.unwrap().value, 9.0);
    assert_eq!(
        result.time_max.unwrap().datetime,
        Some(Utc.with_ymd_and_hms(2000, 1, 10, 0, 0, 0).unwrap())
    );
    for ordinal in 1..=4 {
        assert_eq!(tally.attempts(ordinal), 1);
    }

    // Blocks reassemble the requested grid without gaps or overlaps
    assert_eq!(GridDataset::read(&destination).unwrap(), daily_grid(10));
    assert!(leftover_temp_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_failing_third_block_yields_partial_result() {
    let dir = TempDir::new().unwrap();
    let destination = dir.path().join("merged.json");
    let tally = Arc::new(Tally::default());
    tally.fail_block(3, u32::MAX);
    let handle = Arc::new(FlakyHandle::new(daily_grid(10), tally.clone()));

    let result = ChunkedExtractionEngine::new(handle, four_block_config(3))
        .run(&Selection::new(), &destination)
        .await
        .unwrap();

    assert!(!result.complete);
    assert_eq!(result.blocks_planned, 4);
    assert_eq!(result.blocks_fetched, 2);
    assert_eq!(result.time_min.unwrap().value, 0.0);
    assert_eq!(result.time_max.unwrap().value, 5.0);

    assert_eq!(tally.attempts(1), 1);
    assert_eq!(tally.attempts(2), 1);
    assert_eq!(tally.attempts(3), 3);
    assert_eq!(tally.attempts(4), 0);

    let failures = result
        .logs
        .iter()
        .filter(|line| line.starts_with("Block 3: attempt"))
        .count();
    assert_eq!(failures, 3);
    assert!(result
        .logs
        .iter()
        .any(|line| line.starts_with("Merging 2 block(s) (steps 0..6)")));

    let merged = GridDataset::read(&destination).unwrap();
    assert_eq!(merged.dimension("time").unwrap().values, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    assert!(leftover_temp_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_first_block_exhaustion_is_fatal() {
    let dir = TempDir::new().unwrap();
    let destination = dir.path().join("merged.json");
    let tally = Arc::new(Tally::default());
    tally.fail_block(1, u32::MAX);
    let handle = Arc::new(FlakyHandle::new(daily_grid(10), tally.clone()));

    let err = ChunkedExtractionEngine::new(handle, four_block_config(2))
        .run(&Selection::new(), &destination)
        .await
        .unwrap_err();

    match err {
        ExtractError::FirstBlockExhausted { attempts, last_error } => {
            assert_eq!(attempts, 2);
            assert!(matches!(last_error, DatasetError::Transport(_)));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(tally.attempts(1), 2);
    assert_eq!(tally.attempts(2), 0);
    assert!(!destination.exists());
    assert!(leftover_temp_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_transient_failure_is_retried_in_place() {
    let dir = TempDir::new().unwrap();
    let destination = dir.path().join("merged.json");
    let tally = Arc::new(Tally::default());
    tally.fail_block(2, 2);
    let handle = Arc::new(FlakyHandle::new(daily_grid(10), tally.clone()));

    let result = ChunkedExtractionEngine::new(handle, four_block_config(3))
        .run(&Selection::new(), &destination)
        .await
        .unwrap();

    assert!(result.complete);
    assert_eq!(tally.attempts(2), 3);
    assert_eq!(tally.max_active(), 1);
}

#[tokio::test]
async fn test_constrained_selection_is_respected() {
    let dir = TempDir::new().unwrap();
    let destination = dir.path().join("merged.json");
    let handle = Arc::new(GridHandle::new("memory", daily_grid(30)));
    let selection = Selection::new()
        .with_constraint("time", DimensionConstraint::range("2000-01-05", "2000-01-20"));

    let config = ExtractionConfig::default()
        .with_size_unit(SizeUnit::Byte)
        .with_max_block_size(50.0);
    let result = ChunkedExtractionEngine::new(handle, config)
        .run(&selection, &destination)
        .await
        .unwrap();

    // 16 steps * 2 values * 8 bytes = 256 bytes -> 6 requested blocks of 3
    assert!(result.complete);
    assert_eq!(result.blocks_planned, 6);
    assert_eq!(result.time_min.unwrap().value, 4.0);
    assert_eq!(result.time_max.unwrap().value, 19.0);
    assert_eq!(
        GridDataset::read(&destination).unwrap().dimension("time").unwrap().values.len(),
        16
    );
}

#[tokio::test]
async fn test_missing_ordering_dimension() {
    let dir = TempDir::new().unwrap();
    let dataset = GridDataset::new(
        vec![GridDimension::new("latitude", vec![10.0, 11.0]).with_attribute("axis", "Y")],
        vec![GridVariable::new("sst", &["latitude"], vec![1.0, 2.0])],
    )
    .unwrap();
    let handle = Arc::new(GridHandle::new("memory", dataset));

    let err = ChunkedExtractionEngine::new(handle, ExtractionConfig::default())
        .run(&Selection::new(), &dir.path().join("out.json"))
        .await
        .unwrap_err();
    assert_eq!(err, ExtractError::NoOrderingDimension);
}

#[tokio::test]
async fn test_empty_ordering_dimension_fetches_once() {
    let dir = TempDir::new().unwrap();
    let destination = dir.path().join("merged.json");
    let tally = Arc::new(Tally::default());
    let handle = Arc::new(FlakyHandle::new(daily_grid(0), tally.clone()));

    let result = ChunkedExtractionEngine::new(handle, four_block_config(3))
        .run(&Selection::new(), &destination)
        .await
        .unwrap();

    assert!(result.complete);
    assert_eq!(result.blocks_planned, 1);
    assert_eq!(tally.attempts(1), 1);
    assert!(result.time_min.is_none());
    assert!(destination.exists());
}

#[tokio::test]
async fn test_invalid_config_is_rejected_before_fetching() {
    let dir = TempDir::new().unwrap();
    let tally = Arc::new(Tally::default());
    let handle = Arc::new(FlakyHandle::new(daily_grid(10), tally.clone()));

    let err = ChunkedExtractionEngine::new(handle, ExtractionConfig::default().with_max_block_size(0.0))
        .run(&Selection::new(), &dir.path().join("out.json"))
        .await
        .unwrap_err();

    assert!(matches!(err, ExtractError::InvalidConfig(_)));
    assert_eq!(tally.attempts(1), 0);
}

#[tokio::test]
async fn test_value_set_on_time_fetches_only_listed_steps() {
    let dir = TempDir::new().unwrap();
    let destination = dir.path().join("merged.json");
    let handle = Arc::new(GridHandle::new("memory", daily_grid(10)));
    let selection = Selection::new().with_constraint("time", DimensionConstraint::values([0.0, 9.0]));

    let result = ChunkedExtractionEngine::new(handle.clone(), ExtractionConfig::default())
        .run(&selection, &destination)
        .await
        .unwrap();

    assert!(result.complete);
    let merged = GridDataset::read(&destination).unwrap();
    assert_eq!(merged.dimension("time").unwrap().values, vec![0.0, 9.0]);
    assert_eq!(merged.variables[0].data, vec![0.0, 9.0]);

    // 2 steps * 2 values * 8 bytes = 32 bytes -> 2 blocks of one step each
    let config = ExtractionConfig::default()
        .with_size_unit(SizeUnit::Byte)
        .with_max_block_size(16.0);
    let result = ChunkedExtractionEngine::new(handle, config)
        .run(&selection, &destination)
        .await
        .unwrap();

    assert_eq!(result.blocks_planned, 2);
    assert_eq!(result.blocks_fetched, 2);
    let merged = GridDataset::read(&destination).unwrap();
    assert_eq!(merged.dimension("time").unwrap().values, vec![0.0, 9.0]);
}

#[tokio::test]
async fn test_descending_time_axis_merges_in_axis_order() {
    let dir = TempDir::new().unwrap();
    let destination = dir.path().join("merged.json");
    let values: Vec<f64> = (0..10).rev().map(f64::from).collect();
    let dataset = GridDataset::new(
        vec![GridDimension::new("time", values.clone()).with_attribute("units", "days since 2000-01-01")],
        vec![GridVariable::new("uo", &["time"], values.clone())],
    )
    .unwrap();
    let handle = Arc::new(GridHandle::new("memory", dataset));

    let result = ChunkedExtractionEngine::new(handle, four_block_config(3))
        .run(&Selection::new(), &destination)
        .await
        .unwrap();

    assert!(result.complete);
    assert_eq!(result.blocks_planned, 4);
    assert_eq!(result.time_min.unwrap().value, 0.0);
    assert_eq!(result.time_max.unwrap().value, 9.0);

    let merged = GridDataset::read(&destination).unwrap();
    assert_eq!(merged.dimension("time").unwrap().values, values);
    assert_eq!(merged.variables[0].data, values);
}
