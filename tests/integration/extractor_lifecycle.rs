//! Integration tests for the extractor and its single-flight runners

use crate::common::{daily_grid, four_block_config, FlakySource, Tally};
use grid_extract::dataset::{DatasetHandle, DatasetSource, LocalSource};
use grid_extract::extractor::{ChunkedExtractor, DatasetExtractor, ExtractionConfig};
use grid_extract::{ExtractError, ExtractionResult, RunnerError, Selection, SizeUnit};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;

#[tokio::test]
async fn test_second_extract_while_running_is_busy() {
    let dir = TempDir::new().unwrap();
    let tally = Arc::new(Tally::default());
    let gate = Arc::new(Semaphore::new(0));
    let source = Arc::new(FlakySource::new(daily_grid(10), tally.clone()).with_gate(gate.clone()));
    let extractor = ChunkedExtractor::new(source, Selection::new(), four_block_config(3));
    extractor.connect_now().await.unwrap();

    let results: Arc<Mutex<Vec<ExtractionResult>>> = Arc::default();
    let sink = results.clone();
    extractor
        .extract(
            dir.path().join("first.json"),
            Box::new(move |result| sink.lock().unwrap().push(result)),
            Box::new(|e| panic!("extraction failed: {e}")),
        )
        .unwrap();
    assert!(extractor.still_working());

    let second = extractor.extract(
        dir.path().join("second.json"),
        Box::new(|_| panic!("second extraction must not run")),
        Box::new(|_| panic!("second extraction must not run")),
    );
    assert_eq!(
        second,
        Err(ExtractError::Runner(RunnerError::Busy("extract".to_string())))
    );

    // A wait that times out leaves the extraction running
    assert!(!extractor.wait(Some(Duration::from_millis(20))).await);
    assert!(extractor.still_working());

    gate.add_permits(64);
    assert!(extractor.wait(Some(Duration::from_secs(10))).await);
    assert!(!extractor.still_working());

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].complete);
    assert_eq!(tally.max_active(), 1);
    assert!(!dir.path().join("second.json").exists());
}

#[tokio::test]
async fn test_extract_failure_reaches_failure_callback() {
    let dir = TempDir::new().unwrap();
    let tally = Arc::new(Tally::default());
    tally.fail_block(1, u32::MAX);
    let source = Arc::new(FlakySource::new(daily_grid(10), tally));
    let extractor = ChunkedExtractor::new(source, Selection::new(), four_block_config(2));
    extractor.connect_now().await.unwrap();

    let failures = Arc::new(AtomicUsize::new(0));
    let counter = failures.clone();
    extractor
        .extract(
            dir.path().join("out.json"),
            Box::new(|_| panic!("unexpected success")),
            Box::new(move |e| {
                assert!(matches!(e, ExtractError::FirstBlockExhausted { attempts: 2, .. }));
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

    assert!(extractor.wait(None).await);
    assert_eq!(failures.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_extract_before_connect_fails_through_callback() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(FlakySource::new(daily_grid(10), Arc::new(Tally::default())));
    let extractor = ChunkedExtractor::new(source, Selection::new(), ExtractionConfig::default());

    let (tx, rx) = tokio::sync::oneshot::channel();
    extractor
        .extract(
            dir.path().join("out.json"),
            Box::new(|_| panic!("unexpected success")),
            Box::new(move |e| {
                let _ = tx.send(e);
            }),
        )
        .unwrap();

    assert_eq!(rx.await.unwrap(), ExtractError::NotConnected);
}

#[tokio::test]
async fn test_connect_closes_previous_handle() {
    let tally = Arc::new(Tally::default());
    let source = Arc::new(FlakySource::new(daily_grid(4), tally));
    let extractor = ChunkedExtractor::new(source.clone(), Selection::new(), ExtractionConfig::default());

    extractor.connect_now().await.unwrap();
    extractor.connect_now().await.unwrap();
    assert_eq!(source.opens(), 2);
    assert_eq!(extractor.dimension_names().await.unwrap(), vec!["time"]);

    extractor.close().await;
    extractor.close().await;
    assert_eq!(extractor.size(SizeUnit::Byte).await, Err(ExtractError::NotConnected));
}

#[tokio::test]
async fn test_close_without_connect() {
    let source = Arc::new(FlakySource::new(daily_grid(4), Arc::new(Tally::default())));
    let extractor = ChunkedExtractor::new(source, Selection::new(), ExtractionConfig::default());
    extractor.close().await;
    extractor.close().await;
    assert!(!extractor.still_working());
}

#[tokio::test]
async fn test_round_trip_through_local_source() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.json");
    daily_grid(10).write(&input).unwrap();

    let extractor = ChunkedExtractor::new(
        Arc::new(LocalSource::new(&input)),
        Selection::new(),
        four_block_config(3),
    );
    extractor.connect_now().await.unwrap();

    let size = extractor.size(SizeUnit::Byte).await.unwrap();
    assert_eq!(size.size, 160.0);
    assert_eq!(extractor.size(SizeUnit::KiloByte).await.unwrap().size, 0.16);

    let output = dir.path().join("out").join("merged.json");
    let result = extractor.extract_now(&output).await.unwrap();
    extractor.close().await;

    // Re-opening the merged file reports the same extent
    let reopened = ChunkedExtractor::new(
        Arc::new(LocalSource::new(result.file.path())),
        Selection::new(),
        ExtractionConfig::default(),
    );
    reopened.connect_now().await.unwrap();
    let handle = LocalSource::new(result.file.path()).open().await.unwrap();
    let bounds = handle.bounds_of(&result.file, "time").await.unwrap();
    assert_eq!(
        bounds,
        Some((result.time_min.unwrap().value, result.time_max.unwrap().value))
    );
    assert_eq!(reopened.variable_names().await.unwrap(), vec!["uo"]);
    reopened.close().await;
}
