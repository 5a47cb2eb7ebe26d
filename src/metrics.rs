//! Extraction metrics
//!
//! Counters and histograms are recorded through the `metrics` facade. Without
//! an installed recorder every call is a no-op; the CLI installs a Prometheus
//! exporter when `--metrics-addr` is given.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Install the Prometheus exporter and describe every metric.
///
/// Idempotent: later calls return `Ok(())` without reinstalling.
///
/// # Arguments
/// * `addr` - Socket address of the scrape endpoint (e.g. "0.0.0.0:9090")
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "extraction_block_attempts_total",
        Unit::Count,
        "Block materialization attempts"
    );
    describe_counter!(
        "extraction_block_failures_total",
        Unit::Count,
        "Failed block materialization attempts"
    );
    describe_counter!(
        "extraction_blocks_fetched_total",
        Unit::Count,
        "Blocks materialized successfully"
    );
    describe_histogram!(
        "extraction_block_duration_seconds",
        Unit::Seconds,
        "Duration of one block materialization attempt"
    );
    describe_counter!(
        "extractions_completed_total",
        Unit::Count,
        "Extractions that covered the full requested range"
    );
    describe_counter!(
        "extractions_partial_total",
        Unit::Count,
        "Extractions that ended with a partial result"
    );
    describe_counter!(
        "extractions_failed_total",
        Unit::Count,
        "Extractions that ended with an error"
    );
    describe_counter!(
        "temp_file_cleanup_failures_total",
        Unit::Count,
        "Temporary block files that could not be removed"
    );

    *initialized = true;
    info!("Metrics exporter listening on {}", addr);
    Ok(())
}

/// Whether [`init_metrics`] has installed the exporter
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}

/// Timing and counters for one block attempt
pub struct BlockAttemptMetrics {
    block: usize,
    attempt: u32,
    start_time: Instant,
}

impl BlockAttemptMetrics {
    /// Count an attempt and start its timer
    pub fn start(block: usize, attempt: u32) -> Self {
        counter!("extraction_block_attempts_total").increment(1);
        Self {
            block,
            attempt,
            start_time: Instant::now(),
        }
    }

    /// Record a successful attempt
    pub fn record_success(&self) {
        let duration = self.start_time.elapsed();
        counter!("extraction_blocks_fetched_total").increment(1);
        histogram!("extraction_block_duration_seconds", "outcome" => "success")
            .record(duration.as_secs_f64());

        debug!(
            block = self.block,
            attempt = self.attempt,
            duration_ms = duration.as_millis(),
            "Block attempt succeeded"
        );
    }

    /// Record a failed attempt
    pub fn record_failure(&self) {
        let duration = self.start_time.elapsed();
        counter!("extraction_block_failures_total").increment(1);
        histogram!("extraction_block_duration_seconds", "outcome" => "failure")
            .record(duration.as_secs_f64());
    }
}

/// Outcome counters for one extraction
pub struct ExtractionMetrics {
    dataset: String,
    start_time: Instant,
}

impl ExtractionMetrics {
    /// Start tracking an extraction of `dataset`
    pub fn start(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            start_time: Instant::now(),
        }
    }

    /// Record an extraction that covered the full range
    pub fn record_complete(&self, blocks: usize) {
        counter!("extractions_completed_total").increment(1);
        info!(
            dataset = %self.dataset,
            blocks = blocks,
            duration_secs = self.start_time.elapsed().as_secs_f64(),
            "Extraction completed"
        );
    }

    /// Record an extraction that stopped after `fetched` of `planned` blocks
    pub fn record_partial(&self, fetched: usize, planned: usize) {
        counter!("extractions_partial_total").increment(1);
        warn!(
            dataset = %self.dataset,
            fetched = fetched,
            planned = planned,
            duration_secs = self.start_time.elapsed().as_secs_f64(),
            "Extraction ended with a partial result"
        );
    }

    /// Record a failed extraction
    pub fn record_failure(&self, error: &str) {
        counter!("extractions_failed_total").increment(1);
        warn!(
            dataset = %self.dataset,
            error = %error,
            duration_secs = self.start_time.elapsed().as_secs_f64(),
            "Extraction failed"
        );
    }
}

/// Record a temporary file that could not be removed
pub fn record_cleanup_failure() {
    counter!("temp_file_cleanup_failures_total").increment(1);
}
