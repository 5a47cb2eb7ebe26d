//! `extract`, `size` and `inspect` commands

use crate::dataset::create_source;
use crate::extractor::chunked::{CONNECT_RUNNER, EXTRACT_RUNNER};
use crate::extractor::{
    Callback, ChunkedExtractor, ConnectionInfo, DatasetExtractor, ExtractError, ExtractResult,
    ExtractionConfig, ExtractionResult,
};
use crate::SizeUnit;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info_span};

use super::request::RequestFile;
use super::CliError;

/// Grid Extract CLI
#[derive(Parser, Debug)]
#[command(name = "grid-extract")]
#[command(about = "Extract subsets of large gridded datasets in bounded blocks", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9090)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract the requested subset into one file
    Extract(ExtractArgs),
    /// Print the payload size of the requested subset
    Size(SizeArgs),
    /// Print the dimensions and variables of the dataset
    Inspect(InspectArgs),
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

/// Arguments of `extract`
#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// Request file (JSON)
    pub request: PathBuf,

    /// Output file (overrides the request)
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Attempts per block (overrides the request)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: Option<u32>,

    /// Largest payload per block, in --unit (overrides the request)
    #[arg(long)]
    pub max_block_size: Option<f64>,

    /// Unit of --max-block-size: B, KB, MB or GB
    #[arg(long)]
    pub unit: Option<SizeUnit>,
}

/// Arguments of `size`
#[derive(Args, Debug)]
pub struct SizeArgs {
    /// Request file (JSON)
    pub request: PathBuf,

    /// Unit of the reported size: B, KB, MB or GB
    #[arg(long, default_value = "MB")]
    pub unit: SizeUnit,
}

/// Arguments of `inspect`
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Request file (JSON)
    pub request: PathBuf,
}

fn build_extractor(request: &RequestFile, config: ExtractionConfig) -> Result<ChunkedExtractor, CliError> {
    config.validate()?;
    let source = create_source(&request.url, request.credential()?)?;
    let span = info_span!("request", url = %request.url);
    Ok(ChunkedExtractor::new(source, request.selection(), config).with_span(span))
}

fn create_spinner(format: OutputFormat, message: &str) -> ProgressBar {
    if format == OutputFormat::Json {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

/// Start a background operation and wait for its callback
async fn run_in_background<T, F>(extractor: &ChunkedExtractor, runner: &str, start: F) -> Result<T, CliError>
where
    T: Send + 'static,
    F: FnOnce(Callback<T>, Callback<ExtractError>) -> ExtractResult<()>,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    let failure_tx = tx.clone();
    start(
        Box::new(move |value| {
            let _ = tx.send(Ok(value));
        }),
        Box::new(move |err| {
            let _ = failure_tx.send(Err(err));
        }),
    )?;

    extractor.wait_for(runner, None).await?;
    match rx.recv().await {
        Some(result) => Ok(result?),
        None => Err(CliError::NoResult(runner.to_string())),
    }
}

impl ExtractArgs {
    /// Run the extraction through the background runners
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let request = RequestFile::load(&self.request)?;
        let config = request.config(self.max_attempts, self.max_block_size, self.unit);
        let destination = request.output(self.output.as_deref());
        let extractor = build_extractor(&request, config)?;

        let spinner = create_spinner(cli.output_format, &format!("Connecting to {}", request.url));
        let connected = run_in_background(&extractor, CONNECT_RUNNER, |ok, err| extractor.connect(ok, err)).await;
        if let Err(e) = connected {
            spinner.finish_and_clear();
            return Err(e);
        }

        spinner.set_message(format!("Extracting into {}", destination.display()));
        let result = run_in_background(&extractor, EXTRACT_RUNNER, |ok, err| {
            extractor.extract(destination.clone(), ok, err)
        })
        .await;
        spinner.finish_and_clear();
        extractor.close().await;

        match cli.output_format {
            OutputFormat::Json => output_json(&result),
            OutputFormat::Human => output_human(&result),
        }
        result.map(|_| ())
    }
}

impl SizeArgs {
    /// Connect and print the size estimate
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let request = RequestFile::load(&self.request)?;
        let extractor = build_extractor(&request, request.config(None, None, None))?;

        extractor.connect_now().await?;
        let size = extractor.size(self.unit).await;
        extractor.close().await;
        let size = size?;

        match cli.output_format {
            OutputFormat::Json => print_json(&size),
            OutputFormat::Human => println!("Size: {size}"),
        }
        Ok(())
    }
}

impl InspectArgs {
    /// Connect and print dimension and variable names
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let request = RequestFile::load(&self.request)?;
        let extractor = build_extractor(&request, request.config(None, None, None))?;

        let info: ConnectionInfo = extractor.connect_now().await?;
        extractor.close().await;

        match cli.output_format {
            OutputFormat::Json => print_json(&info),
            OutputFormat::Human => {
                println!("Dataset: {}", request.url);
                println!("Dimensions: {}", info.dimensions.join(", "));
                println!("Variables: {}", info.variables.join(", "));
            }
        }
        Ok(())
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => error!("Failed to serialize output: {}", e),
    }
}

fn output_json(result: &Result<ExtractionResult, CliError>) {
    match result {
        Ok(result) => print_json(&serde_json::json!({
            "success": true,
            "result": result,
        })),
        Err(e) => print_json(&serde_json::json!({
            "success": false,
            "error": e.to_string(),
        })),
    }
}

fn output_human(result: &Result<ExtractionResult, CliError>) {
    match result {
        Ok(result) => {
            if result.complete {
                println!("\nExtraction completed successfully!");
            } else {
                println!("\nExtraction stopped early; partial result written.");
            }
            println!("Output: {}", result.file.path().display());
            println!("Blocks: {}/{}", result.blocks_fetched, result.blocks_planned);
            if let (Some(min), Some(max)) = (&result.time_min, &result.time_max) {
                println!("Range: {min} .. {max}");
            }
        }
        Err(e) => {
            eprintln!("\nExtraction failed!");
            eprintln!("Error: {e}");
        }
    }
}
