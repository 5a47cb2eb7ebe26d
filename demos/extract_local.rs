//! Example extracting a month of a synthetic ocean grid in small blocks
//!
//! Run with:
//! ```bash
//! cargo run --example extract_local
//! ```

use grid_extract::dataset::{GridDataset, GridDimension, GridVariable, LocalSource};
use grid_extract::extractor::{ChunkedExtractor, DatasetExtractor, ExtractionConfig};
use grid_extract::{DimensionConstraint, Selection, SizeUnit};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("grid_extract=debug")
        .init();

    let workdir = tempfile::TempDir::new()?;
    let source_path = workdir.path().join("ocean_currents.json");

    // One year of daily values over three depths
    let days: Vec<f64> = (26_663..27_028).map(f64::from).collect();
    let depths = vec![0.49, 1.54, 2.65];
    let uo: Vec<f64> = (0..days.len() * depths.len()).map(|i| (i % 97) as f64 / 100.0).collect();
    GridDataset::new(
        vec![
            GridDimension::new("time", days).with_attribute("units", "days since 1950-01-01"),
            GridDimension::new("depth", depths),
        ],
        vec![GridVariable::new("uo", &["time", "depth"], uo)],
    )?
    .write(&source_path)?;

    let selection = Selection::new()
        .with_constraint("time", DimensionConstraint::range("2023-03-06", "2023-04-06"))
        .with_constraint("depth", DimensionConstraint::values([0.49]))
        .with_variables(["uo"]);
    let config = ExtractionConfig::default()
        .with_size_unit(SizeUnit::Byte)
        .with_max_block_size(128.0);

    let extractor = ChunkedExtractor::new(Arc::new(LocalSource::new(&source_path)), selection, config);

    let info = extractor.connect_now().await?;
    println!("Dimensions: {:?}", info.dimensions);
    println!("Size: {}", extractor.size(SizeUnit::KiloByte).await?);

    let output = workdir.path().join("uo_march.json");
    extractor.extract(
        output,
        Box::new(|result| println!("\n{result}\n{}", result.logs.join("\n"))),
        Box::new(|err| eprintln!("Extraction failed: {err}")),
    )?;

    while !extractor.wait(Some(Duration::from_millis(50))).await {
        println!("still working...");
    }
    extractor.close().await;
    Ok(())
}
