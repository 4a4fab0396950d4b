//! Command-line entry point: read an enriched inspection report, estimate
//! every issue, write the results as JSON.

use anyhow::{Context, Result};
use costfuse::{EstimatorConfig, Estimator, InspectionReport};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("costfuse=info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let input_path = args
        .next()
        .context("usage: costfuse <enriched_report.json> [output.json]")?;
    let output_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| default_output_path(&input_path));

    let raw = std::fs::read_to_string(&input_path)
        .with_context(|| format!("reading {}", input_path))?;
    let report: InspectionReport =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", input_path))?;

    let config = EstimatorConfig::from_env();
    if config.api_key.is_none() {
        tracing::warn!("GEMINI_API_KEY not set; running in catalog/fallback-only mode");
    }

    let mut estimator = Estimator::new(config);
    let output = estimator.estimate_report(&report).await;

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    let json = serde_json::to_string_pretty(&output)?;
    std::fs::write(&output_path, json)
        .with_context(|| format!("writing {}", output_path.display()))?;

    tracing::info!(
        "Wrote {} estimates to {}",
        output.cost_estimates.len(),
        output_path.display()
    );
    Ok(())
}

fn default_output_path(input: &str) -> PathBuf {
    let stem = Path::new(input)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("report")
        .trim_end_matches("_enriched")
        .to_string();
    PathBuf::from(format!("{}_estimates.json", stem))
}
