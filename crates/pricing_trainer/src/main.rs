//! Pricing model trainer CLI
//!
//! Offline trainer that writes the model/encoder artifact pair the pricing
//! server loads at startup.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use pricing_core::{ArtifactStore, ModelArtifact};
use pricing_trainer::{train_model_from_csv, ForestParams};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "pricing-train")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Train the dynamic pricing random forest", long_about = None)]
struct Args {
    /// Input CSV dataset path
    #[arg(short, long, default_value = "dataset.csv")]
    input: PathBuf,

    /// Output directory for the model and encoder files
    #[arg(short, long, default_value = "models")]
    output: PathBuf,

    /// Number of trees
    #[arg(long, default_value = "100")]
    trees: usize,

    /// Maximum tree depth
    #[arg(long, default_value = "10")]
    max_depth: usize,

    /// Minimum samples needed to split a node
    #[arg(long, default_value = "2")]
    min_samples_split: usize,

    /// Minimum samples per leaf
    #[arg(long, default_value = "1")]
    min_samples_leaf: usize,

    /// Disable bootstrap sampling
    #[arg(long)]
    no_bootstrap: bool,

    /// Random seed for bootstrap sampling
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Print metrics as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Pricing model trainer v{}", env!("CARGO_PKG_VERSION"));

    let params = ForestParams {
        n_trees: args.trees,
        max_depth: args.max_depth,
        min_samples_split: args.min_samples_split,
        min_samples_leaf: args.min_samples_leaf,
        bootstrap: !args.no_bootstrap,
        seed: args.seed,
    };
    info!(?params, input = %args.input.display(), "Training configuration");

    let trained = train_model_from_csv(&args.input, &params)
        .with_context(|| format!("Failed to train from {}", args.input.display()))?;

    let artifact = ModelArtifact::new(trained.forest, trained.encoders, Utc::now())
        .context("Failed to stamp model artifact")?;
    ArtifactStore::new(&args.output)
        .save(&artifact)
        .context("Failed to write model artifacts")?;

    info!(
        generation = %artifact.generation,
        r2 = trained.metrics.r2_score,
        rmse = trained.metrics.rmse,
        output = %args.output.display(),
        "Training completed successfully"
    );

    if args.json {
        let json = serde_json::to_string_pretty(&trained.metrics)
            .context("Failed to serialize metrics")?;
        println!("{json}");
    }

    Ok(())
}
