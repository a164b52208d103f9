//! Kolosal Tabular CLI Module
//!
//! Command-line interface for training, evaluation, prediction and
//! embedding extraction.

use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::categorical_encoders::CategoricalEmbeddingTransformer;
use crate::config::{
    AugTask, DataConfig, ExperimentConfig, NodeConfig, OptimizerConfig, SslTask, TaskKind,
    TrainerConfig,
};
use crate::tabular_model::TabularModel;
use crate::training::EvaluationRecord;
use crate::utils::{DataLoader, DataSaver};

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

fn print_records(records: &[EvaluationRecord]) {
    for record in records {
        if let Some(target) = &record.target {
            println!("  {}", accent(target));
        }
        for (key, value) in &record.metrics {
            println!("  {:<28} {}", muted(key), format!("{:.6}", value).white().bold());
        }
    }
    println!();
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "kolosal-tabular")]
#[command(author = "KolosalAI")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Neural Oblivious Decision Ensembles for tabular data")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train a model from an experiment configuration
    Train {
        /// Training data file (CSV, JSON, or Parquet)
        #[arg(short, long)]
        data: PathBuf,

        /// Experiment configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Held-out data evaluated after training
        #[arg(short, long)]
        test: Option<PathBuf>,

        /// Output model file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Evaluate a trained model on labelled data
    Evaluate {
        /// Trained model file
        #[arg(short, long)]
        model: PathBuf,

        /// Input data file
        #[arg(short, long)]
        data: PathBuf,
    },

    /// Make predictions using a trained model
    Predict {
        /// Trained model file
        #[arg(short, long)]
        model: PathBuf,

        /// Input data file
        #[arg(short, long)]
        data: PathBuf,

        /// Output predictions file (format from extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Append learned embedding columns for every categorical column
    Embed {
        /// Trained model file (fit with embed_categorical = true)
        #[arg(short, long)]
        model: PathBuf,

        /// Input data file
        #[arg(short, long)]
        data: PathBuf,

        /// Output file (format from extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also write the embedding mapping as JSON
        #[arg(long)]
        mapping: Option<PathBuf>,
    },

    /// Write a starter experiment configuration
    InitConfig {
        /// Task type (regression, classification, ssl)
        #[arg(long, default_value = "regression")]
        task: String,

        /// Output configuration file
        #[arg(short, long)]
        output: PathBuf,
    },
}

// ─── Commands ──────────────────────────────────────────────────────────────────

fn load(path: &Path) -> anyhow::Result<polars::prelude::DataFrame> {
    step_run("Loading data");
    let start = Instant::now();
    let df = DataLoader::new().load_auto(path)?;
    step_done(&format!("{} rows × {} cols in {:?}", df.height(), df.width(), start.elapsed()));
    Ok(df)
}

pub fn cmd_train(
    data_path: &Path,
    config_path: &Path,
    test_path: Option<&Path>,
    output: &Path,
) -> anyhow::Result<()> {
    section("Train");

    let config = ExperimentConfig::from_json_file(config_path)?;
    let df = load(data_path)?;
    let test = test_path.map(load).transpose()?;

    step_run(&format!("Training NODE ({})", config.model.task.to_string().cyan()));
    let start = Instant::now();
    let mut model = TabularModel::from_config(config);
    model.fit(&df, test.as_ref())?;
    let epochs = model.training_history().map(|h| h.len()).unwrap_or(0);
    step_done(&format!("{} epochs in {:?}", epochs, start.elapsed()));

    if let Some(last) = model.training_history().and_then(|h| h.last()) {
        println!();
        println!("  {:<16} {}", muted("Train loss"), format!("{:.6}", last.train_loss).white());
        println!("  {:<16} {}", muted("Valid loss"), format!("{:.6}", last.valid_loss).white());
    }
    if let Some(records) = model.test_results() {
        section("Test");
        print_records(records);
    }

    step_run(&format!("Saving → {}", output.display()));
    model.save_model(output)?;
    step_done("");
    println!();
    Ok(())
}

pub fn cmd_evaluate(model_path: &Path, data_path: &Path) -> anyhow::Result<()> {
    section("Evaluate");
    let model = TabularModel::load_model(model_path)?;
    let df = load(data_path)?;
    let records = model.evaluate(&df)?;
    println!();
    print_records(&records);
    Ok(())
}

pub fn cmd_predict(model_path: &Path, data_path: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    section("Predict");
    let model = TabularModel::load_model(model_path)?;
    let df = load(data_path)?;

    step_run("Predicting");
    let start = Instant::now();
    let mut predictions = model.predict(&df)?;
    step_done(&format!("{:?}", start.elapsed()));

    match output {
        Some(path) => {
            step_run(&format!("Saving → {}", path.display()));
            DataSaver::save_auto(&mut predictions, path)?;
            step_done(&format!("{} rows × {} cols", predictions.height(), predictions.width()));
        }
        None => println!("{}", predictions),
    }
    println!();
    Ok(())
}

pub fn cmd_embed(
    model_path: &Path,
    data_path: &Path,
    output: Option<&Path>,
    mapping: Option<&Path>,
) -> anyhow::Result<()> {
    section("Embed");
    let model = TabularModel::load_model(model_path)?;
    let df = load(data_path)?;

    let mut transformer = CategoricalEmbeddingTransformer::new(&model)?;
    let mut embedded = transformer.fit_transform(&df)?;
    for column in transformer.mapping().columns() {
        println!(
            "  {:<20} {}",
            muted(column.column()),
            format!("{} keys × {} dims", column.len(), column.dim()).white()
        );
    }

    if let Some(path) = mapping {
        transformer.save_mapping(path)?;
    }
    match output {
        Some(path) => {
            step_run(&format!("Saving → {}", path.display()));
            DataSaver::save_auto(&mut embedded, path)?;
            step_done(&format!("{} rows × {} cols", embedded.height(), embedded.width()));
        }
        None => println!("{}", embedded),
    }
    println!();
    Ok(())
}

/// Starter configuration with placeholder column names
pub fn starter_config(task: TaskKind) -> anyhow::Result<ExperimentConfig> {
    let targets: Vec<&str> = match task {
        TaskKind::Ssl => Vec::new(),
        _ => vec!["target"],
    };
    let data = DataConfig::new(targets, ["feature_1", "feature_2"], ["category"])?;
    let mut model = NodeConfig::new(task).with_num_trees(256).with_depth(4);
    if task == TaskKind::Ssl {
        model = model
            .with_ssl_task(SslTask::Denoising)
            .with_aug_task(AugTask::Cutmix)
            .with_embed_categorical(true);
    }
    Ok(ExperimentConfig::new(
        data,
        model,
        OptimizerConfig::default(),
        TrainerConfig::default(),
    ))
}

pub fn cmd_init_config(task: &str, output: &Path) -> anyhow::Result<()> {
    section("Init config");
    let task: TaskKind = task.parse()?;
    let config = starter_config(task)?;
    config.validate()?;
    config.to_json_file(output)?;
    println!("  {} {}", ok("✓"), format!("{} configuration → {}", task, output.display()));
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starter_configs_validate() {
        for task in [TaskKind::Regression, TaskKind::Classification, TaskKind::Ssl] {
            assert!(starter_config(task).unwrap().validate().is_ok());
        }
    }

    #[test]
    fn test_cli_parses_train() {
        let cli = Cli::try_parse_from([
            "kolosal-tabular", "train", "--data", "d.csv", "--config", "c.json", "--output", "m.json",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Train { test: None, .. }));
    }
}
