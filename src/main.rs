//! Kolosal Tabular - Main Entry Point

use clap::Parser;
use kolosal_tabular::cli::{cmd_embed, cmd_evaluate, cmd_init_config, cmd_predict, cmd_train, Cli, Commands};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kolosal_tabular=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train { data, config, test, output } => {
            cmd_train(&data, &config, test.as_deref(), &output)?;
        }
        Commands::Evaluate { model, data } => {
            cmd_evaluate(&model, &data)?;
        }
        Commands::Predict { model, data, output } => {
            cmd_predict(&model, &data, output.as_deref())?;
        }
        Commands::Embed { model, data, output, mapping } => {
            cmd_embed(&model, &data, output.as_deref(), mapping.as_deref())?;
        }
        Commands::InitConfig { task, output } => {
            cmd_init_config(&task, &output)?;
        }
    }

    Ok(())
}
