use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use line_net_rust::{config::Config, run};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Train and evaluate line clustering networks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a network, or resume a run when the config says so
    Train {
        #[arg(long, help = "TOML config, else $LINE_NET_CONFIG or ./line-net.toml")]
        config: Option<PathBuf>,

        #[arg(long, help = "Override training.epochs")]
        epochs: Option<usize>,

        #[arg(long, help = "Override training.log_dir")]
        log_dir: Option<PathBuf>,
    },
    /// Evaluate a checkpoint on the test (or validation) data
    Evaluate {
        #[arg(long, help = "Checkpoint file written during training")]
        checkpoint: PathBuf,

        #[arg(long, help = "Path to a TOML config")]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("line_net_rust=info")),
        )
        .init();

    match Cli::parse().command {
        Command::Train {
            config,
            epochs,
            log_dir,
        } => {
            let mut config = Config::load(config.as_deref()).context("loading config")?;
            if let Some(epochs) = epochs {
                config.training.epochs = epochs;
            }
            if log_dir.is_some() {
                config.training.log_dir = log_dir;
            }

            let outcome = run::train(&config).context("training failed")?;
            if let Some(last) = outcome.history.last() {
                println!(
                    "epoch {}: loss {:.4} accuracy {:.4} (logs in {})",
                    last.epoch + 1,
                    last.loss,
                    last.accuracy,
                    outcome.log_dir.display()
                );
            }
        }
        Command::Evaluate { checkpoint, config } => {
            let config = Config::load(config.as_deref()).context("loading config")?;
            let evaluation = run::evaluate_checkpoint(&config, &checkpoint)
                .with_context(|| format!("evaluating {}", checkpoint.display()))?;
            println!("{}", serde_json::to_string_pretty(&evaluation)?);
        }
    }
    Ok(())
}
