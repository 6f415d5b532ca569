//! Kestrel - external vision aided navigation estimator

use clap::{Parser, Subcommand};
use kestrel_core::EkfConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "kestrel")]
#[command(about = "Error-state EKF with external vision fusion")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulated external vision scenario
    Run {
        /// Pass remaining arguments to kestrel-cli
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Print the default estimator configuration as JSON
    Config,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { args } => {
            let cli_args: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
            run_cli(&cli_args)
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&EkfConfig::default())?);
            Ok(())
        }
    }
}

fn run_cli(args: &[&str]) -> anyhow::Result<()> {
    let mut full_args = vec!["kestrel-cli"];
    full_args.extend(args);

    match kestrel_cli::run_cli_main(&full_args) {
        Ok(_) => Ok(()),
        Err(e) => {
            tracing::error!("scenario failed: {e:#}");
            std::process::exit(1);
        }
    }
}
