//! hsae CLI: plan, train and run spectral autoencoders from the terminal.

mod commands;
mod config;

use clap::Parser;
use commands::Inference;
use config::RunConfig;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// hsae: parametric autoencoders for spectral data
#[derive(Parser, Debug)]
#[command(name = "hsae", version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Write JSON logs to this directory (defaults to the user data dir)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Disable the JSON log file
    #[arg(long, global = true)]
    no_log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print the layer shapes of the configured network
    Plan {
        /// Run configuration (.toml or .json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Train the configured network
    Train {
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Training samples: a JSON array of sample arrays
        #[arg(short, long)]
        data: PathBuf,
        /// Validation samples in the same format
        #[arg(long)]
        val: Option<PathBuf>,
    },
    /// Map samples to latent codes
    Encode(InferArgs),
    /// Map latent codes back to samples
    Decode(InferArgs),
    /// Encode then decode samples
    Reconstruct(InferArgs),
}

#[derive(clap::Args, Debug)]
struct InferArgs {
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Checkpoint directory written by `train`
    #[arg(long)]
    checkpoint: PathBuf,
    #[arg(short, long)]
    input: PathBuf,
    #[arg(short, long)]
    output: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let json_layer = if cli.no_log_file {
        None
    } else {
        let log_dir = cli.log_dir.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("dev", "hsae", "hsae")
                .map(|d| d.data_dir().join("logs"))
                .unwrap_or_else(|| PathBuf::from("."))
        });
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::daily(&log_dir, "hsae.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_filter(EnvFilter::new("debug"));
        Some((layer, guard))
    };
    let (json_layer, _guard) = match json_layer {
        Some((layer, guard)) => (Some(layer), Some(guard)),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    match cli.command {
        Commands::Plan { config } => commands::plan(&RunConfig::load(config.as_deref())?),
        Commands::Train { config, data, val } => {
            let config = RunConfig::load(config.as_deref())?;
            commands::train(&config, &data, val.as_deref())
        }
        Commands::Encode(args) => run_inference(Inference::Encode, args),
        Commands::Decode(args) => run_inference(Inference::Decode, args),
        Commands::Reconstruct(args) => run_inference(Inference::Reconstruct, args),
    }
}

fn run_inference(mode: Inference, args: InferArgs) -> anyhow::Result<()> {
    let config = RunConfig::load(args.config.as_deref())?;
    commands::infer(&config, mode, args.checkpoint, &args.input, &args.output)
}
