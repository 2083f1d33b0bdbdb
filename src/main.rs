//! Benchmark runner for matrix-multiplication kernels.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use matbench::kernels::BUILTIN_KERNELS;
use matbench::report::{summary_table, write_json};
use matbench::{BenchmarkRun, OptimizationProfile, RunConfig};

#[derive(Parser, Debug)]
#[command(name = "matbench", version, about = "Benchmark matrix-multiplication kernels across the C ABI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// TOML run configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Matrix dimension (overrides the configuration)
    #[arg(short, long)]
    size: Option<usize>,

    /// Kernel to measure, repeatable (overrides the configuration)
    #[arg(short, long = "kernel")]
    kernels: Vec<String>,

    /// Skip comparing products against the reference
    #[arg(long)]
    no_verify: bool,

    /// Write the full report as JSON
    #[arg(long)]
    json: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List in-tree kernels
    List,
    /// Print the compiler flags of each optimisation profile
    Profiles,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {
        Some(Command::List) => {
            for kernel in &BUILTIN_KERNELS {
                println!("{:<12} {:<34} {}", kernel.name, kernel.symbol, kernel.description);
            }
            Ok(())
        }
        Some(Command::Profiles) => {
            for profile in OptimizationProfile::ALL {
                println!("{:<12} {}", profile.name(), profile.compiler_flags().join(" "));
            }
            Ok(())
        }
        None => run(&cli),
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => RunConfig::load(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => RunConfig::default(),
    };
    if let Some(size) = cli.size {
        config.size = size;
    }
    if !cli.kernels.is_empty() {
        config.kernels = cli.kernels.clone();
    }
    if cli.no_verify {
        config.verify = false;
    }

    println!("=== Matrix Multiplication Benchmark ===\n");
    println!(
        "Matrix: {}×{} ({:.2} MB per matrix)",
        config.size,
        config.size,
        (config.size as f64).powi(2) * 4.0 / 1024.0 / 1024.0
    );

    let report = BenchmarkRun::new(config)
        .context("failed to register kernels")?
        .run();

    print!("{}", summary_table(&report));

    if let Some(path) = &cli.json {
        write_json(&report, path).with_context(|| format!("failed to write {}", path.display()))?;
        println!("\nReport written to {}", path.display());
    }

    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).compact())
        .init();
}
