#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use housesale::config::AnalysisConfig;
use housesale::data::write_sales;
use housesale::report::{render, write_outputs};
use housesale::run_from_path;
use housesale::synthetic::SyntheticSalesBuilder;

#[derive(Parser)]
#[command(
    name = "housesale",
    about = "Clean housing-sale records and select price and quality models",
    long_about = "Cleans a table of house sales, derives location and renovation features, \
                  selects a linear price model by best-subset search and a logistic \
                  good-quality classifier, and scores both on a held-out partition."
)]
struct Cli {
    /// Log solver iterations and per-stage detail
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Path to the sales CSV file
    data: PathBuf,

    /// Analysis configuration (.toml); defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for summary.toml, ROC curves and test predictions
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Probability above which a sale is classified as good quality
    #[arg(long)]
    threshold: Option<f64>,

    /// Seed for the train/test split
    #[arg(long)]
    seed: Option<u64>,

    /// Field delimiter of the sales file
    #[arg(long, default_value_t = ',')]
    delimiter: char,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full analysis on a sales file
    #[command(about = "Run the analysis (outputs: report on stdout, optional CSV/TOML files)")]
    Analyze(AnalyzeArgs),

    /// Write a synthetic sales file with a known price relationship
    #[command(about = "Generate synthetic sales (outputs: CSV)")]
    Simulate {
        /// Destination CSV file
        output: PathBuf,

        /// Number of sales to generate
        #[arg(long, value_name = "N")]
        rows: usize,

        #[arg(long, default_value = "42")]
        seed: u64,

        /// Standard deviation of the price noise
        #[arg(long, default_value = "5000")]
        noise: f64,

        /// Price added to good-quality sales
        #[arg(long, default_value = "0")]
        premium: f64,
    },

    /// Parse and validate a configuration file
    CheckConfig {
        config: PathBuf,
    },

    /// Write the default configuration
    InitConfig {
        output: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let result = match cli.command {
        Commands::Analyze(args) => analyze(args),
        Commands::Simulate {
            output,
            rows,
            seed,
            noise,
            premium,
        } => simulate(output, rows, seed, noise, premium),
        Commands::CheckConfig { config } => check_config(config),
        Commands::InitConfig { output } => init_config(output),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        let mut source = std::error::Error::source(&*e);
        while let Some(cause) = source {
            eprintln!("  caused by: {cause}");
            source = std::error::Error::source(cause);
        }
        process::exit(1);
    }
}

fn analyze(args: AnalyzeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from {}", path.display());
            AnalysisConfig::load(path)?
        }
        None => AnalysisConfig::default(),
    };
    if let Some(threshold) = args.threshold {
        config.classification.threshold = threshold;
    }
    if let Some(seed) = args.seed {
        config.split.seed = seed;
    }
    if !args.delimiter.is_ascii() {
        return Err(format!("Delimiter '{}' is not a single ASCII character", args.delimiter).into());
    }

    let report = run_from_path(&args.data, args.delimiter as u8, &config)?;
    print!("{}", render(&report));

    if let Some(dir) = &args.output_dir {
        write_outputs(&report, dir)?;
        println!("\nWrote summary.toml, ROC curves and test predictions to {}", dir.display());
    }
    Ok(())
}

fn simulate(
    output: PathBuf,
    rows: usize,
    seed: u64,
    noise: f64,
    premium: f64,
) -> Result<(), Box<dyn std::error::Error>> {
    if !(noise >= 0.0 && noise.is_finite()) {
        return Err(format!("Noise standard deviation must be finite and non-negative, got {noise}").into());
    }
    let sales = SyntheticSalesBuilder::new(rows)
        .seed(seed)
        .noise_sd(noise)
        .quality_premium(premium)
        .build();
    write_sales(&output, &sales)?;
    println!("Wrote {} synthetic sales to {}", sales.len(), output.display());
    Ok(())
}

fn check_config(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    AnalysisConfig::load(&path)?;
    println!("{} is a valid configuration", path.display());
    Ok(())
}

fn init_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    AnalysisConfig::default().save(&output)?;
    println!("Wrote default configuration to {}", output.display());
    Ok(())
}
