//! Regime HMM CLI
//!
//! Command-line interface for market regime analysis of CSV datasets

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use market_regime_hmm::{
    data::{CsvDirectory, DatasetSource, FeatureBuilder},
    models::ModelOrderSelector,
    AnalysisResult, RegimeConfig, RegimePipeline, VERSION,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "regime-hmm")]
#[command(version = VERSION)]
#[command(about = "Gaussian HMM market regime detection")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full regime analysis on a dataset
    Analyze {
        /// Directory holding the CSV datasets
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,

        /// Dataset file name (e.g., SPY.csv)
        #[arg(short, long)]
        dataset: String,

        /// Number of states (regimes)
        #[arg(short = 'n', long)]
        n_states: Option<usize>,

        /// Trailing number of bars used for training
        #[arg(long)]
        window_days: Option<usize>,

        /// Choose the number of states by BIC
        #[arg(long)]
        auto_select: bool,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compare state counts by AIC/BIC
    Select {
        /// Directory holding the CSV datasets
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,

        /// Dataset file name
        #[arg(short, long)]
        dataset: String,

        /// Smallest state count to try
        #[arg(long)]
        min_states: Option<usize>,

        /// Largest state count to try
        #[arg(long)]
        max_states: Option<usize>,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// List available datasets
    List {
        /// Directory holding the CSV datasets
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("market_regime_hmm=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            data_dir,
            dataset,
            n_states,
            window_days,
            auto_select,
            config,
            json,
        } => {
            let mut config = load_config(config.as_deref())?;
            if auto_select {
                config.auto_select_n_states = true;
            }
            analyze(&data_dir, &dataset, config, n_states, window_days, json)?;
        }
        Commands::Select {
            data_dir,
            dataset,
            min_states,
            max_states,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            select(&data_dir, &dataset, config, min_states, max_states)?;
        }
        Commands::List { data_dir } => {
            list(&data_dir)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<RegimeConfig> {
    match path {
        Some(path) => Ok(RegimeConfig::from_file(path)?),
        None => Ok(RegimeConfig::default()),
    }
}

fn analyze(
    data_dir: &Path,
    dataset: &str,
    config: RegimeConfig,
    n_states: Option<usize>,
    window_days: Option<usize>,
    json: bool,
) -> Result<()> {
    let source = CsvDirectory::new(data_dir);
    let pipeline = RegimePipeline::new(config);
    let result = pipeline.run_from_source(&source, dataset, n_states, window_days)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_analysis(&result);
    }

    Ok(())
}

fn print_analysis(result: &AnalysisResult) {
    println!(
        "\n{}",
        format!("=== Regime Analysis: {} ===", result.dataset).bold()
    );
    println!(
        "  {} sessions, {} states, features {:?}",
        result.total_days, result.n_states, result.features_used
    );

    if let Some(selection) = &result.model_selection {
        println!("\n{}", "Model Selection:".bold());
        for candidate in &selection.candidates {
            let marker = if candidate.n_states == selection.optimal_n_states {
                "*"
            } else {
                " "
            };
            println!(
                "  {} n={}  AIC={:.2}  BIC={:.2}",
                marker, candidate.n_states, candidate.aic, candidate.bic
            );
        }
    }

    let stats = &result.training_stats;
    println!("\n{}", "Training:".bold());
    println!("  Log-likelihood: {:.4}", stats.log_likelihood);
    println!("  AIC: {:.2}  BIC: {:.2}  Params: {}", stats.aic, stats.bic, stats.n_params);
    let convergence = format!("{} iterations", stats.n_iterations);
    if stats.converged {
        println!("  Converged after {}", convergence.green());
    } else {
        println!("  Stopped after {}", convergence.yellow());
    }

    println!("\n{}", "Regimes:".bold());
    for (state, label) in result.regime_mapping.iter() {
        if let Some(s) = result.state_statistics.get(&state) {
            println!(
                "  State {} {:<16} n={:<5} return {:+.4}  volatility {:.4}",
                state,
                label.to_string().color(label.color()),
                s.count,
                s.mean_return,
                s.mean_volatility
            );
        }
    }

    println!("\nTransition Matrix:");
    for (i, row) in result.model_params.transition_matrix.iter().enumerate() {
        print!("  State {}: ", i);
        for p in row {
            print!("{:.2}  ", p);
        }
        println!();
    }

    let persistence = &result.persistence;
    println!("\n{}", "Persistence:".bold());
    println!(
        "  Score: {:.1}%  Quality: {}",
        persistence.persistence_score * 100.0,
        persistence.quality
    );
    println!(
        "  Switches: {}  Avg duration: {:.1}  Median: {:.1}",
        persistence.total_switches, persistence.avg_duration, persistence.median_duration
    );

    println!("\n{}", "=== Current Regime ===".bold());
    println!(
        "  {}",
        result
            .current_regime
            .to_string()
            .color(result.current_regime.color())
            .bold()
    );

    let prediction = &result.prediction;
    println!("\n{}", "=== Next Session ===".bold());
    println!(
        "  {} ({:.1}%)",
        prediction
            .next_regime
            .to_string()
            .color(prediction.next_regime.color())
            .bold(),
        prediction.confidence * 100.0
    );
    println!(
        "  Confident: {}",
        if prediction.is_confident { "Yes" } else { "No" }
    );
    println!(
        "  Expected return: {:+.4}  Expected volatility: {:.4}",
        prediction.expected_return, prediction.expected_volatility
    );
    for (label, p) in &prediction.state_probabilities {
        println!("    {}: {:.1}%", label, p * 100.0);
    }
}

fn select(
    data_dir: &Path,
    dataset: &str,
    config: RegimeConfig,
    min_states: Option<usize>,
    max_states: Option<usize>,
) -> Result<()> {
    println!("{}", "Loading data...".cyan());
    let dataset = CsvDirectory::new(data_dir).load(dataset)?;
    let dataset = dataset.tail(config.max_training_days);
    println!("Loaded {} bars", dataset.len());

    println!("{}", "Building features...".cyan());
    let builder = FeatureBuilder::from_config(&config);
    let rows = builder.build(&dataset.bars)?;
    let features = builder.scale(&rows)?;

    let min_states = min_states.unwrap_or(config.min_n_states);
    let max_states = max_states.unwrap_or(config.max_n_states);
    println!(
        "{}",
        format!("Fitting {}..={} state models...", min_states, max_states).cyan()
    );
    let selection =
        ModelOrderSelector::new(config).select_order(&features, min_states, max_states)?;

    println!("\n{}", "=== Model Selection ===".bold());
    for candidate in &selection.candidates {
        let line = format!(
            "  n={}  logL={:.4}  AIC={:.2}  BIC={:.2}",
            candidate.n_states, candidate.log_likelihood, candidate.aic, candidate.bic
        );
        if candidate.n_states == selection.optimal_n_states {
            println!("{}", line.green());
        } else {
            println!("{}", line);
        }
    }
    println!(
        "\n{}",
        format!("Optimal number of states: {}", selection.optimal_n_states).green()
    );

    Ok(())
}

fn list(data_dir: &Path) -> Result<()> {
    let names = CsvDirectory::new(data_dir).list()?;
    if names.is_empty() {
        println!("{}", format!("No datasets in {}", data_dir.display()).yellow());
    }
    for name in names {
        println!("  {}", name);
    }
    Ok(())
}
