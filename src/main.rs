use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use trendcast::config::{self, AppConfig, ProviderKind};
use trendcast::data::{EastmoneyClient, JsonFileProvider, MarketDataProvider};
use trendcast::ml::persistence::{ModelStore, SledBlobStore, TrainedModel};
use trendcast::pipeline::{PredictionOutcome, PredictionResult, PredictionRunner};

#[derive(Parser)]
#[command(name = "trendcast")]
#[command(version = "0.1.0")]
#[command(about = "Forecast whether stocks will trade below their 20-day average", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to ./trendcast.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Read `{ticker}.json` files from this directory instead of the network
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Train the ensemble and store it
    Train {
        /// Comma-separated tickers (defaults to the configured list)
        #[arg(short, long, value_delimiter = ',')]
        tickers: Vec<String>,
        /// Window length in trading days
        #[arg(short, long)]
        window: Option<usize>,
        /// Forecast horizon in trading days
        #[arg(long)]
        horizon: Option<usize>,
        /// Train only the random forest
        #[arg(long)]
        single: bool,
    },
    /// Predict the given tickers with the stored model (trains one if missing)
    Predict {
        /// Tickers to score
        #[arg(required = true)]
        tickers: Vec<String>,
        /// Calendar days of history to fetch
        #[arg(short, long)]
        days: Option<i64>,
    },
    /// Show metadata of the stored model
    Info,
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut app_config = config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        app_config.data.provider = ProviderKind::File;
        app_config.data.data_dir = Some(dir);
    }
    if let Err(errors) = app_config.validate() {
        return Err(anyhow!("invalid configuration: {}", errors.join(", ")));
    }

    match cli.command {
        Commands::Train { tickers, window, horizon, single } => {
            run_train(app_config, tickers, window, horizon, single).await?;
        }
        Commands::Predict { tickers, days } => {
            run_predict(app_config, tickers, days).await?;
        }
        Commands::Info => {
            show_info(&app_config)?;
        }
        Commands::Config => {
            print!("{}", config::render(&app_config)?);
        }
    }

    Ok(())
}

fn build_provider(config: &AppConfig) -> Result<Arc<dyn MarketDataProvider>> {
    match config.data.provider {
        ProviderKind::Eastmoney => Ok(Arc::new(EastmoneyClient::new(&config.data.storage)?)),
        ProviderKind::File => {
            let dir = config
                .data
                .data_dir
                .clone()
                .ok_or_else(|| anyhow!("data.data_dir is required for the file provider"))?;
            Ok(Arc::new(JsonFileProvider::new(dir)))
        }
    }
}

fn open_store(config: &AppConfig) -> Result<ModelStore<SledBlobStore>> {
    Ok(ModelStore::new(SledBlobStore::open(&config.store.path)?))
}

async fn run_train(
    config: AppConfig,
    tickers: Vec<String>,
    window: Option<usize>,
    horizon: Option<usize>,
    single: bool,
) -> Result<()> {
    let tickers = if tickers.is_empty() { config.data.tickers.clone() } else { tickers };
    let window = window.unwrap_or(config.pipeline.window_size);
    let horizon = horizon.unwrap_or(config.pipeline.forecast_horizon);
    let use_multi_models = config.pipeline.use_multi_models && !single;

    info!("Training on {} (window={}, horizon={})", tickers.join(", "), window, horizon);
    let store = open_store(&config)?;
    let runner = PredictionRunner::new(build_provider(&config)?, config);
    let model = runner
        .train_stock_prediction_model(&tickers, window, horizon, use_multi_models)
        .await?;
    store.put(&model)?;

    print_model(&model);
    Ok(())
}

async fn run_predict(config: AppConfig, tickers: Vec<String>, days: Option<i64>) -> Result<()> {
    let days = days.unwrap_or(config.data.lookback_days);
    let store = open_store(&config)?;
    let runner = PredictionRunner::new(build_provider(&config)?, config);
    let model = runner.load_or_train(&store).await?;

    let results = runner.predict_stocks_inline(&tickers, &model, days).await;
    if results.is_empty() {
        warn!("No ticker could be predicted");
    }
    for result in &results {
        print_prediction(result);
    }
    Ok(())
}

fn show_info(config: &AppConfig) -> Result<()> {
    let store = open_store(config)?;
    match store.info()? {
        Some(info) => {
            println!("\n=== Stored Model ===");
            println!("Best model:      {}", info.model_name);
            println!("Trained:         {}", info.train_date.format("%Y-%m-%d %H:%M:%S"));
            println!("Accuracy:        {:.2}%", info.accuracy * 100.0);
            println!("Avg precision:   {:.2}%", info.avg_precision * 100.0);
            println!("Families:        {}", info.families.iter().map(|f| f.as_str()).collect::<Vec<_>>().join(", "));
            println!("Features:        {}", info.n_features);
            println!("Samples:         {}", info.train_samples);
            println!("Window/horizon:  {}/{}", info.window_size, info.forecast_horizon);
        }
        None => println!("No model stored at {}", config.store.path.display()),
    }
    Ok(())
}

fn print_model(model: &TrainedModel) {
    println!("\n=== Training Results ===");
    println!("{:<22} {:>10} {:>10} {:>12} {:>12}", "Model", "Threshold", "Accuracy", "Prec strong", "Prec weak");
    println!("{}", "-".repeat(70));
    for bundle in model.ensemble.bundles() {
        println!(
            "{:<22} {:>10.2} {:>9.2}% {:>11.2}% {:>11.2}%",
            bundle.family.as_str(),
            bundle.threshold,
            bundle.accuracy * 100.0,
            bundle.precision_strong * 100.0,
            bundle.precision_weak * 100.0
        );
    }
    for failure in &model.failures {
        println!("{:<22} failed: {}", failure.family.as_str(), failure.error);
    }
    println!("{}", "=".repeat(70));
    println!("Best: {} ({} features)", model.best.family, model.feature_list().len());
}

fn print_prediction(result: &PredictionResult) {
    let snap = &result.snapshot;
    println!("\n--- {} ---", result.ticker);
    println!("Date:       {}", snap.date);
    println!("Close:      {:.2}", snap.close);
    println!("MA20:       {:.2} ({:+.2}%)", snap.ma20, snap.position_pct);
    println!("Now:        {}", snap.status);

    match &result.outcome {
        PredictionOutcome::Single(p) => {
            println!("Model:      {} (threshold {:.2})", p.family, p.threshold);
            println!("Forecast:   {}", p.label);
            println!("P(strong):  {:.1}%   P(weak): {:.1}%", p.prob_strong * 100.0, p.prob_weak * 100.0);
            println!("Confidence: {:.1}% ({})", p.confidence * 100.0, p.rating);
        }
        PredictionOutcome::Ensemble(p) => {
            for family in &p.families {
                println!(
                    "  {:<20} {:<16} P(weak) {:>5.1}%  threshold {:.2}  train precision {:.1}%",
                    family.family.as_str(),
                    family.label.as_str(),
                    family.prob_weak * 100.0,
                    family.threshold,
                    family.train_precision * 100.0
                );
            }
            let c = &p.consensus;
            println!("Forecast:   {}", c.label);
            println!(
                "Votes:      {} weak / {} strong ({:.0}% agreement, {})",
                c.votes_weak,
                c.votes_strong,
                c.share * 100.0,
                c.rating
            );
            if let Some(family) = c.tie_broken_by {
                println!("Tie broken by {}", family);
            }
            println!("Avg confidence: {:.1}%", c.average_confidence * 100.0);
        }
    }
    if !result.dropped_signals.is_empty() {
        let names: Vec<&str> = result.dropped_signals.iter().map(|s| s.as_str()).collect();
        println!("Degraded:   signals dropped: {}", names.join(", "));
    }
}
