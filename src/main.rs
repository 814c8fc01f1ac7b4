use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::info;
use pricecast::{
    commands::{export_prices, forecast},
    config::{parse_date, EnvSettings},
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pricecast")]
#[command(about = "Per-ticker random-forest price forecasting from daily OHLCV history")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train, evaluate and forecast the next close for each ticker
    Forecast {
        /// Comma or space separated ticker symbols
        #[arg(required = true, num_args = 1..)]
        tickers: Vec<String>,
        /// First date of history to fetch (YYYY-MM-DD, defaults to 5 years before the end)
        #[arg(long, value_parser = parse_cli_date)]
        start: Option<NaiveDate>,
        /// Last date of history to fetch, inclusive (YYYY-MM-DD, defaults to today)
        #[arg(long, value_parser = parse_cli_date)]
        end: Option<NaiveDate>,
        /// Trading days ahead to predict
        #[arg(long)]
        horizon: Option<usize>,
        /// Fraction of usable rows held out for testing (0..1)
        #[arg(long)]
        test_ratio: Option<f64>,
        /// Number of trees in the forest
        #[arg(long)]
        trees: Option<usize>,
        /// Random seed for bootstrap sampling
        #[arg(long)]
        seed: Option<u64>,
        /// Maximum tree depth (unlimited when omitted)
        #[arg(long)]
        max_depth: Option<usize>,
        /// Minimum rows required to split a node
        #[arg(long)]
        min_samples_split: Option<usize>,
        /// Minimum rows in each leaf
        #[arg(long)]
        min_samples_leaf: Option<usize>,
        /// Directory for the HTML charts (defaults to the system temp directory)
        #[arg(long, value_name = "DIR")]
        chart_dir: Option<PathBuf>,
        /// Read prices from a snapshot written by export-prices instead of the network
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        /// Use only price and lag features
        #[arg(long)]
        without_indicators: bool,
    },
    /// Fetch price history and write an offline snapshot
    ExportPrices {
        /// Comma or space separated ticker symbols
        #[arg(required = true, num_args = 1..)]
        tickers: Vec<String>,
        /// Destination file for the snapshot
        #[arg(short, long = "output", value_name = "PATH")]
        output: PathBuf,
        #[arg(long, value_parser = parse_cli_date)]
        start: Option<NaiveDate>,
        #[arg(long, value_parser = parse_cli_date)]
        end: Option<NaiveDate>,
    },
}

fn parse_cli_date(raw: &str) -> std::result::Result<NaiveDate, String> {
    parse_date(raw).map_err(|err| err.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting pricecast. Forecasts are not financial advice.");
    let settings = EnvSettings::from_env()?;

    match cli.command {
        Commands::Forecast {
            tickers,
            start,
            end,
            horizon,
            test_ratio,
            trees,
            seed,
            max_depth,
            min_samples_split,
            min_samples_leaf,
            chart_dir,
            data_file,
            without_indicators,
        } => {
            let options = forecast::ForecastOptions {
                tickers,
                start,
                end,
                horizon,
                test_ratio,
                trees,
                seed,
                max_depth,
                min_samples_split,
                min_samples_leaf,
                chart_dir,
                data_file,
                without_indicators,
            };
            forecast::run(options, &settings).await?;
        }
        Commands::ExportPrices {
            tickers,
            output,
            start,
            end,
        } => {
            export_prices::run(&tickers, start, end, &output, &settings).await?;
        }
    }

    Ok(())
}
