use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pricedb::core::config::{DEFAULT_CLOSE_TIME, DEFAULT_CONFIG_FILE, DEFAULT_PRICE_DB_FILE};
use pricedb::core::log::init_logging;
use pricedb::providers::{alphavantage, coinbase, questrade};
use pricedb::{FetchSettings, ui};
use std::time::Duration;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch prices and merge them into the price database
    Fetch(FetchArgs),
    /// Print the price database as CSV
    ToCsv {
        /// Price database to read
        #[arg(long, default_value = DEFAULT_PRICE_DB_FILE)]
        price_db_file: String,
    },
}

#[derive(clap::Args)]
struct FetchArgs {
    /// JSON configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config_file: String,

    /// Existing price database
    #[arg(long, default_value = DEFAULT_PRICE_DB_FILE)]
    price_db_file: String,

    /// Where to write the merged database, stdout when empty
    #[arg(long, default_value = "")]
    out_file: String,

    /// Time of day (HH:MM:SS) stamped on daily closing prices
    #[arg(long, default_value = DEFAULT_CLOSE_TIME)]
    close_time: String,

    /// Override the current time (RFC 3339)
    #[arg(long)]
    now: Option<String>,

    #[arg(long, default_value = alphavantage::DEFAULT_BASE_URL)]
    alphavantage_base_url: String,

    #[arg(long, default_value = alphavantage::DEFAULT_API_KEY_FILE)]
    alphavantage_api_key_file: String,

    /// Seconds to wait after a rate-limited response
    #[arg(long, default_value_t = alphavantage::DEFAULT_BACKOFF.as_secs())]
    alphavantage_backoff_secs: u64,

    /// Attempts per symbol before giving up
    #[arg(long, default_value_t = alphavantage::DEFAULT_BACKOFF_RETRY)]
    alphavantage_backoff_retry: usize,

    #[arg(long, default_value = questrade::DEFAULT_OAUTH_URL)]
    questrade_oauth_url: String,

    #[arg(long, default_value = questrade::DEFAULT_TOKEN_FILE)]
    questrade_token_file: String,

    #[arg(long, default_value = questrade::DEFAULT_ACCOUNT_NUMBERS_FILE)]
    questrade_account_numbers_file: String,

    #[arg(long, default_value = coinbase::DEFAULT_BASE_URL)]
    coinbase_base_url: String,
}

impl From<FetchArgs> for FetchSettings {
    fn from(args: FetchArgs) -> Self {
        FetchSettings {
            config_file: args.config_file,
            price_db_file: args.price_db_file,
            out_file: args.out_file,
            close_time: args.close_time,
            now: args.now,
            alphavantage_base_url: args.alphavantage_base_url,
            alphavantage_api_key_file: args.alphavantage_api_key_file,
            alphavantage_backoff: Duration::from_secs(args.alphavantage_backoff_secs),
            alphavantage_backoff_retry: args.alphavantage_backoff_retry,
            questrade_oauth_url: args.questrade_oauth_url,
            questrade_token_file: args.questrade_token_file,
            questrade_account_numbers_file: args.questrade_account_numbers_file,
            coinbase_base_url: args.coinbase_base_url,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Fetch(args) => fetch(args.into()).await,
        Commands::ToCsv { price_db_file } => to_csv(&price_db_file),
    }
}

async fn fetch(settings: FetchSettings) -> Result<()> {
    let to_file = !settings.out_file.trim().is_empty();
    let spinner = to_file.then(|| ui::new_spinner("Updating prices"));

    let result = pricedb::run_fetch(&settings).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    match result {
        Ok(report) => {
            if to_file {
                eprintln!(
                    "{}",
                    ui::summary_line(
                        report.written,
                        report.fetched,
                        report.kept_from_database,
                        settings.out_file.trim(),
                    )
                );
            }
            Ok(())
        }
        Err(failure) => {
            tracing::error!(
                stage = %failure.stage,
                kind = ?failure.error.kind(),
                causes = ?failure.error.chain(),
                "Price update failed"
            );
            if to_file {
                eprintln!(
                    "{}",
                    ui::style_text(&format!("✘ {failure}"), ui::StyleType::Error)
                );
            }
            Err(failure.into())
        }
    }
}

fn to_csv(price_db_file: &str) -> Result<()> {
    let stdout = std::io::stdout().lock();
    if let Err(e) = pricedb::run_to_csv(price_db_file, stdout) {
        tracing::error!(kind = ?e.kind(), causes = ?e.chain(), "CSV export failed");
        return Err(e).with_context(|| format!("Failed to export {price_db_file} as CSV"));
    }
    Ok(())
}
