use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rotation::auth::{Authorizer, TokenPair};
use rotation::config::{Config, Preferences};
use rotation::pipeline::{self, RunOptions};
use rotation::service::{RdioClient, RetryPolicy, RetryingService};
use rotation::storage::JsonHistoryCache;

/// Keep your most-played recent tracks available offline.
#[derive(Parser, Debug)]
#[clap(name = "rotation", version)]
struct CliArgs {
    /// Path to the TOML config file.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Path to the JSON history cache.
    #[clap(long)]
    pub cache: Option<PathBuf>,

    /// Compute and log the plan without changing the offline set.
    #[clap(long)]
    pub dry_run: bool,

    /// Number of top-ranked tracks to keep offline.
    #[clap(long)]
    pub max_sync: Option<usize>,

    /// Plays older than this many days are not ranked.
    #[clap(long)]
    pub max_age: Option<u32>,

    /// Stop scanning remote history after this many tracks.
    #[clap(long)]
    pub max_history: Option<usize>,

    /// Run the PIN authorization flow even if a token is already configured.
    #[clap(long)]
    pub authorize: bool,

    /// Print an example config file and exit.
    #[clap(long)]
    pub example_config: bool,
}

impl CliArgs {
    /// Preferences for this run. Overrides never reach the config file.
    fn preferences(&self, configured: &Preferences) -> Preferences {
        let mut preferences = configured.clone();
        if let Some(max_sync) = self.max_sync {
            preferences.max_sync = max_sync;
        }
        if let Some(max_age) = self.max_age {
            preferences.max_age = max_age;
        }
        if let Some(max_history) = self.max_history {
            preferences.max_history = max_history;
        }
        preferences
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli_args = CliArgs::parse();

    if cli_args.example_config {
        print!("{}", Config::example_config());
        return ExitCode::SUCCESS;
    }

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init();

    match run(cli_args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli_args: CliArgs) -> Result<()> {
    let config_path = match cli_args.config.clone() {
        Some(path) => path,
        None => Config::default_path()?,
    };
    let mut config = Config::load(&config_path)?;
    config.require_consumer()?;

    if cli_args.authorize || !config.has_token() {
        authorize(&mut config, &config_path).await?;
    }
    let preferences = cli_args.preferences(&config.preferences);

    let client = RdioClient::new(&config)?;
    let service = RetryingService::new(client, RetryPolicy::new(&config.network));

    let cache_path = match cli_args.cache {
        Some(path) => path,
        None => JsonHistoryCache::default_path()?,
    };
    let store = JsonHistoryCache::new(cache_path);

    let now = chrono::Local::now().naive_local();
    let options = RunOptions {
        dry_run: cli_args.dry_run,
    };

    let summary = pipeline::run(&service, &store, &preferences, now, &options).await?;

    info!(
        "Done: {} new history entries, {} ranked tracks, {} synced ({} new), {} unsynced{}",
        summary.sync.added,
        summary.ranked.len(),
        summary.plan.keep.len(),
        summary.plan.added.len(),
        summary.plan.remove.len(),
        if options.dry_run { " (dry run)" } else { "" }
    );
    Ok(())
}

/// Walk the user through the PIN flow and store the resulting token.
async fn authorize(config: &mut Config, config_path: &Path) -> Result<()> {
    let authorizer = Authorizer::new(config)?;
    let pending = authorizer
        .start()
        .await
        .context("Could not start authorization")?;

    println!("Authorize this application at: {}", pending.authorize_url);
    print!("Enter the PIN / OAuth verifier: ");
    std::io::stdout().flush()?;

    let mut verifier = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut verifier)
        .await
        .context("Could not read the verifier")?;

    let token = authorizer
        .complete(&pending, &verifier)
        .await
        .context("Could not exchange the verifier for an access token")?;
    store_token(config, config_path, token);
    Ok(())
}

fn store_token(config: &mut Config, config_path: &Path, token: TokenPair) {
    config.token = token.token;
    config.token_secret = token.token_secret;

    // The token still works for this run even if it can't be stored.
    match config.save(config_path) {
        Ok(()) => info!("Saved access token to {}", config_path.display()),
        Err(e) => warn!("Could not write new configuration: {:#}", e),
    }
}
