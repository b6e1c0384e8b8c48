mod aws;
mod cache;
mod config;
mod logging;
mod matcher;
mod output;
mod searchers;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::aws::AwsContext;
use crate::cache::{CacheError, CacheLayer, CacheStorage, NoopStorage, SqliteStorage};
use crate::config::{CacheConfig, Config};
use crate::output::{Item, ScriptFilter};
use crate::searchers::ResourceKind;

#[derive(Parser, Debug)]
#[command(name = "awsearch")]
#[command(about = "Search AWS resources from a launcher, with console deep links")]
#[command(version)]
struct Args {
  /// Search query
  query: Vec<String>,

  /// Path to config file (default: $XDG_CONFIG_HOME/awsearch/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// AWS profile to use
  #[arg(short, long)]
  profile: Option<String>,

  /// AWS region to search
  #[arg(short, long)]
  region: Option<String>,

  /// Resource kinds to search (default: all)
  #[arg(short, long, value_enum)]
  kind: Vec<ResourceKind>,

  /// Ignore fresh cache entries and fetch again
  #[arg(short, long)]
  force_refresh: bool,

  /// Delete every cached collection and exit
  #[arg(long)]
  purge_cache: bool,

  /// Also log to stderr
  #[arg(short, long)]
  verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let log_dir = config::data_dir().map(|dir| dir.join("logs"));
  let _log_guard = logging::init(log_dir.as_deref(), args.verbose);

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let document = if args.purge_cache {
    purge(&config.cache)?
  } else {
    search(&config, &args).await?
  };
  println!("{}", document.to_json()?);

  Ok(())
}

/// Open the on-disk cache at the configured or default location.
fn open_storage(cache: &CacheConfig) -> Result<SqliteStorage, CacheError> {
  match &cache.path {
    Some(path) => SqliteStorage::open(path, cache.busy_timeout()),
    None => SqliteStorage::open_default(cache.busy_timeout()),
  }
}

/// Clear the on-disk cache, whether or not searches currently use it.
fn purge(cache: &CacheConfig) -> Result<ScriptFilter> {
  let removed = open_storage(cache)
    .and_then(|storage| storage.purge())
    .map_err(|e| eyre!("Failed to purge cache: {}", e))?;
  info!(removed, "purged cache");

  let notice = Item::notice("Cache cleared", format!("Removed {} cached collections", removed));
  Ok(ScriptFilter::new(vec![notice]))
}

async fn search(config: &Config, args: &Args) -> Result<ScriptFilter> {
  if !config.cache.enabled {
    return run(NoopStorage, config, args).await;
  }

  match open_storage(&config.cache) {
    Ok(storage) => run(storage, config, args).await,
    Err(e) => {
      // Searching still works, just without persistence
      warn!(error = %e, "cache unavailable, continuing without it");
      run(NoopStorage, config, args).await
    }
  }
}

async fn run<S: CacheStorage>(storage: S, config: &Config, args: &Args) -> Result<ScriptFilter> {
  let layer = build_layer(storage, &config.cache, args.force_refresh);

  let profile = args.profile.as_deref().or(config.aws.profile.as_deref());
  let region = args.region.as_deref().or(config.aws.region.as_deref());
  let ctx = AwsContext::load(profile, region).await;

  let kinds = if args.kind.is_empty() {
    ResourceKind::ALL.to_vec()
  } else {
    args.kind.clone()
  };

  let query = args.query.join(" ");
  info!(%query, profile = ctx.profile(), region = ctx.region(), ?kinds, "searching");

  // Kinds are independent; one slow or failing kind doesn't hold up the rest
  let outcomes = futures::future::join_all(
    kinds
      .iter()
      .map(|kind| kind.search(&layer, &ctx, &query)),
  )
  .await;

  for outcome in &outcomes {
    info!(
      kind = outcome.kind.name(),
      items = outcome.items.len(),
      failed = outcome.is_failure(),
      "kind finished"
    );
  }

  Ok(searchers::assemble(&query, outcomes))
}

fn build_layer<S: CacheStorage>(storage: S, cache: &CacheConfig, force_refresh: bool) -> CacheLayer<S> {
  ResourceKind::ALL.iter().fold(
    CacheLayer::new(storage)
      .with_stale_time(cache.default_ttl())
      .with_fetch_timeout(cache.fetch_timeout())
      .with_force_refresh(force_refresh),
    |layer, kind| {
      layer.with_ttl(
        kind.name(),
        cache.ttl_for(kind.name(), Some(kind.builtin_ttl_secs())),
      )
    },
  )
}
