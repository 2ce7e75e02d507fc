use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use refcache::cache::{ContentCache, ContentHints, SqliteStore};
use refcache::config::Config;
use refcache::schedule::TokioScheduler;
use refcache::search::QueryEngine;
use refcache::source::HttpContentSource;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "refcache")]
#[command(about = "Local-first cache and search for clinical reference content")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/refcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Print a record, fetching it on first access
  Get {
    key: String,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    content_type: Option<String>,
  },
  /// Search the cached corpus
  Search { query: Vec<String> },
  /// Check the source for a new version now
  Check {
    key: String,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    content_type: Option<String>,
  },
  /// Force a refresh on the next read
  Invalidate { key: String },
  /// Soft-delete a record (stays readable, leaves the index)
  Obsolete { key: String },
  /// Delete a record from the cache
  Purge { key: String },
  /// List cached records
  List,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = init_logging(&config)?;

  let store = match &config.cache.path {
    Some(path) => SqliteStore::open_at(path)?,
    None => SqliteStore::open()?,
  };
  let source = HttpContentSource::new(
    &config.source.url,
    Config::get_api_token(),
    config.source_timeout(),
  )?;
  let cache = ContentCache::builder(Arc::new(store), Arc::new(source))
    .with_settings(config.cache_settings())
    .build()?;

  run(&cache, &config, args.command).await?;

  // Let background checks started by this command commit before exiting
  cache.settle().await;
  Ok(())
}

async fn run(cache: &ContentCache, config: &Config, command: Command) -> Result<()> {
  match command {
    Command::Get {
      key,
      category,
      content_type,
    } => {
      let hints = ContentHints {
        category,
        content_type,
      };
      let record = cache.get(&key, &hints).await?;
      cache.track_access(&key);
      println!("{}", serde_json::to_string_pretty(&record)?);
    }
    Command::Search { query } => {
      let mut engine = QueryEngine::new(
        cache.index(),
        Arc::new(TokioScheduler),
        config.engine_settings(),
      );
      let hits = engine.search_now(&query.join(" "));
      if hits.is_empty() {
        eprintln!("No matches");
      }
      for hit in hits {
        println!("{:>3}  {:<32} {:<12} {}", hit.score, hit.key, hit.content_type, hit.title);
      }
    }
    Command::Check {
      key,
      category,
      content_type,
    } => {
      let mut hints = ContentHints {
        category,
        content_type,
      };
      if hints.category.is_none() && hints.content_type.is_none() {
        if let Some(record) = cache.peek(&key)? {
          hints = record.hints();
        }
      }
      let outcome = cache.check_and_update(&key, &hints).await?;
      let verdict = if outcome.changed { "changed" } else { "unchanged" };
      println!("{} {} ({})", key, outcome.version, verdict);
    }
    Command::Invalidate { key } => cache.invalidate(&key),
    Command::Obsolete { key } => {
      if !cache.mark_obsolete(&key)? {
        return Err(eyre!("No cached record for {}", key));
      }
    }
    Command::Purge { key } => cache.purge(&key)?,
    Command::List => {
      for record in cache.records()? {
        let status = serde_json::to_value(record.status)?;
        println!(
          "{:<32} {:>6} {:<14} {:>5}  {}",
          record.key,
          record.version.to_string(),
          status.as_str().unwrap_or_default(),
          record.access_count,
          record.last_checked_at.format("%Y-%m-%d %H:%M")
        );
      }
    }
  }
  Ok(())
}

/// Log to the configured file through a non-blocking writer, or to stderr.
fn init_logging(config: &Config) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("refcache=info"));

  match &config.log_file {
    Some(path) => {
      let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
      let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

      let appender = tracing_appender::rolling::never(dir, file_name);
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
      Ok(None)
    }
  }
}
