use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheSettings;
use crate::search::{EngineSettings, IndexSettings};
use crate::sync::SyncSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub source: SourceConfig,
  #[serde(default)]
  pub cache: StoreConfig,
  #[serde(default)]
  pub search: SearchConfig,
  /// Write logs here instead of stderr
  pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
  /// Base URL of the content API
  pub url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
  /// SQLite database path (default: $XDG_DATA_HOME/refcache/cache.db)
  pub path: Option<PathBuf>,
  #[serde(default = "default_staleness_days")]
  pub staleness_days: u32,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      path: None,
      staleness_days: default_staleness_days(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
  pub max_results: usize,
  pub query_cache_size: usize,
  pub min_query_chars: usize,
  pub debounce_ms: u64,
  /// Payload fields to index (case-sensitive field names)
  pub fields: Vec<String>,
}

impl Default for SearchConfig {
  fn default() -> Self {
    let index = IndexSettings::default();
    let engine = EngineSettings::default();
    Self {
      max_results: index.max_results,
      query_cache_size: index.query_cache_size,
      min_query_chars: engine.min_query_chars,
      debounce_ms: engine.debounce.as_millis() as u64,
      fields: index.fields,
    }
  }
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_staleness_days() -> u32 {
  7
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./refcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/refcache/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/refcache/config.yaml\n\
                 with at least `source: {{ url: ... }}`."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("refcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("refcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.source.url.trim().is_empty() {
      return Err(eyre!("source.url must not be empty"));
    }
    if self.cache.staleness_days == 0 {
      return Err(eyre!("cache.staleness_days must be at least 1"));
    }
    if self.search.max_results == 0 || self.search.query_cache_size == 0 {
      return Err(eyre!("search.max_results and search.query_cache_size must be positive"));
    }
    Ok(())
  }

  pub fn cache_settings(&self) -> CacheSettings {
    CacheSettings {
      sync: SyncSettings {
        staleness_window: chrono::Duration::days(i64::from(self.cache.staleness_days)),
      },
      index: IndexSettings {
        max_results: self.search.max_results,
        query_cache_size: self.search.query_cache_size,
        fields: self.search.fields.clone(),
      },
    }
  }

  pub fn engine_settings(&self) -> EngineSettings {
    EngineSettings {
      min_query_chars: self.search.min_query_chars,
      debounce: Duration::from_millis(self.search.debounce_ms),
    }
  }

  pub fn source_timeout(&self) -> Duration {
    Duration::from_secs(self.source.timeout_secs)
  }

  /// Get the content source API token from environment variables.
  ///
  /// Checks REFCACHE_SOURCE_TOKEN first, then REFCACHE_TOKEN as fallback. The token is
  /// optional; unauthenticated sources work without one.
  pub fn get_api_token() -> Option<String> {
    std::env::var("REFCACHE_SOURCE_TOKEN")
      .or_else(|_| std::env::var("REFCACHE_TOKEN"))
      .ok()
      .filter(|t| !t.trim().is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("source:\n  url: https://content.example.org/api\n").unwrap();
    assert_eq!(config.source.timeout_secs, 30);
    assert_eq!(config.cache.staleness_days, 7);
    assert!(config.log_file.is_none());

    let settings = config.cache_settings();
    assert_eq!(settings.sync.staleness_window, chrono::Duration::days(7));
    assert_eq!(settings.index.max_results, 20);
    assert_eq!(settings.index.query_cache_size, 100);
    assert!(settings.index.fields.contains(&"title".to_string()));

    let engine = config.engine_settings();
    assert_eq!(engine.min_query_chars, 2);
    assert_eq!(engine.debounce, Duration::from_millis(300));
  }

  #[test]
  fn test_full_config() {
    let yaml = r#"
source:
  url: https://content.example.org/api
  timeout_secs: 5
cache:
  path: /tmp/refcache-test.db
  staleness_days: 14
search:
  max_results: 10
  debounce_ms: 150
  fields: [title, keywords]
log_file: /tmp/refcache.log
"#;
    let config = Config::parse(yaml).unwrap();
    assert_eq!(config.source_timeout(), Duration::from_secs(5));
    assert_eq!(config.cache.path, Some(PathBuf::from("/tmp/refcache-test.db")));
    assert_eq!(
      config.cache_settings().sync.staleness_window,
      chrono::Duration::days(14)
    );
    assert_eq!(config.search.query_cache_size, 100);
    assert_eq!(config.search.fields, vec!["title", "keywords"]);
    assert_eq!(config.engine_settings().debounce, Duration::from_millis(150));
  }

  #[test]
  fn test_invalid_configs_are_rejected() {
    assert!(Config::parse("cache:\n  staleness_days: 3\n").is_err());
    assert!(Config::parse("source:\n  url: ''\n").is_err());
    assert!(Config::parse("source:\n  url: x\ncache:\n  staleness_days: 0\n").is_err());
  }

  #[test]
  fn test_missing_explicit_path() {
    let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
