//! Core types for the content cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a cached record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordStatus {
  #[default]
  Active,
  /// Invalidated by a caller; the next `get` forces a background check.
  StalePending,
  /// Soft-deleted. Still returned by `get`, but no longer searchable.
  Obsolete,
}

/// Dotted `major.minor` content version. Every payload change bumps the minor part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentVersion {
  major: u32,
  minor: u32,
}

impl ContentVersion {
  pub const INITIAL: ContentVersion = ContentVersion { major: 1, minor: 0 };

  pub fn new(major: u32, minor: u32) -> Self {
    Self { major, minor }
  }

  /// The next version ("1.2" -> "1.3"). An exhausted minor part carries into major.
  pub fn bump(self) -> Self {
    match self.minor.checked_add(1) {
      Some(minor) => Self {
        major: self.major,
        minor,
      },
      None => Self {
        major: self.major.saturating_add(1),
        minor: 0,
      },
    }
  }
}

impl Default for ContentVersion {
  fn default() -> Self {
    Self::INITIAL
  }
}

impl fmt::Display for ContentVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.major, self.minor)
  }
}

impl FromStr for ContentVersion {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (major, minor) = s
      .trim()
      .split_once('.')
      .ok_or_else(|| format!("invalid version '{}': expected major.minor", s))?;
    let major = major
      .parse()
      .map_err(|e| format!("invalid major in version '{}': {}", s, e))?;
    let minor = minor
      .parse()
      .map_err(|e| format!("invalid minor in version '{}': {}", s, e))?;
    Ok(Self { major, minor })
  }
}

impl TryFrom<String> for ContentVersion {
  type Error = String;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<ContentVersion> for String {
  fn from(version: ContentVersion) -> Self {
    version.to_string()
  }
}

/// Classification hints passed along with a fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentHints {
  pub category: Option<String>,
  pub content_type: Option<String>,
}

impl ContentHints {
  pub fn new(category: impl Into<String>, content_type: impl Into<String>) -> Self {
    Self {
      category: Some(category.into()),
      content_type: Some(content_type.into()),
    }
  }
}

/// One cached unit of clinical reference content.
///
/// Serialized as-is into the persistent store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRecord {
  pub key: String,
  pub category: String,
  pub content_type: String,
  pub payload: Value,
  pub version: ContentVersion,
  pub content_hash: String,
  pub fetched_at: DateTime<Utc>,
  pub last_checked_at: DateTime<Utc>,
  pub last_changed_at: DateTime<Utc>,
  #[serde(default)]
  pub status: RecordStatus,
  #[serde(default)]
  pub access_count: u64,
}

impl ContentRecord {
  /// Build the first version of a record from a freshly fetched payload.
  ///
  /// Classification falls back from the hints to same-named payload fields.
  pub fn first_version(
    key: &str,
    hints: &ContentHints,
    payload: Value,
    content_hash: String,
    now: DateTime<Utc>,
  ) -> Self {
    let category = hints
      .category
      .clone()
      .or_else(|| payload_str(&payload, "category").map(String::from))
      .unwrap_or_default();
    let content_type = hints
      .content_type
      .clone()
      .or_else(|| payload_str(&payload, "contentType").map(String::from))
      .unwrap_or_default();

    Self {
      key: key.to_string(),
      category,
      content_type,
      payload,
      version: ContentVersion::INITIAL,
      content_hash,
      fetched_at: now,
      last_checked_at: now,
      last_changed_at: now,
      status: RecordStatus::Active,
      access_count: 0,
    }
  }

  /// Display title: the payload's `title` (or `name`), else the key.
  pub fn title(&self) -> &str {
    payload_str(&self.payload, "title")
      .or_else(|| payload_str(&self.payload, "name"))
      .unwrap_or(&self.key)
  }

  pub fn is_obsolete(&self) -> bool {
    self.status == RecordStatus::Obsolete
  }

  /// The hints that reproduce this record's classification on a refetch.
  pub fn hints(&self) -> ContentHints {
    ContentHints {
      category: Some(self.category.clone()).filter(|c| !c.is_empty()),
      content_type: Some(self.content_type.clone()).filter(|c| !c.is_empty()),
    }
  }
}

fn payload_str<'a>(payload: &'a Value, field: &str) -> Option<&'a str> {
  payload
    .get(field)
    .and_then(Value::as_str)
    .map(str::trim)
    .filter(|s| !s.is_empty())
}

/// Result from a cache read, including where the record came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  /// Fetched from the remote source on first access.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
    }
  }

  /// Served from the persistent store.
  pub fn from_cache(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Local,
    }
  }
}

/// Indicates where a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// First-access fetch from the remote source
  Network,
  /// Local copy; a background check may refresh it later
  Local,
}
