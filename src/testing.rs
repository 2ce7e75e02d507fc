//! Test doubles shared by the module tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::cache::ContentHints;
use crate::source::ContentSource;

#[derive(Debug, Clone)]
enum Script {
  Payload(Value),
  Fail,
}

/// Content source answering from a script, with optional latency and a fetch counter.
#[derive(Debug, Default)]
pub struct ScriptedSource {
  scripts: Mutex<HashMap<String, Script>>,
  fetches: Mutex<HashMap<String, u32>>,
  latency: Mutex<Duration>,
  offline: Mutex<bool>,
}

impl ScriptedSource {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(&self, key: &str, payload: Value) {
    self
      .scripts
      .lock()
      .unwrap()
      .insert(key.to_string(), Script::Payload(payload));
  }

  pub fn fail(&self, key: &str) {
    self
      .scripts
      .lock()
      .unwrap()
      .insert(key.to_string(), Script::Fail);
  }

  /// Fail every fetch until turned back on.
  pub fn set_offline(&self, offline: bool) {
    *self.offline.lock().unwrap() = offline;
  }

  pub fn set_latency(&self, latency: Duration) {
    *self.latency.lock().unwrap() = latency;
  }

  pub fn fetches(&self, key: &str) -> u32 {
    self.fetches.lock().unwrap().get(key).copied().unwrap_or(0)
  }
}

#[async_trait]
impl ContentSource for ScriptedSource {
  async fn fetch_content(&self, key: &str, _hints: &ContentHints) -> Result<Value> {
    *self
      .fetches
      .lock()
      .unwrap()
      .entry(key.to_string())
      .or_default() += 1;

    let latency = *self.latency.lock().unwrap();
    if !latency.is_zero() {
      tokio::time::sleep(latency).await;
    }

    if *self.offline.lock().unwrap() {
      return Err(eyre!("network unreachable"));
    }
    let script = self.scripts.lock().unwrap().get(key).cloned();
    match script {
      Some(Script::Payload(value)) => Ok(value),
      Some(Script::Fail) => Err(eyre!("source unavailable")),
      None => Err(eyre!("404 Not Found: {}", key)),
    }
  }
}
