//! Time and task scheduling seams.
//!
//! Record timestamps come from a [`Clock`] and deferred work goes through a
//! [`TaskScheduler`], so tests can jump the wall clock by days and drive timers
//! with tokio's paused virtual time instead of waiting on real ones.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Source of "now" for record timestamps.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self {
      now: Mutex::new(start),
    }
  }

  /// Move the clock forward.
  pub fn advance(&self, by: chrono::Duration) {
    let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
    *now += by;
  }

  pub fn set(&self, at: DateTime<Utc>) {
    *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
  }
}

impl Default for ManualClock {
  fn default() -> Self {
    Self::new(Utc::now())
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// Handle to a scheduled task.
///
/// Dropping the handle detaches the task; [`TaskHandle::cancel`] aborts it, which drops
/// the future before any further state write it would have made.
#[derive(Debug)]
pub struct TaskHandle {
  inner: JoinHandle<()>,
}

impl TaskHandle {
  pub fn cancel(&self) {
    self.inner.abort();
  }

  pub fn is_finished(&self) -> bool {
    self.inner.is_finished()
  }

  /// Wait for the task to finish. A cancelled task counts as finished.
  pub async fn join(self) {
    if let Err(e) = self.inner.await {
      if e.is_panic() {
        tracing::warn!("Scheduled task panicked: {}", e);
      }
    }
  }
}

/// Runs deferred work on the event loop.
pub trait TaskScheduler: Send + Sync {
  /// Run `task` after `delay` (immediately for a zero delay).
  fn schedule(&self, task: BoxFuture<'static, ()>, delay: Duration) -> TaskHandle;
}

/// Scheduler backed by the ambient tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl TaskScheduler for TokioScheduler {
  fn schedule(&self, task: BoxFuture<'static, ()>, delay: Duration) -> TaskHandle {
    let inner = tokio::spawn(async move {
      if !delay.is_zero() {
        tokio::time::sleep(delay).await;
      }
      task.await;
    });
    TaskHandle { inner }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures::FutureExt;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;

  #[test]
  fn test_manual_clock_advances() {
    let start = Utc::now();
    let clock = ManualClock::new(start);
    clock.advance(chrono::Duration::days(8));
    assert_eq!(clock.now() - start, chrono::Duration::days(8));
  }

  #[tokio::test(start_paused = true)]
  async fn test_delayed_task_runs_after_delay() {
    let counter = Arc::new(AtomicU32::new(0));
    let c = counter.clone();
    let handle = TokioScheduler.schedule(
      async move {
        c.fetch_add(1, Ordering::SeqCst);
      }
      .boxed(),
      Duration::from_millis(300),
    );

    tokio::time::sleep(Duration::from_millis(299)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    handle.join().await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_cancelled_task_never_runs() {
    let counter = Arc::new(AtomicU32::new(0));
    let c = counter.clone();
    let handle = TokioScheduler.schedule(
      async move {
        c.fetch_add(1, Ordering::SeqCst);
      }
      .boxed(),
      Duration::from_millis(300),
    );

    handle.cancel();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(handle.is_finished());
    assert_eq!(counter.load(Ordering::SeqCst), 0);
  }
}
