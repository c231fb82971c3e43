//! Time source and identifier generation.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Source of the current time, injectable so tests can pin timestamps.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
  now: std::sync::Mutex<DateTime<Utc>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self {
      now: std::sync::Mutex::new(start),
    }
  }

  pub fn set(&self, at: DateTime<Utc>) {
    if let Ok(mut now) = self.now.lock() {
      *now = at;
    }
  }

  pub fn advance(&self, by: chrono::Duration) {
    if let Ok(mut now) = self.now.lock() {
      *now += by;
    }
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    self.now.lock().map(|now| *now).unwrap_or_else(|_| Utc::now())
  }
}

/// Hands out strictly increasing numeric tokens.
///
/// Tokens are `max(previous + 1, now in microseconds)`, so they stay unique for
/// the lifetime of the process and keep climbing across restarts unless the
/// wall clock moves backwards.
pub struct IdGenerator {
  last: AtomicU64,
  clock: Arc<dyn Clock>,
}

impl IdGenerator {
  pub fn new(clock: Arc<dyn Clock>) -> Self {
    Self {
      last: AtomicU64::new(0),
      clock,
    }
  }

  pub fn next(&self) -> u64 {
    let now = self.clock.now().timestamp_micros().max(0) as u64;
    let mut current = self.last.load(Ordering::SeqCst);
    loop {
      let candidate = now.max(current + 1);
      match self
        .last
        .compare_exchange(current, candidate, Ordering::SeqCst, Ordering::SeqCst)
      {
        Ok(_) => return candidate,
        Err(actual) => current = actual,
      }
    }
  }

  /// Make sure future tokens are larger than `floor`.
  pub fn observe(&self, floor: u64) {
    self.last.fetch_max(floor, Ordering::SeqCst);
  }
}

impl std::fmt::Debug for IdGenerator {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("IdGenerator")
      .field("last", &self.last.load(Ordering::SeqCst))
      .finish()
  }
}
