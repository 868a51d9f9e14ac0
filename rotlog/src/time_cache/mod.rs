//! # Time Cache
//!
//! Formatting the current time on every log call is the single most expensive
//! part of rendering a record. Instead, a [`TimeCache`] keeps the formatted
//! timestamp prefix and the current/previous date strings, and one background
//! thread refreshes them on a short fixed interval. Writers only copy the
//! cached bytes.
//!
//! ## Layout
//!
//! - prefix: `time="2024-01-31 23:59:59"` (no trailing space, the level prefix
//!   starts with one)
//! - date: `2024-01-31`, used for time based rotation and file names
//!
//! Date rollover is detected in exactly one place: [`TimeCache::refresh`].
//!
//! ```rust
//! use rotlog::time_cache::TimeCache;
//!
//! let cache = TimeCache::global();
//! assert_eq!(cache.date().len(), 10);
//! ```


use chrono::{Duration as ChronoDuration, Local, NaiveDate, NaiveDateTime};
use crossbeam_channel::{bounded, select, tick, Sender};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{LogError, Result};

/// Layout of the timestamp prefix written in front of every record.
pub const PREFIX_TIME_FORMAT: &str = "time=\"%Y-%m-%d %H:%M:%S\"";

/// Layout of the date used in rotated file names.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Refresh period of the process-wide cache.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(100);

/// Source of wall-clock time for a [`TimeCache`].
pub trait Clock: Send + Sync + 'static {
  /// Current local wall-clock time.
  fn now(&self) -> NaiveDateTime;
}

/// The system's local clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> NaiveDateTime {
    Local::now().naive_local()
  }
}

/// A clock that only moves when told to. Used to drive date rollover in tests.
#[derive(Debug)]
pub struct ManualClock {
  now: Mutex<NaiveDateTime>,
}

impl ManualClock {
  pub fn new(now: NaiveDateTime) -> Self {
    Self {
      now: Mutex::new(now),
    }
  }

  pub fn set(&self, now: NaiveDateTime) {
    *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
  }

  pub fn advance(&self, by: ChronoDuration) {
    let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
    *now += by;
  }
}

impl Clock for ManualClock {
  fn now(&self) -> NaiveDateTime {
    *self.now.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

#[derive(Debug, Clone)]
struct Cached {
  now: NaiveDateTime,
  date: String,
  date_yesterday: String,
  prefix: Vec<u8>,
}

impl Cached {
  fn at(now: NaiveDateTime) -> Self {
    Self {
      now,
      date: format_date(now.date()),
      date_yesterday: format_date(now.date() - ChronoDuration::days(1)),
      prefix: now.format(PREFIX_TIME_FORMAT).to_string().into_bytes(),
    }
  }
}

/// Formats a date the way rotated file names carry it.
pub fn format_date(date: NaiveDate) -> String {
  date.format(DATE_FORMAT).to_string()
}

/// Parses a date produced by [`format_date`].
pub fn parse_date(s: &str) -> Option<NaiveDate> {
  NaiveDate::parse_from_str(s, DATE_FORMAT).ok()
}

/// Shared cache of the current time, formatted once per refresh.
///
/// Readers take a shared lock; [`refresh`](Self::refresh) replaces every field
/// under the exclusive lock so a reader never sees a timestamp from one
/// instant and a date from another.
pub struct TimeCache {
  clock: Arc<dyn Clock>,
  state: RwLock<Cached>,
}

impl std::fmt::Debug for TimeCache {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TimeCache")
      .field("now", &self.now())
      .field("date", &self.date())
      .finish()
  }
}

static GLOBAL: OnceLock<Arc<TimeCache>> = OnceLock::new();

impl TimeCache {
  /// Creates a cache primed from `clock`. Nothing refreshes it until
  /// [`spawn_refresher`](Self::spawn_refresher) is called or
  /// [`refresh`](Self::refresh) is invoked by hand.
  pub fn new(clock: Arc<dyn Clock>) -> Self {
    let cached = Cached::at(clock.now());
    Self {
      clock,
      state: RwLock::new(cached),
    }
  }

  /// Creates a cache on the system clock.
  pub fn system() -> Self {
    Self::new(Arc::new(SystemClock))
  }

  /// The process-wide cache, refreshed every [`DEFAULT_REFRESH_INTERVAL`] by a
  /// thread that lives as long as the process.
  pub fn global() -> Arc<TimeCache> {
    Arc::clone(GLOBAL.get_or_init(|| {
      let cache = Arc::new(TimeCache::system());
      match TimeCache::spawn_refresher(Arc::clone(&cache), DEFAULT_REFRESH_INTERVAL) {
        Ok(refresher) => refresher.detach(),
        Err(e) => tracing::error!(target: "rotlog", error = %e, "time cache refresher not started"),
      }
      cache
    }))
  }

  /// Starts a thread that calls [`refresh`](Self::refresh) every `interval`.
  pub fn spawn_refresher(cache: Arc<TimeCache>, interval: Duration) -> Result<Refresher> {
    let (stop_tx, stop_rx) = bounded::<()>(1);
    let handle = thread::Builder::new()
      .name("rotlog-timecache".into())
      .spawn(move || {
        let ticker = tick(interval);
        loop {
          select! {
            recv(ticker) -> _ => {
              cache.refresh();
            },
            recv(stop_rx) -> _ => break,
          }
        }
      })
      .map_err(|source| LogError::Spawn {
        name: "rotlog-timecache",
        source,
      })?;

    Ok(Refresher {
      stop: Some(stop_tx),
      handle: Some(handle),
    })
  }

  pub fn now(&self) -> NaiveDateTime {
    self.read().now
  }

  pub fn date(&self) -> String {
    self.read().date.clone()
  }

  pub fn date_yesterday(&self) -> String {
    self.read().date_yesterday.clone()
  }

  /// Copy of the formatted timestamp prefix.
  pub fn format(&self) -> Vec<u8> {
    self.read().prefix.clone()
  }

  /// Appends the timestamp prefix to `buf` without allocating, returning the
  /// number of bytes appended.
  #[inline]
  pub fn append_prefix(&self, buf: &mut Vec<u8>) -> usize {
    let state = self.read();
    buf.extend_from_slice(&state.prefix);
    state.prefix.len()
  }

  /// Re-reads the clock and reformats every cached field. Returns `true` when
  /// the date changed, in which case the old date becomes `date_yesterday`.
  pub fn refresh(&self) -> bool {
    let now = self.clock.now();
    let prefix = now.format(PREFIX_TIME_FORMAT).to_string().into_bytes();
    let date = format_date(now.date());

    let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
    state.now = now;
    state.prefix = prefix;
    if date != state.date {
      state.date_yesterday = std::mem::replace(&mut state.date, date);
      true
    } else {
      false
    }
  }

  fn read(&self) -> std::sync::RwLockReadGuard<'_, Cached> {
    self.state.read().unwrap_or_else(PoisonError::into_inner)
  }
}

/// Handle to a running refresher thread. Dropping it stops the thread.
#[derive(Debug)]
pub struct Refresher {
  stop: Option<Sender<()>>,
  handle: Option<JoinHandle<()>>,
}

impl Refresher {
  /// Stops the refresher and waits for the thread to exit.
  pub fn stop(mut self) {
    self.shutdown();
  }

  /// Lets the refresher run for the rest of the process.
  pub fn detach(mut self) {
    if let Some(stop) = self.stop.take() {
      std::mem::forget(stop);
    }
    self.handle.take();
  }

  fn shutdown(&mut self) {
    if let Some(stop) = self.stop.take() {
      let _ = stop.try_send(());
    }
    if let Some(handle) = self.handle.take() {
      let _ = handle.join();
    }
  }
}

impl Drop for Refresher {
  fn drop(&mut self) {
    self.shutdown();
  }
}
