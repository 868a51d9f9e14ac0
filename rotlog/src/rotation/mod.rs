//! # Rotation
//!
//! Everything that decides when a writer's file is replaced and performs the
//! replacement.
//!
//! ## Triggers
//!
//! - **time**: on every tick the cached date is compared with the date of
//!   the open file. The live file is `{base}.{date}`, a new date opens a new
//!   file and prunes dated files older than the retention window.
//! - **size / lines**: every accepted record reports its byte count over a
//!   bounded accounting queue. Once either threshold is met the generations
//!   shift up (`live.1 -> live.2`, ...), the live file becomes `live.1` and a
//!   fresh live file is opened.
//!
//! Both triggers are served by one background thread per writer and every
//! swap happens under the core's lock, so at most one rotation runs at a time
//! and no record is written while files are being renamed.
//!
//! ## Failure
//!
//! Opening the replacement file is retried with backoff. If it still fails
//! the renames of that rotation are undone and the writer keeps writing to
//! its previous, still open file.


use crossbeam_channel::{bounded, never, select, tick, Receiver, Sender, TrySendError};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Duration as ChronoDuration;

use crate::buffered::BufferedCore;
use crate::error::{LogError, Result};
use crate::hook::HookDispatcher;
use crate::time_cache::{parse_date, TimeCache};

/// Depth of the per-writer accounting queue.
pub const ACCOUNTING_CAPACITY: usize = 4096;

/// How often the rotation thread checks the date.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// How often the rotation thread flushes the write buffer on its own.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// Size threshold reported before size rotation is enabled.
pub const DEFAULT_ROTATE_SIZE: u64 = 500 * 1024 * 1024;

/// Line threshold reported before line rotation is enabled.
pub const DEFAULT_ROTATE_LINES: u64 = 2_000_000;

/// Largest accepted `retentions`: generations under size/line rotation, days
/// under time rotation.
pub const MAX_RETENTIONS: u64 = 100_000;

const OPEN_ATTEMPTS: u32 = 3;
const OPEN_BACKOFF: Duration = Duration::from_millis(10);

/// Rotation settings, shared between a writer handle and its rotation thread.
/// Changes take effect on the next record or tick.
#[derive(Debug)]
pub struct RotationPolicy {
  time_rotated: AtomicBool,
  size_rotated: AtomicBool,
  line_rotated: AtomicBool,
  rotate_size: AtomicU64,
  rotate_lines: AtomicU64,
  retentions: AtomicU64,
}

impl Default for RotationPolicy {
  fn default() -> Self {
    Self {
      time_rotated: AtomicBool::new(false),
      size_rotated: AtomicBool::new(false),
      line_rotated: AtomicBool::new(false),
      rotate_size: AtomicU64::new(DEFAULT_ROTATE_SIZE),
      rotate_lines: AtomicU64::new(DEFAULT_ROTATE_LINES),
      retentions: AtomicU64::new(0),
    }
  }
}

impl RotationPolicy {
  pub fn time_rotated(&self) -> bool {
    self.time_rotated.load(Ordering::Relaxed)
  }

  pub fn set_time_rotated(&self, on: bool) {
    self.time_rotated.store(on, Ordering::Relaxed);
  }

  pub fn size_rotated(&self) -> bool {
    self.size_rotated.load(Ordering::Relaxed)
  }

  pub fn line_rotated(&self) -> bool {
    self.line_rotated.load(Ordering::Relaxed)
  }

  pub fn rotate_size(&self) -> u64 {
    self.rotate_size.load(Ordering::Relaxed)
  }

  /// A positive size enables size rotation at that threshold, zero disables
  /// it and keeps the previous threshold.
  pub fn set_rotate_size(&self, bytes: u64) {
    if bytes > 0 {
      self.rotate_size.store(bytes, Ordering::Relaxed);
    }
    self.size_rotated.store(bytes > 0, Ordering::Relaxed);
  }

  pub fn rotate_lines(&self) -> u64 {
    self.rotate_lines.load(Ordering::Relaxed)
  }

  /// A positive count enables line rotation at that threshold, zero disables
  /// it and keeps the previous threshold.
  pub fn set_rotate_lines(&self, lines: u64) {
    if lines > 0 {
      self.rotate_lines.store(lines, Ordering::Relaxed);
    }
    self.line_rotated.store(lines > 0, Ordering::Relaxed);
  }

  pub fn retentions(&self) -> u64 {
    self.retentions.load(Ordering::Relaxed)
  }

  /// Number of rotated generations (or days, under time rotation) to keep.
  /// Zero keeps everything, values above [`MAX_RETENTIONS`] are clamped.
  pub fn set_retentions(&self, retentions: u64) {
    self.retentions.store(retentions.min(MAX_RETENTIONS), Ordering::Relaxed);
  }

  /// Whether records have to be counted at all.
  #[inline]
  pub fn counts_records(&self) -> bool {
    self.size_rotated() || self.line_rotated()
  }

  /// Thresholds trigger when met, not only when exceeded.
  pub fn threshold_reached(&self, size: u64, lines: u64) -> bool {
    (self.size_rotated() && size >= self.rotate_size())
      || (self.line_rotated() && lines >= self.rotate_lines())
  }
}

/// State of the live file plus the counters reported by
/// [`WriterStats`](crate::writer::WriterStats). The rotation thread is the
/// only writer of the path and the size/line counters.
#[derive(Debug)]
pub struct RotationState {
  pub policy: RotationPolicy,
  current_path: Mutex<PathBuf>,
  current_size: AtomicU64,
  current_lines: AtomicU64,
  overflow_bytes: AtomicU64,
  overflow_lines: AtomicU64,
  pub(crate) rotations: AtomicU64,
  pub(crate) rotation_failures: AtomicU64,
  pub(crate) write_errors: AtomicU64,
}

impl RotationState {
  pub fn new(policy: RotationPolicy, current_path: PathBuf) -> Self {
    Self {
      policy,
      current_path: Mutex::new(current_path),
      current_size: AtomicU64::new(0),
      current_lines: AtomicU64::new(0),
      overflow_bytes: AtomicU64::new(0),
      overflow_lines: AtomicU64::new(0),
      rotations: AtomicU64::new(0),
      rotation_failures: AtomicU64::new(0),
      write_errors: AtomicU64::new(0),
    }
  }

  pub fn current_path(&self) -> PathBuf {
    self.current_path.lock().unwrap_or_else(PoisonError::into_inner).clone()
  }

  pub fn current_size(&self) -> u64 {
    self.current_size.load(Ordering::Relaxed)
  }

  pub fn current_lines(&self) -> u64 {
    self.current_lines.load(Ordering::Relaxed)
  }

  pub fn rotations(&self) -> u64 {
    self.rotations.load(Ordering::Relaxed)
  }

  pub fn rotation_failures(&self) -> u64 {
    self.rotation_failures.load(Ordering::Relaxed)
  }

  pub fn write_errors(&self) -> u64 {
    self.write_errors.load(Ordering::Relaxed)
  }

  fn set_current_path(&self, path: PathBuf) {
    *self.current_path.lock().unwrap_or_else(PoisonError::into_inner) = path;
  }

  fn reset_counters(&self) {
    self.current_size.store(0, Ordering::Relaxed);
    self.current_lines.store(0, Ordering::Relaxed);
  }
}

/// Producer side of the accounting queue. Never blocks: when the queue is
/// full the count spills into overflow counters that the rotation thread
/// folds in on its next wakeup.
#[derive(Debug, Clone)]
pub struct Accounting {
  tx: Sender<u64>,
  state: Arc<RotationState>,
}

impl Accounting {
  pub fn channel(state: Arc<RotationState>) -> (Self, Receiver<u64>) {
    let (tx, rx) = bounded(ACCOUNTING_CAPACITY);
    (Self { tx, state }, rx)
  }

  /// Reports one accepted record of `bytes` bytes.
  #[inline]
  pub fn record(&self, bytes: usize) {
    if !self.state.policy.counts_records() {
      return;
    }
    match self.tx.try_send(bytes as u64) {
      Ok(()) => {},
      Err(TrySendError::Full(bytes)) => {
        self.state.overflow_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.state.overflow_lines.fetch_add(1, Ordering::Relaxed);
      },
      // rotation thread is gone, the writer is closing
      Err(TrySendError::Disconnected(_)) => {},
    }
  }
}

/// Appends `.suffix` to the file name of `path`.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
  let mut name = OsString::from(path.as_os_str());
  name.push(".");
  name.push(suffix);
  PathBuf::from(name)
}

/// `{base}.{date}`, the live file under time rotation.
pub fn dated_path(base: &Path, date: &str) -> PathBuf {
  with_suffix(base, date)
}

/// `{live}.{n}`, the n-th rotated generation of a live file.
pub fn generation_path(live: &Path, n: u64) -> PathBuf {
  with_suffix(live, &n.to_string())
}

/// The path records should currently go to.
pub fn live_path(base: &Path, time_rotated: bool, date: &str) -> PathBuf {
  if time_rotated {
    dated_path(base, date)
  } else {
    base.to_path_buf()
  }
}

/// Opens (or creates) a log file for appending.
pub fn open_log_file(path: &Path) -> io::Result<File> {
  OpenOptions::new().create(true).append(true).open(path)
}

fn open_with_retry(path: &Path) -> io::Result<File> {
  let mut delay = OPEN_BACKOFF;
  let mut attempt = 1;
  loop {
    match open_log_file(path) {
      Ok(file) => return Ok(file),
      Err(e) if attempt >= OPEN_ATTEMPTS => return Err(e),
      Err(_) => {
        thread::sleep(delay);
        delay *= 2;
        attempt += 1;
      },
    }
  }
}

/// What a rotation attempt produced, reported once the core lock is released.
enum Outcome {
  Skipped,
  Rotated { from: PathBuf, to: PathBuf },
  Failed(LogError),
}

/// The rotation thread's view of one writer.
pub struct Rotator {
  base: PathBuf,
  core: Arc<BufferedCore>,
  state: Arc<RotationState>,
  time_cache: Arc<TimeCache>,
  hooks: Arc<HookDispatcher>,
  current_date: String,
}

impl Rotator {
  pub fn new(
    base: PathBuf,
    core: Arc<BufferedCore>,
    state: Arc<RotationState>,
    time_cache: Arc<TimeCache>,
    hooks: Arc<HookDispatcher>,
  ) -> Self {
    let current_date = time_cache.date();
    Self {
      base,
      core,
      state,
      time_cache,
      hooks,
      current_date,
    }
  }

  /// Periodic check: refreshes the time cache and switches to the file the
  /// current date and settings call for.
  pub fn on_tick(&mut self) {
    self.time_cache.refresh();
    self.fold_overflow();

    let date = self.time_cache.date();
    let expected = live_path(&self.base, self.state.policy.time_rotated(), &date);
    if expected == self.state.current_path() {
      return;
    }

    let outcome = self.switch_to(&expected);
    let switched = matches!(outcome, Outcome::Rotated { .. });
    self.report(outcome);

    if switched {
      self.current_date = date;
      let retentions = self.state.policy.retentions();
      if self.state.policy.time_rotated() && retentions > 0 {
        prune_dated(&self.base, &self.current_date, retentions);
      }
    }
  }

  /// Folds one record into the counters and rotates generations when a
  /// threshold is reached.
  pub fn account(&mut self, bytes: u64) {
    self.state.current_size.fetch_add(bytes, Ordering::Relaxed);
    self.state.current_lines.fetch_add(1, Ordering::Relaxed);
    self.fold_overflow();

    let size = self.state.current_size();
    let lines = self.state.current_lines();
    if self.state.policy.threshold_reached(size, lines) {
      let outcome = self.shift_generations();
      self.report(outcome);
    }
  }

  /// Background flush. Failures are counted as write errors.
  pub fn flush(&self) {
    if let Err(e) = self.core.flush() {
      self.state.write_errors.fetch_add(1, Ordering::Relaxed);
      tracing::warn!(target: "rotlog", error = %e, "periodic flush failed");
    }
  }

  pub fn current_date(&self) -> &str {
    &self.current_date
  }

  fn fold_overflow(&self) {
    let bytes = self.state.overflow_bytes.swap(0, Ordering::Relaxed);
    let lines = self.state.overflow_lines.swap(0, Ordering::Relaxed);
    if lines > 0 {
      self.state.current_size.fetch_add(bytes, Ordering::Relaxed);
      self.state.current_lines.fetch_add(lines, Ordering::Relaxed);
    }
  }

  /// Opens `path` and makes it the live file. Nothing is renamed.
  fn switch_to(&self, path: &Path) -> Outcome {
    let mut guard = self.core.lock();
    if guard.is_closed() {
      return Outcome::Skipped;
    }
    let flushed = guard.flush();

    let outcome = match open_with_retry(path) {
      Ok(file) => {
        let (_old, _) = guard.reset_sink(Box::new(file));
        let from = self.state.current_path();
        self.state.set_current_path(path.to_path_buf());
        self.state.reset_counters();
        Outcome::Rotated {
          from,
          to: path.to_path_buf(),
        }
      },
      Err(source) => Outcome::Failed(LogError::Rotation {
        path: path.to_path_buf(),
        source,
      }),
    };
    drop(guard);

    self.note_flush(flushed);
    outcome
  }

  /// Size/line rotation of the current live file.
  fn shift_generations(&self) -> Outcome {
    let live = self.state.current_path();
    let retentions = self.state.policy.retentions();

    let mut guard = self.core.lock();
    if guard.is_closed() {
      return Outcome::Skipped;
    }
    let flushed = guard.flush();

    let mut renamed: Vec<(PathBuf, PathBuf)> = Vec::new();
    let result = (|| -> io::Result<()> {
      let existing = highest_generation(&live);
      let top = if retentions > 0 {
        // the oldest kept generation is dropped to make room
        let _ = fs::remove_file(generation_path(&live, retentions));
        existing.min(retentions - 1)
      } else {
        existing
      };
      for i in (1..=top).rev() {
        let from = generation_path(&live, i);
        if !from.exists() {
          continue;
        }
        let to = generation_path(&live, i + 1);
        fs::rename(&from, &to)?;
        renamed.push((from, to));
      }
      let first = generation_path(&live, 1);
      fs::rename(&live, &first)?;
      renamed.push((live.clone(), first));
      Ok(())
    })()
    .and_then(|()| open_with_retry(&live));

    let outcome = match result {
      Ok(file) => {
        let (_old, _) = guard.reset_sink(Box::new(file));
        self.state.reset_counters();
        Outcome::Rotated {
          from: generation_path(&live, 1),
          to: live.clone(),
        }
      },
      Err(source) => {
        undo_renames(&renamed);
        // counting restarts so a failing rotation is not retried per record
        self.state.reset_counters();
        Outcome::Failed(LogError::Rotation { path: live, source })
      },
    };
    drop(guard);

    self.note_flush(flushed);
    outcome
  }

  fn note_flush(&self, flushed: io::Result<()>) {
    if let Err(e) = flushed {
      self.state.write_errors.fetch_add(1, Ordering::Relaxed);
      tracing::warn!(target: "rotlog", error = %e, "flush before rotation failed");
    }
  }

  fn report(&self, outcome: Outcome) {
    match outcome {
      Outcome::Skipped => {},
      Outcome::Rotated { from, to } => {
        self.state.rotations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
          target: "rotlog",
          from = %from.display(),
          to = %to.display(),
          "log file rotated"
        );
      },
      Outcome::Failed(err) => {
        self.state.rotation_failures.fetch_add(1, Ordering::Relaxed);
        tracing::error!(target: "rotlog", error = %err, "log rotation failed, keeping current file");
        self.hooks.rotation_failed(&err);
      },
    }
  }
}

fn highest_generation(live: &Path) -> u64 {
  let mut n = 0;
  while generation_path(live, n + 1).exists() {
    n += 1;
  }
  n
}

fn undo_renames(renamed: &[(PathBuf, PathBuf)]) {
  for (from, to) in renamed.iter().rev() {
    if let Err(e) = fs::rename(to, from) {
      tracing::warn!(
        target: "rotlog",
        from = %to.display(),
        to = %from.display(),
        error = %e,
        "could not undo rename"
      );
    }
  }
}

/// Deletes every `{base}.{date}` and `{base}.{date}.{n}` whose date is
/// `retentions + 1` or more days before `today`. Best effort: unreadable
/// directories and failed deletions are logged and skipped.
pub fn prune_dated(base: &Path, today: &str, retentions: u64) -> usize {
  // a window reaching past the calendar keeps everything
  let Some(cutoff) = parse_date(today).and_then(|today| {
    i64::try_from(retentions)
      .ok()
      .and_then(|r| r.checked_add(1))
      .and_then(ChronoDuration::try_days)
      .and_then(|window| today.checked_sub_signed(window))
  }) else {
    return 0;
  };

  let dir = match base.parent() {
    Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
    _ => PathBuf::from("."),
  };
  let Some(stem) = base.file_name().and_then(|n| n.to_str()) else {
    return 0;
  };
  let prefix = format!("{}.", stem);

  let entries = match fs::read_dir(&dir) {
    Ok(entries) => entries,
    Err(e) => {
      tracing::warn!(target: "rotlog", dir = %dir.display(), error = %e, "retention scan failed");
      return 0;
    },
  };

  let mut removed = 0;
  for entry in entries.flatten() {
    let name = entry.file_name();
    let Some(rest) = name.to_str().and_then(|n| n.strip_prefix(prefix.as_str())) else {
      continue;
    };
    let Some(date) = rest.get(..10).and_then(parse_date) else {
      continue;
    };
    let tail = &rest[10..];
    let generation = tail.is_empty()
      || tail
        .strip_prefix('.')
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()));
    if !generation || date > cutoff {
      continue;
    }

    match fs::remove_file(entry.path()) {
      Ok(()) => {
        removed += 1;
        tracing::debug!(target: "rotlog", file = %entry.path().display(), "expired log file removed");
      },
      Err(e) => {
        tracing::warn!(target: "rotlog", file = %entry.path().display(), error = %e, "could not remove expired log file")
      },
    }
  }
  removed
}

/// Handle to a writer's rotation thread.
#[derive(Debug)]
pub struct RotationTask {
  shutdown: Option<Sender<()>>,
  handle: Option<JoinHandle<()>>,
}

impl RotationTask {
  /// Starts the thread serving `rotator`: date checks every `tick_interval`,
  /// a flush every `flush_interval`, and the accounting queue in between.
  pub fn spawn(
    mut rotator: Rotator,
    accounting: Receiver<u64>,
    tick_interval: Duration,
    flush_interval: Duration,
  ) -> Result<Self> {
    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
    let handle = thread::Builder::new()
      .name("rotlog-rotation".into())
      .spawn(move || {
        let ticker = tick(tick_interval);
        let flusher = tick(flush_interval);
        let idle = never::<u64>();
        let mut producers_gone = false;
        loop {
          let queue = if producers_gone { &idle } else { &accounting };
          select! {
            recv(shutdown_rx) -> _ => break,
            recv(ticker) -> _ => rotator.on_tick(),
            recv(flusher) -> _ => rotator.flush(),
            recv(queue) -> msg => match msg {
              Ok(bytes) => rotator.account(bytes),
              // keep serving ticks until shutdown
              Err(_) => producers_gone = true,
            },
          }
        }
      })
      .map_err(|source| LogError::Spawn {
        name: "rotlog-rotation",
        source,
      })?;

    Ok(Self {
      shutdown: Some(shutdown_tx),
      handle: Some(handle),
    })
  }

  /// Signals the thread and waits for it to exit. Idempotent.
  pub fn stop(&mut self) {
    if let Some(shutdown) = self.shutdown.take() {
      let _ = shutdown.try_send(());
    }
    if let Some(handle) = self.handle.take() {
      if handle.join().is_err() {
        tracing::error!(target: "rotlog", "rotation thread panicked");
      }
    }
  }
}

impl Drop for RotationTask {
  fn drop(&mut self) {
    self.stop();
  }
}
