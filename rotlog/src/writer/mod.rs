//! # File Writer
//!
//! [`FileWriter`] is the public single-file writer: a level filter in front of
//! a [`BufferedCore`] bound to one file, a rotation thread that swaps that
//! file, and an optional hook.
//!
//! ```rust,no_run
//! use rotlog::{args, FileWriter, Level};
//!
//! let writer = FileWriter::builder("/var/log/app.log")
//!   .level(Level::Info)
//!   .rotate_lines(100_000)
//!   .retentions(7)
//!   .build()?;
//!
//! writer.info("service started");
//! writer.warnf("slow request: %s took %dms", args!["/users", 1200])?;
//! writer.close()?;
//! # Ok::<(), rotlog::LogError>(())
//! ```
//!
//! Logging methods never fail because of I/O: write errors are counted in
//! [`WriterStats::write_errors`]. The `*f` methods return an error when the
//! format string and arguments do not agree, nothing is written in that case.


use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::buffered::{BufferedCore, Tags, Written, DEFAULT_BUFFER_SIZE};
use crate::error::{LogError, Result};
use crate::hook::{Hook, HookDispatcher};
use crate::level::Level;
use crate::rotation::{
  live_path, open_log_file, Accounting, RotationPolicy, RotationState, RotationTask, Rotator,
  DEFAULT_FLUSH_INTERVAL, DEFAULT_TICK_INTERVAL, MAX_RETENTIONS,
};
use crate::time_cache::TimeCache;
use crate::value::Value;

/// Snapshot of a writer's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriterStats {
  /// Completed rotations, by time, size or lines
  pub rotations: u64,
  /// Rotations that failed and left the writer on its previous file
  pub rotation_failures: u64,
  /// Failed writes and flushes of the underlying file
  pub write_errors: u64,
  /// `*f` calls rejected because of a bad format string
  pub format_errors: u64,
  /// Hook calls dropped because the async queue was full
  pub hooks_dropped: u64,
  /// Hook calls that panicked
  pub hook_panics: u64,
  /// Bytes accounted to the live file since it was opened
  pub current_size: u64,
  /// Records accounted to the live file since it was opened
  pub current_lines: u64,
}

/// Builder for [`FileWriter`].
#[derive(Clone)]
pub struct FileWriterBuilder {
  path: PathBuf,
  level: Level,
  colored: bool,
  time_rotated: bool,
  rotate_size: u64,
  rotate_lines: u64,
  retentions: u64,
  tags: Tags,
  hook: Option<Arc<dyn Hook>>,
  hook_level: Level,
  hook_async: bool,
  buffer_size: usize,
  tick_interval: Duration,
  flush_interval: Duration,
  time_cache: Option<Arc<TimeCache>>,
}

impl std::fmt::Debug for FileWriterBuilder {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FileWriterBuilder")
      .field("path", &self.path)
      .field("level", &self.level)
      .field("time_rotated", &self.time_rotated)
      .field("rotate_size", &self.rotate_size)
      .field("rotate_lines", &self.rotate_lines)
      .field("retentions", &self.retentions)
      .field("hook", &self.hook.is_some())
      .finish_non_exhaustive()
  }
}

impl FileWriterBuilder {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      level: Level::Trace,
      colored: false,
      time_rotated: false,
      rotate_size: 0,
      rotate_lines: 0,
      retentions: 0,
      tags: Tags::new(),
      hook: None,
      hook_level: Level::Trace,
      hook_async: true,
      buffer_size: DEFAULT_BUFFER_SIZE,
      tick_interval: DEFAULT_TICK_INTERVAL,
      flush_interval: DEFAULT_FLUSH_INTERVAL,
      time_cache: None,
    }
  }

  pub fn level(mut self, level: Level) -> Self {
    self.level = level;
    self
  }

  pub fn colored(mut self, colored: bool) -> Self {
    self.colored = colored;
    self
  }

  pub fn time_rotated(mut self, on: bool) -> Self {
    self.time_rotated = on;
    self
  }

  /// Rotate once the live file holds `bytes` bytes. Zero disables.
  pub fn rotate_size(mut self, bytes: u64) -> Self {
    self.rotate_size = bytes;
    self
  }

  /// Rotate once the live file holds `lines` records. Zero disables.
  pub fn rotate_lines(mut self, lines: u64) -> Self {
    self.rotate_lines = lines;
    self
  }

  pub fn retentions(mut self, retentions: u64) -> Self {
    self.retentions = retentions;
    self
  }

  pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.tags.insert(key.into(), value.into());
    self
  }

  pub fn tags(mut self, tags: Tags) -> Self {
    self.tags = tags;
    self
  }

  pub fn hook(mut self, hook: Arc<dyn Hook>) -> Self {
    self.hook = Some(hook);
    self
  }

  pub fn hook_level(mut self, level: Level) -> Self {
    self.hook_level = level;
    self
  }

  /// Fire the hook on a dispatcher thread (default) or on the logging thread.
  pub fn hook_async(mut self, on: bool) -> Self {
    self.hook_async = on;
    self
  }

  pub fn buffer_size(mut self, bytes: usize) -> Self {
    self.buffer_size = bytes;
    self
  }

  pub fn tick_interval(mut self, interval: Duration) -> Self {
    self.tick_interval = interval;
    self
  }

  pub fn flush_interval(mut self, interval: Duration) -> Self {
    self.flush_interval = interval;
    self
  }

  /// Use `cache` instead of the process-wide time cache.
  pub fn time_cache(mut self, cache: Arc<TimeCache>) -> Self {
    self.time_cache = Some(cache);
    self
  }

  /// Opens the live file and starts the rotation thread.
  pub fn build(self) -> Result<FileWriter> {
    if self.path.as_os_str().is_empty() {
      return Err(LogError::Config("log file path is empty".into()));
    }
    if self.buffer_size == 0 {
      return Err(LogError::Config("buffer size must be positive".into()));
    }
    if self.tick_interval.is_zero() || self.flush_interval.is_zero() {
      return Err(LogError::Config("tick and flush intervals must be positive".into()));
    }
    if self.retentions > MAX_RETENTIONS {
      return Err(LogError::Config(format!(
        "retentions must be at most {}",
        MAX_RETENTIONS
      )));
    }

    let time_cache = self.time_cache.unwrap_or_else(TimeCache::global);

    let policy = RotationPolicy::default();
    policy.set_time_rotated(self.time_rotated);
    policy.set_rotate_size(self.rotate_size);
    policy.set_rotate_lines(self.rotate_lines);
    policy.set_retentions(self.retentions);

    let live = live_path(&self.path, self.time_rotated, &time_cache.date());
    let file = open_log_file(&live).map_err(|source| LogError::Open {
      path: live.clone(),
      source,
    })?;

    let core = Arc::new(BufferedCore::new(
      Box::new(file),
      Arc::clone(&time_cache),
      self.buffer_size,
    ));
    core.set_level(self.level);
    core.set_colored(self.colored);
    core.set_tags(self.tags);

    let hooks = Arc::new(HookDispatcher::new(self.hook_level, self.hook_async));
    hooks.set_hook(self.hook);

    let state = Arc::new(RotationState::new(policy, live));
    let (accounting, queue) = Accounting::channel(Arc::clone(&state));
    let rotator = Rotator::new(
      self.path.clone(),
      Arc::clone(&core),
      Arc::clone(&state),
      time_cache,
      Arc::clone(&hooks),
    );
    let task = RotationTask::spawn(rotator, queue, self.tick_interval, self.flush_interval)?;

    Ok(FileWriter {
      base: self.path,
      core,
      state,
      hooks,
      accounting,
      task: Mutex::new(Some(task)),
      format_errors: AtomicU64::new(0),
      closed: AtomicBool::new(false),
    })
  }
}

/// A level-filtered writer bound to one rotating log file.
pub struct FileWriter {
  base: PathBuf,
  core: Arc<BufferedCore>,
  state: Arc<RotationState>,
  hooks: Arc<HookDispatcher>,
  accounting: Accounting,
  task: Mutex<Option<RotationTask>>,
  format_errors: AtomicU64,
  closed: AtomicBool,
}

impl std::fmt::Debug for FileWriter {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FileWriter")
      .field("base", &self.base)
      .field("path", &self.path())
      .field("level", &self.level())
      .field("closed", &self.closed.load(Ordering::Relaxed))
      .finish()
  }
}

macro_rules! level_methods {
  ($($level:expr => $plain:ident, $formatted:ident;)*) => {
    $(
      #[doc = concat!("Writes `msg` verbatim at `", stringify!($level), "`.")]
      #[inline]
      pub fn $plain(&self, msg: &str) {
        self.log($level, msg);
      }

      #[doc = concat!("Renders `format` against `args` at `", stringify!($level), "`.")]
      #[inline]
      pub fn $formatted(&self, format: &str, args: &[Value<'_>]) -> Result<()> {
        self.logf($level, format, args)
      }
    )*
  };
}

impl FileWriter {
  /// Opens `path` with default settings.
  pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
    FileWriterBuilder::new(path).build()
  }

  pub fn builder(path: impl Into<PathBuf>) -> FileWriterBuilder {
    FileWriterBuilder::new(path)
  }

  level_methods! {
    Level::Trace => trace, tracef;
    Level::Debug => debug, debugf;
    Level::Info => info, infof;
    Level::Warning => warn, warnf;
    Level::Error => error, errorf;
    Level::Critical => critical, criticalf;
  }

  /// Writes `msg` at `level` if the writer's level lets it through.
  pub fn log(&self, level: Level, msg: &str) {
    // the plain path has no format to reject
    let _ = self.emit(level, |core, capture| core.write(level, msg, capture));
  }

  /// Renders `format` against `args` at `level` if the writer's level lets it
  /// through.
  pub fn logf(&self, level: Level, format: &str, args: &[Value<'_>]) -> Result<()> {
    self.emit(level, |core, capture| core.writef(level, format, args, capture))
  }

  fn emit<F>(&self, level: Level, write: F) -> Result<()>
  where
    F: FnOnce(&BufferedCore, bool) -> Result<Written>,
  {
    if level < self.core.level() {
      return Ok(());
    }

    let capture = self.hooks.wants(level);
    let written = match write(&self.core, capture) {
      Ok(written) => written,
      Err(e) => {
        if matches!(e, LogError::Format { .. }) {
          self.format_errors.fetch_add(1, Ordering::Relaxed);
        }
        return Err(e);
      },
    };
    // closed core
    if written.bytes == 0 {
      return Ok(());
    }

    if let Some(e) = written.sink_error {
      let errors = self.state.write_errors.fetch_add(1, Ordering::Relaxed) + 1;
      if errors.is_power_of_two() {
        tracing::warn!(target: "rotlog", path = %self.path().display(), errors, error = %e, "log write failed");
      }
    }

    self.accounting.record(written.bytes);

    if let (Some(message), Some(tags)) = (written.message, written.tags) {
      self.hooks.dispatch(level, tags, message);
    }
    Ok(())
  }

  /// The configured base path.
  pub fn base_path(&self) -> &Path {
    &self.base
  }

  /// The file records currently go to. Differs from the base path under time
  /// rotation.
  pub fn path(&self) -> PathBuf {
    self.state.current_path()
  }

  pub fn level(&self) -> Level {
    self.core.level()
  }

  pub fn set_level(&self, level: Level) {
    self.core.set_level(level);
  }

  pub fn colored(&self) -> bool {
    self.core.colored()
  }

  pub fn set_colored(&self, colored: bool) {
    self.core.set_colored(colored);
  }

  pub fn time_rotated(&self) -> bool {
    self.state.policy.time_rotated()
  }

  /// Takes effect on the next tick.
  pub fn set_time_rotated(&self, on: bool) {
    self.state.policy.set_time_rotated(on);
  }

  pub fn rotate_size(&self) -> u64 {
    self.state.policy.rotate_size()
  }

  /// Zero disables size rotation.
  pub fn set_rotate_size(&self, bytes: u64) {
    self.state.policy.set_rotate_size(bytes);
  }

  pub fn rotate_lines(&self) -> u64 {
    self.state.policy.rotate_lines()
  }

  /// Zero disables line rotation.
  pub fn set_rotate_lines(&self, lines: u64) {
    self.state.policy.set_rotate_lines(lines);
  }

  pub fn retentions(&self) -> u64 {
    self.state.policy.retentions()
  }

  pub fn set_retentions(&self, retentions: u64) {
    self.state.policy.set_retentions(retentions);
  }

  pub fn tags(&self) -> Arc<Tags> {
    self.core.tags()
  }

  pub fn set_tags<I, K, V>(&self, tags: I)
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
  {
    self
      .core
      .set_tags(tags.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
  }

  pub fn set_hook(&self, hook: Arc<dyn Hook>) {
    self.hooks.set_hook(Some(hook));
  }

  pub fn remove_hook(&self) {
    self.hooks.set_hook(None);
  }

  pub fn hook_level(&self) -> Level {
    self.hooks.level()
  }

  pub fn set_hook_level(&self, level: Level) {
    self.hooks.set_level(level);
  }

  pub fn hook_async(&self) -> bool {
    self.hooks.is_async()
  }

  pub fn set_hook_async(&self, on: bool) {
    self.hooks.set_async(on);
  }

  pub fn stats(&self) -> WriterStats {
    WriterStats {
      rotations: self.state.rotations(),
      rotation_failures: self.state.rotation_failures(),
      write_errors: self.state.write_errors(),
      format_errors: self.format_errors.load(Ordering::Relaxed),
      hooks_dropped: self.hooks.dropped(),
      hook_panics: self.hooks.panics(),
      current_size: self.state.current_size(),
      current_lines: self.state.current_lines(),
    }
  }

  /// Pushes buffered records to the file.
  pub fn flush(&self) -> Result<()> {
    self.core.flush().map_err(|e| {
      self.state.write_errors.fetch_add(1, Ordering::Relaxed);
      LogError::Io(e)
    })
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire)
  }

  /// Stops the rotation thread, flushes and closes the file. Later calls on
  /// the writer are accepted and discarded. Calling it again is a no-op.
  pub fn close(&self) -> Result<()> {
    if self.closed.swap(true, Ordering::AcqRel) {
      return Ok(());
    }
    let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(mut task) = task {
      task.stop();
    }
    self.hooks.shutdown();
    self.core.close()?;
    Ok(())
  }
}

impl Drop for FileWriter {
  fn drop(&mut self) {
    if let Err(e) = self.close() {
      tracing::warn!(target: "rotlog", error = %e, "closing log file failed");
    }
  }
}
