//! # Hooks
//!
//! A writer can carry one [`Hook`], called after a record at or above the
//! hook level has been accepted. The hook sees the rendered body, not the
//! full record.
//!
//! Two dispatch modes:
//!
//! - **async** (default): calls are queued to a per-writer dispatcher thread
//!   over a bounded channel. When the queue is full the first call waits up
//!   to [`HOOK_SEND_GRACE`] for room, then calls are dropped and counted in
//!   `hooks_dropped` until the queue accepts one again. The logging call site
//!   never waits on the hook itself.
//! - **sync**: the hook runs on the calling thread, after the writer's lock
//!   has been released.
//!
//! In both modes a panicking hook is caught, counted and logged. It never
//! reaches the caller and never kills the dispatcher thread.

mod __test__;

use crossbeam_channel::{bounded, SendTimeoutError, Sender, TrySendError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread;
use std::time::Duration;

use crate::buffered::Tags;
use crate::error::LogError;
use crate::level::Level;

/// Depth of the async dispatch queue.
pub const HOOK_QUEUE_CAPACITY: usize = 1024;

/// How long a call waits on a full queue before it is dropped. Only the first
/// call after the queue filled up waits, later ones drop at once until a
/// send succeeds again.
pub const HOOK_SEND_GRACE: Duration = Duration::from_millis(10);

/// Callback invoked for accepted records.
///
/// Implementations must be cheap or use async dispatch; in sync mode `fire`
/// runs on the thread that logged. In async mode a hook that falls more than
/// [`HOOK_QUEUE_CAPACITY`] calls behind misses calls: they are dropped, not
/// delayed.
pub trait Hook: Send + Sync + 'static {
  /// Called once per accepted record with `level >= hook_level`, unless the
  /// async queue was full.
  fn fire(&self, level: Level, tags: &Tags, message: &str);

  /// Called when a rotation failed and the writer stayed on its previous
  /// file. Always invoked synchronously from the rotation thread.
  fn rotation_failed(&self, _err: &LogError) {}
}

impl<F> Hook for F
where
  F: Fn(Level, &Tags, &str) + Send + Sync + 'static,
{
  fn fire(&self, level: Level, tags: &Tags, message: &str) {
    self(level, tags, message)
  }
}

#[derive(Debug, Default)]
struct Counters {
  dropped: AtomicU64,
  panics: AtomicU64,
}

struct Job {
  hook: Arc<dyn Hook>,
  level: Level,
  tags: Arc<Tags>,
  message: String,
}

/// Per-writer hook state: the hook itself, its level, the dispatch mode and
/// the async queue.
pub struct HookDispatcher {
  hook: RwLock<Option<Arc<dyn Hook>>>,
  level: AtomicU8,
  async_mode: AtomicBool,
  queue: Mutex<Option<Sender<Job>>>,
  congested: AtomicBool,
  closed: AtomicBool,
  counters: Arc<Counters>,
}

impl std::fmt::Debug for HookDispatcher {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("HookDispatcher")
      .field("installed", &self.hook().is_some())
      .field("level", &self.level())
      .field("async", &self.is_async())
      .field("dropped", &self.dropped())
      .field("panics", &self.panics())
      .finish()
  }
}

impl HookDispatcher {
  pub fn new(level: Level, async_mode: bool) -> Self {
    Self {
      hook: RwLock::new(None),
      level: AtomicU8::new(level as u8),
      async_mode: AtomicBool::new(async_mode),
      queue: Mutex::new(None),
      congested: AtomicBool::new(false),
      closed: AtomicBool::new(false),
      counters: Arc::new(Counters::default()),
    }
  }

  pub fn hook(&self) -> Option<Arc<dyn Hook>> {
    self.hook.read().unwrap_or_else(PoisonError::into_inner).clone()
  }

  /// Installs or removes the hook.
  pub fn set_hook(&self, hook: Option<Arc<dyn Hook>>) {
    *self.hook.write().unwrap_or_else(PoisonError::into_inner) = hook;
  }

  pub fn level(&self) -> Level {
    Level::from_u8(self.level.load(Ordering::Relaxed))
  }

  pub fn set_level(&self, level: Level) {
    self.level.store(level as u8, Ordering::Relaxed);
  }

  pub fn is_async(&self) -> bool {
    self.async_mode.load(Ordering::Relaxed)
  }

  pub fn set_async(&self, async_mode: bool) {
    self.async_mode.store(async_mode, Ordering::Relaxed);
  }

  /// Whether a record at `level` would be handed to a hook. Writers use it to
  /// decide if the rendered body has to be captured at all.
  #[inline]
  pub fn wants(&self, level: Level) -> bool {
    !self.closed.load(Ordering::Acquire)
      && level >= self.level()
      && self.hook.read().unwrap_or_else(PoisonError::into_inner).is_some()
  }

  /// Hands one accepted record to the hook, honoring the hook level and the
  /// current mode. Does nothing once the dispatcher is shut down.
  pub fn dispatch(&self, level: Level, tags: Arc<Tags>, message: String) {
    if self.closed.load(Ordering::Acquire) || level < self.level() {
      return;
    }
    let Some(hook) = self.hook() else {
      return;
    };

    if !self.is_async() {
      invoke(&self.counters, || hook.fire(level, &tags, &message));
      return;
    }

    let job = Job {
      hook,
      level,
      tags,
      message,
    };
    let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
    if queue.is_none() {
      match spawn_worker(Arc::clone(&self.counters)) {
        Ok(sender) => *queue = Some(sender),
        Err(e) => {
          drop(queue);
          tracing::warn!(target: "rotlog", error = %e, "hook thread not started, firing inline");
          invoke(&self.counters, || {
            job.hook.fire(job.level, &job.tags, &job.message)
          });
          return;
        },
      }
    }
    // the grace wait happens outside the lock
    let Some(sender) = queue.clone() else {
      return;
    };
    drop(queue);

    // a full queue gets one grace period, then drops until it drains again
    let delivered = match sender.try_send(job) {
      Ok(()) => {
        self.congested.store(false, Ordering::Relaxed);
        true
      },
      Err(TrySendError::Full(job)) if !self.congested.load(Ordering::Relaxed) => {
        match sender.send_timeout(job, HOOK_SEND_GRACE) {
          Ok(()) => true,
          Err(SendTimeoutError::Timeout(_)) => {
            self.congested.store(true, Ordering::Relaxed);
            false
          },
          Err(SendTimeoutError::Disconnected(_)) => true,
        }
      },
      Err(TrySendError::Full(_)) => false,
      // a disconnected queue means the dispatcher is going away
      Err(TrySendError::Disconnected(_)) => true,
    };

    if !delivered {
      let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
      // one line per power of two keeps a stuck hook from flooding the logs
      if dropped.is_power_of_two() {
        tracing::warn!(target: "rotlog", dropped, "hook queue full, dropping calls");
      }
    }
  }

  /// Reports a rotation failure to the hook on the calling thread.
  pub fn rotation_failed(&self, err: &LogError) {
    if let Some(hook) = self.hook() {
      invoke(&self.counters, || hook.rotation_failed(err));
    }
  }

  /// Calls dropped because the async queue was full.
  pub fn dropped(&self) -> u64 {
    self.counters.dropped.load(Ordering::Relaxed)
  }

  /// Hook invocations that panicked.
  pub fn panics(&self) -> u64 {
    self.counters.panics.load(Ordering::Relaxed)
  }

  /// Stops accepting calls and lets the dispatcher thread exit once it has
  /// drained what is already queued. Does not wait for it.
  pub fn shutdown(&self) {
    self.closed.store(true, Ordering::Release);
    self.queue.lock().unwrap_or_else(PoisonError::into_inner).take();
  }
}

impl Drop for HookDispatcher {
  fn drop(&mut self) {
    self.shutdown();
  }
}

fn spawn_worker(counters: Arc<Counters>) -> std::result::Result<Sender<Job>, LogError> {
  let (tx, rx) = bounded::<Job>(HOOK_QUEUE_CAPACITY);
  thread::Builder::new()
    .name("rotlog-hook".into())
    .spawn(move || {
      for job in rx.iter() {
        invoke(&counters, || job.hook.fire(job.level, &job.tags, &job.message));
      }
    })
    .map_err(|source| LogError::Spawn {
      name: "rotlog-hook",
      source,
    })?;
  Ok(tx)
}

fn invoke<F: FnOnce()>(counters: &Counters, f: F) {
  if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
    let panics = counters.panics.fetch_add(1, Ordering::Relaxed) + 1;
    tracing::error!(target: "rotlog", panics, "log hook panicked");
  }
}
