//! # Buffered Core
//!
//! The only place that touches a writer's byte sink. One mutex guards the
//! sink, the write buffer and the rendered tag string; every record is built
//! and copied into the buffer inside a single critical section, so records
//! from one core never interleave.
//!
//! The core does not filter by level: callers check [`BufferedCore::level`]
//! before calling `write`/`writef`.
//!
//! Record layout:
//!
//! ```text
//! time="2024-01-31 10:00:00" level="INFO" app="api" env="prod" body\n
//! ```

mod __test__;

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::Result;
use crate::level::Level;
use crate::renderer::render_format;
use crate::time_cache::TimeCache;
use crate::value::Value;

/// Byte destination wrapped by a core: a file, a socket, stdout, memory.
pub type Sink = Box<dyn Write + Send>;

/// Static key/value pairs rendered into every record of a writer. Ordered by
/// key so the rendered string is deterministic.
pub type Tags = BTreeMap<String, String>;

/// Default capacity of the write buffer: one memory page.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Line terminator appended to every record.
pub const EOL: u8 = b'\n';

/// What a successful write produced.
#[derive(Debug, Clone, Default)]
pub struct Written {
  /// Bytes of the complete record, prefix and terminator included
  pub bytes: usize,
  /// Rendered body, only captured when asked for (hook dispatch)
  pub message: Option<String>,
  /// Tags the record was rendered with, only captured with `message`
  pub tags: Option<Arc<Tags>>,
  /// Error raised while draining the buffer into the sink; the record itself
  /// is accepted, the failure is for the caller to count
  pub sink_error: Option<Arc<io::Error>>,
}

struct CoreInner {
  sink: Option<Sink>,
  buf: Vec<u8>,
  capacity: usize,
  tags: Arc<Tags>,
  tag_str: String,
}

impl CoreInner {
  fn drain(&mut self) -> io::Result<()> {
    if self.buf.is_empty() {
      return Ok(());
    }
    let result = match self.sink.as_mut() {
      Some(sink) => sink.write_all(&self.buf),
      None => Ok(()),
    };
    // the bytes are either in the sink or lost with it, never written twice
    self.buf.clear();
    result
  }

  fn flush(&mut self) -> io::Result<()> {
    self.drain()?;
    match self.sink.as_mut() {
      Some(sink) => sink.flush(),
      None => Ok(()),
    }
  }
}

/// Synchronization point around one sink.
pub struct BufferedCore {
  inner: Mutex<CoreInner>,
  time_cache: Arc<TimeCache>,
  level: AtomicU8,
  colored: AtomicBool,
  closed: AtomicBool,
}

impl std::fmt::Debug for BufferedCore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BufferedCore")
      .field("level", &self.level())
      .field("colored", &self.colored())
      .field("closed", &self.is_closed())
      .finish()
  }
}

impl BufferedCore {
  /// Wraps `sink` with a write buffer of `capacity` bytes.
  pub fn new(sink: Sink, time_cache: Arc<TimeCache>, capacity: usize) -> Self {
    Self {
      inner: Mutex::new(CoreInner {
        sink: Some(sink),
        buf: Vec::with_capacity(capacity),
        capacity,
        tags: Arc::new(Tags::new()),
        tag_str: String::new(),
      }),
      time_cache,
      level: AtomicU8::new(Level::Trace as u8),
      colored: AtomicBool::new(false),
      closed: AtomicBool::new(false),
    }
  }

  #[inline]
  pub fn level(&self) -> Level {
    Level::from_u8(self.level.load(Ordering::Relaxed))
  }

  pub fn set_level(&self, level: Level) {
    self.level.store(level as u8, Ordering::Relaxed);
  }

  #[inline]
  pub fn colored(&self) -> bool {
    self.colored.load(Ordering::Relaxed)
  }

  pub fn set_colored(&self, colored: bool) {
    self.colored.store(colored, Ordering::Relaxed);
  }

  #[inline]
  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire)
  }

  pub fn tags(&self) -> Arc<Tags> {
    Arc::clone(&self.lock_inner().tags)
  }

  /// Replaces the tags and re-renders the cached `key="value" ` string.
  pub fn set_tags(&self, tags: Tags) {
    let tag_str = render_tags(&tags);
    let mut inner = self.lock_inner();
    inner.tags = Arc::new(tags);
    inner.tag_str = tag_str;
  }

  /// Writes a record whose body is `msg` verbatim.
  pub fn write(&self, level: Level, msg: &str, capture: bool) -> Result<Written> {
    self.write_record(level, capture, |buf| {
      buf.extend_from_slice(msg.as_bytes());
      Ok(msg.len())
    })
  }

  /// Writes a record whose body is `format` rendered against `args`. A
  /// format error fails the call and leaves no bytes in the buffer.
  pub fn writef(
    &self,
    level: Level,
    format: &str,
    args: &[Value<'_>],
    capture: bool,
  ) -> Result<Written> {
    self.write_record(level, capture, |buf| render_format(buf, format, args))
  }

  fn write_record<F>(&self, level: Level, capture: bool, body: F) -> Result<Written>
  where
    F: FnOnce(&mut Vec<u8>) -> Result<usize>,
  {
    let mut inner = self.lock_inner();
    if self.is_closed() || inner.sink.is_none() {
      return Ok(Written::default());
    }

    let record_start = inner.buf.len();
    let mut bytes = self.time_cache.append_prefix(&mut inner.buf);

    let prefix = level.prefix(self.colored());
    inner.buf.extend_from_slice(prefix.as_bytes());
    bytes += prefix.len();

    // split borrow: tag_str is read while buf is extended
    let CoreInner { buf, tag_str, .. } = &mut *inner;
    buf.extend_from_slice(tag_str.as_bytes());
    bytes += tag_str.len();

    let body_start = buf.len();
    let body_len = match body(&mut *buf) {
      Ok(n) => n,
      Err(e) => {
        buf.truncate(record_start);
        return Err(e);
      },
    };
    bytes += body_len;

    let message = capture.then(|| String::from_utf8_lossy(&buf[body_start..]).into_owned());

    buf.push(EOL);
    bytes += 1;

    let mut written = Written {
      bytes,
      message,
      tags: capture.then(|| Arc::clone(&inner.tags)),
      sink_error: None,
    };

    if inner.buf.len() >= inner.capacity {
      if let Err(e) = inner.drain() {
        written.sink_error = Some(Arc::new(e));
      }
    }

    Ok(written)
  }

  /// Pushes buffered bytes to the sink and flushes it.
  pub fn flush(&self) -> io::Result<()> {
    self.lock_inner().flush()
  }

  /// Exclusive access to the sink, for swapping it during rotation.
  pub fn lock(&self) -> CoreGuard<'_> {
    CoreGuard {
      inner: self.lock_inner(),
      closed: &self.closed,
    }
  }

  /// Flushes, marks the core closed and drops the sink. Writes after this
  /// are accepted and discarded. Calling it again is a no-op.
  pub fn close(&self) -> io::Result<()> {
    let mut inner = self.lock_inner();
    if self.closed.swap(true, Ordering::AcqRel) {
      return Ok(());
    }
    let result = inner.flush();
    inner.sink = None;
    result
  }

  fn lock_inner(&self) -> MutexGuard<'_, CoreInner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// Held lock on a core. Sink replacement is only reachable through it, which
/// keeps the swap inside the same critical section as writes.
pub struct CoreGuard<'a> {
  inner: MutexGuard<'a, CoreInner>,
  closed: &'a AtomicBool,
}

impl CoreGuard<'_> {
  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire)
  }

  pub fn flush(&mut self) -> io::Result<()> {
    self.inner.flush()
  }

  /// Flushes the current sink and installs `sink` in its place, returning
  /// the old one. The old sink is returned even when the flush failed so the
  /// caller decides what to do with it.
  pub fn reset_sink(&mut self, sink: Sink) -> (Option<Sink>, io::Result<()>) {
    let flushed = self.inner.flush();
    let old = self.inner.sink.replace(sink);
    (old, flushed)
  }
}

/// Renders tags as `key="value" ` pairs in key order. The level prefix ends
/// with a space and so does every pair, the body follows directly. Empty tags
/// render as nothing. Quotes, backslashes and control characters in values
/// are escaped, a record stays on one line.
pub fn render_tags(tags: &Tags) -> String {
  let mut out = String::new();
  for (key, value) in tags {
    let _ = write!(out, "{}={:?} ", key, value);
  }
  out
}
