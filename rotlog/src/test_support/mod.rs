//! Helpers shared by the unit tests of every module.

use chrono::{NaiveDate, NaiveDateTime};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::time_cache::{ManualClock, TimeCache};

/// In-memory sink whose contents stay readable after it is boxed into a core.
#[derive(Debug, Clone, Default)]
pub struct SharedSink {
  bytes: Arc<Mutex<Vec<u8>>>,
  flushes: Arc<Mutex<usize>>,
}

impl SharedSink {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn contents(&self) -> String {
    String::from_utf8(self.bytes.lock().unwrap().clone()).unwrap()
  }

  pub fn lines(&self) -> Vec<String> {
    self.contents().lines().map(str::to_string).collect()
  }

  pub fn flushes(&self) -> usize {
    *self.flushes.lock().unwrap()
  }
}

impl Write for SharedSink {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.bytes.lock().unwrap().extend_from_slice(buf);
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    *self.flushes.lock().unwrap() += 1;
    Ok(())
  }
}

/// Sink that rejects every write.
#[derive(Debug, Default)]
pub struct FailingSink;

impl Write for FailingSink {
  fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
    Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink is gone"))
  }

  fn flush(&mut self) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink is gone"))
  }
}

pub fn noon(y: i32, m: u32, d: u32) -> NaiveDateTime {
  NaiveDate::from_ymd_opt(y, m, d)
    .unwrap()
    .and_hms_opt(12, 0, 0)
    .unwrap()
}

/// A cache on a manual clock set to noon of the given day.
pub fn manual_cache(y: i32, m: u32, d: u32) -> (Arc<ManualClock>, Arc<TimeCache>) {
  let clock = Arc::new(ManualClock::new(noon(y, m, d)));
  let cache = Arc::new(TimeCache::new(clock.clone()));
  (clock, cache)
}

/// Polls `cond` until it holds or `timeout` elapses.
pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut cond: F) -> bool {
  let deadline = Instant::now() + timeout;
  loop {
    if cond() {
      return true;
    }
    if Instant::now() >= deadline {
      return false;
    }
    thread::sleep(Duration::from_millis(2));
  }
}
