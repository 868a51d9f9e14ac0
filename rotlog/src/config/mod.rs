//! # Writer Configuration
//!
//! Serializable settings for a [`FileWriter`]. Every field has a default, a
//! JSON document only needs the fields it changes:
//!
//! ```rust
//! use rotlog::config::{ByteSize, WriterConfig};
//! use rotlog::Level;
//!
//! let cfg = WriterConfig::from_json(
//!   r#"{ "path": "/var/log/app.log", "level": "WARN", "rotate_size": "500MB", "retentions": 5 }"#,
//! )?;
//! assert_eq!(cfg.level, Level::Warning);
//! assert_eq!(cfg.rotate_size, ByteSize::mb(500));
//! # Ok::<(), rotlog::LogError>(())
//! ```


use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::buffered::{Tags, DEFAULT_BUFFER_SIZE};
use crate::error::{LogError, Result};
use crate::hook::Hook;
use crate::level::Level;
use crate::rotation::MAX_RETENTIONS;
use crate::writer::{FileWriter, FileWriterBuilder};

/// A size in bytes. Parses from plain numbers and from strings such as
/// `"4096"`, `"64KB"` or `"1.5GB"` (binary multiples).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteSize(pub u64);

impl ByteSize {
  pub const KB: u64 = 1 << 10;
  pub const MB: u64 = 1 << 20;
  pub const GB: u64 = 1 << 30;

  pub const fn b(n: u64) -> Self {
    ByteSize(n)
  }

  pub const fn kb(n: u64) -> Self {
    ByteSize(n * Self::KB)
  }

  pub const fn mb(n: u64) -> Self {
    ByteSize(n * Self::MB)
  }

  pub const fn gb(n: u64) -> Self {
    ByteSize(n * Self::GB)
  }

  pub const fn as_u64(self) -> u64 {
    self.0
  }
}

impl From<u64> for ByteSize {
  fn from(n: u64) -> Self {
    ByteSize(n)
  }
}

impl fmt::Display for ByteSize {
  /// Largest unit that divides the size exactly.
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let n = self.0;
    match n {
      0 => write!(f, "0B"),
      _ if n % Self::GB == 0 => write!(f, "{}GB", n / Self::GB),
      _ if n % Self::MB == 0 => write!(f, "{}MB", n / Self::MB),
      _ if n % Self::KB == 0 => write!(f, "{}KB", n / Self::KB),
      _ => write!(f, "{}B", n),
    }
  }
}

impl FromStr for ByteSize {
  type Err = LogError;

  fn from_str(s: &str) -> Result<Self> {
    let s = s.trim();
    let split = s
      .find(|c: char| !(c.is_ascii_digit() || c == '.'))
      .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);

    let multiplier = match unit.trim().to_ascii_uppercase().as_str() {
      "" | "B" => 1,
      "K" | "KB" => Self::KB,
      "M" | "MB" => Self::MB,
      "G" | "GB" => Self::GB,
      other => return Err(LogError::Config(format!("unknown size unit {:?} in {:?}", other, s))),
    };

    if let Ok(n) = number.parse::<u64>() {
      return n
        .checked_mul(multiplier)
        .map(ByteSize)
        .ok_or_else(|| LogError::Config(format!("size {:?} overflows", s)));
    }
    match number.parse::<f64>().map(|n| n * multiplier as f64) {
      Ok(bytes) if bytes.is_finite() && bytes >= 0.0 && bytes < u64::MAX as f64 => {
        Ok(ByteSize(bytes as u64))
      },
      _ => Err(LogError::Config(format!("invalid size {:?}", s))),
    }
  }
}

impl Serialize for ByteSize {
  fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(self.0)
  }
}

impl<'de> Deserialize<'de> for ByteSize {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
      Bytes(u64),
      Text(String),
    }

    match Repr::deserialize(deserializer)? {
      Repr::Bytes(n) => Ok(ByteSize(n)),
      Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
  }
}

/// Everything needed to build a [`FileWriter`] except the hook, which is code
/// and is attached with [`WriterConfig::builder`] or
/// [`FileWriter::from_config_with_hook`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
  /// Base path of the log file
  pub path: PathBuf,
  /// Records below this level are dropped
  pub level: Level,
  /// ANSI colored level names
  pub colored: bool,
  /// One file per day, `{path}.{date}`
  pub time_rotated: bool,
  /// Size threshold, zero disables size rotation
  pub rotate_size: ByteSize,
  /// Line threshold, zero disables line rotation
  pub rotate_lines: u64,
  /// Rotated generations (or days) kept, zero keeps all
  pub retentions: u64,
  /// Static key/value pairs written into every record
  pub tags: Tags,
  /// Records below this level do not reach the hook
  pub hook_level: Level,
  /// Fire the hook on a dispatcher thread
  pub hook_async: bool,
  /// Write buffer capacity in bytes
  pub buffer_size: usize,
  /// Date check interval of the rotation thread
  pub tick_interval_ms: u64,
  /// Background flush interval
  pub flush_interval_ms: u64,
}

impl Default for WriterConfig {
  fn default() -> Self {
    Self {
      path: PathBuf::new(),
      level: Level::Trace,
      colored: false,
      time_rotated: false,
      rotate_size: ByteSize(0),
      rotate_lines: 0,
      retentions: 0,
      tags: Tags::new(),
      hook_level: Level::Trace,
      hook_async: true,
      buffer_size: DEFAULT_BUFFER_SIZE,
      tick_interval_ms: 1_000,
      flush_interval_ms: 10_000,
    }
  }
}

impl WriterConfig {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      ..Self::default()
    }
  }

  /// Parses and validates a JSON document.
  pub fn from_json(json: &str) -> Result<Self> {
    let cfg: WriterConfig = serde_json::from_str(json)?;
    cfg.validate()?;
    Ok(cfg)
  }

  pub fn to_json(&self) -> Result<String> {
    Ok(serde_json::to_string_pretty(self)?)
  }

  /// Rejects settings no writer can run with.
  pub fn validate(&self) -> Result<()> {
    if self.path.as_os_str().is_empty() {
      return Err(LogError::Config("path must not be empty".into()));
    }
    if self.buffer_size == 0 {
      return Err(LogError::Config("buffer_size must be positive".into()));
    }
    if self.tick_interval_ms == 0 {
      return Err(LogError::Config("tick_interval_ms must be positive".into()));
    }
    if self.flush_interval_ms == 0 {
      return Err(LogError::Config("flush_interval_ms must be positive".into()));
    }
    if self.retentions > MAX_RETENTIONS {
      return Err(LogError::Config(format!(
        "retentions must be at most {}",
        MAX_RETENTIONS
      )));
    }
    Ok(())
  }

  /// A builder carrying every setting of this config.
  pub fn builder(&self) -> FileWriterBuilder {
    FileWriter::builder(self.path.clone())
      .level(self.level)
      .colored(self.colored)
      .time_rotated(self.time_rotated)
      .rotate_size(self.rotate_size.as_u64())
      .rotate_lines(self.rotate_lines)
      .retentions(self.retentions)
      .tags(self.tags.clone())
      .hook_level(self.hook_level)
      .hook_async(self.hook_async)
      .buffer_size(self.buffer_size)
      .tick_interval(Duration::from_millis(self.tick_interval_ms))
      .flush_interval(Duration::from_millis(self.flush_interval_ms))
  }
}

impl FileWriter {
  /// Validates `cfg` and opens a writer from it.
  pub fn from_config(cfg: &WriterConfig) -> Result<FileWriter> {
    cfg.validate()?;
    cfg.builder().build()
  }

  pub fn from_config_with_hook(cfg: &WriterConfig, hook: Arc<dyn Hook>) -> Result<FileWriter> {
    cfg.validate()?;
    cfg.builder().hook(hook).build()
  }
}
