mod __test__;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LogError;

/// Severity of a record.
///
/// Levels are totally ordered from the most detailed to the most severe:
/// `Trace < Debug < Info < Warning < Error < Critical`. A writer emits a record
/// when its level is greater than or equal to the writer's threshold.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum Level {
  /// Very detailed information, mostly useful for debugging
  #[default]
  #[serde(rename = "TRACE")]
  Trace = 0,
  /// Debug-level information, used for development or troubleshooting
  #[serde(rename = "DEBUG")]
  Debug = 1,
  /// General informational messages, typically useful in production
  #[serde(rename = "INFO")]
  Info = 2,
  /// Something unexpected that does not stop the program
  #[serde(rename = "WARN", alias = "WARNING")]
  Warning = 3,
  /// A failed operation
  #[serde(rename = "ERROR")]
  Error = 4,
  /// The program may not be able to continue
  #[serde(rename = "CRITICAL")]
  Critical = 5,
}

const NAMES: [&str; 6] = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR", "CRITICAL"];

// ` level="NAME" ` preformatted for every level, plain and with ANSI colors,
// so the hot path never formats the level.
const PLAIN_PREFIXES: [&str; 6] = [
  " level=\"TRACE\" ",
  " level=\"DEBUG\" ",
  " level=\"INFO\" ",
  " level=\"WARN\" ",
  " level=\"ERROR\" ",
  " level=\"CRITICAL\" ",
];

const COLORED_PREFIXES: [&str; 6] = [
  " level=\"\x1b[37mTRACE\x1b[0m\" ",
  " level=\"\x1b[32mDEBUG\x1b[0m\" ",
  " level=\"\x1b[34mINFO\x1b[0m\" ",
  " level=\"\x1b[33mWARN\x1b[0m\" ",
  " level=\"\x1b[31mERROR\x1b[0m\" ",
  " level=\"\x1b[31mCRITICAL\x1b[0m\" ",
];

impl Level {
  /// Every level, in ascending order.
  pub const ALL: [Level; 6] = [
    Level::Trace,
    Level::Debug,
    Level::Info,
    Level::Warning,
    Level::Error,
    Level::Critical,
  ];

  #[inline]
  pub fn as_str(self) -> &'static str {
    NAMES[self as usize]
  }

  /// The ` level="..." ` prefix written in front of every record body.
  #[inline]
  pub fn prefix(self, colored: bool) -> &'static str {
    if colored {
      COLORED_PREFIXES[self as usize]
    } else {
      PLAIN_PREFIXES[self as usize]
    }
  }

  #[inline]
  pub(crate) fn from_u8(value: u8) -> Level {
    match value {
      0 => Level::Trace,
      1 => Level::Debug,
      2 => Level::Info,
      3 => Level::Warning,
      4 => Level::Error,
      _ => Level::Critical,
    }
  }
}

impl fmt::Display for Level {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Level {
  type Err = LogError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_uppercase().as_str() {
      "TRACE" => Ok(Level::Trace),
      "DEBUG" => Ok(Level::Debug),
      "INFO" => Ok(Level::Info),
      "WARN" | "WARNING" => Ok(Level::Warning),
      "ERROR" => Ok(Level::Error),
      "CRITICAL" => Ok(Level::Critical),
      other => Err(LogError::Config(format!("unknown level {:?}", other))),
    }
  }
}

impl From<&tracing::Level> for Level {
  fn from(level: &tracing::Level) -> Self {
    match *level {
      tracing::Level::TRACE => Level::Trace,
      tracing::Level::DEBUG => Level::Debug,
      tracing::Level::INFO => Level::Info,
      tracing::Level::WARN => Level::Warning,
      _ => Level::Error,
    }
  }
}
