//! Leveled logging to rotating files.
//!
//! A [`FileWriter`] filters records by [`Level`], renders them into a write
//! buffer and rotates its file by date, size or line count in the background.
//! See the [`writer`] module for an example.

#[macro_use]
pub mod value;

pub mod buffered;
pub mod config;
pub mod error;
pub mod hook;
pub mod layer;
pub mod level;
pub mod renderer;
pub mod rotation;
pub mod time_cache;
pub mod writer;

#[cfg(test)]
mod test_support;

pub use config::{ByteSize, WriterConfig};
pub use error::{LogError, Result};
pub use hook::Hook;
pub use level::Level;
pub use value::Value;
pub use writer::{FileWriter, FileWriterBuilder, WriterStats};
