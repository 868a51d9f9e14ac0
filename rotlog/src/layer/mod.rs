//! # Tracing Layer
//!
//! [`WriterLayer`] forwards `tracing` events into a [`FileWriter`], so an
//! application instrumented with `tracing` gets rotating files without
//! touching its call sites.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rotlog::{layer::WriterLayer, FileWriter};
//! use tracing_subscriber::{layer::SubscriberExt, Registry};
//!
//! let writer = Arc::new(FileWriter::open("/var/log/app.log")?);
//! let subscriber = Registry::default().with(WriterLayer::new(writer));
//! tracing::subscriber::set_global_default(subscriber).ok();
//!
//! tracing::info!(user = "bob", "logged in");
//! # Ok::<(), rotlog::LogError>(())
//! ```
//!
//! The event message becomes the record body, other fields follow it as
//! `key=value`. Events whose target starts with `rotlog` are skipped, the
//! writer's own diagnostics must not loop back into it.

mod __test__;

use std::fmt::{self, Write as _};
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::{layer::Context, registry::LookupSpan, Layer};

use crate::level::Level;
use crate::writer::FileWriter;

const SELF_TARGET: &str = "rotlog";

#[derive(Debug, Clone)]
pub struct WriterLayer {
  writer: Arc<FileWriter>,
  with_target: bool,
}

impl WriterLayer {
  pub fn new(writer: Arc<FileWriter>) -> Self {
    Self {
      writer,
      with_target: false,
    }
  }

  /// Prefix every body with the event target, `target: message`.
  pub fn with_target(mut self, on: bool) -> Self {
    self.with_target = on;
    self
  }

  pub fn writer(&self) -> &Arc<FileWriter> {
    &self.writer
  }
}

impl<S> Layer<S> for WriterLayer
where
  S: Subscriber + for<'a> LookupSpan<'a>,
{
  fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
    let metadata = event.metadata();
    if metadata.target().starts_with(SELF_TARGET) {
      return;
    }
    let level = Level::from(metadata.level());
    if level < self.writer.level() {
      return;
    }

    let mut visitor = FieldVisitor::default();
    event.record(&mut visitor);

    let body = if self.with_target {
      format!("{}: {}", metadata.target(), visitor.finish())
    } else {
      visitor.finish()
    };
    self.writer.log(level, &body);
  }
}

/// Collects the `message` field and renders the others as ` key=value`.
#[derive(Default)]
struct FieldVisitor {
  message: Option<String>,
  fields: String,
}

impl FieldVisitor {
  fn finish(self) -> String {
    let mut body = self.message.unwrap_or_default();
    if body.is_empty() {
      body.push_str(self.fields.trim_start());
    } else {
      body.push_str(&self.fields);
    }
    body
  }
}

impl Visit for FieldVisitor {
  fn record_str(&mut self, field: &Field, value: &str) {
    if field.name() == "message" {
      self.message = Some(value.to_string());
    } else {
      let _ = write!(self.fields, " {}={}", field.name(), value);
    }
  }

  fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
    if field.name() == "message" {
      self.message = Some(format!("{:?}", value));
    } else {
      let _ = write!(self.fields, " {}={:?}", field.name(), value);
    }
  }
}
