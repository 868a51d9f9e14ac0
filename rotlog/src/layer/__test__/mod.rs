#[cfg(test)]
mod __test__ {
  use std::fs;
  use std::sync::Arc;
  use tempfile::TempDir;
  use tracing::{debug, error, info, warn};
  use tracing_subscriber::{layer::SubscriberExt, Registry};

  use crate::layer::WriterLayer;
  use crate::level::Level;
  use crate::test_support::manual_cache;
  use crate::writer::FileWriter;

  fn writer_in(dir: &TempDir, level: Level) -> Arc<FileWriter> {
    let (_clock, cache) = manual_cache(2024, 2, 2);
    Arc::new(
      FileWriter::builder(dir.path().join("traced.log"))
        .time_cache(cache)
        .level(level)
        .build()
        .unwrap(),
    )
  }

  fn lines(dir: &TempDir, writer: &FileWriter) -> Vec<String> {
    writer.flush().unwrap();
    fs::read_to_string(dir.path().join("traced.log"))
      .unwrap()
      .lines()
      .map(str::to_string)
      .collect()
  }

  #[test]
  fn events_become_records() {
    let dir = TempDir::new().unwrap();
    let writer = writer_in(&dir, Level::Trace);
    let subscriber = Registry::default().with(WriterLayer::new(Arc::clone(&writer)));

    tracing::subscriber::with_default(subscriber, || {
      info!("service started");
      warn!("disk at {}%", 91);
      error!("request failed");
    });

    let lines = lines(&dir, &writer);
    assert_eq!(lines.len(), 3);
    assert!(lines[0].ends_with("level=\"INFO\" service started"));
    assert!(lines[1].ends_with("level=\"WARN\" disk at 91%"));
    assert!(lines[2].ends_with("level=\"ERROR\" request failed"));
  }

  #[test]
  fn fields_follow_the_message() {
    let dir = TempDir::new().unwrap();
    let writer = writer_in(&dir, Level::Trace);
    let subscriber = Registry::default().with(WriterLayer::new(Arc::clone(&writer)));

    tracing::subscriber::with_default(subscriber, || {
      info!(user = "bob", attempts = 3, "logged in");
      info!(only = true);
    });

    let lines = lines(&dir, &writer);
    assert!(lines[0].ends_with(" logged in user=bob attempts=3"), "{}", lines[0]);
    assert!(lines[1].ends_with("level=\"INFO\" only=true"), "{}", lines[1]);
  }

  #[test]
  fn writer_level_filters_events() {
    let dir = TempDir::new().unwrap();
    let writer = writer_in(&dir, Level::Warning);
    let subscriber = Registry::default().with(WriterLayer::new(Arc::clone(&writer)));

    tracing::subscriber::with_default(subscriber, || {
      debug!("noise");
      info!("more noise");
      warn!("signal");
    });

    let lines = lines(&dir, &writer);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with("signal"));
  }

  #[test]
  fn own_diagnostics_are_skipped() {
    let dir = TempDir::new().unwrap();
    let writer = writer_in(&dir, Level::Trace);
    let subscriber = Registry::default().with(WriterLayer::new(Arc::clone(&writer)));

    tracing::subscriber::with_default(subscriber, || {
      error!(target: "rotlog", "log rotation failed");
      error!(target: "rotlog::rotation", "also internal");
      error!(target: "app", "from the app");
    });

    let lines = lines(&dir, &writer);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with("from the app"));
  }

  #[test]
  fn target_prefix_is_optional() {
    let dir = TempDir::new().unwrap();
    let writer = writer_in(&dir, Level::Trace);
    let layer = WriterLayer::new(Arc::clone(&writer)).with_target(true);
    assert!(Arc::ptr_eq(layer.writer(), &writer));
    let subscriber = Registry::default().with(layer);

    tracing::subscriber::with_default(subscriber, || {
      info!(target: "billing", "invoice sent");
    });

    assert!(lines(&dir, &writer)[0].ends_with("billing: invoice sent"));
  }
}
