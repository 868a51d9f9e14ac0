use std::sync::Arc;
use std::{env, thread, time::Duration};

use rotlog::buffered::Tags;
use rotlog::layer::WriterLayer;
use rotlog::{args, FileWriter, Level};
use tracing_subscriber::{layer::SubscriberExt, Registry};

fn main() -> rotlog::Result<()> {
  let dir = env::temp_dir().join("rotlog-simple");
  std::fs::create_dir_all(&dir)?;

  // Rotate every 500 lines and keep the three most recent generations.
  let writer = Arc::new(
    FileWriter::builder(dir.join("app.log"))
      .level(Level::Debug)
      .tag("service", "checkout")
      .tag("region", "eu-west-1")
      .rotate_lines(500)
      .retentions(3)
      .hook_level(Level::Error)
      .hook(Arc::new(|level: Level, tags: &Tags, message: &str| {
        eprintln!("[alert] {} {:?}: {}", level, tags.get("service"), message);
      }))
      .build()?,
  );

  println!("📝 Writing to {}", writer.path().display());

  writer.info("Application started");
  writer.debugf("config loaded from %s in %dms", args!["/etc/checkout.toml", 4])?;

  // Route tracing macros into the same file.
  let subscriber = Registry::default().with(WriterLayer::new(Arc::clone(&writer)));
  tracing::subscriber::set_global_default(subscriber).ok();

  tracing::info!(orders = 3, "queue drained");

  let handles: Vec<_> = (0..4)
    .map(|worker| {
      let writer = Arc::clone(&writer);
      thread::spawn(move || {
        for order in 0..400 {
          if let Err(e) = writer.infof("worker %d processed order %05d", args![worker, order]) {
            eprintln!("format error: {}", e);
          }
        }
      })
    })
    .collect();
  for h in handles {
    let _ = h.join();
  }

  writer.errorf("payment gateway timeout after %.1fs", args![2.5])?;
  tracing::warn!("retrying payment");

  // Give the rotation thread a moment to catch up with the last batch.
  thread::sleep(Duration::from_millis(200));

  let stats = writer.stats();
  println!(
    "✅ {} rotations, {} lines in the live file, {} hook calls dropped",
    stats.rotations, stats.current_lines, stats.hooks_dropped
  );

  writer.close()
}
