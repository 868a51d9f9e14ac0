//! Hammers one writer from many threads while it rotates by size and checks
//! that every record ends up in exactly one file.

use crossbeam_channel::unbounded;
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tempfile::TempDir;

use rotlog::{args, FileWriter};

const THREADS: usize = 8;
const RECORDS_PER_THREAD: usize = 50_000;

fn main() -> rotlog::Result<()> {
  tracing_subscriber::fmt().with_target(false).init();

  let dir = TempDir::new()?;
  let writer = Arc::new(
    FileWriter::builder(dir.path().join("stress.log"))
      .rotate_size(4 * 1024 * 1024)
      .build()?,
  );

  println!(
    "rotation stress started at {}",
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
  );
  let (done_tx, done_rx) = unbounded::<(usize, f64)>();
  let start = Instant::now();

  let handles: Vec<_> = (0..THREADS)
    .map(|t| {
      let writer = Arc::clone(&writer);
      let done = done_tx.clone();
      thread::spawn(move || {
        let payload = "x".repeat(32);
        let begin = Instant::now();
        for i in 0..RECORDS_PER_THREAD {
          if let Err(e) = writer.infof("thread=%d seq=%d payload=%s", args![t, i, &payload]) {
            tracing::error!(error = %e, "format failed");
          }
        }
        let _ = done.send((t, begin.elapsed().as_secs_f64()));
      })
    })
    .collect();
  drop(done_tx);

  for (t, secs) in done_rx.iter() {
    println!(
      "thread {:>2}: {:>10.0} records/s",
      t,
      RECORDS_PER_THREAD as f64 / secs
    );
  }
  for h in handles {
    let _ = h.join();
  }

  let elapsed = start.elapsed().as_secs_f64();
  let stats = writer.stats();
  writer.close()?;

  let mut files = 0;
  let mut lines = 0;
  for entry in fs::read_dir(dir.path())?.flatten() {
    files += 1;
    lines += fs::read_to_string(entry.path())?.lines().count();
  }

  let expected = THREADS * RECORDS_PER_THREAD;
  println!(
    "{} records in {:.2}s ({:.0}/s), {} files, {} rotations, {} write errors",
    lines,
    elapsed,
    expected as f64 / elapsed,
    files,
    stats.rotations,
    stats.write_errors
  );
  if lines != expected {
    eprintln!("lost records: expected {}, found {}", expected, lines);
    std::process::exit(1);
  }
  Ok(())
}
