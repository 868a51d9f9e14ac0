use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

use rotlog::{args, FileWriter, Level};

fn configure_criterion() -> Criterion {
  Criterion::default()
    .sample_size(30)
    .measurement_time(Duration::from_secs(5))
    .warm_up_time(Duration::from_secs(2))
}

fn open(dir: &TempDir, name: &str) -> FileWriter {
  FileWriter::builder(dir.path().join(name))
    .build()
    .expect("open bench writer")
}

fn bench_plain_write(c: &mut Criterion) {
  let dir = TempDir::new().unwrap();
  let writer = open(&dir, "plain.log");

  let mut group = c.benchmark_group("write");
  group.throughput(Throughput::Elements(1));
  group.bench_function("plain", |b| {
    b.iter(|| writer.info("request served in 12ms"));
  });
  group.bench_function("formatted", |b| {
    b.iter(|| {
      writer
        .infof("request %s served in %dms (%.2f%%)", args!["/users", 12, 99.5])
        .unwrap()
    });
  });
  group.bench_function("filtered_out", |b| {
    writer.set_level(Level::Error);
    b.iter(|| writer.debug("never written"));
    writer.set_level(Level::Trace);
  });
  group.finish();
}

fn bench_with_rotation(c: &mut Criterion) {
  let dir = TempDir::new().unwrap();
  let writer = FileWriter::builder(dir.path().join("rotating.log"))
    .rotate_lines(100_000)
    .retentions(3)
    .build()
    .expect("open bench writer");

  c.bench_function("write/line_rotation", |b| {
    b.iter(|| writer.infof("seq=%d", args![42]).unwrap());
  });
}

fn bench_contended(c: &mut Criterion) {
  let mut group = c.benchmark_group("contended");
  for threads in [1usize, 2, 4, 8] {
    group.throughput(Throughput::Elements((threads * 1_000) as u64));
    group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
      let dir = TempDir::new().unwrap();
      let writer = Arc::new(open(&dir, "contended.log"));
      b.iter(|| {
        let handles: Vec<_> = (0..threads)
          .map(|t| {
            let writer = Arc::clone(&writer);
            thread::spawn(move || {
              for i in 0..1_000 {
                writer.infof("thread=%d seq=%d", args![t, i]).unwrap();
              }
            })
          })
          .collect();
        for h in handles {
          h.join().unwrap();
        }
      });
    });
  }
  group.finish();
}

criterion_group! {
  name = benches;
  config = configure_criterion();
  targets = bench_plain_write, bench_with_rotation, bench_contended
}
criterion_main!(benches);
