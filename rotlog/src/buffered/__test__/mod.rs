#[cfg(test)]
mod __test__ {
  use std::sync::Arc;
  use std::thread;

  use crate::buffered::{render_tags, BufferedCore, Tags};
  use crate::level::Level;
  use crate::test_support::{manual_cache, FailingSink, SharedSink};
  use crate::time_cache::TimeCache;

  const PREFIX: &str = "time=\"2024-05-06 12:00:00\"";

  fn core_with(capacity: usize) -> (BufferedCore, SharedSink, Arc<TimeCache>) {
    let (_clock, cache) = manual_cache(2024, 5, 6);
    let sink = SharedSink::new();
    let core = BufferedCore::new(Box::new(sink.clone()), Arc::clone(&cache), capacity);
    (core, sink, cache)
  }

  #[test]
  fn write_renders_full_record_and_counts_bytes() {
    let (core, sink, _) = core_with(4096);

    let written = core.write(Level::Info, "hello", false).unwrap();
    core.flush().unwrap();

    let expected = format!("{} level=\"INFO\" hello\n", PREFIX);
    assert_eq!(sink.contents(), expected);
    assert_eq!(sink.flushes(), 1);
    assert_eq!(written.bytes, expected.len());
    assert!(written.message.is_none());
  }

  #[test]
  fn writef_renders_body_and_captures_message() {
    let (core, sink, _) = core_with(4096);

    let written = core.writef(Level::Warning, "%s-%d", args!["a", 1], true).unwrap();
    core.flush().unwrap();

    assert_eq!(sink.contents(), format!("{} level=\"WARN\" a-1\n", PREFIX));
    assert_eq!(written.message.as_deref(), Some("a-1"));
    assert!(written.tags.unwrap().is_empty());
  }

  #[test]
  fn format_error_leaves_nothing_behind() {
    let (core, sink, _) = core_with(4096);

    core.write(Level::Info, "first", false).unwrap();
    assert!(core.writef(Level::Info, "%d %d", args![1], false).is_err());
    core.write(Level::Info, "second", false).unwrap();
    core.flush().unwrap();

    let lines = sink.lines();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("first"));
    assert!(lines[1].ends_with("second"));
  }

  #[test]
  fn tags_render_sorted_by_key() {
    let (core, sink, _) = core_with(4096);

    let mut tags = Tags::new();
    tags.insert("zone".into(), "eu".into());
    tags.insert("app".into(), "api".into());
    tags.insert("host".into(), "h1".into());
    core.set_tags(tags);

    core.write(Level::Debug, "tagged", false).unwrap();
    core.flush().unwrap();

    assert_eq!(
      sink.contents(),
      format!(
        "{} level=\"DEBUG\" app=\"api\" host=\"h1\" zone=\"eu\" tagged\n",
        PREFIX
      )
    );
    assert_eq!(core.tags().len(), 3);
  }

  #[test]
  fn render_tags_is_deterministic() {
    let mut a = Tags::new();
    a.insert("b".into(), "2".into());
    a.insert("a".into(), "1".into());
    let mut b = Tags::new();
    b.insert("a".into(), "1".into());
    b.insert("b".into(), "2".into());

    assert_eq!(render_tags(&a), "a=\"1\" b=\"2\" ");
    assert_eq!(render_tags(&a), render_tags(&b));
    assert_eq!(render_tags(&Tags::new()), "");
  }

  #[test]
  fn tag_values_are_escaped() {
    let mut tags = Tags::new();
    tags.insert("msg".into(), "say \"hi\"\nnext".into());
    tags.insert("path".into(), "C:\\logs".into());
    assert_eq!(
      render_tags(&tags),
      "msg=\"say \\\"hi\\\"\\nnext\" path=\"C:\\\\logs\" "
    );
    assert!(!render_tags(&tags).contains('\n'));
  }

  #[test]
  fn colored_prefix_follows_toggle() {
    let (core, sink, _) = core_with(4096);

    core.set_colored(true);
    core.write(Level::Error, "red", false).unwrap();
    core.set_colored(false);
    core.write(Level::Error, "plain", false).unwrap();
    core.flush().unwrap();

    let lines = sink.lines();
    assert!(lines[0].contains("\x1b[31mERROR\x1b[0m"));
    assert!(lines[1].contains("level=\"ERROR\""));
  }

  #[test]
  fn buffer_drains_when_capacity_is_reached() {
    let (core, sink, _) = core_with(64);

    core.write(Level::Info, "short", false).unwrap();
    assert_eq!(sink.contents(), "", "record below capacity stays buffered");

    core.write(Level::Info, "this one pushes the buffer over its capacity", false).unwrap();
    assert_eq!(sink.lines().len(), 2);
  }

  #[test]
  fn core_does_not_filter_levels() {
    let (core, sink, _) = core_with(4096);
    core.set_level(Level::Critical);

    core.write(Level::Trace, "still written", false).unwrap();
    core.flush().unwrap();

    assert_eq!(sink.lines().len(), 1);
    assert_eq!(core.level(), Level::Critical);
  }

  #[test]
  fn writes_after_close_are_noops() {
    let (core, sink, _) = core_with(4096);

    core.write(Level::Info, "before", false).unwrap();
    core.close().unwrap();
    assert!(core.is_closed());

    let written = core.write(Level::Info, "after", false).unwrap();
    assert_eq!(written.bytes, 0);
    core.writef(Level::Info, "%d", args![1], true).unwrap();
    core.flush().unwrap();
    core.close().unwrap();

    assert_eq!(sink.lines().len(), 1);
    assert!(sink.contents().contains("before"));
  }

  #[test]
  fn reset_sink_flushes_old_and_redirects_writes() {
    let (core, first, _) = core_with(4096);
    let second = SharedSink::new();

    core.write(Level::Info, "one", false).unwrap();
    {
      let mut guard = core.lock();
      let (old, flushed) = guard.reset_sink(Box::new(second.clone()));
      assert!(old.is_some());
      flushed.unwrap();
    }
    core.write(Level::Info, "two", false).unwrap();
    core.flush().unwrap();

    assert!(first.contents().ends_with("one\n"));
    assert!(second.contents().ends_with("two\n"));
    assert_eq!(second.lines().len(), 1);
  }

  #[test]
  fn sink_errors_are_reported_not_raised() {
    let (_clock, cache) = manual_cache(2024, 5, 6);
    let core = BufferedCore::new(Box::new(FailingSink), cache, 8);

    let written = core.write(Level::Info, "lost", false).unwrap();
    assert!(written.sink_error.is_some());
    assert!(core.flush().is_ok(), "buffer was already drained");
  }

  #[test]
  fn concurrent_writers_never_interleave() {
    let (core, sink, _) = core_with(256);
    let core = Arc::new(core);

    let handles: Vec<_> = (0..4)
      .map(|t| {
        let core = Arc::clone(&core);
        thread::spawn(move || {
          for i in 0..250 {
            core
              .writef(Level::Info, "thread=%d seq=%d", args![t, i], false)
              .unwrap();
          }
        })
      })
      .collect();
    for h in handles {
      h.join().unwrap();
    }
    core.flush().unwrap();

    let lines = sink.lines();
    assert_eq!(lines.len(), 1000);
    for t in 0..4 {
      let seqs: Vec<usize> = lines
        .iter()
        .filter(|l| l.contains(&format!("thread={} ", t)))
        .map(|l| l.rsplit("seq=").next().unwrap().parse().unwrap())
        .collect();
      assert_eq!(seqs, (0..250).collect::<Vec<_>>(), "per-thread order kept");
    }
    for line in &lines {
      assert!(line.starts_with(PREFIX));
    }
  }
}
