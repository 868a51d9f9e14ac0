#[cfg(test)]
mod __test__ {
  use crossbeam_channel::{unbounded, Receiver};
  use std::io;
  use std::path::PathBuf;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::{Arc, Mutex};
  use std::thread;
  use std::time::{Duration, Instant};

  use crate::buffered::Tags;
  use crate::error::LogError;
  use crate::hook::{Hook, HookDispatcher, HOOK_QUEUE_CAPACITY, HOOK_SEND_GRACE};
  use crate::level::Level;
  use crate::test_support::wait_until;

  #[derive(Default)]
  struct Recorder {
    calls: Mutex<Vec<(Level, Tags, String, thread::ThreadId)>>,
    rotation_failures: AtomicUsize,
  }

  impl Recorder {
    fn calls(&self) -> Vec<(Level, Tags, String, thread::ThreadId)> {
      self.calls.lock().unwrap().clone()
    }
  }

  impl Hook for Recorder {
    fn fire(&self, level: Level, tags: &Tags, message: &str) {
      self
        .calls
        .lock()
        .unwrap()
        .push((level, tags.clone(), message.to_string(), thread::current().id()));
    }

    fn rotation_failed(&self, _err: &LogError) {
      self.rotation_failures.fetch_add(1, Ordering::SeqCst);
    }
  }

  struct Panicker;

  impl Hook for Panicker {
    fn fire(&self, _level: Level, _tags: &Tags, _message: &str) {
      panic!("hook blew up");
    }
  }

  /// Blocks inside `fire` until the test drops the gate sender.
  struct Gate(Receiver<()>);

  impl Hook for Gate {
    fn fire(&self, _level: Level, _tags: &Tags, _message: &str) {
      let _ = self.0.recv();
    }
  }

  fn tags(pairs: &[(&str, &str)]) -> Arc<Tags> {
    Arc::new(
      pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect(),
    )
  }

  #[test]
  fn sync_mode_fires_on_calling_thread() {
    let recorder = Arc::new(Recorder::default());
    let dispatcher = HookDispatcher::new(Level::Info, false);
    dispatcher.set_hook(Some(recorder.clone()));

    dispatcher.dispatch(Level::Warning, tags(&[("app", "x")]), "careful".into());

    let calls = recorder.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, Level::Warning);
    assert_eq!(calls[0].1.get("app").map(String::as_str), Some("x"));
    assert_eq!(calls[0].2, "careful");
    assert_eq!(calls[0].3, thread::current().id());
  }

  #[test]
  fn below_hook_level_never_fires() {
    let recorder = Arc::new(Recorder::default());
    let dispatcher = HookDispatcher::new(Level::Info, false);
    dispatcher.set_hook(Some(recorder.clone()));

    assert!(!dispatcher.wants(Level::Debug));
    assert!(dispatcher.wants(Level::Info));
    dispatcher.dispatch(Level::Debug, tags(&[]), "quiet".into());

    assert!(recorder.calls().is_empty());
  }

  #[test]
  fn no_hook_means_nothing_wanted() {
    let dispatcher = HookDispatcher::new(Level::Trace, false);
    assert!(!dispatcher.wants(Level::Critical));
    dispatcher.dispatch(Level::Critical, tags(&[]), "nobody listens".into());
  }

  #[test]
  fn async_mode_fires_on_dispatcher_thread() {
    let recorder = Arc::new(Recorder::default());
    let dispatcher = HookDispatcher::new(Level::Trace, true);
    dispatcher.set_hook(Some(recorder.clone()));

    dispatcher.dispatch(Level::Info, tags(&[]), "one".into());
    dispatcher.dispatch(Level::Error, tags(&[]), "two".into());

    assert!(wait_until(Duration::from_secs(2), || recorder.calls().len() == 2));
    let calls = recorder.calls();
    assert_eq!(calls[0].2, "one");
    assert_eq!(calls[1].2, "two");
    assert_ne!(calls[0].3, thread::current().id());
  }

  #[test]
  fn mode_can_change_at_runtime() {
    let recorder = Arc::new(Recorder::default());
    let dispatcher = HookDispatcher::new(Level::Trace, true);
    dispatcher.set_hook(Some(recorder.clone()));
    assert!(dispatcher.is_async());

    dispatcher.set_async(false);
    dispatcher.dispatch(Level::Info, tags(&[]), "inline".into());
    assert_eq!(recorder.calls().len(), 1, "sync call completes before returning");
  }

  #[test]
  fn closures_are_hooks() {
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let dispatcher = HookDispatcher::new(Level::Trace, false);
    dispatcher.set_hook(Some(Arc::new(move |_: Level, _: &Tags, _: &str| {
      counter.fetch_add(1, Ordering::SeqCst);
    })));

    dispatcher.dispatch(Level::Info, tags(&[]), "a".into());
    dispatcher.dispatch(Level::Info, tags(&[]), "b".into());
    assert_eq!(seen.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn panics_are_contained_in_sync_mode() {
    let dispatcher = HookDispatcher::new(Level::Trace, false);
    dispatcher.set_hook(Some(Arc::new(Panicker)));

    dispatcher.dispatch(Level::Info, tags(&[]), "boom".into());
    dispatcher.dispatch(Level::Info, tags(&[]), "boom".into());

    assert_eq!(dispatcher.panics(), 2);
  }

  #[test]
  fn panics_do_not_kill_the_dispatcher_thread() {
    let dispatcher = HookDispatcher::new(Level::Trace, true);
    dispatcher.set_hook(Some(Arc::new(Panicker)));
    dispatcher.dispatch(Level::Info, tags(&[]), "boom".into());
    assert!(wait_until(Duration::from_secs(2), || dispatcher.panics() == 1));

    let recorder = Arc::new(Recorder::default());
    dispatcher.set_hook(Some(recorder.clone()));
    dispatcher.dispatch(Level::Info, tags(&[]), "after".into());
    assert!(wait_until(Duration::from_secs(2), || recorder.calls().len() == 1));
  }

  #[test]
  fn full_queue_drops_and_counts() {
    let (gate_tx, gate_rx) = unbounded::<()>();
    let dispatcher = HookDispatcher::new(Level::Trace, true);
    dispatcher.set_hook(Some(Arc::new(Gate(gate_rx))));

    let sent = HOOK_QUEUE_CAPACITY + 100;
    let started = Instant::now();
    for _ in 0..sent {
      dispatcher.dispatch(Level::Info, tags(&[]), "stuck".into());
    }

    // at most the queue plus the job being fired can be held
    assert!(dispatcher.dropped() >= (sent - HOOK_QUEUE_CAPACITY - 1) as u64);
    // only the first overflowing call waits out the grace period
    assert!(started.elapsed() < HOOK_SEND_GRACE * 50);
    drop(gate_tx);
  }

  struct CountingGate {
    gate: Receiver<()>,
    entered: AtomicUsize,
  }

  impl Hook for CountingGate {
    fn fire(&self, _level: Level, _tags: &Tags, _message: &str) {
      self.entered.fetch_add(1, Ordering::SeqCst);
      let _ = self.gate.recv();
    }
  }

  #[test]
  fn full_queue_waits_for_room_before_dropping() {
    let (gate_tx, gate_rx) = unbounded::<()>();
    let hook = Arc::new(CountingGate {
      gate: gate_rx,
      entered: AtomicUsize::new(0),
    });
    let dispatcher = HookDispatcher::new(Level::Trace, true);
    dispatcher.set_hook(Some(hook.clone()));

    dispatcher.dispatch(Level::Info, tags(&[]), "first".into());
    assert!(wait_until(Duration::from_secs(2), || {
      hook.entered.load(Ordering::SeqCst) == 1
    }));
    for _ in 0..HOOK_QUEUE_CAPACITY {
      dispatcher.dispatch(Level::Info, tags(&[]), "queued".into());
    }
    assert_eq!(dispatcher.dropped(), 0);

    // the queue is full; one call leaves the hook and frees a slot
    gate_tx.send(()).unwrap();
    dispatcher.dispatch(Level::Info, tags(&[]), "late".into());
    assert_eq!(dispatcher.dropped(), 0);

    for _ in 0..HOOK_QUEUE_CAPACITY + 2 {
      gate_tx.send(()).unwrap();
    }
    assert!(wait_until(Duration::from_secs(5), || {
      hook.entered.load(Ordering::SeqCst) == HOOK_QUEUE_CAPACITY + 2
    }));
  }

  #[test]
  fn rotation_failures_reach_the_hook() {
    let recorder = Arc::new(Recorder::default());
    let dispatcher = HookDispatcher::new(Level::Critical, true);
    dispatcher.set_hook(Some(recorder.clone()));

    let err = LogError::Rotation {
      path: PathBuf::from("/nowhere/app.log"),
      source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
    };
    dispatcher.rotation_failed(&err);

    assert_eq!(recorder.rotation_failures.load(Ordering::SeqCst), 1);
    assert!(recorder.calls().is_empty());
  }

  #[test]
  fn shutdown_stops_dispatch() {
    let recorder = Arc::new(Recorder::default());
    let dispatcher = HookDispatcher::new(Level::Trace, false);
    dispatcher.set_hook(Some(recorder.clone()));

    dispatcher.shutdown();
    assert!(!dispatcher.wants(Level::Critical));
    dispatcher.dispatch(Level::Critical, tags(&[]), "late".into());

    assert!(recorder.calls().is_empty());
  }
}
