#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use fibre_valuequeue::{
  GenerateError, Generator, SyncPolicy, ValueQueue, ValueQueueBuilder,
};

/// How long `FillLog::next` waits for a generator call to show up.
pub const FILL_WAIT: Duration = Duration::from_millis(500);

/// One recorded generator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillInfo {
  pub key: String,
  pub num: usize,
}

struct Inner {
  calls: Mutex<Sender<FillInfo>>,
  next_value: AtomicU64,
  failing_keys: Mutex<HashSet<String>>,
  fail_next: AtomicUsize,
  delay: Mutex<Duration>,
  in_flight: Mutex<HashMap<String, usize>>,
  overlaps: AtomicUsize,
  generated: AtomicU64,
}

/// A generator that hands out unique, increasing values and records every
/// call it gets.
#[derive(Clone)]
pub struct MockGenerator {
  inner: Arc<Inner>,
}

/// The receiving end of a `MockGenerator`'s call log.
pub struct FillLog {
  calls: Receiver<FillInfo>,
}

pub fn mock_generator() -> (MockGenerator, FillLog) {
  let (tx, rx) = mpsc::channel();
  let generator = MockGenerator {
    inner: Arc::new(Inner {
      calls: Mutex::new(tx),
      next_value: AtomicU64::new(0),
      failing_keys: Mutex::new(HashSet::new()),
      fail_next: AtomicUsize::new(0),
      delay: Mutex::new(Duration::ZERO),
      in_flight: Mutex::new(HashMap::new()),
      overlaps: AtomicUsize::new(0),
      generated: AtomicU64::new(0),
    }),
  };
  (generator, FillLog { calls: rx })
}

impl MockGenerator {
  /// Every call for `key` fails until `heal` is called.
  pub fn fail_key(&self, key: &str) {
    self.inner.failing_keys.lock().unwrap().insert(key.to_string());
  }

  pub fn heal(&self, key: &str) {
    self.inner.failing_keys.lock().unwrap().remove(key);
  }

  /// The next `n` calls fail, whatever the key.
  pub fn fail_next(&self, n: usize) {
    self.inner.fail_next.store(n, Ordering::SeqCst);
  }

  /// Makes every call sleep for `delay` before producing values.
  pub fn set_delay(&self, delay: Duration) {
    *self.inner.delay.lock().unwrap() = delay;
  }

  /// Number of times two calls for the same key overlapped.
  pub fn overlaps(&self) -> usize {
    self.inner.overlaps.load(Ordering::SeqCst)
  }

  /// Total values successfully produced.
  pub fn generated(&self) -> u64 {
    self.inner.generated.load(Ordering::SeqCst)
  }

  fn should_fail(&self, key: &str) -> bool {
    if self.inner.failing_keys.lock().unwrap().contains(key) {
      return true;
    }
    self
      .inner
      .fail_next
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .is_ok()
  }
}

impl Generator<String, u64> for MockGenerator {
  fn fill(&self, key: &String, count: usize, into: &mut Vec<u64>) -> Result<(), GenerateError> {
    {
      let mut in_flight = self.inner.in_flight.lock().unwrap();
      let running = in_flight.entry(key.clone()).or_insert(0);
      if *running > 0 {
        self.inner.overlaps.fetch_add(1, Ordering::SeqCst);
      }
      *running += 1;
    }

    let _ = self.inner.calls.lock().unwrap().send(FillInfo {
      key: key.clone(),
      num: count,
    });

    let delay = *self.inner.delay.lock().unwrap();
    if !delay.is_zero() {
      thread::sleep(delay);
    }

    let result = if self.should_fail(key) {
      Err(format!("generator unavailable for {}", key).into())
    } else {
      let start = self.inner.next_value.fetch_add(count as u64, Ordering::SeqCst);
      into.extend(start..start + count as u64);
      self.inner.generated.fetch_add(count as u64, Ordering::SeqCst);
      Ok(())
    };

    *self.inner.in_flight.lock().unwrap().get_mut(key).unwrap() -= 1;
    result
  }
}

impl FillLog {
  /// The next recorded call, or `None` if none arrives within `FILL_WAIT`.
  pub fn next(&self) -> Option<FillInfo> {
    self.calls.recv_timeout(FILL_WAIT).ok()
  }

  /// Asserts the next call asked `key` for `num` values.
  #[track_caller]
  pub fn expect(&self, key: &str, num: usize) {
    let info = self.next().unwrap_or_else(|| panic!("expected fill({}, {})", key, num));
    assert_eq!(info, FillInfo { key: key.to_string(), num });
  }

  /// Asserts no call arrives within `FILL_WAIT`.
  #[track_caller]
  pub fn expect_none(&self) {
    if let Some(info) = self.next() {
      panic!("unexpected generator call {:?}", info);
    }
  }
}

/// Polls `check` every `interval` until it returns true or `timeout` passes.
pub fn wait_for(mut check: impl FnMut() -> bool, interval: Duration, timeout: Duration) -> bool {
  let deadline = Instant::now() + timeout;
  loop {
    if check() {
      return true;
    }
    if Instant::now() >= deadline {
      return false;
    }
    thread::sleep(interval);
  }
}

/// Waits until `key`'s queue holds exactly `size` values.
pub fn wait_for_size(queue: &ValueQueue<String, u64>, key: &str, size: usize) -> bool {
  wait_for(
    || queue.size(key).map_or(false, |current| current == size),
    Duration::from_millis(20),
    Duration::from_secs(3),
  )
}

pub fn build_test_queue(
  capacity: usize,
  low_watermark: f64,
  policy: SyncPolicy,
  generator: MockGenerator,
) -> ValueQueue<String, u64> {
  ValueQueueBuilder::<String, u64>::default()
    .capacity(capacity)
    .low_watermark(low_watermark)
    .refill_workers(1)
    .sync_policy(policy)
    .generator(generator)
    .build()
    .unwrap()
}

pub fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}
