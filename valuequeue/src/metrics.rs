use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

/// A thread-safe, internal metrics collector for the value queue.
/// All fields are atomic to allow for lock-free updates.
#[derive(Debug)]
pub struct Metrics {
  // --- Consumption ---
  pub(crate) values_served: CachePadded<AtomicU64>,

  // --- Synchronous generation (caller's thread) ---
  pub(crate) sync_fills: CachePadded<AtomicU64>,
  pub(crate) sync_values_generated: CachePadded<AtomicU64>,
  pub(crate) generation_failures: CachePadded<AtomicU64>,

  // --- Background refills ---
  pub(crate) refills_scheduled: CachePadded<AtomicU64>,
  pub(crate) refills_coalesced: CachePadded<AtomicU64>,
  pub(crate) async_fills: CachePadded<AtomicU64>,
  pub(crate) async_values_generated: CachePadded<AtomicU64>,
  pub(crate) refill_failures: CachePadded<AtomicU64>,

  // --- Key lifecycle ---
  pub(crate) keys_initialized: CachePadded<AtomicU64>,
  pub(crate) drains: CachePadded<AtomicU64>,
  pub(crate) values_drained: CachePadded<AtomicU64>,
  pub(crate) values_discarded: CachePadded<AtomicU64>,

  created_at: Instant,
}

impl Default for Metrics {
  fn default() -> Self {
    Self {
      values_served: CachePadded::new(AtomicU64::new(0)),
      sync_fills: CachePadded::new(AtomicU64::new(0)),
      sync_values_generated: CachePadded::new(AtomicU64::new(0)),
      generation_failures: CachePadded::new(AtomicU64::new(0)),
      refills_scheduled: CachePadded::new(AtomicU64::new(0)),
      refills_coalesced: CachePadded::new(AtomicU64::new(0)),
      async_fills: CachePadded::new(AtomicU64::new(0)),
      async_values_generated: CachePadded::new(AtomicU64::new(0)),
      refill_failures: CachePadded::new(AtomicU64::new(0)),
      keys_initialized: CachePadded::new(AtomicU64::new(0)),
      drains: CachePadded::new(AtomicU64::new(0)),
      values_drained: CachePadded::new(AtomicU64::new(0)),
      values_discarded: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  #[inline]
  pub(crate) fn add(counter: &AtomicU64, n: usize) {
    counter.fetch_add(n as u64, Ordering::Relaxed);
  }

  /// Creates a point-in-time snapshot of the current metrics.
  pub(crate) fn snapshot(&self, known_keys: usize) -> MetricsSnapshot {
    MetricsSnapshot {
      values_served: self.values_served.load(Ordering::Relaxed),
      sync_fills: self.sync_fills.load(Ordering::Relaxed),
      sync_values_generated: self.sync_values_generated.load(Ordering::Relaxed),
      generation_failures: self.generation_failures.load(Ordering::Relaxed),
      refills_scheduled: self.refills_scheduled.load(Ordering::Relaxed),
      refills_coalesced: self.refills_coalesced.load(Ordering::Relaxed),
      async_fills: self.async_fills.load(Ordering::Relaxed),
      async_values_generated: self.async_values_generated.load(Ordering::Relaxed),
      refill_failures: self.refill_failures.load(Ordering::Relaxed),
      keys_initialized: self.keys_initialized.load(Ordering::Relaxed),
      drains: self.drains.load(Ordering::Relaxed),
      values_drained: self.values_drained.load(Ordering::Relaxed),
      values_discarded: self.values_discarded.load(Ordering::Relaxed),
      known_keys: known_keys as u64,
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time, public-facing snapshot of the queue's metrics.
#[derive(Clone)]
pub struct MetricsSnapshot {
  /// Values handed to consumers by `get_next` and `get_at_most`.
  pub values_served: u64,
  /// Generator calls made on a consumer's thread (priming and sync fetches).
  pub sync_fills: u64,
  /// Values produced by those calls.
  pub sync_values_generated: u64,
  /// Sync generator calls that failed and were reported to the caller.
  pub generation_failures: u64,
  /// Background refills handed to the worker pool.
  pub refills_scheduled: u64,
  /// Refill requests dropped because one was already outstanding for the key.
  pub refills_coalesced: u64,
  /// Generator calls made by the refill workers.
  pub async_fills: u64,
  /// Values produced by those calls.
  pub async_values_generated: u64,
  /// Background generator calls that failed.
  pub refill_failures: u64,
  /// Keys whose queue has been primed.
  pub keys_initialized: u64,
  /// Calls to `drain`.
  pub drains: u64,
  /// Values thrown away by `drain`.
  pub values_drained: u64,
  /// Generated values that did not fit in a full queue.
  pub values_discarded: u64,
  /// Keys currently held by the queue.
  pub known_keys: u64,
  /// The number of seconds the queue has been running.
  pub uptime_secs: u64,
}

impl MetricsSnapshot {
  /// Every value the generator produced, on either path.
  pub fn values_generated(&self) -> u64 {
    self.sync_values_generated + self.async_values_generated
  }
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("values_served", &self.values_served)
      .field("sync_fills", &self.sync_fills)
      .field("sync_values_generated", &self.sync_values_generated)
      .field("generation_failures", &self.generation_failures)
      .field("refills_scheduled", &self.refills_scheduled)
      .field("refills_coalesced", &self.refills_coalesced)
      .field("async_fills", &self.async_fills)
      .field("async_values_generated", &self.async_values_generated)
      .field("refill_failures", &self.refill_failures)
      .field("keys_initialized", &self.keys_initialized)
      .field("drains", &self.drains)
      .field("values_drained", &self.values_drained)
      .field("values_discarded", &self.values_discarded)
      .field("known_keys", &self.known_keys)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}
