use crate::config::QueueConfig;
use crate::metrics::Metrics;
use crate::store::KeyQueueStore;
use crate::task::refiller::RefillScheduler;

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// The internal, thread-safe core of the value queue.
pub(crate) struct QueueShared<K: Send + Sync, V: Send, H> {
  pub(crate) config: QueueConfig,
  pub(crate) store: Arc<KeyQueueStore<K, V, H>>,
  pub(crate) scheduler: RefillScheduler<K, V>,
  pub(crate) metrics: Arc<Metrics>,
  pub(crate) watermark_target: usize,
  pub(crate) refill_threshold: usize,
  pub(crate) shut_down: AtomicBool,
}

impl<K: Send + Sync, V: Send, H> fmt::Debug for QueueShared<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueueShared")
      .field("config", &self.config)
      .field("watermark_target", &self.watermark_target)
      .field("refill_threshold", &self.refill_threshold)
      .field("scheduler", &self.scheduler)
      .finish_non_exhaustive()
  }
}

impl<K: Send + Sync, V: Send, H> Drop for QueueShared<K, V, H> {
  fn drop(&mut self) {
    // Dropped without `shutdown()`: let the workers wind down on their own.
    if !*self.shut_down.get_mut() {
      self.scheduler.stop();
    }
  }
}
