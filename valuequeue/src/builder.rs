use crate::config::QueueConfig;
use crate::error::BuildError;
use crate::generator::{GenerateError, Generator};
use crate::handle::ValueQueue;
use crate::metrics::Metrics;
use crate::policy::SyncPolicy;
use crate::shared::QueueShared;
use crate::store::KeyQueueStore;
use crate::task::refiller::RefillScheduler;

use core::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// A builder for creating `ValueQueue` instances.
pub struct ValueQueueBuilder<K, V, H = ahash::RandomState> {
  config: QueueConfig,
  hasher: H,
  generator: Option<Arc<dyn Generator<K, V>>>,
}

// Manual Debug implementation for ValueQueueBuilder.
impl<K, V, H> fmt::Debug for ValueQueueBuilder<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ValueQueueBuilder")
      .field("config", &self.config)
      .field("has_generator", &self.generator.is_some())
      .finish_non_exhaustive()
  }
}

// --- General Configuration Methods ---
impl<K, V, H> ValueQueueBuilder<K, V, H> {
  /// Sets the maximum number of values queued per key.
  pub fn capacity(mut self, capacity: usize) -> Self {
    self.config.capacity = capacity;
    self
  }

  /// Sets the fraction of capacity at or below which a queue is refilled in
  /// the background. Must be in `(0, 1]`.
  ///
  /// This also sizes the initial fill of every key: `ceil(fraction * capacity)`
  /// values, at least one.
  pub fn low_watermark(mut self, fraction: f64) -> Self {
    self.config.low_watermark = fraction;
    self
  }

  /// Sets the number of background refill threads.
  pub fn refill_workers(mut self, workers: usize) -> Self {
    self.config.refill_workers = workers;
    self
  }

  /// Sets how bulk requests are served once a queue runs short.
  pub fn sync_policy(mut self, policy: SyncPolicy) -> Self {
    self.config.sync_policy = policy;
    self
  }

  /// Sets the number of independently locked partitions of the key map.
  pub fn shards(mut self, shards: usize) -> Self {
    self.config.shards = shards;
    self
  }

  /// Sets the hasher used to place keys in shards.
  pub fn hasher<H2>(self, hasher: H2) -> ValueQueueBuilder<K, V, H2> {
    ValueQueueBuilder {
      config: self.config,
      hasher,
      generator: self.generator,
    }
  }

  /// Sets the generator that produces values.
  pub fn generator<G>(mut self, generator: G) -> Self
  where
    G: Generator<K, V>,
  {
    self.generator = Some(Arc::new(generator));
    self
  }

  /// Sets a closure as the generator.
  ///
  /// Equivalent to [`generator`](Self::generator), but lets the compiler
  /// infer the closure's signature.
  pub fn generator_fn<F>(self, f: F) -> Self
  where
    F: Fn(&K, usize, &mut Vec<V>) -> Result<(), GenerateError> + Send + Sync + 'static,
  {
    self.generator(f)
  }
}

// --- Default Constructors ---
impl<K, V> ValueQueueBuilder<K, V, ahash::RandomState> {
  /// Creates a new `ValueQueueBuilder` with default settings.
  pub fn new() -> Self {
    Self::from_config(QueueConfig::default())
  }

  /// Creates a builder seeded from `config`. A generator must still be set.
  pub fn from_config(config: QueueConfig) -> Self {
    Self {
      config,
      hasher: ahash::RandomState::new(),
      generator: None,
    }
  }
}

impl<K, V> Default for ValueQueueBuilder<K, V, ahash::RandomState> {
  fn default() -> Self {
    Self::new()
  }
}

// --- Build Methods ---
impl<K, V, H> ValueQueueBuilder<K, V, H>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Send + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Validates the configuration, spawns the refill workers and returns the
  /// queue.
  pub fn build(self) -> Result<ValueQueue<K, V, H>, BuildError> {
    self.config.validate()?;
    let generator = self.generator.ok_or(BuildError::GeneratorRequired)?;

    let watermark_target = self.config.watermark_target();
    let refill_threshold = self.config.refill_threshold();
    let metrics = Arc::new(Metrics::new());

    let store = Arc::new(KeyQueueStore::new(
      self.config.shards,
      self.hasher,
      self.config.capacity,
      watermark_target,
      generator,
      Arc::clone(&metrics),
    ));
    let scheduler =
      RefillScheduler::spawn(Arc::clone(&store), Arc::clone(&metrics), self.config.refill_workers)?;

    tracing::debug!(
      capacity = self.config.capacity,
      low_watermark = self.config.low_watermark,
      watermark_target,
      refill_threshold,
      policy = %self.config.sync_policy,
      "built value queue"
    );

    Ok(ValueQueue {
      shared: Arc::new(QueueShared {
        config: self.config,
        store,
        scheduler,
        metrics,
        watermark_target,
        refill_threshold,
        shut_down: AtomicBool::new(false),
      }),
    })
  }
}
