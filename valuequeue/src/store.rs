use crate::error::QueueError;
use crate::generator::{GenerateError, Generator};
use crate::metrics::Metrics;

use core::fmt;
use std::borrow::Borrow;
use std::collections::{HashMap, VecDeque};
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, MutexGuard, RwLock};

/// A helper function to hash a key using a `BuildHasher`.
#[inline]
pub(crate) fn hash_key<Q: Hash + ?Sized, H: BuildHasher>(hasher: &H, key: &Q) -> u64 {
  let mut state = hasher.build_hasher();
  key.hash(&mut state);
  state.finish()
}

/// Everything the queue holds for one key.
pub(crate) struct KeyQueue<K, V> {
  key: K,
  capacity: usize,
  values: Mutex<VecDeque<V>>,
  /// Set once the initial fill succeeded. Until then the key is unknown.
  primed: OnceCell<()>,
  /// True while a background refill for this key is queued or running.
  refilling: AtomicBool,
  /// Held around every generator call for this key.
  generation: Mutex<()>,
}

impl<K: fmt::Debug, V> fmt::Debug for KeyQueue<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("KeyQueue")
      .field("key", &self.key)
      .field("len", &self.len())
      .field("capacity", &self.capacity)
      .field("primed", &self.is_primed())
      .field("refilling", &self.is_refilling())
      .finish()
  }
}

impl<K, V> KeyQueue<K, V> {
  fn new(key: K, capacity: usize) -> Self {
    Self {
      key,
      capacity,
      values: Mutex::new(VecDeque::with_capacity(capacity)),
      primed: OnceCell::new(),
      refilling: AtomicBool::new(false),
      generation: Mutex::new(()),
    }
  }

  #[inline]
  pub(crate) fn key(&self) -> &K {
    &self.key
  }

  #[inline]
  pub(crate) fn capacity(&self) -> usize {
    self.capacity
  }

  pub(crate) fn len(&self) -> usize {
    self.values.lock().len()
  }

  pub(crate) fn is_primed(&self) -> bool {
    self.primed.get().is_some()
  }

  /// Removes the head value, returning it with the length left behind.
  pub(crate) fn pop(&self) -> (Option<V>, usize) {
    let mut guard = self.values.lock();
    let head = guard.pop_front();
    (head, guard.len())
  }

  /// Runs `f` with the queue locked, for read-decide-pop sequences that must
  /// not interleave with other consumers.
  pub(crate) fn with_values<R>(&self, f: impl FnOnce(&mut VecDeque<V>) -> R) -> R {
    f(&mut self.values.lock())
  }

  /// Puts values taken from the head back in front, keeping their order.
  pub(crate) fn restore_front(&self, values: Vec<V>) {
    let mut guard = self.values.lock();
    for value in values.into_iter().rev() {
      guard.push_front(value);
    }
  }

  /// Empties the queue, returning how many values were discarded.
  pub(crate) fn drain(&self) -> usize {
    let drained = std::mem::take(&mut *self.values.lock());
    drained.len()
  }

  /// Appends `values` in order. Whatever would exceed capacity is rejected.
  pub(crate) fn enqueue_all(&self, values: Vec<V>) -> Result<(), QueueError>
  where
    K: fmt::Debug,
  {
    let mut guard = self.values.lock();
    let room = self.capacity.saturating_sub(guard.len());
    let rejected = values.len().saturating_sub(room);
    guard.extend(values.into_iter().take(room));
    drop(guard);

    if rejected > 0 {
      return Err(QueueError::Overflow {
        key: format!("{:?}", self.key),
        rejected,
        capacity: self.capacity,
      });
    }
    Ok(())
  }

  /// Serializes generator calls for this key. Take it before reading the
  /// queue length a fill is sized from, and hold it until the values are
  /// enqueued.
  pub(crate) fn generation_lock(&self) -> MutexGuard<'_, ()> {
    self.generation.lock()
  }

  /// Calls the generator for `count` values. The guard from
  /// [`generation_lock`](Self::generation_lock) proves the caller holds it.
  pub(crate) fn generate(
    &self,
    _held: &MutexGuard<'_, ()>,
    generator: &dyn Generator<K, V>,
    count: usize,
  ) -> Result<Vec<V>, GenerateError>
  where
    K: 'static,
    V: 'static,
  {
    let mut produced = Vec::with_capacity(count);
    generator.fill(&self.key, count, &mut produced)?;
    Ok(produced)
  }

  /// Claims the refill slot. Returns `false` if a refill is already outstanding.
  pub(crate) fn try_begin_refill(&self) -> bool {
    self
      .refilling
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }

  pub(crate) fn end_refill(&self) {
    self.refilling.store(false, Ordering::Release);
  }

  pub(crate) fn is_refilling(&self) -> bool {
    self.refilling.load(Ordering::Acquire)
  }
}

type Shard<K, V, H> = CachePadded<RwLock<HashMap<K, Arc<KeyQueue<K, V>>, H>>>;

/// The key to queue map, partitioned into independently locked shards.
///
/// Map locks are only held to look up or insert an entry; all work on a
/// key's values happens under that key's own locks.
pub(crate) struct KeyQueueStore<K, V, H> {
  shards: Box<[Shard<K, V, H>]>,
  hasher: H,
  capacity: usize,
  watermark_target: usize,
  generator: Arc<dyn Generator<K, V>>,
  metrics: Arc<Metrics>,
}

impl<K, V, H> fmt::Debug for KeyQueueStore<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("KeyQueueStore")
      .field("num_shards", &self.shards.len())
      .field("capacity", &self.capacity)
      .field("watermark_target", &self.watermark_target)
      .finish()
  }
}

impl<K, V, H> KeyQueueStore<K, V, H>
where
  K: Eq + Hash + Clone + fmt::Debug + 'static,
  V: 'static,
  H: BuildHasher + Clone,
{
  pub(crate) fn new(
    num_shards: usize,
    hasher: H,
    capacity: usize,
    watermark_target: usize,
    generator: Arc<dyn Generator<K, V>>,
    metrics: Arc<Metrics>,
  ) -> Self {
    let shards = (0..num_shards)
      .map(|_| CachePadded::new(RwLock::new(HashMap::with_hasher(hasher.clone()))))
      .collect();

    Self {
      shards,
      hasher,
      capacity,
      watermark_target,
      generator,
      metrics,
    }
  }

  #[inline]
  fn shard_for<Q>(&self, key: &Q) -> &Shard<K, V, H>
  where
    Q: Hash + ?Sized,
  {
    let index = hash_key(&self.hasher, key) as usize % self.shards.len();
    &self.shards[index]
  }

  pub(crate) fn generator(&self) -> &dyn Generator<K, V> {
    self.generator.as_ref()
  }

  pub(crate) fn metrics(&self) -> &Metrics {
    &self.metrics
  }

  /// Returns the queue for `key` if the key is known (primed).
  pub(crate) fn get<Q>(&self, key: &Q) -> Option<Arc<KeyQueue<K, V>>>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self
      .shard_for(key)
      .read()
      .get(key)
      .filter(|queue| queue.is_primed())
      .cloned()
  }

  /// Returns the entry for `key`, creating an empty, unprimed one if needed.
  fn entry<Q>(&self, key: &Q) -> Arc<KeyQueue<K, V>>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
  {
    let shard = self.shard_for(key);
    if let Some(queue) = shard.read().get(key) {
      return queue.clone();
    }

    // Another thread may have inserted between the two locks; `entry` keeps
    // whichever got there first.
    let mut guard = shard.write();
    guard
      .entry(key.to_owned())
      .or_insert_with_key(|owned| Arc::new(KeyQueue::new(owned.clone(), self.capacity)))
      .clone()
  }

  /// Makes sure `key` is known, priming its queue with `watermark_target`
  /// values on first access.
  ///
  /// Concurrent first callers wait for a single prime instead of generating
  /// twice. If the generator fails the key stays unknown, so the next call
  /// tries again.
  pub(crate) fn ensure<Q>(&self, key: &Q) -> Result<Arc<KeyQueue<K, V>>, QueueError>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
  {
    let queue = self.entry(key);
    queue.primed.get_or_try_init(|| {
      let held = queue.generation_lock();
      let produced = queue
        .generate(&held, self.generator.as_ref(), self.watermark_target)
        .map_err(|source| {
          Metrics::add(&self.metrics.generation_failures, 1);
          QueueError::generation(queue.key(), source)
        })?;

      Metrics::add(&self.metrics.sync_fills, 1);
      Metrics::add(&self.metrics.sync_values_generated, produced.len());
      tracing::debug!(key = ?queue.key(), count = produced.len(), "primed value queue");

      if let Err(err) = queue.enqueue_all(produced) {
        // Only reachable with a generator that over-delivers.
        self.record_overflow(&err);
      }
      Metrics::add(&self.metrics.keys_initialized, 1);
      Ok::<(), QueueError>(())
    })?;
    Ok(queue)
  }

  /// Current queue length, 0 for unknown keys.
  pub(crate) fn size<Q>(&self, key: &Q) -> usize
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self.get(key).map_or(0, |queue| queue.len())
  }

  /// Empties the queue for `key`. Leaves any refill in flight alone.
  pub(crate) fn drain<Q>(&self, key: &Q) -> usize
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    let drained = self.get(key).map_or(0, |queue| queue.drain());
    Metrics::add(&self.metrics.drains, 1);
    Metrics::add(&self.metrics.values_drained, drained);
    drained
  }

  /// Number of primed keys.
  pub(crate) fn known_keys(&self) -> usize {
    self
      .shards
      .iter()
      .map(|shard| shard.read().values().filter(|queue| queue.is_primed()).count())
      .sum()
  }

  pub(crate) fn record_overflow(&self, err: &QueueError) {
    if let QueueError::Overflow { rejected, .. } = err {
      Metrics::add(&self.metrics.values_discarded, *rejected);
    }
    tracing::warn!(error = %err, "discarded generated values");
  }
}
