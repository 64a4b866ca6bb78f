use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::policy;
use crate::shared::QueueShared;
use crate::task::refiller::RefillRequest;

use std::borrow::Borrow;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// A thread-safe, self-replenishing queue of pre-generated values per key.
///
/// Cloning the handle is cheap; all clones share the same queues and
/// refill workers.
pub struct ValueQueue<K: Send + Sync, V: Send, H = ahash::RandomState> {
  pub(crate) shared: Arc<QueueShared<K, V, H>>,
}

impl<K: Send + Sync, V: Send, H> Clone for ValueQueue<K, V, H> {
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<K: Send + Sync, V: Send, H> fmt::Debug for ValueQueue<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ValueQueue")
      .field("shared", &self.shared)
      .finish()
  }
}

impl<K, V, H> ValueQueue<K, V, H>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Send + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Returns the next value for `key`.
  ///
  /// The first call for a key blocks while its queue is primed. Later calls
  /// pop from the queue; if it is empty (after a [`drain`](Self::drain) or
  /// when consumers outrun the refill workers) a value is generated on this
  /// thread according to the sync policy.
  pub fn get_next<Q>(&self, key: &Q) -> Result<V, QueueError>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
  {
    self.check_open()?;
    let queue = self.shared.store.ensure(key)?;

    let (head, remaining) = queue.pop();

    match head {
      Some(value) => {
        Metrics::add(&self.shared.metrics.values_served, 1);
        if remaining <= self.shared.refill_threshold {
          self.shared.scheduler.schedule(&queue);
        }
        Ok(value)
      }
      None => {
        tracing::trace!(key = ?queue.key(), "queue empty, generating on caller thread");
        self
          .take(&queue, 1)?
          .pop()
          .ok_or_else(|| QueueError::Exhausted {
            key: format!("{:?}", queue.key()),
          })
      }
    }
  }

  /// Returns up to `num` values for `key`, oldest first.
  ///
  /// When the queue holds fewer than `num` values the sync policy decides
  /// how many are generated on this thread and how many are returned. If
  /// that generation fails, nothing is consumed and the error is returned.
  pub fn get_at_most<Q>(&self, key: &Q, num: usize) -> Result<Vec<V>, QueueError>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
  {
    self.check_open()?;
    let queue = self.shared.store.ensure(key)?;
    self.take(&queue, num)
  }

  /// Primes the queues for `keys` in order.
  ///
  /// Stops at the first key that fails to generate and returns its error.
  /// Keys primed before it stay primed.
  pub fn initialize_queues_for_keys<'a, Q, I>(&self, keys: I) -> Result<(), QueueError>
  where
    I: IntoIterator<Item = &'a Q>,
    K: Borrow<Q>,
    Q: Hash + Eq + ToOwned<Owned = K> + ?Sized + 'a,
  {
    self.check_open()?;
    for key in keys {
      self.shared.store.ensure(key)?;
    }
    Ok(())
  }

  /// Discards every value queued for `key`, returning how many were
  /// dropped. A refill already in flight still completes.
  pub fn drain<Q>(&self, key: &Q) -> Result<usize, QueueError>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self.check_open()?;
    Ok(self.shared.store.drain(key))
  }

  /// Number of values currently queued for `key`, 0 for unknown keys.
  pub fn size<Q>(&self, key: &Q) -> Result<usize, QueueError>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self.check_open()?;
    Ok(self.shared.store.size(key))
  }

  /// Stops the refill workers and waits for them to exit.
  ///
  /// Refills already running finish; queued ones are skipped. Every
  /// operation after this, including a second `shutdown`, returns
  /// [`QueueError::ShutDown`].
  pub fn shutdown(&self) -> Result<(), QueueError> {
    if self.shared.shut_down.swap(true, Ordering::AcqRel) {
      return Err(QueueError::ShutDown);
    }
    tracing::debug!("shutting down value queue");
    self.shared.scheduler.shutdown();
    Ok(())
  }

  /// Returns `true` once [`shutdown`](Self::shutdown) has been called on any
  /// clone of this handle.
  pub fn is_shut_down(&self) -> bool {
    self.shared.shut_down.load(Ordering::Acquire)
  }

  /// Returns a point-in-time snapshot of the queue's metrics.
  ///
  /// Still available after shutdown.
  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot(self.shared.store.known_keys())
  }

  /// The configuration this queue was built with.
  pub fn config(&self) -> &QueueConfig {
    &self.shared.config
  }

  #[inline]
  fn check_open(&self) -> Result<(), QueueError> {
    if self.is_shut_down() {
      return Err(QueueError::ShutDown);
    }
    Ok(())
  }

  /// The bulk read path shared by `get_at_most` and the empty-queue fallback
  /// of `get_next`.
  fn take(&self, queue: &RefillRequest<K, V>, requested: usize) -> Result<Vec<V>, QueueError> {
    let shared = &self.shared;

    // Decide and pop under one lock so concurrent consumers can't shrink the
    // queue between the two.
    let (decision, mut taken) = queue.with_values(|values| {
      let decision = policy::decide(
        shared.config.sync_policy,
        values.len(),
        requested,
        shared.watermark_target,
      );
      let from_queue = decision.returned.min(values.len());
      (decision, values.drain(..from_queue).collect::<Vec<V>>())
    });

    if decision.sync_fetch > 0 {
      let held = queue.generation_lock();
      let generated = queue.generate(&held, shared.store.generator(), decision.sync_fetch);
      let produced = match generated {
        Ok(produced) => produced,
        Err(source) => {
          // Back in the queue before a waiting refill can size its fill.
          queue.restore_front(taken);
          drop(held);
          Metrics::add(&shared.metrics.generation_failures, 1);
          return Err(QueueError::generation(queue.key(), source));
        }
      };

      Metrics::add(&shared.metrics.sync_fills, 1);
      Metrics::add(&shared.metrics.sync_values_generated, produced.len());
      tracing::debug!(
        key = ?queue.key(),
        policy = %shared.config.sync_policy,
        sync_fetch = decision.sync_fetch,
        returned = decision.returned,
        "generated values on caller thread"
      );

      let wanted = decision.returned - taken.len();
      let mut produced = produced.into_iter();
      taken.extend(produced.by_ref().take(wanted));

      let surplus: Vec<V> = produced.collect();
      if !surplus.is_empty() {
        if let Err(err) = queue.enqueue_all(surplus) {
          shared.store.record_overflow(&err);
        }
      }
    }

    Metrics::add(&shared.metrics.values_served, taken.len());
    if decision.sync_fetch > 0 || queue.len() <= shared.refill_threshold {
      shared.scheduler.schedule(queue);
    }
    Ok(taken)
  }
}
