use crate::error::BuildError;
use crate::metrics::Metrics;
use crate::store::{KeyQueue, KeyQueueStore};

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use fibre::mpmc;
use parking_lot::Mutex;

/// A message sent to the refill workers: the queue to top up.
pub(crate) type RefillRequest<K, V> = Arc<KeyQueue<K, V>>;

/// The background worker pool that tops key queues back up to capacity.
///
/// Requests travel over an unbounded MPMC channel shared by all workers.
/// Each key's `refilling` flag is claimed before a request is sent and
/// released when the worker is done with it, so at most one request per key
/// is ever queued or running.
pub(crate) struct RefillScheduler<K: Send + Sync, V: Send> {
  sender: Mutex<Option<mpmc::Sender<RefillRequest<K, V>>>>,
  handles: Mutex<Vec<JoinHandle<()>>>,
  stop_flag: Arc<AtomicBool>,
  metrics: Arc<Metrics>,
}

impl<K: Send + Sync, V: Send> fmt::Debug for RefillScheduler<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RefillScheduler")
      .field("workers", &self.handles.lock().len())
      .field("stopped", &self.is_stopped())
      .finish()
  }
}

/// Releases a key's refill slot on every exit path, panics included.
struct RefillSlot<'a, K, V>(&'a KeyQueue<K, V>);

impl<K, V> Drop for RefillSlot<'_, K, V> {
  fn drop(&mut self) {
    self.0.end_refill();
  }
}

impl<K, V> RefillScheduler<K, V>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Send + 'static,
{
  /// Spawns `workers` refill threads.
  pub(crate) fn spawn<H>(
    store: Arc<KeyQueueStore<K, V, H>>,
    metrics: Arc<Metrics>,
    workers: usize,
  ) -> Result<Self, BuildError>
  where
    H: BuildHasher + Clone + Send + Sync + 'static,
  {
    let (tx, rx) = mpmc::unbounded::<RefillRequest<K, V>>();
    let stop_flag = Arc::new(AtomicBool::new(false));
    let mut handles = Vec::with_capacity(workers);

    for index in 0..workers {
      let rx = rx.clone();
      let store = Arc::clone(&store);
      let stop = Arc::clone(&stop_flag);

      let spawned = thread::Builder::new()
        .name(format!("valuequeue-refill-{}", index))
        .spawn(move || {
          // Ends once the sender is dropped and the channel is empty.
          while let Ok(queue) = rx.recv() {
            Self::run(&*store, &queue, &stop);
          }
          tracing::trace!(worker = index, "refill worker exiting");
        });

      match spawned {
        Ok(handle) => handles.push(handle),
        Err(err) => {
          stop_flag.store(true, Ordering::Release);
          drop(tx);
          for handle in handles {
            let _ = handle.join();
          }
          return Err(BuildError::WorkerSpawn(err));
        }
      }
    }

    tracing::info!(workers, "started value queue refill workers");

    Ok(Self {
      sender: Mutex::new(Some(tx)),
      handles: Mutex::new(handles),
      stop_flag,
      metrics,
    })
  }

  /// Requests a background top-up of `queue`.
  ///
  /// A no-op if a refill for the key is already outstanding or the
  /// scheduler has been stopped.
  pub(crate) fn schedule(&self, queue: &RefillRequest<K, V>) {
    if self.is_stopped() {
      return;
    }
    if !queue.try_begin_refill() {
      Metrics::add(&self.metrics.refills_coalesced, 1);
      tracing::trace!(key = ?queue.key(), "refill already outstanding");
      return;
    }

    let sent = match self.sender.lock().as_ref() {
      Some(sender) => sender.send(Arc::clone(queue)).is_ok(),
      None => false,
    };

    if sent {
      Metrics::add(&self.metrics.refills_scheduled, 1);
      tracing::debug!(key = ?queue.key(), len = queue.len(), "scheduled refill");
    } else {
      queue.end_refill();
    }
  }

  /// Executes one refill request on a worker thread.
  fn run<H>(store: &KeyQueueStore<K, V, H>, queue: &KeyQueue<K, V>, stop: &AtomicBool)
  where
    H: BuildHasher + Clone,
  {
    let slot = RefillSlot(queue);
    if stop.load(Ordering::Acquire) {
      tracing::trace!(key = ?queue.key(), "skipping refill, scheduler stopped");
      return;
    }

    let held = queue.generation_lock();
    let deficit = queue.capacity().saturating_sub(queue.len());
    if deficit == 0 {
      return;
    }

    let metrics = store.metrics();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
      queue.generate(&held, store.generator(), deficit)
    }));

    // Free the slot before the outcome becomes visible, so a consumer that
    // observes it can already schedule the next refill. That one waits on
    // the generation lock until this one is enqueued.
    drop(slot);

    match outcome {
      Ok(Ok(produced)) => {
        let count = produced.len();
        Metrics::add(&metrics.async_fills, 1);
        Metrics::add(&metrics.async_values_generated, count);
        if let Err(err) = queue.enqueue_all(produced) {
          store.record_overflow(&err);
        }
        tracing::debug!(key = ?queue.key(), deficit, count, "refilled value queue");
      }
      Ok(Err(err)) => {
        Metrics::add(&metrics.refill_failures, 1);
        tracing::warn!(key = ?queue.key(), deficit, error = %err, "background refill failed");
      }
      Err(_) => {
        Metrics::add(&metrics.refill_failures, 1);
        tracing::warn!(key = ?queue.key(), deficit, "generator panicked during background refill");
      }
    }
  }
}

impl<K: Send + Sync, V: Send> RefillScheduler<K, V> {
  pub(crate) fn is_stopped(&self) -> bool {
    self.stop_flag.load(Ordering::Acquire)
  }

  /// Stops accepting requests and disconnects the channel. Workers finish
  /// the refill they are running and skip anything still queued.
  pub(crate) fn stop(&self) {
    self.stop_flag.store(true, Ordering::Release);
    drop(self.sender.lock().take());
  }

  /// Stops the pool and waits for every worker to exit.
  pub(crate) fn shutdown(&self) {
    self.stop();
    let handles = std::mem::take(&mut *self.handles.lock());
    let workers = handles.len();
    for handle in handles {
      if handle.join().is_err() {
        tracing::warn!("refill worker panicked");
      }
    }
    tracing::info!(workers, "stopped value queue refill workers");
  }
}
