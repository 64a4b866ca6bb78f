use std::io;

use thiserror::Error;

use crate::generator::GenerateError;

/// Errors that can occur when building a value queue.
#[derive(Debug, Error)]
pub enum BuildError {
  /// The queue was configured with a capacity of zero.
  #[error("queue capacity cannot be zero")]
  ZeroCapacity,
  /// The low watermark must lie in `(0, 1]`.
  #[error("low watermark must be in (0, 1], got {0}")]
  InvalidLowWatermark(f64),
  /// At least one refill worker is required.
  #[error("refill worker count cannot be zero")]
  ZeroWorkers,
  /// The key map was configured with zero shards.
  #[error("shard count cannot be zero")]
  ZeroShards,
  /// `build()` was called without a generator.
  #[error("a value queue requires a generator")]
  GeneratorRequired,
  /// The OS refused to start a refill worker thread.
  #[error("failed to spawn refill worker: {0}")]
  WorkerSpawn(#[source] io::Error),
}

/// Errors returned by value queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
  /// The generator failed while producing values on the caller's thread.
  #[error("value generation failed for key {key}")]
  Generation {
    key: String,
    #[source]
    source: GenerateError,
  },
  /// The generator reported success but produced no values for a call that
  /// must return one.
  #[error("generator produced no values for key {key}")]
  Exhausted { key: String },
  /// The queue has been shut down.
  #[error("value queue has been shut down")]
  ShutDown,
  /// More values were offered to a key's queue than it has room for.
  /// Whatever fit was enqueued; `rejected` values were discarded.
  #[error("queue for key {key} overflowed capacity {capacity}, {rejected} values discarded")]
  Overflow {
    key: String,
    rejected: usize,
    capacity: usize,
  },
}

impl QueueError {
  pub(crate) fn generation<K: std::fmt::Debug>(key: &K, source: GenerateError) -> Self {
    QueueError::Generation {
      key: format!("{:?}", key),
      source,
    }
  }

  /// Returns `true` if this error was caused by the generator.
  pub fn is_generation(&self) -> bool {
    matches!(self, QueueError::Generation { .. })
  }
}
