use crate::error::BuildError;
use crate::policy::SyncPolicy;

pub(crate) const DEFAULT_CAPACITY: usize = 500;
pub(crate) const DEFAULT_LOW_WATERMARK: f64 = 0.3;
pub(crate) const DEFAULT_REFILL_WORKERS: usize = 2;
pub(crate) const DEFAULT_SHARDS: usize = 16;

/// Plain configuration for a value queue.
///
/// With the `serde` feature this can be deserialized from any serde format;
/// missing fields take their defaults.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct QueueConfig {
  /// Maximum number of values held per key.
  pub capacity: usize,
  /// Fraction of `capacity` at or below which a background refill is due.
  pub low_watermark: f64,
  /// Number of background refill threads.
  pub refill_workers: usize,
  /// How bulk requests are served when the queue runs short.
  pub sync_policy: SyncPolicy,
  /// Number of independently locked partitions of the key map.
  pub shards: usize,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      capacity: DEFAULT_CAPACITY,
      low_watermark: DEFAULT_LOW_WATERMARK,
      refill_workers: DEFAULT_REFILL_WORKERS,
      sync_policy: SyncPolicy::default(),
      shards: DEFAULT_SHARDS,
    }
  }
}

impl QueueConfig {
  pub(crate) fn validate(&self) -> Result<(), BuildError> {
    if self.capacity == 0 {
      return Err(BuildError::ZeroCapacity);
    }
    if !(self.low_watermark > 0.0 && self.low_watermark <= 1.0) {
      return Err(BuildError::InvalidLowWatermark(self.low_watermark));
    }
    if self.refill_workers == 0 {
      return Err(BuildError::ZeroWorkers);
    }
    if self.shards == 0 {
      return Err(BuildError::ZeroShards);
    }
    Ok(())
  }

  /// Number of values generated when a key is first primed, and the sync
  /// fetch size of the `LowWatermark` policy.
  pub fn watermark_target(&self) -> usize {
    (watermark_level(self.low_watermark, self.capacity).ceil() as usize).max(1)
  }

  /// A refill is scheduled once a queue holds this many values or fewer.
  pub fn refill_threshold(&self) -> usize {
    watermark_level(self.low_watermark, self.capacity).floor() as usize
  }
}

/// `fraction * capacity`, snapped to the nearest integer when float error
/// puts it a hair off (0.3 * 10 is 3.0000000000000004).
fn watermark_level(fraction: f64, capacity: usize) -> f64 {
  let raw = fraction * capacity as f64;
  let nearest = raw.round();
  if (raw - nearest).abs() < 1e-9 {
    nearest
  } else {
    raw
  }
}
