use std::fmt;
use std::str::FromStr;

/// Decides how many values are generated on the caller's thread when a bulk
/// request asks for more values than the queue currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum SyncPolicy {
  /// Generate the whole shortfall so the caller always gets what it asked for.
  #[default]
  All,
  /// Return what is queued. If nothing is, generate exactly one value.
  #[cfg_attr(feature = "serde", serde(rename = "ATLEAST_ONE", alias = "AT_LEAST_ONE"))]
  AtLeastOne,
  /// Return what is queued. If nothing is, generate a low watermark's worth
  /// and return up to that many.
  LowWatermark,
}

impl fmt::Display for SyncPolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SyncPolicy::All => write!(f, "ALL"),
      SyncPolicy::AtLeastOne => write!(f, "ATLEAST_ONE"),
      SyncPolicy::LowWatermark => write!(f, "LOW_WATERMARK"),
    }
  }
}

/// Returned when parsing an unknown sync policy name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sync policy '{0}', expected ALL, ATLEAST_ONE or LOW_WATERMARK")]
pub struct ParsePolicyError(String);

impl FromStr for SyncPolicy {
  type Err = ParsePolicyError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_uppercase().as_str() {
      "ALL" => Ok(SyncPolicy::All),
      "ATLEAST_ONE" | "AT_LEAST_ONE" => Ok(SyncPolicy::AtLeastOne),
      "LOW_WATERMARK" => Ok(SyncPolicy::LowWatermark),
      _ => Err(ParsePolicyError(s.to_string())),
    }
  }
}

/// The outcome of [`decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncDecision {
  /// How many values to generate on the caller's thread.
  pub sync_fetch: usize,
  /// How many values to hand back to the caller.
  pub returned: usize,
}

impl SyncDecision {
  const fn new(sync_fetch: usize, returned: usize) -> Self {
    Self {
      sync_fetch,
      returned,
    }
  }
}

/// Maps a policy and the current/requested counts to a sync fetch and a
/// return count.
///
/// `watermark_target` is `ceil(low_watermark * capacity)`, at least 1.
/// This is a pure function; it never touches a queue or a generator.
pub fn decide(
  policy: SyncPolicy,
  cached: usize,
  requested: usize,
  watermark_target: usize,
) -> SyncDecision {
  if cached >= requested {
    return SyncDecision::new(0, requested);
  }

  match policy {
    SyncPolicy::All => SyncDecision::new(requested - cached, requested),
    SyncPolicy::AtLeastOne => {
      if cached == 0 {
        SyncDecision::new(1, 1)
      } else {
        SyncDecision::new(0, cached)
      }
    }
    SyncPolicy::LowWatermark => {
      if cached == 0 {
        SyncDecision::new(watermark_target, requested.min(watermark_target))
      } else {
        SyncDecision::new(0, cached)
      }
    }
  }
}
