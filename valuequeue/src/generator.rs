use std::error::Error;

/// The error type a [`Generator`] reports failures with.
pub type GenerateError = Box<dyn Error + Send + Sync + 'static>;

/// Produces new values for a key.
///
/// The queue calls `fill` both on the background refill workers and, when a
/// consumer outpaces the cache, on the consumer's own thread. It never calls
/// `fill` concurrently for the same key, but calls for different keys can
/// overlap, so implementations must be `Send + Sync`.
///
/// `fill` should append exactly `count` values to `into`. Appending fewer is
/// tolerated; the caller simply receives fewer values. No timeout is applied,
/// so a generator talking to a remote service is responsible for its own
/// deadlines.
pub trait Generator<K, V>: Send + Sync + 'static {
  fn fill(&self, key: &K, count: usize, into: &mut Vec<V>) -> Result<(), GenerateError>;
}

impl<K, V, F> Generator<K, V> for F
where
  F: Fn(&K, usize, &mut Vec<V>) -> Result<(), GenerateError> + Send + Sync + 'static,
{
  fn fill(&self, key: &K, count: usize, into: &mut Vec<V>) -> Result<(), GenerateError> {
    self(key, count, into)
  }
}
