//! A concurrent, self-replenishing queue of pre-generated values per key.
//!
//! Some values are expensive to produce on demand (encrypted data keys from a
//! KMS, one-time tokens, key pairs). A [`ValueQueue`] keeps a bounded FIFO of
//! them for every key it has seen, serves consumers straight from memory and
//! tops each queue back up on a pool of background workers once it drops to
//! its low watermark.
//!
//! # Features
//! - **Lazy, exactly-once priming**: the first access to a key generates a
//!   low watermark's worth of values on the caller's thread, once, even under
//!   concurrent first access.
//! - **Coalesced refills**: at most one background refill is queued or running
//!   per key, and the [`Generator`] is never called concurrently for one key.
//! - **Sync policies**: when a bulk request outruns the queue a [`SyncPolicy`]
//!   decides how much is generated inline (`All`, `AtLeastOne`,
//!   `LowWatermark`).
//! - **Observability**: structured `tracing` events and a [`MetricsSnapshot`]
//!   of every generation, refill and failure.
//! - **Configuration**: a fluent [`ValueQueueBuilder`] or a serde-loadable
//!   [`QueueConfig`].

// Public modules that form the API
pub mod builder;
pub mod config;
pub mod error;
pub mod generator;
pub mod handle;
pub mod metrics;
pub mod policy;

// Internal, crate-only modules
mod shared;
mod store;
mod task;

// Re-export the primary user-facing types for convenience
pub use builder::ValueQueueBuilder;
pub use config::QueueConfig;
pub use error::{BuildError, QueueError};
pub use generator::{GenerateError, Generator};
pub use handle::ValueQueue;
pub use metrics::MetricsSnapshot;
pub use policy::{decide, SyncDecision, SyncPolicy};
