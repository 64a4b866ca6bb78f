mod common;

use common::*;
use fibre_valuequeue::SyncPolicy;
use std::time::Duration;

#[test]
fn test_drain_empties_the_queue() {
  let (generator, log) = mock_generator();
  let queue = build_test_queue(10, 0.1, SyncPolicy::All, generator);

  queue.get_next("k1").unwrap();
  log.expect("k1", 1);
  log.expect("k1", 10);
  assert!(wait_for_size(&queue, "k1", 10));

  assert_eq!(queue.drain("k1").unwrap(), 10);
  assert_eq!(queue.size("k1").unwrap(), 0);

  // Draining doesn't trigger a refill on its own.
  log.expect_none();

  let metrics = queue.metrics();
  assert_eq!(metrics.drains, 1);
  assert_eq!(metrics.values_drained, 10);
  queue.shutdown().unwrap();
}

#[test]
fn test_drain_is_idempotent() {
  let (generator, log) = mock_generator();
  let queue = build_test_queue(10, 0.5, SyncPolicy::All, generator);
  queue.initialize_queues_for_keys(["k1"]).unwrap();
  log.expect("k1", 5);

  assert_eq!(queue.drain("k1").unwrap(), 5);
  assert_eq!(queue.drain("k1").unwrap(), 0);
  assert_eq!(queue.drain("k1").unwrap(), 0);

  // Unknown keys drain to nothing and stay unknown.
  assert_eq!(queue.drain("k2").unwrap(), 0);
  assert_eq!(queue.metrics().known_keys, 1);
  log.expect_none();

  queue.shutdown().unwrap();
}

#[test]
fn test_refill_in_flight_survives_drain() {
  let (generator, log) = mock_generator();
  let queue = build_test_queue(10, 0.5, SyncPolicy::All, generator.clone());
  queue.initialize_queues_for_keys(["k1"]).unwrap();
  log.expect("k1", 5);

  // Slow the generator down so the drain lands while the refill runs.
  generator.set_delay(Duration::from_millis(200));
  queue.get_next("k1").unwrap();
  log.expect("k1", 6);
  assert_eq!(queue.drain("k1").unwrap(), 4);

  // The refill was sized before the drain and still lands.
  assert!(wait_for_size(&queue, "k1", 6));
  log.expect_none();

  queue.shutdown().unwrap();
}

#[test]
fn test_get_after_drain_generates_synchronously() {
  let (generator, log) = mock_generator();
  let queue = build_test_queue(10, 0.5, SyncPolicy::All, generator);
  queue.initialize_queues_for_keys(["k1"]).unwrap();
  log.expect("k1", 5);
  queue.drain("k1").unwrap();

  let value = queue.get_next("k1").unwrap();
  assert_eq!(value, 5);
  log.expect("k1", 1);
  log.expect("k1", 10);
  assert!(wait_for_size(&queue, "k1", 10));

  queue.shutdown().unwrap();
}
