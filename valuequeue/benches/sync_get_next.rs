use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fibre_valuequeue::{GenerateError, SyncPolicy, ValueQueue, ValueQueueBuilder};

const CAPACITY: usize = 500;
const OPS_PER_THREAD: usize = 10_000;

fn build_queue(policy: SyncPolicy, workers: usize) -> ValueQueue<u64, u64> {
  ValueQueueBuilder::<u64, u64>::new()
    .capacity(CAPACITY)
    .low_watermark(0.3)
    .refill_workers(workers)
    .sync_policy(policy)
    .generator_fn(|key, count, into| -> Result<(), GenerateError> {
      into.extend((0..count as u64).map(|i| key.wrapping_mul(31).wrapping_add(i)));
      Ok(())
    })
    .build()
    .unwrap()
}

/// Runs `concurrency` threads doing `OPS_PER_THREAD` reads each, spread over
/// `num_keys` keys, and returns the wall time for the whole batch.
fn run_batch(queue: &ValueQueue<u64, u64>, concurrency: usize, num_keys: u64, bulk: usize) -> Duration {
  let barrier = Arc::new(Barrier::new(concurrency));
  let start_time = Instant::now();

  thread::scope(|s| {
    for t in 0..concurrency {
      let barrier = barrier.clone();
      s.spawn(move || {
        barrier.wait();
        for i in 0..OPS_PER_THREAD {
          let key = (t + i) as u64 % num_keys;
          if bulk > 1 {
            black_box(queue.get_at_most(&key, bulk).unwrap());
          } else {
            black_box(queue.get_next(&key).unwrap());
          }
        }
      });
    }
  });

  start_time.elapsed()
}

fn sync_get_next_benches(c: &mut Criterion) {
  let mut group = c.benchmark_group("ValueQueue/get_next");
  for concurrency in [1, 4, 8] {
    group.throughput(Throughput::Elements((concurrency * OPS_PER_THREAD) as u64));
    for num_keys in [1u64, 64] {
      let queue = build_queue(SyncPolicy::All, 2);
      let keys: Vec<u64> = (0..num_keys).collect();
      queue.initialize_queues_for_keys(&keys).unwrap();

      let id = BenchmarkId::from_parameter(format!("threads={}/keys={}", concurrency, num_keys));
      group.bench_function(id, |b| {
        b.iter_custom(|iters| {
          (0..iters)
            .map(|_| run_batch(&queue, concurrency, num_keys, 1))
            .sum()
        })
      });
      queue.shutdown().unwrap();
    }
  }
  group.finish();

  let mut group = c.benchmark_group("ValueQueue/get_at_most");
  group.throughput(Throughput::Elements((4 * OPS_PER_THREAD) as u64));
  for policy in [SyncPolicy::All, SyncPolicy::AtLeastOne, SyncPolicy::LowWatermark] {
    let queue = build_queue(policy, 2);
    group.bench_function(BenchmarkId::from_parameter(policy), |b| {
      b.iter_custom(|iters| (0..iters).map(|_| run_batch(&queue, 4, 16, 32)).sum())
    });
    queue.shutdown().unwrap();
  }
  group.finish();
}

criterion_group!(benches, sync_get_next_benches);
criterion_main!(benches);
