use fibre_valuequeue::{GenerateError, SyncPolicy, ValueQueueBuilder};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// A simulated key management service. Every call is a slow round trip, so
// handing out one data key per call would be expensive.
fn generate_data_keys(
  calls: &AtomicU64,
  key_name: &String,
  count: usize,
  into: &mut Vec<String>,
) -> Result<(), GenerateError> {
  let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
  println!(
    "--- KMS: call #{} asks for {} data keys under '{}'",
    call, count, key_name
  );
  thread::sleep(Duration::from_millis(100));
  into.extend((0..count).map(|i| format!("{}@{}/{}", key_name, call, i)));
  Ok(())
}

fn main() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .try_init();

  let calls = Arc::new(AtomicU64::new(0));
  let queue = ValueQueueBuilder::<String, String>::new()
    .capacity(20)
    .low_watermark(0.25)
    .refill_workers(2)
    .sync_policy(SyncPolicy::LowWatermark)
    .generator_fn({
      let calls = calls.clone();
      move |key, count, into| generate_data_keys(&calls, key, count, into)
    })
    .build()
    .expect("Failed to build value queue");

  println!("Warming up two encryption keys.");
  queue
    .initialize_queues_for_keys(["orders", "payments"])
    .expect("warm-up failed");

  println!("\nServing 12 data keys for 'orders'.");
  for _ in 0..12 {
    let data_key = queue.get_next("orders").expect("get_next failed");
    println!("Got {}", data_key);
  }

  println!("\nWaiting for the background refill...");
  thread::sleep(Duration::from_millis(300));
  println!("'orders' now holds {} data keys.", queue.size("orders").unwrap());

  println!("\nDraining 'payments' and asking for 10 at once.");
  queue.drain("payments").unwrap();
  let batch = queue.get_at_most("payments", 10).expect("get_at_most failed");
  println!("LowWatermark policy returned {} data keys: {:?}", batch.len(), batch);

  println!("\nKMS calls made: {}", calls.load(Ordering::SeqCst));
  println!("Queue metrics: {:#?}", queue.metrics());

  queue.shutdown().expect("shutdown failed");
}
