//! Per-device pump task: SPSC ring consumer to handler blocks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ringbuf::traits::{Consumer, Observer};

use crate::config::{Canonical, BLOCK_FRAMES};

/// Spawns the pump task for one capture stream.
///
/// Pops 1024-frame blocks from the device's SPSC ring at a sub-block poll
/// interval and invokes `handler` for each. When `running` flips off, any
/// remaining whole blocks are drained, then one final partial block.
///
/// The handler runs synchronously on this task; it is the "audio callback
/// thread" for the engine's concurrency contract.
pub(crate) fn spawn_pump<F>(
    mut consumer: ringbuf::HeapCons<f32>,
    format: Canonical,
    running: Arc<AtomicBool>,
    mut handler: F,
) -> tokio::task::JoinHandle<()>
where
    F: FnMut(&[f32]) + Send + 'static,
{
    tokio::spawn(async move {
        let block = BLOCK_FRAMES * format.channels as usize;
        let block_duration =
            Duration::from_secs_f64(BLOCK_FRAMES as f64 / f64::from(format.sample_rate.max(1)));
        let mut interval = tokio::time::interval(block_duration / 2);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut scratch = vec![0.0f32; block];

        while running.load(Ordering::SeqCst) {
            interval.tick().await;
            while consumer.occupied_len() >= block {
                let read = consumer.pop_slice(&mut scratch);
                handler(&scratch[..read]);
            }
        }

        // Drain whole blocks, then the final partial one.
        loop {
            let occupied = consumer.occupied_len();
            if occupied == 0 {
                break;
            }
            let take = occupied.min(block);
            let read = consumer.pop_slice(&mut scratch[..take]);
            if read == 0 {
                break;
            }
            handler(&scratch[..read]);
        }

        tracing::debug!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            "pump task exited"
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use ringbuf::traits::{Producer, Split};
    use ringbuf::HeapRb;

    const FORMAT: Canonical = Canonical {
        sample_rate: 48_000,
        channels: 2,
    };

    fn setup(capacity: usize) -> (ringbuf::HeapProd<f32>, ringbuf::HeapCons<f32>) {
        HeapRb::<f32>::new(capacity).split()
    }

    #[tokio::test]
    async fn test_pump_delivers_whole_blocks() {
        let (mut producer, consumer) = setup(1 << 16);
        let running = Arc::new(AtomicBool::new(true));
        let blocks: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&blocks);
        let handle = spawn_pump(consumer, FORMAT, Arc::clone(&running), move |block| {
            sink.lock().push(block.len());
        });

        let block = BLOCK_FRAMES * 2;
        for i in 0..3 * block {
            let _ = producer.try_push(i as f32);
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        running.store(false, Ordering::SeqCst);
        handle.await.unwrap();

        let blocks = blocks.lock();
        assert_eq!(blocks.len(), 3);
        assert!(blocks.iter().all(|&len| len == block));
    }

    #[tokio::test]
    async fn test_pump_drains_partial_block_on_stop() {
        let (mut producer, consumer) = setup(1 << 16);
        let running = Arc::new(AtomicBool::new(true));
        let blocks: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));

        let block = BLOCK_FRAMES * 2;
        // 1.5 blocks; the partial half must arrive after stop.
        for i in 0..block + block / 2 {
            let _ = producer.try_push(i as f32);
        }

        let sink = Arc::clone(&blocks);
        // Stop before the pump starts so the whole content goes through the
        // drain path.
        running.store(false, Ordering::SeqCst);
        let handle = spawn_pump(consumer, FORMAT, Arc::clone(&running), move |b| {
            sink.lock().push(b.len());
        });
        handle.await.unwrap();

        let blocks = blocks.lock();
        assert_eq!(*blocks, vec![block, block / 2]);
    }

    #[tokio::test]
    async fn test_pump_preserves_sample_order() {
        let (mut producer, consumer) = setup(1 << 16);
        let running = Arc::new(AtomicBool::new(false));
        let samples: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));

        let block = BLOCK_FRAMES * 2;
        let expected: Vec<f32> = (0..2 * block).map(|i| i as f32).collect();
        for &s in &expected {
            let _ = producer.try_push(s);
        }

        let sink = Arc::clone(&samples);
        let handle = spawn_pump(consumer, FORMAT, running, move |b| {
            sink.lock().extend_from_slice(b);
        });
        handle.await.unwrap();

        assert_eq!(*samples.lock(), expected);
    }
}
