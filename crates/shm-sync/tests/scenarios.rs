//! Multi-worker scenarios run on real threads.
//!
//! Each test drives one primitive from several workers at once and checks
//! the observable guarantees: permit bounds, hand-off order, queue bounds and
//! conservation of items.

#![cfg(not(feature = "loom"))]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use shm_sync::{BoundedBuffer, CountingSemaphore, Message, RingQueue, SharedRegion};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[test]
fn semaphore_caps_concurrency_at_max_permits() {
    init_tracing();
    let workers = 6;
    let sema = CountingSemaphore::create(2).unwrap();
    let inside = Arc::new(AtomicU32::new(0));
    let peak = Arc::new(AtomicU32::new(0));
    let start = Arc::new(Barrier::new(workers));

    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let (sema, inside, peak, start) =
                (sema.clone(), inside.clone(), peak.clone(), start.clone());
            thread::spawn(move || {
                start.wait();
                let _permit = sema.permit();
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                inside.fetch_sub(1, Ordering::SeqCst);
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(sema.max_observed(), 2);
    assert_eq!(sema.current_permits(), 2);
    assert_eq!(sema.waiting(), 0);
}

#[test]
fn semaphore_shared_through_region_offsets() {
    init_tracing();
    let region = SharedRegion::new(16).unwrap();
    let offset = 5;
    let sema = CountingSemaphore::init(&region, Some(offset), 3).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let region = region.clone();
            thread::spawn(move || {
                let sema = CountingSemaphore::attach(&region, offset).unwrap();
                for _ in 0..200 {
                    let _p = sema.permit();
                    assert!(sema.current_permits() < 3);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(sema.current_permits(), 3);
    assert!(sema.max_observed() <= 3);
}

#[test]
fn capacity_one_buffer_hands_off_in_order() {
    init_tracing();
    let buffer = BoundedBuffer::<u32>::create(1).unwrap();

    let producer = {
        let buffer = buffer.clone();
        thread::spawn(move || {
            for item in 1..=5 {
                buffer.put(item);
            }
        })
    };

    let mut received = Vec::new();
    for i in 0..5 {
        if i < 4 {
            // The producer must be parked on a full buffer before we take.
            while buffer.stats().producers_waiting == 0 {
                thread::yield_now();
            }
        }
        received.push(buffer.take());
        assert!(buffer.current_count() <= 1);
    }
    producer.join().unwrap();

    assert_eq!(received, vec![1, 2, 3, 4, 5]);
    let stats = buffer.stats();
    assert_eq!((stats.total_put, stats.total_taken), (5, 5));
    assert_eq!(stats.count, 0);
}

#[test]
fn buffer_conserves_items_across_workers() {
    init_tracing();
    let producers = 3u32;
    let consumers = 3u32;
    let per_producer = 400u32;
    let buffer = BoundedBuffer::<Message>::create(4).unwrap();
    let started = Instant::now();

    let producer_handles: Vec<_> = (0..producers)
        .map(|p| {
            let buffer = buffer.clone();
            thread::spawn(move || {
                for seq in 0..per_producer {
                    let ts = started.elapsed().as_nanos() as u64;
                    buffer.put(Message::new(ts, p, seq));
                }
            })
        })
        .collect();

    let total = producers * per_producer;
    let consumer_handles: Vec<_> = (0..consumers)
        .map(|_| {
            let buffer = buffer.clone();
            thread::spawn(move || {
                (0..total / consumers)
                    .map(|_| buffer.take())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for h in producer_handles {
        h.join().unwrap();
    }
    let mut seen: Vec<(u32, u32)> = consumer_handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .map(|m| (m.producer, m.payload))
        .collect();
    seen.sort_unstable();

    let expected: Vec<(u32, u32)> = (0..producers)
        .flat_map(|p| (0..per_producer).map(move |s| (p, s)))
        .collect();
    assert_eq!(seen, expected);
    assert!(buffer.is_empty());
}

#[test]
fn timed_take_gives_up_then_recovers() {
    init_tracing();
    let buffer = BoundedBuffer::<u32>::create(2).unwrap();
    assert!(buffer.take_for(Duration::from_millis(15)).unwrap_err().is_timeout());

    let producer = {
        let buffer = buffer.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            buffer.put(42);
        })
    };
    assert_eq!(buffer.take_for(Duration::from_secs(5)).unwrap(), 42);
    producer.join().unwrap();
}

#[test]
fn ring_queue_stays_bounded_and_conserves() {
    init_tracing();
    let queue = RingQueue::<Message>::create(4).unwrap();
    let producers = 2u32;
    let per_producer = 50u32;
    let total = (producers * per_producer) as usize;
    let received = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicBool::new(false));

    let sampler = {
        let (queue, done) = (queue.clone(), done.clone());
        thread::spawn(move || {
            let mut samples = 0u32;
            while !done.load(Ordering::SeqCst) {
                assert!(queue.queue_length() <= 4);
                samples += 1;
                thread::yield_now();
            }
            samples
        })
    };

    let producer_handles: Vec<_> = (0..producers)
        .map(|p| {
            let queue = queue.clone();
            thread::spawn(move || {
                for seq in 0..per_producer {
                    while queue.enqueue(Message::new(0, p, seq)).is_full() {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();

    let consumer_handles: Vec<_> = (0..2)
        .map(|_| {
            let (queue, received) = (queue.clone(), received.clone());
            thread::spawn(move || {
                let mut mine = Vec::new();
                while received.load(Ordering::SeqCst) < total {
                    match queue.dequeue() {
                        Some(msg) => {
                            received.fetch_add(1, Ordering::SeqCst);
                            mine.push(msg);
                        }
                        None => thread::yield_now(),
                    }
                }
                mine
            })
        })
        .collect();

    for h in producer_handles {
        h.join().unwrap();
    }
    let batches: Vec<Vec<Message>> = consumer_handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect();
    done.store(true, Ordering::SeqCst);
    sampler.join().unwrap();

    // Each consumer sees any one producer's items in the order they were sent.
    for batch in &batches {
        let mut last: HashMap<u32, u32> = HashMap::new();
        for msg in batch {
            if let Some(prev) = last.insert(msg.producer, msg.payload) {
                assert!(msg.payload > prev);
            }
        }
    }

    let mut all: Vec<(u32, u32)> = batches
        .iter()
        .flatten()
        .map(|m| (m.producer, m.payload))
        .collect();
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), total);

    let stats = queue.stats();
    assert_eq!(stats.len, 0);
    assert_eq!(stats.total_sent as usize, total);
    assert_eq!(stats.total_received as usize, total);
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "semaphore overflow")]
fn releasing_past_max_permits_is_fatal() {
    init_tracing();
    let sema = CountingSemaphore::create(1).unwrap();
    sema.acquire();
    sema.release();
    sema.release();
}

#[test]
fn primitives_share_one_region_without_overlap() {
    init_tracing();
    let words = shm_sync::AtomicLock::WORDS
        + CountingSemaphore::WORDS
        + BoundedBuffer::<u32>::words_for(2)
        + RingQueue::<u32>::words_for(2);
    let region = SharedRegion::new(words).unwrap();

    let lock = shm_sync::AtomicLock::init(&region, None).unwrap();
    let sema = CountingSemaphore::init(&region, None, 1).unwrap();
    let buffer = BoundedBuffer::<u32>::init(&region, None, 2).unwrap();
    let queue = RingQueue::<u32>::init(&region, None, 2).unwrap();
    assert!(shm_sync::AtomicLock::init(&region, None).is_err());

    let ranges = region.claimed();
    assert_eq!(ranges.len(), 4);
    assert_eq!(ranges.last().unwrap().end(), words);

    let _g = lock.lock();
    sema.acquire();
    buffer.put(7);
    assert!(queue.enqueue(8).is_ok());
    assert_eq!(buffer.take(), 7);
    assert_eq!(queue.dequeue(), Some(8));
    sema.release();
}
