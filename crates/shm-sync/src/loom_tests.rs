#![cfg(all(test, feature = "loom"))]

use crate::buffer::{BoundedBuffer, BufferConfig};
use crate::lock::AtomicLock;
use crate::region::SharedRegion;
use crate::ring::RingQueue;
use crate::semaphore::CountingSemaphore;
use crate::sync::thread;
use crate::wait::WaitConfig;

const NO_SPIN: WaitConfig = WaitConfig {
    spin_limit: 0,
    park_slice: None,
};

#[test]
fn lock_protects_read_modify_write() {
    loom::model(|| {
        let region = SharedRegion::new(AtomicLock::WORDS + 1).unwrap();
        let lock = AtomicLock::init(&region, Some(0)).unwrap().with_config(NO_SPIN);
        let counter = AtomicLock::WORDS;

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let (lock, region) = (lock.clone(), region.clone());
                thread::spawn(move || {
                    let _g = lock.lock();
                    let v = region.load(counter);
                    region.store(counter, v + 1);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(region.load(counter), 2);
        assert!(!lock.is_locked());
    });
}

#[test]
fn semaphore_never_over_admits() {
    loom::model(|| {
        let region = SharedRegion::new(CountingSemaphore::WORDS + 1).unwrap();
        let sema = CountingSemaphore::init(&region, Some(0), 1)
            .unwrap()
            .with_config(NO_SPIN);
        let inside = CountingSemaphore::WORDS;

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let (sema, region) = (sema.clone(), region.clone());
                thread::spawn(move || {
                    let _p = sema.permit();
                    assert_eq!(region.fetch_add(inside, 1), 0);
                    region.fetch_sub(inside, 1);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(sema.current_permits(), 1);
        assert_eq!(sema.max_observed(), 1);
    });
}

#[test]
fn ring_two_producers_one_consumer() {
    loom::model(|| {
        let queue = RingQueue::<u32>::create(2).unwrap();

        let producers: Vec<_> = (0..2u32)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    while queue.enqueue(p + 10).is_full() {
                        thread::yield_now();
                    }
                })
            })
            .collect();

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                let mut received = Vec::new();
                while received.len() < 2 {
                    match queue.dequeue() {
                        Some(v) => received.push(v),
                        None => thread::yield_now(),
                    }
                }
                received.sort_unstable();
                received
            })
        };

        for p in producers {
            p.join().unwrap();
        }
        assert_eq!(consumer.join().unwrap(), vec![10, 11]);
        assert_eq!(queue.queue_length(), 0);
    });
}

#[test]
fn ring_capacity_one_handoff() {
    loom::model(|| {
        let queue = RingQueue::<u32>::create(1).unwrap();

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..2 {
                    while queue.enqueue(i).is_full() {
                        thread::yield_now();
                    }
                }
            })
        };

        let mut received = Vec::new();
        while received.len() < 2 {
            match queue.dequeue() {
                Some(v) => received.push(v),
                None => thread::yield_now(),
            }
        }
        producer.join().unwrap();
        assert_eq!(received, vec![0, 1]);
    });
}

#[test]
fn buffer_handoff_preserves_order() {
    loom::model(|| {
        let buffer = BoundedBuffer::<u32>::create_with(
            1,
            BufferConfig {
                wait: NO_SPIN,
                ..Default::default()
            },
        )
        .unwrap();

        let producer = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                buffer.put(1);
                buffer.put(2);
            })
        };

        let first = buffer.take();
        let second = buffer.take();
        producer.join().unwrap();

        assert_eq!((first, second), (1, 2));
        assert_eq!(buffer.current_count(), 0);
    });
}
