//! Worker harness for the shm-sync primitives.
//!
//! Runs the semaphore, bounded buffer and ring queue scenarios on real
//! threads and reports what each one observed. Parameters come from
//! [`ScenarioConfig`]; set `RUST_LOG=info` (or `debug`) to see the reports.
//!
//! ```bash
//! RUST_LOG=info SCENARIO_RING_PRODUCERS=4 cargo run -p sync-scenarios
//! ```

mod config;

use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::Instant;

use shm_sync::{BoundedBuffer, CountingSemaphore, Message, RingQueue};

use config::ScenarioConfig;

type BoxError = Box<dyn Error>;

fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sync_scenarios=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ScenarioConfig::from_env();
    tracing::info!(?config, "starting scenarios");

    semaphore_scenario(&config)?;
    buffer_scenario(&config)?;
    ring_scenario(&config)?;
    if config.overflow {
        overflow_scenario(&config)?;
    }

    tracing::info!("all scenarios passed");
    Ok(())
}

fn join<T>(handle: thread::JoinHandle<T>) -> Result<T, BoxError> {
    handle.join().map_err(|_| "worker panicked".into())
}

/// Workers contend for a handful of permits and hold each one for a while.
fn semaphore_scenario(config: &ScenarioConfig) -> Result<(), BoxError> {
    let sema = CountingSemaphore::create(config.semaphore_permits)?;
    let started = Instant::now();

    let workers: Vec<_> = (0..config.semaphore_workers)
        .map(|worker| {
            let (sema, hold) = (sema.clone(), config.hold);
            thread::spawn(move || {
                let _permit = sema.permit();
                tracing::debug!(worker, in_use = sema.stats().in_use(), "holding permit");
                thread::sleep(hold);
            })
        })
        .collect();
    for w in workers {
        join(w)?;
    }

    let stats = sema.stats();
    tracing::info!(
        max_observed = stats.max_observed,
        max_permits = stats.max_permits,
        elapsed = ?started.elapsed(),
        "semaphore scenario done"
    );
    if stats.max_observed > stats.max_permits || stats.permits != stats.max_permits {
        return Err(format!("semaphore bound broken: {:?}", stats).into());
    }
    Ok(())
}

/// One producer, one slower consumer, through a small blocking buffer.
fn buffer_scenario(config: &ScenarioConfig) -> Result<(), BoxError> {
    let buffer = BoundedBuffer::<Message>::create(config.buffer_capacity)?;
    let items = config.buffer_items;
    let started = Instant::now();

    let producer = {
        let buffer = buffer.clone();
        thread::spawn(move || {
            let mut blocked_puts = 0u32;
            for payload in 1..=items {
                if buffer.is_full() {
                    blocked_puts += 1;
                }
                let ts = started.elapsed().as_nanos() as u64;
                buffer.put(Message::new(ts, 0, payload));
            }
            blocked_puts
        })
    };

    let mut received = Vec::with_capacity(items as usize);
    for _ in 0..items {
        thread::sleep(config.hold / 4);
        received.push(buffer.take().payload);
    }
    let blocked_puts = join(producer)?;

    let stats = buffer.stats();
    tracing::info!(
        ?received,
        blocked_puts,
        total_put = stats.total_put,
        total_taken = stats.total_taken,
        "buffer scenario done"
    );
    if !received.iter().copied().eq(1..=items) {
        return Err(format!("buffer delivered out of order: {:?}", received).into());
    }
    Ok(())
}

/// Several producers and consumers through the non-blocking ring queue.
fn ring_scenario(config: &ScenarioConfig) -> Result<(), BoxError> {
    let total = config
        .ring_total()
        .ok_or("ring producers times items does not fit in a u32")?;
    let queue = RingQueue::<Message>::create(config.ring_capacity)?;
    let received = Arc::new(AtomicU32::new(0));
    let done = Arc::new(AtomicBool::new(false));
    let started = Instant::now();

    let sampler = {
        let (queue, done) = (queue.clone(), done.clone());
        thread::spawn(move || {
            let mut max_len = 0;
            while !done.load(Ordering::SeqCst) {
                max_len = max_len.max(queue.queue_length());
                thread::yield_now();
            }
            max_len
        })
    };

    let producers: Vec<_> = (0..config.ring_producers)
        .map(|producer| {
            let (queue, items) = (queue.clone(), config.ring_items);
            thread::spawn(move || {
                let mut retries = 0u64;
                for seq in 0..items {
                    let msg = Message::new(started.elapsed().as_nanos() as u64, producer, seq);
                    while queue.enqueue(msg).is_full() {
                        retries += 1;
                        thread::yield_now();
                    }
                }
                retries
            })
        })
        .collect();

    let consumers: Vec<_> = (0..config.ring_consumers)
        .map(|_| {
            let (queue, received) = (queue.clone(), received.clone());
            thread::spawn(move || {
                let mut last: HashMap<u32, u32> = HashMap::new();
                let mut reordered = 0u32;
                while received.load(Ordering::SeqCst) < total {
                    let Some(msg) = queue.dequeue() else {
                        thread::yield_now();
                        continue;
                    };
                    received.fetch_add(1, Ordering::SeqCst);
                    if last
                        .insert(msg.producer, msg.payload)
                        .is_some_and(|prev| prev >= msg.payload)
                    {
                        reordered += 1;
                    }
                }
                reordered
            })
        })
        .collect();

    let mut retries = 0;
    for p in producers {
        retries += join(p)?;
    }
    let mut reordered = 0;
    for c in consumers {
        reordered += join(c)?;
    }
    done.store(true, Ordering::SeqCst);
    let max_len = join(sampler)?;

    let stats = queue.stats();
    tracing::info!(
        received = received.load(Ordering::SeqCst),
        max_len,
        retries,
        full_events = stats.full_events,
        elapsed = ?started.elapsed(),
        "ring scenario done"
    );
    if stats.total_received != total || max_len > config.ring_capacity || reordered > 0 {
        return Err(format!(
            "ring queue broken: {:?}, max_len {}, reordered {}",
            stats, max_len, reordered
        )
        .into());
    }
    Ok(())
}

/// Releases a semaphore past its maximum. This never returns.
fn overflow_scenario(config: &ScenarioConfig) -> Result<(), BoxError> {
    let sema = CountingSemaphore::create(config.semaphore_permits)?;
    tracing::warn!("releasing a permit that was never acquired; expect an invariant violation");
    sema.release();
    Err("semaphore accepted an over-release".into())
}
