//! Scenario parameters, overridable through `SCENARIO_*` environment variables.

use std::str::FromStr;
use std::time::Duration;

/// Workload sizes and pacing for every scenario.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    /// `SCENARIO_SEMAPHORE_PERMITS`
    pub semaphore_permits: u32,
    /// `SCENARIO_SEMAPHORE_WORKERS`
    pub semaphore_workers: u32,
    /// `SCENARIO_HOLD_MS`: how long a worker keeps its permit.
    pub hold: Duration,
    /// `SCENARIO_BUFFER_CAPACITY`
    pub buffer_capacity: u32,
    /// `SCENARIO_BUFFER_ITEMS`
    pub buffer_items: u32,
    /// `SCENARIO_RING_CAPACITY`
    pub ring_capacity: u32,
    /// `SCENARIO_RING_PRODUCERS`
    pub ring_producers: u32,
    /// `SCENARIO_RING_CONSUMERS`
    pub ring_consumers: u32,
    /// `SCENARIO_RING_ITEMS`: items per producer.
    pub ring_items: u32,
    /// `SCENARIO_OVERFLOW`: run the over-release scenario, which is fatal.
    pub overflow: bool,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            semaphore_permits: 2,
            semaphore_workers: 6,
            hold: Duration::from_millis(20),
            buffer_capacity: 1,
            buffer_items: 5,
            ring_capacity: 4,
            ring_producers: 2,
            ring_consumers: 2,
            ring_items: 50,
            overflow: false,
        }
    }
}

impl ScenarioConfig {
    /// Defaults, with any `SCENARIO_*` variable that parses taking precedence.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            semaphore_permits: env_or("SCENARIO_SEMAPHORE_PERMITS", d.semaphore_permits),
            semaphore_workers: env_or("SCENARIO_SEMAPHORE_WORKERS", d.semaphore_workers),
            hold: Duration::from_millis(env_or("SCENARIO_HOLD_MS", d.hold.as_millis() as u64)),
            buffer_capacity: env_or("SCENARIO_BUFFER_CAPACITY", d.buffer_capacity),
            buffer_items: env_or("SCENARIO_BUFFER_ITEMS", d.buffer_items),
            ring_capacity: env_or("SCENARIO_RING_CAPACITY", d.ring_capacity),
            ring_producers: env_or("SCENARIO_RING_PRODUCERS", d.ring_producers),
            ring_consumers: env_or("SCENARIO_RING_CONSUMERS", d.ring_consumers),
            ring_items: env_or("SCENARIO_RING_ITEMS", d.ring_items),
            overflow: env_or("SCENARIO_OVERFLOW", d.overflow),
        }
    }

    /// Items the ring scenario moves in total, if that fits in a `u32`.
    pub fn ring_total(&self) -> Option<u32> {
        self.ring_producers.checked_mul(self.ring_items)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparseable scenario variable");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_total_rejects_overflow() {
        let mut config = ScenarioConfig::default();
        assert_eq!(config.ring_total(), Some(100));
        config.ring_producers = u32::MAX;
        config.ring_items = 2;
        assert_eq!(config.ring_total(), None);
    }
}
