//! Clock and identifier generation (C1).
//!
//! Kept as an injectable trait rather than calling `Utc::now()`/`Uuid::new_v4()`
//! directly everywhere, so workflow/resilience tests can fix time and ids.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub trait IdGenerator: Send + Sync {
    fn new_id(&self) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn new_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Deterministic clock/id pair for tests: time advances only when told to,
/// ids are sequential rather than random.
#[derive(Debug)]
pub struct FixedClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(start),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.now.lock().unwrap();
        *guard = *guard + delta;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    counter: AtomicU64,
    prefix: String,
}

impl SequentialIdGenerator {
    pub fn new<P: Into<String>>(prefix: P) -> Self {
        Self {
            counter: AtomicU64::new(0),
            prefix: prefix.into(),
        }
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn new_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.prefix, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_only_advances_when_told() {
        let start = Utc::now();
        let clock = FixedClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(chrono::Duration::seconds(5));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(5));
    }

    #[test]
    fn sequential_ids_are_unique_and_ordered() {
        let gen = SequentialIdGenerator::new("wf");
        assert_eq!(gen.new_id(), "wf-0");
        assert_eq!(gen.new_id(), "wf-1");
    }
}
