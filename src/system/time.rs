//! Clock access, factored out so the Policy Engine and Credential
//! Cache take a clock value rather than reading the wall clock
//! directly — keeps "decision is a pure function of its inputs"
//! (including the current clock) testable with fixed timestamps.

use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Injectable clock so tests can pin "now" without sleeping or racing
/// the real clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        now_unix()
    }
}

#[cfg(test)]
pub struct FixedClock(pub i64);

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> i64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_is_stable() {
        let c = FixedClock(1_000);
        assert_eq!(c.now(), 1_000);
        assert_eq!(c.now(), 1_000);
    }
}
