//! Injectable time source and interval jitter.
//!
//! Per §9's design notes, `now()` and the jitter function are both injected
//! so tests can advance time deterministically instead of sleeping in real
//! time (§8 scenarios S1-S6 all hinge on this).

use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A source of the current time.
///
/// `SystemClock` is used in production; tests use `FakeClock` to advance
/// time deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Real wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only advances when told to. Shared via `Arc` so a test can
/// hold one handle while the code under test holds another.
#[derive(Clone)]
pub struct FakeClock(Arc<Mutex<DateTime<Utc>>>);

impl FakeClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self(Arc::new(Mutex::new(start)))
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.0.lock().expect("fake clock lock poisoned");
        *guard += chrono::Duration::from_std(by).expect("duration too large");
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.0.lock().expect("fake clock lock poisoned") = at;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().expect("fake clock lock poisoned")
    }
}

/// Perturbs `interval` by a uniform random factor in `[0.9, 1.1]`, per §5's
/// jitter rule ("all periodic rescheduling multiplies the nominal interval by
/// a uniform random factor in [0.9, 1.1] to avoid thundering herds").
pub fn jitter(interval: Duration) -> Duration {
    jitter_with_rng(interval, &mut rand::thread_rng())
}

fn jitter_with_rng<R: Rng + ?Sized>(interval: Duration, rng: &mut R) -> Duration {
    let factor = rng.gen_range(0.9..=1.1);
    interval.mul_f64(factor)
}

/// `jitter`, converted to a `chrono::TimeDelta` for arithmetic against
/// `DateTime<Utc>` timestamps (`next_scrape_at`, `retry_at`, ...).
/// `chrono::DateTime` only implements `Add<TimeDelta>`, not
/// `Add<std::time::Duration>`, so call sites that reschedule a stored
/// timestamp need this instead of the raw `std::time::Duration` `jitter`
/// returns for `tokio::time::sleep`.
pub fn jitter_delta(interval: Duration) -> chrono::TimeDelta {
    chrono::TimeDelta::from_std(jitter(interval)).unwrap_or_else(|_| chrono::TimeDelta::zero())
}
