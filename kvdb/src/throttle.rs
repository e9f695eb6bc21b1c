//! Throttle (component F): a token-bucket rate limiter whose rate is
//! steered by feedback sensors from the staging layer and compaction
//! scheduler, consulted on the put path (component H).

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// `(burst_bytes, rate_bytes_per_sec)`.
#[derive(Debug, Clone, Copy)]
pub struct ThrottleParams {
    pub burst_bytes: u64,
    pub rate_bytes_per_sec: u64,
    /// Manual debug mode: burst/rate are taken verbatim from configuration
    /// and the feedback loop never overwrites them.
    pub manual: bool,
    pub update_interval: Duration,
}

impl Default for ThrottleParams {
    fn default() -> Self {
        ThrottleParams {
            burst_bytes: 32 * 1024 * 1024,
            rate_bytes_per_sec: 64 * 1024 * 1024,
            manual: false,
            update_interval: Duration::from_millis(10),
        }
    }
}

/// The three labelled feedback inputs folded into a rate decision each
/// tick: staging-layer ingest pressure, compaction-scheduler backlog, and
/// an explicit c0sk sensor. Each is `0..=100`; the worst (highest) of the
/// three drives the rate curve.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sensors {
    pub staging_pressure: u8,
    pub scheduler_pressure: u8,
    pub c0sk_pressure: u8,
}

impl Sensors {
    fn worst(&self) -> u8 {
        self.staging_pressure.max(self.scheduler_pressure).max(self.c0sk_pressure)
    }
}

/// Maps the worst sensor reading to a target rate, scaled down from the
/// configured maximum as pressure rises. Monotone: higher pressure never
/// yields a higher rate.
fn rate_curve(max_rate: u64, sensors: Sensors) -> u64 {
    let worst = sensors.worst().min(100) as u64;
    // At 0 pressure: full rate. At 100: 5% of max rate (never fully
    // stalls ingest, since a full stop would starve commits waiting on
    // room in the staging layer indefinitely).
    let floor_pct = 5u64;
    let scale = 100 - worst + (worst * floor_pct) / 100;
    (max_rate * scale) / 100
}

/// A token bucket with atomic debit, plus the sensor inputs the throttle
/// loop folds into its periodic rate updates.
pub struct Throttle {
    burst_bytes: AtomicU64,
    rate_bytes_per_sec: AtomicU64,
    /// Tokens available, in bytes. Signed so an over-budget request can be
    /// observed (and its sleep duration computed) without clamping away
    /// the overdraft.
    tokens: AtomicI64,
    manual: AtomicBool,
    configured_max_rate: u64,
    last_refill: std::sync::Mutex<Instant>,
}

impl Throttle {
    pub fn new(params: ThrottleParams) -> Self {
        Throttle {
            burst_bytes: AtomicU64::new(params.burst_bytes),
            rate_bytes_per_sec: AtomicU64::new(params.rate_bytes_per_sec),
            tokens: AtomicI64::new(params.burst_bytes as i64),
            manual: AtomicBool::new(params.manual),
            configured_max_rate: params.rate_bytes_per_sec,
            last_refill: std::sync::Mutex::new(Instant::now()),
        }
    }

    /// Requests `n` bytes of budget. Returns the nanoseconds the caller
    /// should sleep before proceeding; never negative. Debits the bucket
    /// immediately regardless of whether tokens were available, so the
    /// overdraft is carried forward and reflected in the next call's sleep
    /// duration.
    pub fn request(&self, n: u64) -> u64 {
        self.refill();
        let remaining = self.tokens.fetch_sub(n as i64, Ordering::AcqRel) - n as i64;
        if remaining >= 0 {
            return 0;
        }
        let rate = self.rate_bytes_per_sec.load(Ordering::Acquire).max(1);
        let deficit = (-remaining) as u64;
        deficit.saturating_mul(1_000_000_000) / rate
    }

    fn refill(&self) {
        let mut last = match self.last_refill.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(*last);
        if elapsed.is_zero() {
            return;
        }
        *last = now;
        let rate = self.rate_bytes_per_sec.load(Ordering::Acquire);
        let burst = self.burst_bytes.load(Ordering::Acquire) as i64;
        let added = (rate as u128 * elapsed.as_nanos() / 1_000_000_000) as i64;
        if added == 0 {
            return;
        }
        let mut cur = self.tokens.load(Ordering::Acquire);
        loop {
            let next = (cur + added).min(burst);
            match self.tokens.compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(observed) => cur = observed,
            }
        }
    }

    /// Called by the throttle loop each tick: folds the sensors into a new
    /// rate, unless manual mode pins the configured rate.
    pub fn update_from_sensors(&self, sensors: Sensors) {
        if self.manual.load(Ordering::Acquire) {
            return;
        }
        let new_rate = rate_curve(self.configured_max_rate, sensors).max(1);
        self.rate_bytes_per_sec.store(new_rate, Ordering::Release);
    }

    pub fn set_manual(&self, burst_bytes: u64, rate_bytes_per_sec: u64) {
        self.manual.store(true, Ordering::Release);
        self.burst_bytes.store(burst_bytes, Ordering::Release);
        self.rate_bytes_per_sec.store(rate_bytes_per_sec, Ordering::Release);
    }

    pub fn rate(&self) -> u64 {
        self.rate_bytes_per_sec.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_never_returns_negative_and_charges_bytes() {
        let t = Throttle::new(ThrottleParams {
            burst_bytes: 1024,
            rate_bytes_per_sec: 1024,
            manual: true,
            update_interval: Duration::from_millis(10),
        });
        assert_eq!(t.request(512), 0);
        let sleep_ns = t.request(1024);
        assert!(sleep_ns > 0);
    }

    #[test]
    fn worse_sensors_never_increase_rate() {
        let low = rate_curve(1000, Sensors { staging_pressure: 0, scheduler_pressure: 0, c0sk_pressure: 0 });
        let mid = rate_curve(1000, Sensors { staging_pressure: 50, scheduler_pressure: 0, c0sk_pressure: 0 });
        let high = rate_curve(1000, Sensors { staging_pressure: 100, scheduler_pressure: 0, c0sk_pressure: 0 });
        assert!(low >= mid);
        assert!(mid >= high);
        assert!(high > 0, "must never fully stall ingest");
    }

    #[test]
    fn manual_mode_ignores_sensors() {
        let t = Throttle::new(ThrottleParams {
            burst_bytes: 100,
            rate_bytes_per_sec: 100,
            manual: true,
            update_interval: Duration::from_millis(10),
        });
        t.update_from_sensors(Sensors { staging_pressure: 100, scheduler_pressure: 100, c0sk_pressure: 100 });
        assert_eq!(t.rate(), 100);
    }

    #[test]
    fn bucket_never_exceeds_burst_over_a_window() {
        let t = Throttle::new(ThrottleParams {
            burst_bytes: 1000,
            rate_bytes_per_sec: 1000,
            manual: true,
            update_interval: Duration::from_millis(10),
        });
        // Drain the bucket.
        t.request(1000);
        std::thread::sleep(Duration::from_millis(50));
        // At most burst + rate*elapsed should have refilled; request a
        // huge amount and confirm the returned sleep implies we did not
        // hand out more than that.
        let sleep_ns = t.request(10_000);
        assert!(sleep_ns > 0);
    }
}
