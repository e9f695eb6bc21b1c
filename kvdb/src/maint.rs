//! The two cooperative background maintenance loops (component G): a
//! throttle-update loop that folds collaborator feedback into the rate
//! limiter every 10ms, and a KVS-maintenance loop that calls each opened
//! KVS's `Tree::maintain` on a ramped 10ms-to-100ms cadence.
//!
//! Grounded on the host project's background-thread-plus-stop-flag idiom
//! (see `storage::engine`'s compaction thread), generalized to two loops
//! sharing one shutdown signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::warn;

use crate::collab::{Staging, Tree};
use crate::kvdb::KvdbInner;
use crate::throttle::Sensors;

const THROTTLE_TICK: Duration = Duration::from_millis(10);
const MAINT_TICK_MIN: Duration = Duration::from_millis(10);
const MAINT_TICK_MAX: Duration = Duration::from_millis(100);
const MAINT_TICK_STEP: Duration = Duration::from_millis(3);
const CURSOR_WARN_INTERVAL: Duration = Duration::from_secs(15);

pub struct MaintLoops {
    stop: Arc<AtomicBool>,
    throttle_thread: Option<JoinHandle<()>>,
    maint_thread: Option<JoinHandle<()>>,
}

impl MaintLoops {
    pub fn start<S: Staging + 'static, T: Tree + 'static>(db: Arc<KvdbInner<S, T>>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));

        let throttle_stop = stop.clone();
        let throttle_db = db.clone();
        let throttle_thread = std::thread::Builder::new()
            .name("kvdb-throttle".to_string())
            .spawn(move || throttle_loop(throttle_db, throttle_stop))
            .expect("failed to spawn throttle-update thread");

        let maint_stop = stop.clone();
        let maint_db = db;
        let maint_thread = std::thread::Builder::new()
            .name("kvdb-maint".to_string())
            .spawn(move || maint_loop(maint_db, maint_stop))
            .expect("failed to spawn kvs-maintenance thread");

        MaintLoops {
            stop,
            throttle_thread: Some(throttle_thread),
            maint_thread: Some(maint_thread),
        }
    }

    /// Signals both loops to exit and blocks until they have. Idempotent.
    pub fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(t) = self.throttle_thread.take() {
            let _ = t.join();
        }
        if let Some(t) = self.maint_thread.take() {
            let _ = t.join();
        }
    }
}

impl Drop for MaintLoops {
    fn drop(&mut self) {
        self.close();
    }
}

fn throttle_loop<S: Staging, T: Tree>(db: Arc<KvdbInner<S, T>>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Acquire) {
        let tick_start = Instant::now();
        let sensors = Sensors {
            staging_pressure: db.staging.pressure(),
            scheduler_pressure: db.tree.scheduler_pressure(),
            c0sk_pressure: db.staging.pressure(),
        };
        db.throttle.update_from_sensors(sensors);
        sleep_compensated(tick_start, THROTTLE_TICK, &stop);
    }
}

fn maint_loop<S: Staging, T: Tree>(db: Arc<KvdbInner<S, T>>, stop: Arc<AtomicBool>) {
    let loop_start = Instant::now();
    let mut interval = MAINT_TICK_MIN;
    let mut last_cursor_warn: Option<Instant> = None;

    while !stop.load(Ordering::Acquire) {
        let tick_start = Instant::now();
        let now_ms = loop_start.elapsed().as_millis() as u64;

        db.directory.maintain_all(now_ms);

        let live_cursors = db.live_cursor_count.load(Ordering::Acquire);
        if live_cursors >= db.rparams.cursor_max {
            let should_warn = last_cursor_warn
                .map(|last| last.elapsed() >= CURSOR_WARN_INTERVAL)
                .unwrap_or(true);
            if should_warn {
                warn!(
                    "live cursor count {live_cursors} has reached the configured maximum {}",
                    db.rparams.cursor_max
                );
                last_cursor_warn = Some(Instant::now());
            }
        }

        sleep_compensated(tick_start, interval, &stop);
        if interval < MAINT_TICK_MAX {
            interval = (interval + MAINT_TICK_STEP).min(MAINT_TICK_MAX);
        }
    }
}

/// Sleeps for `target` minus however long the tick body already took, so a
/// slow tick doesn't compound into ever-increasing drift. Wakes early if
/// `stop` is set mid-sleep by polling in short slices.
fn sleep_compensated(tick_start: Instant, target: Duration, stop: &AtomicBool) {
    let elapsed = tick_start.elapsed();
    let remaining = target.saturating_sub(elapsed);
    let slice = Duration::from_millis(2).min(remaining.max(Duration::from_millis(1)));
    let deadline = Instant::now() + remaining;
    while Instant::now() < deadline {
        if stop.load(Ordering::Acquire) {
            return;
        }
        std::thread::sleep(slice.min(deadline.saturating_duration_since(Instant::now())));
    }
}
