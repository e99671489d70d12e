use std::hint;
use std::thread;

/// Spin-wait used by the barriers and wait loops.
///
/// Spins for exponentially growing bursts and moves to `yield_now` after a small number of rounds.
/// The yield keeps oversubscribed runs (more participants than cores, including single core
/// test machines) making progress instead of burning a timeslice the waited-on thread needs.
/// It never sleeps, so a woken participant is rescheduled quickly.
pub(crate) struct LocalSpinWait {
    pub wait_count: i32,
}

impl LocalSpinWait {
    pub const YIELD_THRESHOLD: i32 = 3;

    #[inline(always)]
    pub fn new() -> Self {
        Self { wait_count: 0 }
    }

    #[inline(always)]
    pub fn spin_once(&mut self) {
        if self.wait_count >= Self::YIELD_THRESHOLD {
            thread::yield_now();
        } else {
            let spin_count = 1 << self.wait_count;
            for _ in 0..spin_count {
                hint::spin_loop();
            }
            self.wait_count += 1;
        }
    }

    /// Starts over with short spins, used after a waiter found useful work.
    #[inline(always)]
    pub fn reset(&mut self) {
        self.wait_count = 0;
    }

    /// Spins until `condition` holds.
    #[inline]
    pub fn spin_until(condition: impl Fn() -> bool) {
        let mut wait = Self::new();
        while !condition() {
            wait.spin_once();
        }
    }
}
