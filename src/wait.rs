//! Bounded, cancellable wait for blocking moves.
//!
//! The V8849 board cannot be asked whether a move has finished, so a rotary move
//! holds the calling thread for the expected travel time before switching the
//! motor off. The wait sleeps on a condition variable: `halt` from another host
//! thread ends it early, and nothing spins.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The full duration passed.
    Elapsed,
    /// [`MoveWait::cancel`] was called while waiting.
    Cancelled,
}

/// Wait primitive shared between the moving thread and `halt`.
#[derive(Debug, Default)]
pub struct MoveWait {
    epoch: Mutex<u64>,
    wake: Condvar,
}

impl MoveWait {
    /// New, idle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block for `duration` unless cancelled first.
    ///
    /// Only cancellations issued after the wait began count.
    pub fn wait(&self, duration: Duration) -> WaitOutcome {
        let deadline = Instant::now() + duration;
        let mut epoch = self.epoch.lock();
        let started = *epoch;
        while *epoch == started {
            if self.wake.wait_until(&mut epoch, deadline).timed_out() {
                return if *epoch == started {
                    WaitOutcome::Elapsed
                } else {
                    WaitOutcome::Cancelled
                };
            }
        }
        WaitOutcome::Cancelled
    }

    /// End every wait in progress.
    pub fn cancel(&self) {
        let mut epoch = self.epoch.lock();
        *epoch = epoch.wrapping_add(1);
        self.wake.notify_all();
    }
}
