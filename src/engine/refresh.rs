// src/engine/refresh.rs

//! Refresh scheduling.
//!
//! Two states: `Idle` (no timer outstanding) and `Armed` (exactly one
//! `RefreshTick` outstanding). The scheduler never arms while nothing is
//! registered, so an idle coordinator causes no wakeups.

use std::time::Duration;

use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Armed,
}

#[derive(Debug)]
pub struct RefreshScheduler {
    state: RefreshState,
    interval: Duration,
}

impl RefreshScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            state: RefreshState::Idle,
            interval,
        }
    }

    pub fn state(&self) -> RefreshState {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        self.state == RefreshState::Armed
    }

    /// Arm a refresh if none is outstanding and `active > 0`.
    ///
    /// Returns the delay after which a `RefreshTick` must be delivered, or
    /// `None` if no new timer is needed.
    pub fn arm(&mut self, active: usize) -> Option<Duration> {
        if self.state == RefreshState::Armed || active == 0 {
            return None;
        }
        self.state = RefreshState::Armed;
        trace!(interval = ?self.interval, active, "refresh armed");
        Some(self.interval)
    }

    /// The outstanding timer fired.
    pub fn on_tick(&mut self) {
        self.state = RefreshState::Idle;
    }
}
