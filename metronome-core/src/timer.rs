//! Deadline slots standing in for hardware alarms.
//!
//! Each slot holds at most one pending firing. Scheduling a slot always
//! replaces whatever was pending, so callbacks never queue up.

use crate::hal::{Duration, Instant};

/// Cancel-and-replace one-shot alarm
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct OneShot {
    deadline: Option<Instant>,
}

impl OneShot {
    pub const fn new() -> Self {
        Self { deadline: None }
    }

    /// Arm the alarm `after` from `now`, dropping any pending firing
    pub fn schedule(&mut self, now: Instant, after: Duration) {
        self.deadline = Some(now + after);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Consume the alarm if it is due at `now`, returning its deadline
    pub fn expire(&mut self, now: Instant) -> Option<Instant> {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                Some(deadline)
            }
            _ => None,
        }
    }
}

/// Repeating alarm referenced to its own start time.
///
/// The n-th firing is due at `anchor + n * period`, so late handling of one
/// firing never shifts the following ones.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Periodic {
    anchor: Option<Instant>,
    period_us: u64,
    fired: u64,
}

impl Periodic {
    pub const fn new() -> Self {
        Self {
            anchor: None,
            period_us: 0,
            fired: 0,
        }
    }

    /// (Re)start with the first firing one `period` after `now`
    pub fn start(&mut self, now: Instant, period: Duration) {
        self.anchor = Some(now);
        self.period_us = period.as_micros().max(1);
        self.fired = 0;
    }

    pub fn stop(&mut self) {
        self.anchor = None;
        self.fired = 0;
    }

    pub fn is_running(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn period(&self) -> Duration {
        Duration::from_micros(self.period_us)
    }

    /// Firings handled since the last start
    pub fn fired(&self) -> u64 {
        self.fired
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.anchor
            .map(|anchor| anchor + Duration::from_micros(self.period_us * (self.fired + 1)))
    }

    /// Consume one due firing, returning its scheduled instant
    pub fn expire(&mut self, now: Instant) -> Option<Instant> {
        let deadline = self.deadline()?;
        if deadline <= now {
            self.fired += 1;
            Some(deadline)
        } else {
            None
        }
    }
}
