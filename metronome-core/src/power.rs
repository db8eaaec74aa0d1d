//! Idle power management and the low-battery latch

use embedded_hal::digital::OutputPin;
use portable_atomic::{AtomicU64, Ordering};

use crate::hal::{Duration, Instant};
use crate::timer::Periodic;

/// Timestamp of the most recent key event.
///
/// Written from key handling and read by the idle check, possibly from
/// different contexts.
pub struct ActivityMonitor {
    last_us: AtomicU64,
}

impl ActivityMonitor {
    pub const fn new() -> Self {
        Self {
            last_us: AtomicU64::new(0),
        }
    }

    /// Record activity at `now`
    pub fn touch(&self, now: Instant) {
        self.last_us.store(now.as_micros(), Ordering::Relaxed);
    }

    pub fn last(&self) -> Instant {
        Instant::from_micros(self.last_us.load(Ordering::Relaxed))
    }

    /// Time since the last recorded activity
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last())
    }
}

impl Default for ActivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of an idle check
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerState {
    Awake,
    /// Stop the clocks until the next key event
    Dormant,
}

/// Periodic idle check.
///
/// Reports `Dormant` once when the engine is paused and no key event has been
/// seen for longer than the inactivity timeout. The report is not repeated
/// until new activity is recorded.
pub struct PowerManager {
    check: Periodic,
    inactive_timeout: Duration,
    reported_for: Option<Instant>,
}

impl PowerManager {
    pub fn new(inactive_timeout: Duration) -> Self {
        Self {
            check: Periodic::new(),
            inactive_timeout,
            reported_for: None,
        }
    }

    /// Begin checking every `period`
    pub fn start(&mut self, now: Instant, period: Duration) {
        self.check.start(now, period);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.check.deadline()
    }

    /// Run the checks due at `now`
    pub fn poll(&mut self, now: Instant, paused: bool, activity: &ActivityMonitor) -> PowerState {
        let mut state = PowerState::Awake;
        while let Some(at) = self.check.expire(now) {
            if self.evaluate(at, paused, activity) == PowerState::Dormant {
                state = PowerState::Dormant;
            }
        }
        state
    }

    /// One idle check at `at`
    pub fn evaluate(&mut self, at: Instant, paused: bool, activity: &ActivityMonitor) -> PowerState {
        let last = activity.last();
        if !paused || self.reported_for == Some(last) {
            return PowerState::Awake;
        }
        if activity.idle_for(at) > self.inactive_timeout {
            info!("😴 Idle for {} s, going dormant", activity.idle_for(at).as_secs());
            self.reported_for = Some(last);
            return PowerState::Dormant;
        }
        PowerState::Awake
    }
}

/// Lights the low-battery indicator once and stays latched
pub struct BatteryMonitor<P> {
    indicator: P,
    low: bool,
}

impl<P> BatteryMonitor<P>
where
    P: OutputPin,
{
    pub fn new(indicator: P) -> Self {
        Self {
            indicator,
            low: false,
        }
    }

    /// Handle a low-battery report from the sampler.
    ///
    /// Returns true only for the first report; the sampler should stop then.
    pub fn report_low(&mut self, millivolts: u16) -> bool {
        if self.low {
            return false;
        }
        self.low = true;
        if self.indicator.set_high().is_err() {
            warn!("🔋 Low battery indicator failed");
        }
        warn!("🔋 Battery low: {} mV", millivolts);
        true
    }

    pub fn is_low(&self) -> bool {
        self.low
    }

    /// Keep sampling until the first low report
    pub fn should_sample(&self) -> bool {
        !self.low
    }

    pub fn indicator(&self) -> &P {
        &self.indicator
    }
}
