//! Light and haptic pulse outputs

use crate::hal::{Duration, HapticOutput, Instant, LightOutput};
use crate::timer::OneShot;
use crate::types::{Color, HapticPattern};

/// Drives one-shot pulses on the light and the motor.
///
/// Each channel has a single "turn off" alarm; a new pulse replaces the
/// pending one instead of queueing behind it.
pub struct NotificationController<L, H> {
    light: L,
    haptic: H,
    light_off: OneShot,
    haptic_off: OneShot,
}

impl<L, H> NotificationController<L, H>
where
    L: LightOutput,
    H: HapticOutput,
{
    pub fn new(light: L, haptic: H) -> Self {
        Self {
            light,
            haptic,
            light_off: OneShot::new(),
            haptic_off: OneShot::new(),
        }
    }

    /// Light `color` for `duration`
    pub fn pulse_light(&mut self, now: Instant, duration: Duration, color: Color) {
        if self.light.show(color).is_err() {
            warn!("💡 Light output failed");
        }
        self.light_off.schedule(now, duration);
    }

    /// Run the motor with `pattern` for `duration`
    pub fn pulse_haptic(&mut self, now: Instant, duration: Duration, pattern: HapticPattern) {
        if self.haptic.drive(pattern).is_err() {
            warn!("📳 Haptic output failed");
        }
        self.haptic_off.schedule(now, duration);
    }

    /// Earliest pending "turn off" deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.light_off.deadline(), self.haptic_off.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Turn off every channel whose pulse has ended
    pub fn poll(&mut self, now: Instant) {
        if self.light_off.expire(now).is_some() && self.light.show(Color::Off).is_err() {
            warn!("💡 Light output failed");
        }
        if self.haptic_off.expire(now).is_some() && self.haptic.release().is_err() {
            warn!("📳 Haptic output failed");
        }
    }

    pub fn light(&self) -> &L {
        &self.light
    }

    pub fn haptic(&self) -> &H {
        &self.haptic
    }

    pub fn light_pending(&self) -> bool {
        self.light_off.is_pending()
    }

    pub fn haptic_pending(&self) -> bool {
        self.haptic_off.is_pending()
    }
}
