//! Tempo engine: beat interval computation and the periodic beat schedule

use core::sync::atomic::{AtomicBool, Ordering};

use crate::hal::{Duration, HapticOutput, Instant, LightOutput, VibrationBypass};
use crate::notify::NotificationController;
use crate::timer::Periodic;
use crate::types::{
    Color, HapticPattern, MetronomeConfig, Step, MAX_SUBDIVISION, MAX_TEMPO, MICROS_PER_MINUTE,
    MIN_TEMPO,
};

/// Time between two ticks for `tempo` BPM split into `subdivision` parts.
///
/// Integer microseconds, truncated at each division. `None` for a zero tempo
/// or subdivision.
pub fn interval(tempo: u8, subdivision: u8) -> Option<Duration> {
    if tempo == 0 || subdivision == 0 {
        return None;
    }
    let beat_us = MICROS_PER_MINUTE / tempo as u64;
    Some(Duration::from_micros(beat_us / subdivision as u64))
}

/// Snapshot of the engine state
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TempoState {
    /// Beats per minute; 0 means no tempo has been set
    pub tempo: u8,
    /// Ticks per beat, 1..=9
    pub subdivision: u8,
    /// Mark the first tick of each beat
    pub accent: bool,
    /// Position within the beat, always below `subdivision`
    pub tick: u8,
    /// No schedule is running
    pub paused: bool,
}

impl Default for TempoState {
    fn default() -> Self {
        Self {
            tempo: 0,
            subdivision: 1,
            accent: true,
            tick: 0,
            paused: true,
        }
    }
}

/// Owns the tempo state and the beat schedule.
///
/// Whenever the engine is not paused, the schedule runs with period
/// `interval(tempo, subdivision)`. The only field meant to be touched through
/// a shared reference is the deferred recalculation flag; everything else is
/// changed by the owner, and multi-field changes requested mid-beat are
/// applied at the next tick boundary.
pub struct TempoEngine<L, H, V> {
    state: TempoState,
    schedule: Periodic,
    recalc: AtomicBool,
    notifier: NotificationController<L, H>,
    bypass: V,
    config: MetronomeConfig,
    generation: u32,
}

impl<L, H, V> TempoEngine<L, H, V>
where
    L: LightOutput,
    H: HapticOutput,
    V: VibrationBypass,
{
    /// Create a paused engine with no tempo
    pub fn new(notifier: NotificationController<L, H>, bypass: V, config: MetronomeConfig) -> Self {
        Self {
            state: TempoState::default(),
            schedule: Periodic::new(),
            recalc: AtomicBool::new(false),
            notifier,
            bypass,
            config,
            generation: 0,
        }
    }

    pub fn state(&self) -> TempoState {
        self.state
    }

    pub fn tempo(&self) -> u8 {
        self.state.tempo
    }

    pub fn subdivision(&self) -> u8 {
        self.state.subdivision
    }

    pub fn accent(&self) -> bool {
        self.state.accent
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused
    }

    /// Current tick period, if running
    pub fn interval(&self) -> Option<Duration> {
        if self.schedule.is_running() {
            Some(self.schedule.period())
        } else {
            None
        }
    }

    /// Number of times the beat schedule has been (re)programmed
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Set the tempo and restart the schedule from `now`. Zero is ignored.
    pub fn set_tempo(&mut self, tempo: u8, now: Instant) {
        if tempo < MIN_TEMPO {
            return;
        }
        self.state.tempo = tempo;
        self.state.tick = 0;
        self.stop();

        let Some(period) = interval(tempo, self.state.subdivision) else {
            return;
        };
        self.schedule.start(now, period);
        self.state.paused = false;
        self.recalc.store(false, Ordering::Relaxed);
        self.generation = self.generation.wrapping_add(1);
        debug!(
            "🎵 {} BPM / {} -> {} us",
            tempo,
            self.state.subdivision,
            period.as_micros()
        );
    }

    /// Cancel the schedule. Idempotent.
    pub fn stop(&mut self) {
        self.schedule.stop();
        self.state.paused = true;
    }

    /// Change the subdivision and restart at the current tempo.
    /// Values outside 1..=9 are ignored.
    pub fn set_measure(&mut self, subdivision: u8, now: Instant) {
        if subdivision < 1 || subdivision > MAX_SUBDIVISION {
            return;
        }
        self.state.subdivision = subdivision;
        self.state.tick = 0;
        self.stop();
        if self.state.tempo > 0 {
            self.set_tempo(self.state.tempo, now);
        }
    }

    pub fn toggle_accent(&mut self) {
        self.state.accent = !self.state.accent;
        debug!("🎯 Accent {}", self.state.accent);
    }

    /// Pause a running engine, or resume a paused one at the current tempo
    pub fn toggle_pause(&mut self, now: Instant) {
        if self.state.paused {
            if self.state.tempo > 0 {
                self.set_tempo(self.state.tempo, now);
            }
        } else {
            self.stop();
        }
    }

    /// Ask for a restart at the next tick boundary
    pub fn request_recalc(&self) {
        self.recalc.store(true, Ordering::Relaxed);
    }

    pub fn recalc_pending(&self) -> bool {
        self.recalc.load(Ordering::Relaxed)
    }

    /// Move the tempo one BPM in the direction of `step`, deferred to the next tick
    pub fn step(&mut self, step: Step) {
        let next = self.state.tempo as i16 + self.config.step_delta(step);
        self.state.tempo = next.clamp(0, MAX_TEMPO as i16) as u8;
        self.request_recalc();
    }

    /// Load a stored tempo/accent and apply `subdivision` through `set_measure`
    pub fn recall(&mut self, tempo: u8, subdivision: u8, accent: bool, now: Instant) {
        self.state.tempo = tempo;
        self.state.accent = accent;
        self.set_measure(subdivision, now);
    }

    /// Beat callback, run at each scheduled tick instant `at`
    pub fn on_tick(&mut self, at: Instant) {
        let downbeat = self.state.accent && self.state.tick == 0;
        let (color, pattern) = if downbeat {
            (Color::Accent, HapticPattern::Accent)
        } else {
            (Color::Beat, HapticPattern::Normal)
        };
        self.notifier.pulse_light(at, self.config.blink, color);

        if !self.bypass.is_bypassed() {
            self.notifier.pulse_haptic(at, self.config.vibration, pattern);
        }

        self.state.tick += 1;
        if self.state.tick >= self.state.subdivision {
            self.state.tick = 0;
        }

        if self.recalc.swap(false, Ordering::Relaxed) {
            self.stop();
            if self.state.tempo > 0 {
                self.set_tempo(self.state.tempo, at);
            }
        }
        trace!("🥁 tick {} downbeat={}", self.state.tick, downbeat);
    }

    /// Earliest pending tick or pulse end
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.schedule.deadline(), self.notifier.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Run everything due at `now`: pulse ends first, then ticks
    pub fn poll(&mut self, now: Instant) {
        self.notifier.poll(now);
        while let Some(at) = self.schedule.expire(now) {
            self.on_tick(at);
        }
    }

    pub fn notifier(&self) -> &NotificationController<L, H> {
        &self.notifier
    }

    pub fn notifier_mut(&mut self) -> &mut NotificationController<L, H> {
        &mut self.notifier
    }

    pub fn bypass_mut(&mut self) -> &mut V {
        &mut self.bypass
    }

    pub fn config(&self) -> &MetronomeConfig {
        &self.config
    }
}
