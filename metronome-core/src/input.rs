//! Keypad event interpretation: tap tempo, digit entry, presets and step repeat

use embedded_storage::nor_flash::NorFlash;

use crate::engine::TempoEngine;
use crate::hal::{Duration, HapticOutput, Instant, LightOutput, VibrationBypass};
use crate::preset::PresetStore;
use crate::timer::{OneShot, Periodic};
use crate::types::{
    Color, KeyEvent, KeyId, KeyKind, KeyRole, MetronomeConfig, Step, MAX_TEMPO, MICROS_PER_MINUTE,
    MIN_TEMPO,
};

/// Largest value the digit accumulator holds
pub const MAX_TYPED_VALUE: u16 = 999;

/// Outcome of handling one key event
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Dispatch {
    /// Event fully handled
    Done,
    /// A preset was written; hold beats and key handling until `until`
    Hold { until: Instant },
}

/// Keypad state machine.
///
/// Owns the tap and digit-entry sessions, the step repeat timer and the
/// long-press release lock. The engine and the preset store are borrowed per
/// event.
pub struct InputController {
    config: MetronomeConfig,

    tap_count: u32,
    last_tap: Option<Instant>,
    tap_average_us: u64,
    tap_timeout: OneShot,

    typed: u16,
    typed_timeout: OneShot,

    release_lock: Option<KeyId>,
    repeat: Periodic,
    repeat_step: Step,
}

impl InputController {
    pub fn new(config: MetronomeConfig) -> Self {
        Self {
            config,
            tap_count: 0,
            last_tap: None,
            tap_average_us: 0,
            tap_timeout: OneShot::new(),
            typed: 0,
            typed_timeout: OneShot::new(),
            release_lock: None,
            repeat: Periodic::new(),
            repeat_step: Step::Increase,
        }
    }

    /// Route one key event to its handler
    pub fn handle<L, H, V, F>(
        &mut self,
        event: KeyEvent,
        engine: &mut TempoEngine<L, H, V>,
        store: &mut PresetStore<F>,
        now: Instant,
    ) -> Dispatch
    where
        L: LightOutput,
        H: HapticOutput,
        V: VibrationBypass,
        F: NorFlash,
    {
        let Some(role) = KeyRole::for_key(event.key) else {
            warn!("⌨️ Unknown key {}", event.key);
            return Dispatch::Done;
        };

        match event.kind {
            KeyKind::Press => {
                self.on_press(role, engine);
                Dispatch::Done
            }
            KeyKind::Release => {
                self.on_release(event.key, role, engine, store, now);
                Dispatch::Done
            }
            KeyKind::LongPress => self.on_long_press(event.key, role, engine, store, now),
        }
    }

    fn on_press<L, H, V>(&mut self, role: KeyRole, engine: &mut TempoEngine<L, H, V>)
    where
        L: LightOutput,
        H: HapticOutput,
        V: VibrationBypass,
    {
        if let KeyRole::Step(step) = role {
            engine.step(step);
        }
    }

    fn on_release<L, H, V, F>(
        &mut self,
        key: KeyId,
        role: KeyRole,
        engine: &mut TempoEngine<L, H, V>,
        store: &mut PresetStore<F>,
        now: Instant,
    ) where
        L: LightOutput,
        H: HapticOutput,
        V: VibrationBypass,
        F: NorFlash,
    {
        if self.release_lock == Some(key) {
            self.release_lock = None;
            trace!("⌨️ Release of key {} suppressed", key);
            return;
        }

        match role {
            KeyRole::Digit(digit) => self.type_tempo(digit, engine, now),
            KeyRole::TapOrZero => {
                if self.typed > 0 {
                    self.type_tempo(0, engine, now);
                } else {
                    self.tap(engine, now);
                }
            }
            KeyRole::Preset(slot) => {
                self.reset_tap();
                store.apply(slot as usize, engine, now);
                info!("📋 Preset {} recalled", slot);
            }
            KeyRole::Step(_) => self.repeat.stop(),
        }

        let blink = self.config.blink;
        engine.notifier_mut().pulse_light(now, blink, Color::Feedback);
    }

    fn on_long_press<L, H, V, F>(
        &mut self,
        key: KeyId,
        role: KeyRole,
        engine: &mut TempoEngine<L, H, V>,
        store: &mut PresetStore<F>,
        now: Instant,
    ) -> Dispatch
    where
        L: LightOutput,
        H: HapticOutput,
        V: VibrationBypass,
        F: NorFlash,
    {
        self.release_lock = Some(key);

        match role {
            KeyRole::Digit(digit) => {
                engine.set_measure(digit, now);
                debug!("📏 Subdivision {}", digit);
            }
            KeyRole::TapOrZero => engine.toggle_accent(),
            KeyRole::Preset(slot) => return self.save_preset(slot as usize, engine, store, now),
            KeyRole::Step(step) => {
                self.repeat_step = step;
                self.repeat.start(now, self.config.repeat);
                self.release_lock = None;
            }
        }
        Dispatch::Done
    }

    /// Register a tap. From the second tap on, the tempo follows the smoothed
    /// interval between taps.
    pub fn tap<L, H, V>(&mut self, engine: &mut TempoEngine<L, H, V>, now: Instant)
    where
        L: LightOutput,
        H: HapticOutput,
        V: VibrationBypass,
    {
        engine.stop();
        self.tap_timeout.schedule(now, self.config.input_timeout);
        self.tap_count = self.tap_count.saturating_add(1);

        if let Some(last) = self.last_tap {
            let elapsed = now.saturating_duration_since(last).as_micros();
            self.tap_average_us = (self.tap_average_us + elapsed) / 2;
            if self.tap_average_us > 0 {
                let bpm = (MICROS_PER_MINUTE / self.tap_average_us).min(MAX_TEMPO as u64) as u8;
                debug!("👆 Tap {} -> {} BPM", self.tap_count, bpm);
                engine.set_tempo(bpm, now);
            }
        }
        self.last_tap = Some(now);
    }

    /// Append `digit` to the typed value and apply it when it is a valid tempo
    pub fn type_tempo<L, H, V>(&mut self, digit: u8, engine: &mut TempoEngine<L, H, V>, now: Instant)
    where
        L: LightOutput,
        H: HapticOutput,
        V: VibrationBypass,
    {
        engine.stop();
        self.typed_timeout.schedule(now, self.config.input_timeout);
        self.reset_tap();

        self.typed = (self.typed * 10 + digit as u16).min(MAX_TYPED_VALUE);
        if (MIN_TEMPO as u16..=MAX_TEMPO as u16).contains(&self.typed) {
            engine.set_tempo(self.typed as u8, now);
        }
        debug!("🔢 Typed {}", self.typed);
    }

    /// Store the running settings in `slot`, confirm with the save color and
    /// ask the caller to hold for the confirmation pulse
    pub fn save_preset<L, H, V, F>(
        &mut self,
        slot: usize,
        engine: &mut TempoEngine<L, H, V>,
        store: &mut PresetStore<F>,
        now: Instant,
    ) -> Dispatch
    where
        L: LightOutput,
        H: HapticOutput,
        V: VibrationBypass,
        F: NorFlash,
    {
        let state = engine.state();
        if state.tempo == 0 {
            return Dispatch::Done;
        }

        engine.stop();
        let notification = self.config.notification;
        engine
            .notifier_mut()
            .pulse_light(now, notification, Color::Saved);

        match store.save(slot, state.tempo, state.subdivision, state.accent) {
            Ok(()) => {
                info!("💾 Preset {} saved: {} BPM / {}", slot, state.tempo, state.subdivision);
            }
            Err(e) => {
                warn!("💾 Preset {} not saved: {}", slot, e.as_str());
            }
        }

        Dispatch::Hold {
            until: now + notification,
        }
    }

    /// Earliest pending session timeout or repeat step
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.tap_timeout.deadline(),
            self.typed_timeout.deadline(),
            self.repeat.deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Run session timeouts and repeat steps due at `now`
    pub fn poll<L, H, V>(&mut self, now: Instant, engine: &mut TempoEngine<L, H, V>)
    where
        L: LightOutput,
        H: HapticOutput,
        V: VibrationBypass,
    {
        if self.tap_timeout.expire(now).is_some() {
            self.reset_tap();
        }
        if self.typed_timeout.expire(now).is_some() {
            self.typed = 0;
        }
        while self.repeat.expire(now).is_some() {
            engine.step(self.repeat_step);
        }
    }

    fn reset_tap(&mut self) {
        self.tap_count = 0;
        self.last_tap = None;
        self.tap_average_us = 0;
        self.tap_timeout.cancel();
    }

    pub fn tap_count(&self) -> u32 {
        self.tap_count
    }

    /// Smoothed tap interval
    pub fn tap_average(&self) -> Duration {
        Duration::from_micros(self.tap_average_us)
    }

    pub fn typed(&self) -> u16 {
        self.typed
    }

    pub fn release_lock(&self) -> Option<KeyId> {
        self.release_lock
    }

    pub fn is_repeating(&self) -> bool {
        self.repeat.is_running()
    }
}
