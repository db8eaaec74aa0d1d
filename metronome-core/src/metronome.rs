//! The assembled metronome: every state machine behind one event/poll interface

use embedded_storage::nor_flash::NorFlash;
use heapless::Deque;

use crate::engine::TempoEngine;
use crate::hal::{HapticOutput, Instant, LightOutput, VibrationBypass};
use crate::input::{Dispatch, InputController};
use crate::notify::NotificationController;
use crate::power::{ActivityMonitor, PowerManager, PowerState};
use crate::preset::PresetStore;
use crate::timer::OneShot;
use crate::types::{Color, KeyEvent, MetronomeConfig};

/// Key events kept while a preset write holds the metronome
pub const HELD_EVENTS: usize = 8;

/// Owns the engine, input handling, presets and the idle check.
///
/// The runtime feeds key events to [`Metronome::handle_key`] and calls
/// [`Metronome::poll`] whenever [`Metronome::next_deadline`] passes. Nothing
/// here reads a clock; every call carries its own `now`.
pub struct Metronome<L, H, V, F> {
    engine: TempoEngine<L, H, V>,
    input: InputController,
    store: PresetStore<F>,
    power: PowerManager,
    activity: ActivityMonitor,
    hold: OneShot,
    held: Deque<KeyEvent, HELD_EVENTS>,
}

impl<L, H, V, F> Metronome<L, H, V, F>
where
    L: LightOutput,
    H: HapticOutput,
    V: VibrationBypass,
    F: NorFlash,
{
    /// Assemble a metronome, load stored presets and start the idle check.
    /// The engine starts paused with no tempo; the light shows the power-on
    /// color for the notification time.
    pub fn new(
        light: L,
        haptic: H,
        bypass: V,
        flash: F,
        preset_offset: u32,
        config: MetronomeConfig,
        now: Instant,
    ) -> Self {
        let mut notifier = NotificationController::new(light, haptic);
        notifier.pulse_light(now, config.notification, Color::PowerOn);
        let mut store = PresetStore::new(flash, preset_offset);
        store.load();

        let mut power = PowerManager::new(config.inactive_timeout);
        power.start(now, config.idle_check);

        let activity = ActivityMonitor::new();
        activity.touch(now);

        info!("🎼 Metronome ready");

        Self {
            engine: TempoEngine::new(notifier, bypass, config),
            input: InputController::new(config),
            store,
            power,
            activity,
            hold: OneShot::new(),
            held: Deque::new(),
        }
    }

    /// Handle one key event.
    ///
    /// While a preset write holds the metronome the event is queued and
    /// replayed when the hold ends.
    pub fn handle_key(&mut self, event: KeyEvent, now: Instant) {
        self.activity.touch(now);

        if self.hold.is_pending() {
            if self.held.push_back(event).is_err() {
                warn!("⌨️ Key queue full, event dropped");
            }
            return;
        }
        self.dispatch(event, now);
    }

    fn dispatch(&mut self, event: KeyEvent, now: Instant) {
        let outcome = self
            .input
            .handle(event, &mut self.engine, &mut self.store, now);
        if let Dispatch::Hold { until } = outcome {
            self.hold.schedule(now, until.saturating_duration_since(now));
        }
    }

    /// Run everything due up to `now`, earliest first.
    ///
    /// Each handler sees its own deadline as the current time, so late polling
    /// does not shift the beat.
    pub fn poll(&mut self, now: Instant) -> PowerState {
        let mut state = PowerState::Awake;

        while let Some(at) = self.next_deadline().filter(|deadline| *deadline <= now) {
            self.engine.poll(at);
            self.input.poll(at, &mut self.engine);

            if self.hold.expire(at).is_some() {
                self.end_hold(at);
            }

            let paused = self.engine.is_paused();
            if self.power.poll(at, paused, &self.activity) == PowerState::Dormant {
                state = PowerState::Dormant;
            }
        }
        state
    }

    fn end_hold(&mut self, at: Instant) {
        let tempo = self.engine.tempo();
        self.engine.set_tempo(tempo, at);

        while !self.hold.is_pending() {
            let Some(event) = self.held.pop_front() else {
                break;
            };
            self.dispatch(event, at);
        }
    }

    /// Restart the idle check after waking from dormancy
    pub fn resume(&mut self, now: Instant) {
        self.power.start(now, self.engine.config().idle_check);
        debug!("⏰ Resumed");
    }

    /// Earliest instant at which [`Metronome::poll`] has work
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.engine.next_deadline(),
            self.input.next_deadline(),
            self.hold.deadline(),
            self.power.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    pub fn engine(&self) -> &TempoEngine<L, H, V> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut TempoEngine<L, H, V> {
        &mut self.engine
    }

    pub fn input(&self) -> &InputController {
        &self.input
    }

    pub fn store(&self) -> &PresetStore<F> {
        &self.store
    }

    pub fn activity(&self) -> &ActivityMonitor {
        &self.activity
    }

    /// Is a preset write holding beats and key handling
    pub fn is_holding(&self) -> bool {
        self.hold.is_pending()
    }

    /// Number of key events waiting for the hold to end
    pub fn held_events(&self) -> usize {
        self.held.len()
    }

    /// Take the flash back, e.g. to simulate a power cycle
    pub fn into_flash(self) -> F {
        self.store.into_flash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::{MockBypass, MockFlash, MockHaptic, MockLight, MOCK_SECTOR_SIZE};
    use crate::hal::Duration;

    type TestMetronome = Metronome<MockLight, MockHaptic, MockBypass, MockFlash>;

    const DIGIT_1: u8 = 0;
    const DIGIT_2: u8 = 1;
    const ZERO: u8 = 13;
    const PRESET_B: u8 = 7;

    fn ms(v: u64) -> Instant {
        Instant::from_millis(v)
    }

    fn metronome() -> TestMetronome {
        Metronome::new(
            MockLight::new(),
            MockHaptic::new(),
            MockBypass::new(),
            MockFlash::new(),
            MOCK_SECTOR_SIZE as u32,
            MetronomeConfig::default(),
            ms(0),
        )
    }

    fn click(metronome: &mut TestMetronome, key: u8, at: Instant) {
        metronome.poll(at);
        metronome.handle_key(KeyEvent::press(key), at);
        metronome.handle_key(KeyEvent::release(key), at);
    }

    #[test]
    fn test_boots_paused_with_idle_check() {
        let mut metronome = metronome();
        assert!(metronome.engine().is_paused());

        // Power-on indicator first, then only the idle check is pending
        let light = metronome.engine().notifier().light();
        assert_eq!(light.current(), Some(Color::PowerOn));
        assert_eq!(metronome.next_deadline(), Some(ms(500)));

        assert_eq!(metronome.poll(ms(500)), PowerState::Awake);
        assert!(!metronome.engine().notifier().light().is_lit());
        assert_eq!(metronome.next_deadline(), Some(ms(5000)));
    }

    #[test]
    fn test_save_holds_and_replays_keys() {
        let mut metronome = metronome();
        click(&mut metronome, DIGIT_1, ms(0));
        click(&mut metronome, DIGIT_2, ms(10));
        click(&mut metronome, ZERO, ms(20));
        assert_eq!(metronome.engine().tempo(), 120);

        metronome.handle_key(KeyEvent::long_press(PRESET_B), ms(100));
        assert!(metronome.is_holding());
        assert!(metronome.engine().is_paused());

        // Release of the saved key and an accent toggle arrive during the hold
        metronome.handle_key(KeyEvent::release(PRESET_B), ms(200));
        metronome.handle_key(KeyEvent::long_press(ZERO), ms(300));
        metronome.handle_key(KeyEvent::release(ZERO), ms(350));
        assert_eq!(metronome.held_events(), 3);
        assert!(metronome.engine().accent());

        metronome.poll(ms(599));
        assert!(metronome.is_holding());
        assert_eq!(metronome.engine().notifier().light().count(Color::Accent), 0);

        metronome.poll(ms(600));
        assert!(!metronome.is_holding());
        assert_eq!(metronome.held_events(), 0);
        assert!(!metronome.engine().accent());
        assert_eq!(metronome.input().release_lock(), None);
        assert_eq!(metronome.engine().tempo(), 120);
        assert!(!metronome.engine().is_paused());
        assert_eq!(metronome.store().preset(1).map(|p| p.tempo), Some(120));
    }

    #[test]
    fn test_hold_restarts_at_saved_tempo() {
        let mut metronome = metronome();
        click(&mut metronome, DIGIT_1, ms(0));
        click(&mut metronome, DIGIT_2, ms(10));
        click(&mut metronome, ZERO, ms(20));

        metronome.handle_key(KeyEvent::long_press(PRESET_B), ms(100));
        metronome.poll(ms(600));
        assert!(!metronome.engine().is_paused());
        assert_eq!(metronome.engine().next_deadline(), Some(ms(600) + Duration::from_millis(500)));

        // The release of the long-pressed key neither recalls nor blinks
        metronome.handle_key(KeyEvent::release(PRESET_B), ms(700));
        assert_eq!(metronome.engine().notifier().light().count(Color::Feedback), 3);
    }

    #[test]
    fn test_queue_overflow_drops_newest() {
        let mut metronome = metronome();
        click(&mut metronome, DIGIT_1, ms(0));
        metronome.handle_key(KeyEvent::long_press(PRESET_B), ms(10));
        for i in 0..10 {
            metronome.handle_key(KeyEvent::press(DIGIT_2), ms(20 + i));
        }
        assert_eq!(metronome.held_events(), HELD_EVENTS);
    }

    #[test]
    fn test_beats_land_on_grid_despite_late_poll() {
        let mut metronome = metronome();
        click(&mut metronome, DIGIT_1, ms(0));
        click(&mut metronome, DIGIT_2, ms(0));
        click(&mut metronome, ZERO, ms(0));

        // One late poll catches up every tick on the same grid
        metronome.poll(ms(10_250));
        let light = metronome.engine().notifier().light();
        assert_eq!(light.count(Color::Accent), 20);
        assert_eq!(metronome.engine().next_deadline(), Some(ms(10_500)));
    }
}
