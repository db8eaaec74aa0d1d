//! Test utilities for metronome core functionality

pub mod simulator {
    //! Virtual-clock harness around a fully mocked metronome

    use heapless::Vec;

    use crate::hal::mock::{MockBypass, MockFlash, MockHaptic, MockLight, MOCK_SECTOR_SIZE};
    use crate::hal::{Duration, Instant};
    use crate::metronome::Metronome;
    use crate::power::PowerState;
    use crate::types::{Color, KeyEvent, KeyId, MetronomeConfig};

    /// Metronome wired to the mock outputs and mock flash
    pub type MockMetronome = Metronome<MockLight, MockHaptic, MockBypass, MockFlash>;

    /// Preset record offset used by the harness (second mock sector)
    pub const PRESET_OFFSET: u32 = MOCK_SECTOR_SIZE as u32;

    /// Beats remembered by the simulator
    pub const BEAT_LOG_LEN: usize = 512;

    /// One observed beat
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Beat {
        pub at: Instant,
        pub accent: bool,
    }

    /// Drives a [`MockMetronome`] with a virtual clock.
    ///
    /// Time only moves through [`Simulator::advance`]; every deadline on the
    /// way is handled at its own instant and beats are logged as they fire.
    pub struct Simulator {
        metronome: MockMetronome,
        config: MetronomeConfig,
        now: Instant,
        beats: Vec<Beat, BEAT_LOG_LEN>,
        dormant: u32,
    }

    impl Simulator {
        pub fn new() -> Self {
            Self::with_config(MetronomeConfig::default())
        }

        pub fn with_config(config: MetronomeConfig) -> Self {
            Self::boot(MockFlash::new(), config, Instant::from_millis(0))
        }

        /// Boot on existing flash contents
        pub fn with_flash(flash: MockFlash, config: MetronomeConfig) -> Self {
            Self::boot(flash, config, Instant::from_millis(0))
        }

        fn boot(flash: MockFlash, config: MetronomeConfig, now: Instant) -> Self {
            Self {
                metronome: Metronome::new(
                    MockLight::new(),
                    MockHaptic::new(),
                    MockBypass::new(),
                    flash,
                    PRESET_OFFSET,
                    config,
                    now,
                ),
                config,
                now,
                beats: Vec::new(),
                dormant: 0,
            }
        }

        /// Power cycle: keep only the flash
        pub fn restart(self) -> Self {
            let config = self.config;
            Self::with_flash(self.metronome.into_flash(), config)
        }

        /// Pull the flash out, e.g. to corrupt it before [`Simulator::with_flash`]
        pub fn into_flash(self) -> MockFlash {
            self.metronome.into_flash()
        }

        pub fn now(&self) -> Instant {
            self.now
        }

        /// Move the clock forward, handling every deadline on the way
        pub fn advance(&mut self, by: Duration) {
            let target = self.now + by;
            while let Some(deadline) = self.metronome.next_deadline().filter(|d| *d <= target) {
                self.step_to(deadline);
            }
            self.now = target;
        }

        pub fn advance_ms(&mut self, ms: u64) {
            self.advance(Duration::from_millis(ms));
        }

        fn step_to(&mut self, at: Instant) {
            let light = self.metronome.engine().notifier().light();
            let before = (light.count(Color::Accent), light.count(Color::Beat));

            if self.metronome.poll(at) == PowerState::Dormant {
                self.dormant += 1;
            }

            let light = self.metronome.engine().notifier().light();
            if light.count(Color::Accent) > before.0 {
                self.beats.push(Beat { at, accent: true }).ok();
            } else if light.count(Color::Beat) > before.1 {
                self.beats.push(Beat { at, accent: false }).ok();
            }
            self.now = at;
        }

        pub fn send(&mut self, event: KeyEvent) {
            self.metronome.handle_key(event, self.now);
        }

        pub fn press(&mut self, key: KeyId) {
            self.send(KeyEvent::press(key));
        }

        pub fn release(&mut self, key: KeyId) {
            self.send(KeyEvent::release(key));
        }

        pub fn long_press(&mut self, key: KeyId) {
            self.send(KeyEvent::long_press(key));
        }

        /// Press and release at the current instant
        pub fn click(&mut self, key: KeyId) {
            self.press(key);
            self.release(key);
        }

        /// Press, long press after `hold`, release after `hold + tail`
        pub fn hold(&mut self, key: KeyId, hold: Duration, tail: Duration) {
            self.press(key);
            self.advance(hold);
            self.long_press(key);
            self.advance(tail);
            self.release(key);
        }

        pub fn metronome(&self) -> &MockMetronome {
            &self.metronome
        }

        pub fn metronome_mut(&mut self) -> &mut MockMetronome {
            &mut self.metronome
        }

        pub fn tempo(&self) -> u8 {
            self.metronome.engine().tempo()
        }

        pub fn light(&self) -> &MockLight {
            self.metronome.engine().notifier().light()
        }

        pub fn haptic(&self) -> &MockHaptic {
            self.metronome.engine().notifier().haptic()
        }

        /// Beats observed so far, oldest first
        pub fn beats(&self) -> &[Beat] {
            &self.beats
        }

        pub fn clear_beats(&mut self) {
            self.beats.clear();
        }

        /// How many times the idle check reported dormancy
        pub fn dormant_reports(&self) -> u32 {
            self.dormant
        }
    }

    impl Default for Simulator {
        fn default() -> Self {
            Self::new()
        }
    }
}

pub mod keypad {
    //! Key ids by legend and scripted key sequences

    use crate::hal::Duration;
    use crate::types::{KeyId, KEYPAD_LAYOUT, KeyRole, Step};

    use super::simulator::Simulator;

    pub const KEY_STAR: KeyId = 12;
    pub const KEY_ZERO: KeyId = 13;
    pub const KEY_HASH: KeyId = 14;

    /// Key id of digit `d` (0..=9)
    pub fn digit(d: u8) -> KeyId {
        if d == 0 {
            return KEY_ZERO;
        }
        KEYPAD_LAYOUT
            .iter()
            .position(|role| *role == KeyRole::Digit(d))
            .map(|i| i as KeyId)
            .unwrap_or(KEY_ZERO)
    }

    /// Key id of preset slot `slot` (0..=3)
    pub fn preset(slot: u8) -> KeyId {
        slot * 4 + 3
    }

    /// Key id of a step key
    pub fn step(step: Step) -> KeyId {
        match step {
            Step::Decrease => KEY_STAR,
            Step::Increase => KEY_HASH,
        }
    }

    /// Type `value` digit by digit, `gap` apart
    pub fn type_number(sim: &mut Simulator, value: u16, gap: Duration) {
        let mut digits = [0u8; 5];
        let mut len = 0;
        let mut rest = value;
        loop {
            digits[len] = (rest % 10) as u8;
            len += 1;
            rest /= 10;
            if rest == 0 || len == digits.len() {
                break;
            }
        }
        for (i, d) in digits[..len].iter().rev().enumerate() {
            if i > 0 {
                sim.advance(gap);
            }
            sim.click(digit(*d));
        }
    }

    /// Tap the zero key `count` times, `interval` apart
    pub fn tap(sim: &mut Simulator, count: u32, interval: Duration) {
        for i in 0..count {
            if i > 0 {
                sim.advance(interval);
            }
            sim.click(KEY_ZERO);
        }
    }
}
