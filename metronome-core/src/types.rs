//! Core data types for the metronome

use crate::hal::Duration;

/// Slowest settable tempo in beats per minute
pub const MIN_TEMPO: u8 = 1;
/// Fastest settable tempo in beats per minute
pub const MAX_TEMPO: u8 = 255;
/// Largest subdivision selectable from the keypad
pub const MAX_SUBDIVISION: u8 = 9;
/// Number of preset slots
pub const PRESET_COUNT: usize = 4;
/// Number of keys on the matrix keypad
pub const KEY_COUNT: usize = 16;
/// Microseconds in one minute
pub const MICROS_PER_MINUTE: u64 = 60_000_000;

/// Keypad key index, row-major on the 4x4 matrix
pub type KeyId = u8;

/// Kind of keypad event delivered by the matrix driver
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KeyKind {
    /// Key went down
    Press,
    /// Key went up
    Release,
    /// Key held past the long-press threshold (at most once per hold)
    LongPress,
}

/// A single keypad event
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeyEvent {
    pub key: KeyId,
    pub kind: KeyKind,
}

impl KeyEvent {
    pub const fn press(key: KeyId) -> Self {
        Self { key, kind: KeyKind::Press }
    }

    pub const fn release(key: KeyId) -> Self {
        Self { key, kind: KeyKind::Release }
    }

    pub const fn long_press(key: KeyId) -> Self {
        Self { key, kind: KeyKind::LongPress }
    }
}

/// Direction of a single tempo step, named after the key legends
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step {
    /// `#` key. Lowers the numeric tempo unless inverted by configuration.
    Increase,
    /// `*` key. Raises the numeric tempo unless inverted by configuration.
    Decrease,
}

impl Step {
    /// Returns the opposite step
    pub const fn opposite(&self) -> Step {
        match self {
            Step::Increase => Step::Decrease,
            Step::Decrease => Step::Increase,
        }
    }
}

/// What a key does, independent of the event kind
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KeyRole {
    /// Digit 1..9: typed on release, selects subdivision on long press
    Digit(u8),
    /// The `0` key: tap tempo, digit zero while typing, accent toggle on long press
    TapOrZero,
    /// Preset slot 0..3 (`A`..`D`)
    Preset(u8),
    /// Tempo step key, repeating while held
    Step(Step),
}

/// Key roles indexed by key id
pub const KEYPAD_LAYOUT: [KeyRole; KEY_COUNT] = [
    KeyRole::Digit(1),
    KeyRole::Digit(2),
    KeyRole::Digit(3),
    KeyRole::Preset(0),
    KeyRole::Digit(4),
    KeyRole::Digit(5),
    KeyRole::Digit(6),
    KeyRole::Preset(1),
    KeyRole::Digit(7),
    KeyRole::Digit(8),
    KeyRole::Digit(9),
    KeyRole::Preset(2),
    KeyRole::Step(Step::Decrease),
    KeyRole::TapOrZero,
    KeyRole::Step(Step::Increase),
    KeyRole::Preset(3),
];

impl KeyRole {
    /// Look up the role of a key; `None` for ids outside the matrix
    pub fn for_key(key: KeyId) -> Option<KeyRole> {
        KEYPAD_LAYOUT.get(key as usize).copied()
    }
}

/// Colors shown on the RGB LED
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Color {
    /// LED dark
    Off,
    /// First subdivision of an accented measure (purple)
    Accent,
    /// Any other beat (white)
    Beat,
    /// Preset written to flash (green)
    Saved,
    /// Key released (red)
    Feedback,
    /// Shown once at power-on (blue)
    PowerOn,
}

impl Color {
    /// Logical (red, green, blue) channel states
    pub const fn rgb(&self) -> (bool, bool, bool) {
        match self {
            Color::Off => (false, false, false),
            Color::Accent => (true, false, true),
            Color::Beat => (true, true, true),
            Color::Saved => (false, true, false),
            Color::Feedback => (true, false, false),
            Color::PowerOn => (false, false, true),
        }
    }
}

/// Vibration motor drive patterns
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HapticPattern {
    /// Downbeat of an accented measure: motor driven continuously
    Accent,
    /// Regular beat: motor driven at one-third duty
    Normal,
}

impl HapticPattern {
    /// Duty cycle as (numerator, denominator)
    pub const fn duty(&self) -> (u16, u16) {
        match self {
            HapticPattern::Accent => (1, 1),
            HapticPattern::Normal => (1, 3),
        }
    }
}

/// Metronome configuration parameters
#[derive(Copy, Clone, Debug)]
pub struct MetronomeConfig {
    /// Unsubmitted digits and tap sessions are discarded after this
    pub input_timeout: Duration,
    /// Beat and key-feedback light pulse length
    pub blink: Duration,
    /// Beat vibration pulse length
    pub vibration: Duration,
    /// Save confirmation pulse, also the persistence hold window
    pub notification: Duration,
    /// Step repeat period while a step key is held
    pub repeat: Duration,
    /// Paused device goes dormant after this much inactivity
    pub inactive_timeout: Duration,
    /// How often the idle check runs
    pub idle_check: Duration,
    /// Swap the numeric effect of the two step keys
    pub invert_step_direction: bool,
}

impl Default for MetronomeConfig {
    fn default() -> Self {
        Self {
            input_timeout: Duration::from_millis(2000),
            blink: Duration::from_millis(100),
            vibration: Duration::from_millis(100),
            notification: Duration::from_millis(500),
            repeat: Duration::from_millis(50),
            inactive_timeout: Duration::from_secs(10 * 60),
            idle_check: Duration::from_millis(5000),
            invert_step_direction: false,
        }
    }
}

impl MetronomeConfig {
    /// Create a new configuration with validation
    pub fn new(
        input_timeout_ms: u64,
        repeat_ms: u64,
        inactive_timeout_s: u64,
        invert_step_direction: bool,
    ) -> Result<Self, &'static str> {
        if input_timeout_ms < 250 || input_timeout_ms > 10_000 {
            return Err("Input timeout must be between 250 and 10000 ms");
        }
        if repeat_ms < 10 || repeat_ms > 1000 {
            return Err("Repeat period must be between 10 and 1000 ms");
        }
        if inactive_timeout_s < 10 {
            return Err("Inactivity timeout must be at least 10 s");
        }

        Ok(Self {
            input_timeout: Duration::from_millis(input_timeout_ms),
            repeat: Duration::from_millis(repeat_ms),
            inactive_timeout: Duration::from_secs(inactive_timeout_s),
            invert_step_direction,
            ..Self::default()
        })
    }

    /// Numeric tempo change for a step key, after inversion
    pub fn step_delta(&self, step: Step) -> i16 {
        let step = if self.invert_step_direction { step.opposite() } else { step };
        match step {
            Step::Increase => -1,
            Step::Decrease => 1,
        }
    }
}
