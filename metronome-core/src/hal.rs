//! Hardware Abstraction Layer for metronome implementation

// Re-export time types based on feature
#[cfg(feature = "embassy-time")]
pub use embassy_time::{Duration, Instant};

#[cfg(not(feature = "embassy-time"))]
pub use self::mock_time::{Duration, Instant};

#[cfg(not(feature = "embassy-time"))]
mod mock_time {
    //! Microsecond time types for builds without an embassy time driver.
    //! Mirrors the subset of the embassy-time API used by this crate.

    use core::ops::{Add, AddAssign, Div, Mul, Sub};

    /// Point in time, microseconds since boot
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Instant(u64);

    impl Instant {
        pub const MIN: Instant = Instant(0);

        pub const fn from_micros(us: u64) -> Self {
            Self(us)
        }

        pub const fn from_millis(ms: u64) -> Self {
            Self(ms * 1_000)
        }

        pub const fn from_secs(s: u64) -> Self {
            Self(s * 1_000_000)
        }

        pub const fn as_micros(&self) -> u64 {
            self.0
        }

        pub const fn as_millis(&self) -> u64 {
            self.0 / 1_000
        }

        pub const fn as_secs(&self) -> u64 {
            self.0 / 1_000_000
        }

        pub fn duration_since(&self, earlier: Instant) -> Duration {
            Duration(self.0 - earlier.0)
        }

        pub fn checked_duration_since(&self, earlier: Instant) -> Option<Duration> {
            self.0.checked_sub(earlier.0).map(Duration)
        }

        pub fn saturating_duration_since(&self, earlier: Instant) -> Duration {
            Duration(self.0.saturating_sub(earlier.0))
        }
    }

    impl Add<Duration> for Instant {
        type Output = Instant;

        fn add(self, rhs: Duration) -> Instant {
            Instant(self.0 + rhs.0)
        }
    }

    impl AddAssign<Duration> for Instant {
        fn add_assign(&mut self, rhs: Duration) {
            self.0 += rhs.0;
        }
    }

    impl Sub<Duration> for Instant {
        type Output = Instant;

        fn sub(self, rhs: Duration) -> Instant {
            Instant(self.0 - rhs.0)
        }
    }

    impl Sub<Instant> for Instant {
        type Output = Duration;

        fn sub(self, rhs: Instant) -> Duration {
            self.duration_since(rhs)
        }
    }

    /// Span of time with microsecond resolution
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Duration(u64);

    impl Duration {
        pub const fn from_micros(us: u64) -> Self {
            Self(us)
        }

        pub const fn from_millis(ms: u64) -> Self {
            Self(ms * 1_000)
        }

        pub const fn from_secs(s: u64) -> Self {
            Self(s * 1_000_000)
        }

        pub const fn as_micros(&self) -> u64 {
            self.0
        }

        pub const fn as_millis(&self) -> u64 {
            self.0 / 1_000
        }

        pub const fn as_secs(&self) -> u64 {
            self.0 / 1_000_000
        }
    }

    impl Add for Duration {
        type Output = Duration;

        fn add(self, rhs: Duration) -> Duration {
            Duration(self.0 + rhs.0)
        }
    }

    impl Sub for Duration {
        type Output = Duration;

        fn sub(self, rhs: Duration) -> Duration {
            Duration(self.0 - rhs.0)
        }
    }

    impl Div<u32> for Duration {
        type Output = Duration;

        fn div(self, rhs: u32) -> Duration {
            Duration(self.0 / rhs as u64)
        }
    }

    impl Mul<u32> for Duration {
        type Output = Duration;

        fn mul(self, rhs: u32) -> Duration {
            Duration(self.0 * rhs as u64)
        }
    }
}

use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::pwm::SetDutyCycle;
use crate::types::{Color, HapticPattern};

/// Error types for HAL operations
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HalError {
    /// GPIO operation failed
    GpioError,
    /// PWM operation failed
    PwmError,
}

#[cfg(feature = "std")]
impl core::fmt::Display for HalError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            HalError::GpioError => write!(f, "GPIO operation failed"),
            HalError::PwmError => write!(f, "PWM operation failed"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for HalError {}

/// Trait for the tri-color beat light
pub trait LightOutput {
    type Error: From<HalError>;

    /// Show a color until told otherwise
    fn show(&mut self, color: Color) -> Result<(), Self::Error>;
}

/// Trait for the vibration motor
pub trait HapticOutput {
    type Error: From<HalError>;

    /// Start driving the motor with the given pattern
    fn drive(&mut self, pattern: HapticPattern) -> Result<(), Self::Error>;

    /// Stop the motor
    fn release(&mut self) -> Result<(), Self::Error>;
}

/// Trait for the external switch that disables vibration
pub trait VibrationBypass {
    /// True when haptic pulses must be suppressed.
    /// Read failures count as not bypassed.
    fn is_bypassed(&mut self) -> bool;
}

/// Run `f` with every interrupt source suspended.
///
/// Flash erase/program must not be interrupted and the flash cannot be read
/// while it is busy, so no timer or key handler runs for the duration of `f`.
pub fn with_interrupts_suspended<R>(f: impl FnOnce() -> R) -> R {
    critical_section::with(|_cs| f())
}

/// RGB LED on three embedded-hal output pins
pub struct EmbeddedHalLight<R, G, B> {
    red: R,
    green: G,
    blue: B,
    common_anode: bool,
}

impl<R, G, B> EmbeddedHalLight<R, G, B>
where
    R: OutputPin,
    G: OutputPin,
    B: OutputPin,
{
    /// `common_anode` LEDs light when their cathode pin is driven low
    pub fn new(red: R, green: G, blue: B, common_anode: bool) -> Self {
        Self { red, green, blue, common_anode }
    }

    pub fn pins(&self) -> (&R, &G, &B) {
        (&self.red, &self.green, &self.blue)
    }

    fn drive<P: OutputPin>(pin: &mut P, lit: bool, inverted: bool) -> Result<(), HalError> {
        if lit != inverted {
            pin.set_high().map_err(|_| HalError::GpioError)
        } else {
            pin.set_low().map_err(|_| HalError::GpioError)
        }
    }
}

impl<R, G, B> LightOutput for EmbeddedHalLight<R, G, B>
where
    R: OutputPin,
    G: OutputPin,
    B: OutputPin,
{
    type Error = HalError;

    fn show(&mut self, color: Color) -> Result<(), Self::Error> {
        let (r, g, b) = color.rgb();
        Self::drive(&mut self.red, r, self.common_anode)?;
        Self::drive(&mut self.green, g, self.common_anode)?;
        Self::drive(&mut self.blue, b, self.common_anode)
    }
}

/// Vibration motor on an embedded-hal PWM channel
pub struct EmbeddedHalHaptic<P> {
    pwm: P,
}

impl<P> EmbeddedHalHaptic<P>
where
    P: SetDutyCycle,
{
    pub fn new(pwm: P) -> Self {
        Self { pwm }
    }

    pub fn pwm(&self) -> &P {
        &self.pwm
    }
}

impl<P> HapticOutput for EmbeddedHalHaptic<P>
where
    P: SetDutyCycle,
{
    type Error = HalError;

    fn drive(&mut self, pattern: HapticPattern) -> Result<(), Self::Error> {
        let (num, denom) = pattern.duty();
        self.pwm
            .set_duty_cycle_fraction(num, denom)
            .map_err(|_| HalError::PwmError)
    }

    fn release(&mut self) -> Result<(), Self::Error> {
        self.pwm.set_duty_cycle_fully_off().map_err(|_| HalError::PwmError)
    }
}

/// Vibration switch on an embedded-hal input pin.
///
/// The pin is pulled up; the closed switch pulls it low and enables vibration.
pub struct EmbeddedHalBypass<P> {
    pin: P,
}

impl<P> EmbeddedHalBypass<P>
where
    P: InputPin,
{
    pub fn new(pin: P) -> Self {
        Self { pin }
    }
}

impl<P> VibrationBypass for EmbeddedHalBypass<P>
where
    P: InputPin,
{
    fn is_bypassed(&mut self) -> bool {
        self.pin.is_high().unwrap_or(false)
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    //! Mock implementations for testing

    use super::*;
    use embedded_storage::nor_flash::{
        ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash,
    };
    use heapless::HistoryBuffer;

    /// Records every color shown
    #[derive(Default)]
    pub struct MockLight {
        current: Option<Color>,
        history: HistoryBuffer<Color, 64>,
        counts: [u32; 6],
    }

    impl MockLight {
        pub fn new() -> Self {
            Self::default()
        }

        /// Color currently shown (`None` before the first write)
        pub fn current(&self) -> Option<Color> {
            self.current
        }

        /// Is any color other than `Off` shown
        pub fn is_lit(&self) -> bool {
            !matches!(self.current, None | Some(Color::Off))
        }

        /// How many times `color` was shown
        pub fn count(&self, color: Color) -> u32 {
            self.counts[Self::index(color)]
        }

        /// Most recent non-off colors, oldest first
        pub fn pulses(&self) -> impl Iterator<Item = Color> + '_ {
            self.history.oldest_ordered().copied().filter(|c| *c != Color::Off)
        }

        fn index(color: Color) -> usize {
            match color {
                Color::Off => 0,
                Color::Accent => 1,
                Color::Beat => 2,
                Color::Saved => 3,
                Color::Feedback => 4,
                Color::PowerOn => 5,
            }
        }
    }

    impl LightOutput for MockLight {
        type Error = HalError;

        fn show(&mut self, color: Color) -> Result<(), Self::Error> {
            self.current = Some(color);
            self.history.write(color);
            self.counts[Self::index(color)] += 1;
            Ok(())
        }
    }

    /// Records motor activity
    #[derive(Default)]
    pub struct MockHaptic {
        current: Option<HapticPattern>,
        accents: u32,
        normals: u32,
    }

    impl MockHaptic {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn is_active(&self) -> bool {
            self.current.is_some()
        }

        pub fn current(&self) -> Option<HapticPattern> {
            self.current
        }

        pub fn count(&self, pattern: HapticPattern) -> u32 {
            match pattern {
                HapticPattern::Accent => self.accents,
                HapticPattern::Normal => self.normals,
            }
        }
    }

    impl HapticOutput for MockHaptic {
        type Error = HalError;

        fn drive(&mut self, pattern: HapticPattern) -> Result<(), Self::Error> {
            self.current = Some(pattern);
            match pattern {
                HapticPattern::Accent => self.accents += 1,
                HapticPattern::Normal => self.normals += 1,
            }
            Ok(())
        }

        fn release(&mut self) -> Result<(), Self::Error> {
            self.current = None;
            Ok(())
        }
    }

    /// Vibration switch with a settable position
    #[derive(Default)]
    pub struct MockBypass {
        bypassed: bool,
    }

    impl MockBypass {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_bypassed(&mut self, bypassed: bool) {
            self.bypassed = bypassed;
        }
    }

    impl VibrationBypass for MockBypass {
        fn is_bypassed(&mut self) -> bool {
            self.bypassed
        }
    }

    /// Size of one mock flash sector
    pub const MOCK_SECTOR_SIZE: usize = 4096;
    /// Total mock flash size (two sectors)
    pub const MOCK_FLASH_SIZE: usize = 2 * MOCK_SECTOR_SIZE;

    /// RAM-backed NOR flash: erase sets bytes to 0xFF, programming only clears bits
    pub struct MockFlash {
        data: [u8; MOCK_FLASH_SIZE],
        erases: u32,
        writes: u32,
        fail_writes: bool,
    }

    impl Default for MockFlash {
        fn default() -> Self {
            Self {
                data: [0xFF; MOCK_FLASH_SIZE],
                erases: 0,
                writes: 0,
                fail_writes: false,
            }
        }
    }

    impl MockFlash {
        pub fn new() -> Self {
            Self::default()
        }

        /// Raw view of the flash contents
        pub fn bytes(&self) -> &[u8] {
            &self.data
        }

        /// Overwrite a byte, bypassing NOR semantics
        pub fn poke(&mut self, offset: usize, value: u8) {
            self.data[offset] = value;
        }

        pub fn erase_count(&self) -> u32 {
            self.erases
        }

        pub fn write_count(&self) -> u32 {
            self.writes
        }

        /// Make every following write fail
        pub fn fail_writes(&mut self, fail: bool) {
            self.fail_writes = fail;
        }

        fn range(&self, offset: u32, len: usize) -> Result<core::ops::Range<usize>, NorFlashErrorKind> {
            let start = offset as usize;
            let end = start.checked_add(len).ok_or(NorFlashErrorKind::OutOfBounds)?;
            if end > self.data.len() {
                return Err(NorFlashErrorKind::OutOfBounds);
            }
            Ok(start..end)
        }
    }

    impl ErrorType for MockFlash {
        type Error = NorFlashErrorKind;
    }

    impl ReadNorFlash for MockFlash {
        const READ_SIZE: usize = 1;

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
            let range = self.range(offset, bytes.len())?;
            bytes.copy_from_slice(&self.data[range]);
            Ok(())
        }

        fn capacity(&self) -> usize {
            MOCK_FLASH_SIZE
        }
    }

    impl NorFlash for MockFlash {
        const WRITE_SIZE: usize = 4;
        const ERASE_SIZE: usize = MOCK_SECTOR_SIZE;

        fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
            if from > to {
                return Err(NorFlashErrorKind::OutOfBounds);
            }
            if from as usize % Self::ERASE_SIZE != 0 || to as usize % Self::ERASE_SIZE != 0 {
                return Err(NorFlashErrorKind::NotAligned);
            }
            let range = self.range(from, (to - from) as usize)?;
            self.data[range].fill(0xFF);
            self.erases += 1;
            Ok(())
        }

        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
            if self.fail_writes {
                return Err(NorFlashErrorKind::Other);
            }
            if offset as usize % Self::WRITE_SIZE != 0 || bytes.len() % Self::WRITE_SIZE != 0 {
                return Err(NorFlashErrorKind::NotAligned);
            }
            let range = self.range(offset, bytes.len())?;
            for (cell, byte) in self.data[range].iter_mut().zip(bytes) {
                *cell &= *byte;
            }
            self.writes += 1;
            Ok(())
        }
    }

    /// Output pin that remembers its level
    #[derive(Default)]
    pub struct MockPin {
        high: bool,
        toggles: u32,
    }

    impl MockPin {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn is_set_high(&self) -> bool {
            self.high
        }

        pub fn toggles(&self) -> u32 {
            self.toggles
        }
    }

    impl embedded_hal::digital::ErrorType for MockPin {
        type Error = core::convert::Infallible;
    }

    impl OutputPin for MockPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            if self.high {
                self.toggles += 1;
            }
            self.high = false;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            if !self.high {
                self.toggles += 1;
            }
            self.high = true;
            Ok(())
        }
    }

    impl InputPin for MockPin {
        fn is_high(&mut self) -> Result<bool, Self::Error> {
            Ok(self.high)
        }

        fn is_low(&mut self) -> Result<bool, Self::Error> {
            Ok(!self.high)
        }
    }

    /// PWM channel that remembers its duty cycle
    #[derive(Default)]
    pub struct MockPwm {
        duty: u16,
    }

    impl MockPwm {
        pub const MAX_DUTY: u16 = 300;

        pub fn new() -> Self {
            Self::default()
        }

        pub fn duty(&self) -> u16 {
            self.duty
        }
    }

    impl embedded_hal::pwm::ErrorType for MockPwm {
        type Error = core::convert::Infallible;
    }

    impl SetDutyCycle for MockPwm {
        fn max_duty_cycle(&self) -> u16 {
            Self::MAX_DUTY
        }

        fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
            self.duty = duty;
            Ok(())
        }
    }
}
