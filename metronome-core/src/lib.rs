#![cfg_attr(not(any(test, feature = "std")), no_std)]

//! # Metronome Core
//!
//! Haptic/visual metronome logic for embedded systems.
//! Drift-free beat scheduling, keypad state machine with tap tempo and digit
//! entry, and four presets persisted in a single flash record.

#[macro_use]
mod log;

pub mod types;
pub mod hal;
pub mod timer;
pub mod notify;
pub mod engine;
pub mod preset;
pub mod input;
pub mod power;
pub mod metronome;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;


pub use types::*;
pub use hal::{*, Instant, Duration};
pub use timer::{OneShot, Periodic};
pub use notify::NotificationController;
pub use engine::{interval, TempoEngine, TempoState};
pub use preset::{Preset, PresetSet, PresetStore, StoreError};
pub use input::{Dispatch, InputController};
pub use power::{ActivityMonitor, BatteryMonitor, PowerManager, PowerState};
pub use metronome::Metronome;

/// Metronome library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration used by the firmware
pub fn default_config() -> MetronomeConfig {
    MetronomeConfig::default()
}
