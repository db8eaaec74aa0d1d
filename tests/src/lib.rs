//! Host-based integration tests for the haptic metronome

mod hardware_tests;
mod property_tests;
mod runtime_tests;
mod scenario_tests;
