#![no_std]

//! Firmware library: board hardware, static channels and embassy tasks

pub use embassy_executor::Spawner;
pub use static_cell::StaticCell;

pub use metronome_core::*;

pub use crate::ch32v203_hardware::*;
pub use crate::tasks::*;

// CH32V203 hardware module
pub mod ch32v203_hardware;

// Time driver for embassy
pub mod time_driver;

/// Pending key events between the keypad driver and the metronome task
pub const KEY_EVENT_DEPTH: usize = 16;

/// Metronome wired to the CH32V203 board
pub type BoardMetronome = Metronome<BoardLight, BoardHaptic, BoardBypass, Ch32Flash>;

// Embassy tasks module
pub mod tasks {
    use embassy_futures::select::{select, Either};
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use embassy_sync::channel::Channel;
    use embassy_sync::signal::Signal;
    use embassy_time::{Instant, Timer};
    use portable_atomic::{AtomicBool, Ordering};

    use super::*;

    /// Key events from the keypad driver
    pub static KEY_EVENTS: Channel<CriticalSectionRawMutex, KeyEvent, KEY_EVENT_DEPTH> =
        Channel::new();

    /// Low-battery reports (millivolts) from the battery sampler
    pub static LOW_BATTERY: Signal<CriticalSectionRawMutex, u16> = Signal::new();

    /// Cleared once the low-battery latch fires; the sampler stops then
    pub static BATTERY_SAMPLING: AtomicBool = AtomicBool::new(true);

    /// Queue a key event from driver or interrupt context.
    /// Returns false when the queue is full and the event is lost.
    pub fn submit_key(event: KeyEvent) -> bool {
        KEY_EVENTS.try_send(event).is_ok()
    }

    /// Runs the metronome: waits for the next key event or deadline
    #[embassy_executor::task]
    pub async fn metronome_task(metronome: &'static mut BoardMetronome) {
        #[cfg(feature = "defmt")]
        defmt::info!("🎼 Metronome task started");

        loop {
            let event = match metronome.next_deadline() {
                Some(deadline) => match select(KEY_EVENTS.receive(), Timer::at(deadline)).await {
                    Either::First(event) => Some(event),
                    Either::Second(()) => None,
                },
                None => Some(KEY_EVENTS.receive().await),
            };

            let now = Instant::now();
            if metronome.poll(now) == PowerState::Dormant {
                #[cfg(feature = "defmt")]
                defmt::info!("😴 Dormant until next key");

                let wake = match event {
                    Some(event) => event,
                    None => KEY_EVENTS.receive().await,
                };
                let now = Instant::now();
                metronome.resume(now);
                metronome.handle_key(wake, now);
                continue;
            }

            if let Some(event) = event {
                #[cfg(feature = "defmt")]
                defmt::trace!("⌨️ {}", event);
                metronome.handle_key(event, now);
            }
        }
    }

    /// Latches the low-battery indicator on the first report
    #[embassy_executor::task]
    pub async fn battery_task(mut monitor: BatteryMonitor<Ch32OutputPin>) {
        #[cfg(feature = "defmt")]
        defmt::info!("🔋 Battery task started");

        while monitor.should_sample() {
            let millivolts = LOW_BATTERY.wait().await;
            if monitor.report_low(millivolts) {
                BATTERY_SAMPLING.store(false, Ordering::Relaxed);
            }
        }
    }
}
