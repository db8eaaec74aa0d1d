#![no_std]
#![no_main]

#[cfg(feature = "defmt")]
use defmt_rtt as _;

// RISC-V runtime
use riscv_rt as _;

// Panic handler
#[cfg(feature = "panic-probe")]
use panic_probe as _;
#[cfg(not(feature = "panic-probe"))]
use panic_halt as _;

use embassy_executor::Spawner;
use embassy_time::{Duration, Instant};
use static_cell::StaticCell;

use pulse_metronome_firmware::*;

// Static resources
static METRONOME: StaticCell<BoardMetronome> = StaticCell::new();

/// Main firmware entry point
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    #[cfg(feature = "defmt")]
    defmt::info!("🔧 Pulse Metronome Firmware Starting...");

    time_driver::init();
    let board = init_hardware();
    #[cfg(feature = "defmt")]
    defmt::info!("✅ Hardware initialized");

    let config = default_config();
    #[cfg(feature = "defmt")]
    defmt::info!(
        "⚙️ Input timeout {} ms, repeat {} ms",
        config.input_timeout.as_millis(),
        config.repeat.as_millis()
    );

    let metronome = METRONOME.init(Metronome::new(
        board.light,
        board.haptic,
        board.bypass,
        board.flash,
        memory::PRESET_OFFSET,
        config,
        Instant::now(),
    ));

    #[cfg(feature = "defmt")]
    defmt::info!("🚀 Spawning metronome tasks...");

    spawner.must_spawn(metronome_task(metronome));
    spawner.must_spawn(battery_task(BatteryMonitor::new(board.low_battery)));

    #[cfg(feature = "defmt")]
    defmt::info!("✨ Metronome firmware ready! v{}", VERSION);

    // Main supervision loop
    loop {
        embassy_time::Timer::after(Duration::from_secs(1)).await;
        #[cfg(feature = "defmt")]
        defmt::trace!("💓 Heartbeat");
    }
}

/// Initialize the board peripherals
fn init_hardware() -> Board {
    #[cfg(feature = "defmt")]
    defmt::info!("🔌 Initializing hardware...");

    init_board()
}
