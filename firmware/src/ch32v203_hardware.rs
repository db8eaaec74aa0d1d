//! CH32V203 Hardware Implementation
//!
//! 64KB Flash / 20KB RAM. Register-level GPIO, TIM2 PWM and flash
//! controller access behind the embedded-hal and embedded-storage traits.

use core::convert::Infallible;
use core::ptr::{read_volatile, write_volatile};

use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
use embedded_hal::pwm::SetDutyCycle;
use embedded_storage::nor_flash::{
    ErrorType as FlashErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};

use metronome_core::{EmbeddedHalBypass, EmbeddedHalHaptic, EmbeddedHalLight};

/// CH32V203 pin configuration constants
pub mod pins {
    use super::Port;

    /// Haptic motor PWM output (TIM2_CH1)
    pub const HAPTIC: (Port, u8) = (Port::A, 0);
    /// Vibration bypass switch, pulled up
    pub const BYPASS: (Port, u8) = (Port::A, 1);
    /// RGB LED cathodes (common anode)
    pub const LED_RED: (Port, u8) = (Port::A, 4);
    pub const LED_GREEN: (Port, u8) = (Port::A, 5);
    pub const LED_BLUE: (Port, u8) = (Port::A, 6);
    /// Low battery indicator LED
    pub const LOW_BATTERY: (Port, u8) = (Port::A, 7);
}

/// CH32V203 memory layout information
pub mod memory {
    /// Flash size of the C8 variant
    pub const FLASH_SIZE: u32 = 64 * 1024;
    /// Erase unit used for the preset record
    pub const SECTOR_SIZE: u32 = 4 * 1024;
    /// Preset record lives in the last sector
    pub const PRESET_OFFSET: u32 = FLASH_SIZE - SECTOR_SIZE;
    /// Hardware page erased by one PER operation
    pub const PAGE_SIZE: u32 = 1024;
}

mod reg {
    pub const RCC_APB2PCENR: usize = 0x4002_1018;
    pub const RCC_APB1PCENR: usize = 0x4002_101C;
    pub const RCC_IOPAEN: u32 = 1 << 2;
    pub const RCC_IOPBEN: u32 = 1 << 3;
    pub const RCC_AFIOEN: u32 = 1 << 0;
    pub const RCC_TIM2EN: u32 = 1 << 0;

    pub const GPIOA: usize = 0x4001_0800;
    pub const GPIOB: usize = 0x4001_0C00;
    pub const GPIO_CFGLR: usize = 0x00;
    pub const GPIO_CFGHR: usize = 0x04;
    pub const GPIO_INDR: usize = 0x08;
    pub const GPIO_OUTDR: usize = 0x0C;
    pub const GPIO_BSHR: usize = 0x10;
    pub const GPIO_BCR: usize = 0x14;

    pub const TIM2: usize = 0x4000_0000;
    pub const TIM_CTLR1: usize = 0x00;
    pub const TIM_CHCTLR1: usize = 0x18;
    pub const TIM_CCER: usize = 0x20;
    pub const TIM_PSC: usize = 0x28;
    pub const TIM_ATRLR: usize = 0x2C;
    pub const TIM_CH1CVR: usize = 0x34;

    pub const FLASH_BASE: usize = 0x0800_0000;
    pub const FPEC: usize = 0x4002_2000;
    pub const FLASH_KEYR: usize = 0x04;
    pub const FLASH_STATR: usize = 0x0C;
    pub const FLASH_CTLR: usize = 0x10;
    pub const FLASH_ADDR: usize = 0x14;
    pub const FLASH_KEY1: u32 = 0x4567_0123;
    pub const FLASH_KEY2: u32 = 0xCDEF_89AB;
    pub const CTLR_PG: u32 = 1 << 0;
    pub const CTLR_PER: u32 = 1 << 1;
    pub const CTLR_STRT: u32 = 1 << 6;
    pub const CTLR_LOCK: u32 = 1 << 7;
    pub const STATR_BSY: u32 = 1 << 0;
    pub const STATR_PGERR: u32 = 1 << 2;
    pub const STATR_WRPRTERR: u32 = 1 << 4;
    pub const STATR_EOP: u32 = 1 << 5;
}

fn read_reg(addr: usize) -> u32 {
    // SAFETY: fixed peripheral register address on this chip
    unsafe { read_volatile(addr as *const u32) }
}

fn write_reg(addr: usize, value: u32) {
    // SAFETY: fixed peripheral register address on this chip
    unsafe { write_volatile(addr as *mut u32, value) }
}

fn modify_reg(addr: usize, f: impl FnOnce(u32) -> u32) {
    write_reg(addr, f(read_reg(addr)));
}

/// GPIO port
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Port {
    A,
    B,
}

impl Port {
    const fn base(self) -> usize {
        match self {
            Port::A => reg::GPIOA,
            Port::B => reg::GPIOB,
        }
    }
}

/// 4-bit CNF/MODE field values
mod mode {
    /// General purpose push-pull output, 10 MHz
    pub const OUTPUT_PUSH_PULL: u32 = 0b0001;
    /// Alternate function push-pull output, 10 MHz
    pub const ALTERNATE_PUSH_PULL: u32 = 0b1001;
    /// Input with pull-up/down (direction chosen by OUTDR)
    pub const INPUT_PULL: u32 = 0b1000;
}

fn configure(port: Port, pin: u8, mode: u32) {
    let (register, shift) = if pin < 8 {
        (reg::GPIO_CFGLR, pin as u32 * 4)
    } else {
        (reg::GPIO_CFGHR, (pin as u32 - 8) * 4)
    };
    modify_reg(port.base() + register, |v| (v & !(0xF << shift)) | (mode << shift));
}

/// Push-pull output pin
pub struct Ch32OutputPin {
    port: Port,
    pin: u8,
}

impl Ch32OutputPin {
    pub fn new((port, pin): (Port, u8)) -> Self {
        configure(port, pin, mode::OUTPUT_PUSH_PULL);
        Self { port, pin }
    }
}

impl ErrorType for Ch32OutputPin {
    type Error = Infallible;
}

impl OutputPin for Ch32OutputPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        write_reg(self.port.base() + reg::GPIO_BCR, 1 << self.pin);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        write_reg(self.port.base() + reg::GPIO_BSHR, 1 << self.pin);
        Ok(())
    }
}

/// Input pin with the internal pull-up enabled
pub struct Ch32InputPin {
    port: Port,
    pin: u8,
}

impl Ch32InputPin {
    pub fn pull_up((port, pin): (Port, u8)) -> Self {
        configure(port, pin, mode::INPUT_PULL);
        modify_reg(port.base() + reg::GPIO_OUTDR, |v| v | (1 << pin));
        Self { port, pin }
    }
}

impl ErrorType for Ch32InputPin {
    type Error = Infallible;
}

impl InputPin for Ch32InputPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(read_reg(self.port.base() + reg::GPIO_INDR) & (1 << self.pin) != 0)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}

/// TIM2 channel 1 in PWM mode 1
pub struct Tim2Pwm {
    max_duty: u16,
}

impl Tim2Pwm {
    /// Counter clock 1 MHz from the 8 MHz HSI, `period_us` per PWM cycle
    pub fn new(period_us: u16) -> Self {
        let (port, pin) = pins::HAPTIC;
        configure(port, pin, mode::ALTERNATE_PUSH_PULL);

        let max_duty = period_us.saturating_sub(1).max(1);
        write_reg(reg::TIM2 + reg::TIM_PSC, 7);
        write_reg(reg::TIM2 + reg::TIM_ATRLR, max_duty as u32);
        write_reg(reg::TIM2 + reg::TIM_CH1CVR, 0);
        // OC1M = PWM mode 1, OC1PE preload
        modify_reg(reg::TIM2 + reg::TIM_CHCTLR1, |v| (v & !0xFF) | (0b110 << 4) | (1 << 3));
        modify_reg(reg::TIM2 + reg::TIM_CCER, |v| v | 1);
        modify_reg(reg::TIM2 + reg::TIM_CTLR1, |v| v | 1);
        Self { max_duty }
    }
}

impl embedded_hal::pwm::ErrorType for Tim2Pwm {
    type Error = Infallible;
}

impl SetDutyCycle for Tim2Pwm {
    fn max_duty_cycle(&self) -> u16 {
        self.max_duty
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
        write_reg(reg::TIM2 + reg::TIM_CH1CVR, duty.min(self.max_duty) as u32);
        Ok(())
    }
}

/// Flash controller errors
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    OutOfBounds,
    NotAligned,
    /// PGERR: target was not erased
    Program,
    /// WRPRTERR: page is write protected
    WriteProtected,
}

impl NorFlashError for FlashError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            FlashError::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            FlashError::NotAligned => NorFlashErrorKind::NotAligned,
            FlashError::Program | FlashError::WriteProtected => NorFlashErrorKind::Other,
        }
    }
}

/// On-chip flash through the flash program/erase controller.
///
/// Offsets are relative to the start of flash. Erase works on 4 KiB units of
/// four hardware pages; programming is done in half-words.
pub struct Ch32Flash {
    _private: (),
}

impl Ch32Flash {
    pub fn new() -> Self {
        Self { _private: () }
    }

    fn check(offset: u32, len: usize, align: u32) -> Result<(), FlashError> {
        if offset % align != 0 || len as u32 % align != 0 {
            return Err(FlashError::NotAligned);
        }
        match offset.checked_add(len as u32) {
            Some(end) if end <= memory::FLASH_SIZE => Ok(()),
            _ => Err(FlashError::OutOfBounds),
        }
    }

    fn unlock() {
        if read_reg(reg::FPEC + reg::FLASH_CTLR) & reg::CTLR_LOCK != 0 {
            write_reg(reg::FPEC + reg::FLASH_KEYR, reg::FLASH_KEY1);
            write_reg(reg::FPEC + reg::FLASH_KEYR, reg::FLASH_KEY2);
        }
    }

    fn lock() {
        modify_reg(reg::FPEC + reg::FLASH_CTLR, |v| v | reg::CTLR_LOCK);
    }

    fn wait_idle() -> Result<(), FlashError> {
        while read_reg(reg::FPEC + reg::FLASH_STATR) & reg::STATR_BSY != 0 {}

        let status = read_reg(reg::FPEC + reg::FLASH_STATR);
        // Flags are cleared by writing one
        write_reg(
            reg::FPEC + reg::FLASH_STATR,
            reg::STATR_EOP | reg::STATR_PGERR | reg::STATR_WRPRTERR,
        );
        if status & reg::STATR_WRPRTERR != 0 {
            return Err(FlashError::WriteProtected);
        }
        if status & reg::STATR_PGERR != 0 {
            return Err(FlashError::Program);
        }
        Ok(())
    }

    fn erase_page(address: u32) -> Result<(), FlashError> {
        modify_reg(reg::FPEC + reg::FLASH_CTLR, |v| v | reg::CTLR_PER);
        write_reg(reg::FPEC + reg::FLASH_ADDR, address);
        modify_reg(reg::FPEC + reg::FLASH_CTLR, |v| v | reg::CTLR_STRT);
        let result = Self::wait_idle();
        modify_reg(reg::FPEC + reg::FLASH_CTLR, |v| v & !reg::CTLR_PER);
        result
    }

    fn program_half_word(address: u32, value: u16) -> Result<(), FlashError> {
        modify_reg(reg::FPEC + reg::FLASH_CTLR, |v| v | reg::CTLR_PG);
        // SAFETY: address is inside the unlocked, bounds-checked flash range
        unsafe { write_volatile(address as usize as *mut u16, value) };
        let result = Self::wait_idle();
        modify_reg(reg::FPEC + reg::FLASH_CTLR, |v| v & !reg::CTLR_PG);
        result
    }
}

impl Default for Ch32Flash {
    fn default() -> Self {
        Self::new()
    }
}

impl FlashErrorType for Ch32Flash {
    type Error = FlashError;
}

impl ReadNorFlash for Ch32Flash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        Self::check(offset, bytes.len(), 1)?;
        let start = reg::FLASH_BASE + offset as usize;
        for (i, byte) in bytes.iter_mut().enumerate() {
            // SAFETY: bounds checked against the flash size
            *byte = unsafe { read_volatile((start + i) as *const u8) };
        }
        Ok(())
    }

    fn capacity(&self) -> usize {
        memory::FLASH_SIZE as usize
    }
}

impl NorFlash for Ch32Flash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = memory::SECTOR_SIZE as usize;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if to < from {
            return Err(FlashError::OutOfBounds);
        }
        Self::check(from, (to - from) as usize, memory::SECTOR_SIZE)?;

        Self::unlock();
        let mut result = Ok(());
        for page in (from..to).step_by(memory::PAGE_SIZE as usize) {
            result = Self::erase_page(reg::FLASH_BASE as u32 + page);
            if result.is_err() {
                break;
            }
        }
        Self::lock();
        result
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        Self::check(offset, bytes.len(), Self::WRITE_SIZE as u32)?;

        Self::unlock();
        let mut result = Ok(());
        for (i, pair) in bytes.chunks_exact(2).enumerate() {
            let address = reg::FLASH_BASE as u32 + offset + 2 * i as u32;
            result = Self::program_half_word(address, u16::from_le_bytes([pair[0], pair[1]]));
            if result.is_err() {
                break;
            }
        }
        Self::lock();
        result
    }
}

/// Board light: RGB LED with common anode
pub type BoardLight = EmbeddedHalLight<Ch32OutputPin, Ch32OutputPin, Ch32OutputPin>;
/// Board haptic motor on TIM2 PWM
pub type BoardHaptic = EmbeddedHalHaptic<Tim2Pwm>;
/// Board vibration bypass switch
pub type BoardBypass = EmbeddedHalBypass<Ch32InputPin>;

/// Peripherals handed to the metronome and battery tasks
pub struct Board {
    pub light: BoardLight,
    pub haptic: BoardHaptic,
    pub bypass: BoardBypass,
    pub flash: Ch32Flash,
    pub low_battery: Ch32OutputPin,
}

/// Enable clocks and configure every pin the metronome uses
pub fn init_board() -> Board {
    modify_reg(reg::RCC_APB2PCENR, |v| {
        v | reg::RCC_IOPAEN | reg::RCC_IOPBEN | reg::RCC_AFIOEN
    });
    modify_reg(reg::RCC_APB1PCENR, |v| v | reg::RCC_TIM2EN);

    let mut light = EmbeddedHalLight::new(
        Ch32OutputPin::new(pins::LED_RED),
        Ch32OutputPin::new(pins::LED_GREEN),
        Ch32OutputPin::new(pins::LED_BLUE),
        true,
    );
    // Start dark
    if metronome_core::LightOutput::show(&mut light, metronome_core::Color::Off).is_err() {
        #[cfg(feature = "defmt")]
        defmt::warn!("💡 LED init failed");
    }

    let mut low_battery = Ch32OutputPin::new(pins::LOW_BATTERY);
    let _ = low_battery.set_low();

    #[cfg(feature = "defmt")]
    defmt::info!("🔌 CH32V203 board initialized");

    Board {
        light,
        // 5 kHz PWM
        haptic: EmbeddedHalHaptic::new(Tim2Pwm::new(200)),
        bypass: EmbeddedHalBypass::new(Ch32InputPin::pull_up(pins::BYPASS)),
        flash: Ch32Flash::new(),
        low_battery,
    }
}
