//! Embassy time driver on the QingKe V4 SysTick
//!
//! The 64-bit SysTick counter runs from HCLK/8 (1 MHz on the 8 MHz HSI), so
//! one tick is one microsecond. A single compare alarm serves the executor.

use core::cell::Cell;
use core::ptr::{read_volatile, write_volatile};

use critical_section::{CriticalSection, Mutex};
use embassy_time_driver::{AlarmHandle, Driver};
use portable_atomic::{AtomicBool, Ordering};

const STK_BASE: usize = 0xE000_F000;
const STK_CTLR: usize = STK_BASE;
const STK_SR: usize = STK_BASE + 0x04;
const STK_CNTL: usize = STK_BASE + 0x08;
const STK_CNTH: usize = STK_BASE + 0x0C;
const STK_CMPLR: usize = STK_BASE + 0x10;
const STK_CMPHR: usize = STK_BASE + 0x14;

/// STE: counter enable
const CTLR_STE: u32 = 1 << 0;
/// STIE: compare interrupt enable
const CTLR_STIE: u32 = 1 << 1;
/// CNTIF: compare flag
const SR_CNTIF: u32 = 1 << 0;

fn read(addr: usize) -> u32 {
    // SAFETY: SysTick register on the QingKe core
    unsafe { read_volatile(addr as *const u32) }
}

fn write(addr: usize, value: u32) {
    // SAFETY: SysTick register on the QingKe core
    unsafe { write_volatile(addr as *mut u32, value) }
}

struct AlarmState {
    timestamp: Cell<u64>,
    callback: Cell<Option<(fn(*mut ()), *mut ())>>,
}

// SAFETY: only touched inside critical sections on a single core
unsafe impl Send for AlarmState {}

/// SysTick time driver
pub struct SysTickDriver {
    allocated: AtomicBool,
    alarm: Mutex<AlarmState>,
}

impl SysTickDriver {
    const fn new() -> Self {
        Self {
            allocated: AtomicBool::new(false),
            alarm: Mutex::new(AlarmState {
                timestamp: Cell::new(u64::MAX),
                callback: Cell::new(None),
            }),
        }
    }

    /// Start the counter from zero
    pub fn init(&self) {
        write(STK_CTLR, 0);
        write(STK_CNTL, 0);
        write(STK_CNTH, 0);
        write(STK_CMPLR, u32::MAX);
        write(STK_CMPHR, u32::MAX);
        write(STK_SR, 0);
        write(STK_CTLR, CTLR_STE);
    }

    fn counter() -> u64 {
        // Re-read the high word until it is stable across the low read
        loop {
            let high = read(STK_CNTH);
            let low = read(STK_CNTL);
            if read(STK_CNTH) == high {
                return ((high as u64) << 32) | low as u64;
            }
        }
    }

    fn arm(&self, cs: CriticalSection, timestamp: u64) {
        self.alarm.borrow(cs).timestamp.set(timestamp);
        write(STK_CTLR, read(STK_CTLR) & !CTLR_STIE);
        write(STK_CMPLR, timestamp as u32);
        write(STK_CMPHR, (timestamp >> 32) as u32);
        write(STK_SR, 0);
        write(STK_CTLR, read(STK_CTLR) | CTLR_STIE);
    }

    fn disarm(&self, cs: CriticalSection) {
        self.alarm.borrow(cs).timestamp.set(u64::MAX);
        write(STK_CTLR, read(STK_CTLR) & !CTLR_STIE);
    }

    /// Compare-match interrupt
    pub fn on_interrupt(&self) {
        if read(STK_SR) & SR_CNTIF == 0 {
            return;
        }
        write(STK_SR, 0);

        let callback = critical_section::with(|cs| {
            let alarm = self.alarm.borrow(cs);
            if alarm.timestamp.get() > Self::counter() {
                return None;
            }
            self.disarm(cs);
            alarm.callback.get()
        });
        if let Some((f, ctx)) = callback {
            f(ctx);
        }
    }
}

impl Driver for SysTickDriver {
    fn now(&self) -> u64 {
        Self::counter()
    }

    unsafe fn allocate_alarm(&self) -> Option<AlarmHandle> {
        if self.allocated.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(AlarmHandle::new(0))
        }
    }

    fn set_alarm_callback(&self, _alarm: AlarmHandle, callback: fn(*mut ()), ctx: *mut ()) {
        critical_section::with(|cs| {
            self.alarm.borrow(cs).callback.set(Some((callback, ctx)));
        });
    }

    fn set_alarm(&self, _alarm: AlarmHandle, timestamp: u64) -> bool {
        critical_section::with(|cs| {
            if timestamp <= Self::counter() {
                self.disarm(cs);
                return false;
            }
            self.arm(cs, timestamp);
            true
        })
    }
}

embassy_time_driver::time_driver_impl!(static DRIVER: SysTickDriver = SysTickDriver::new());

/// Start the time base; call once before the executor runs
pub fn init() {
    DRIVER.init();
}

/// SysTick interrupt entry
#[no_mangle]
extern "C" fn SysTick() {
    DRIVER.on_interrupt();
}

// Critical section implementation for single-core RISC-V
critical_section::set_impl!(RiscvCriticalSection);

struct RiscvCriticalSection;

unsafe impl critical_section::Impl for RiscvCriticalSection {
    unsafe fn acquire() -> critical_section::RawRestoreState {
        let mstatus = riscv::register::mstatus::read();
        riscv::register::mstatus::clear_mie();
        mstatus.mie() as u8
    }

    unsafe fn release(was_enabled: critical_section::RawRestoreState) {
        if was_enabled != 0 {
            riscv::register::mstatus::set_mie();
        }
    }
}
