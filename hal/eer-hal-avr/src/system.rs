//! System driver: millisecond tick, reset and busy-wait delays
//!
//! Timer0 runs in CTC mode at clk/64 with `OCR0A = 249`, which gives one
//! compare match per millisecond at 16 MHz. The compare ISR calls
//! [`AvrSystem::on_tick`]. Delays are cycle counted so they work with
//! interrupts disabled and before [`System::init`].

use eer_hal::system::{ResetKind, System};
use eer_hal::{Clock, HalError, HalResult};

use crate::cpu::Cpu;
use crate::regs::{self, pm, tc, RegisterBus};
use crate::shared::Shared;
use crate::F_CPU;

/// Timer0 compare value for a 1 ms period at clk/64
pub const TICK_COMPARE: u8 = (F_CPU / 64 / 1000 - 1) as u8;

const CYCLES_PER_US: u32 = F_CPU / 1_000_000;

/// System tick and core control
pub struct AvrSystem<R, C> {
    regs: R,
    pub(crate) cpu: C,
    initialized: Shared<bool>,
    ticks: Shared<u32>,
}

impl<R: RegisterBus, C: Cpu> AvrSystem<R, C> {
    pub const fn new(regs: R, cpu: C) -> Self {
        Self {
            regs,
            cpu,
            initialized: Shared::new(false),
            ticks: Shared::new(0),
        }
    }

    /// Timer0 compare-match service routine body
    pub fn on_tick(&self) {
        self.ticks.update(|t| *t = t.wrapping_add(1));
    }

    /// Spin for `us` microseconds by counting CPU cycles
    ///
    /// Independent of the tick, so it works before `init` and with
    /// interrupts disabled.
    pub fn busy_wait_us(&self, us: u32) {
        let mut remaining = us;
        while remaining > 0 {
            let chunk = remaining.min(u32::MAX / CYCLES_PER_US);
            self.cpu.delay_cycles(chunk * CYCLES_PER_US);
            remaining -= chunk;
        }
    }

    pub fn busy_wait_ms(&self, ms: u32) {
        for _ in 0..ms {
            self.busy_wait_us(1000);
        }
    }

    /// Turn off a watchdog left running by a watchdog reset
    fn disarm_watchdog(&self) {
        critical_section::with(|_| {
            self.regs.clear_bits(regs::MCUSR, pm::WDRF);
            // Timed sequence: WDCE and WDE, then the new value within 4 cycles
            self.regs.write8(regs::WDTCSR, pm::WDCE | pm::WDE);
            self.regs.write8(regs::WDTCSR, 0);
        });
    }

    fn arm_watchdog(&self) {
        critical_section::with(|_| {
            self.regs.write8(regs::WDTCSR, pm::WDCE | pm::WDE);
            self.regs.write8(regs::WDTCSR, pm::WDE | pm::WDTO_15MS);
        });
    }

    fn check_initialized(&self) -> HalResult<()> {
        if self.initialized.get() {
            Ok(())
        } else {
            Err(HalError::Error)
        }
    }
}

impl<R: RegisterBus, C: Cpu> Clock for AvrSystem<R, C> {
    fn now_ms(&self) -> u32 {
        self.ticks.get()
    }

    fn is_running(&self) -> bool {
        self.initialized.get()
    }
}

impl<R: RegisterBus, C: Cpu> System for AvrSystem<R, C> {
    fn init(&self) -> HalResult<()> {
        if self.initialized.get() {
            return Ok(());
        }
        self.disarm_watchdog();

        self.regs.write8(regs::TCCR0B, 0);
        self.regs.write8(regs::TCCR0A, tc::WGM01);
        self.regs.write8(regs::TCNT0, 0);
        self.regs.write8(regs::OCR0A, TICK_COMPARE);
        self.regs.write8(regs::TIFR0, tc::OCF0A);
        self.regs.set_bits(regs::TIMSK0, tc::OCIE0A);
        self.regs.write8(regs::TCCR0B, tc::CS0_DIV64);

        self.ticks.set(0);
        self.initialized.set(true);
        self.cpu.enable_interrupts();
        debug!("system: tick started");
        Ok(())
    }

    fn deinit(&self) -> HalResult<()> {
        self.regs.write8(regs::TCCR0B, 0);
        self.regs.clear_bits(regs::TIMSK0, tc::OCIE0A);
        self.initialized.set(false);
        Ok(())
    }

    fn reset(&self, kind: ResetKind) -> HalResult<()> {
        info!("system: reset ({})", kind);
        self.cpu.disable_interrupts();
        match kind {
            ResetKind::Soft => self.cpu.jump_to_reset(),
            ResetKind::Hard | ResetKind::Watchdog => {
                self.arm_watchdog();
                self.cpu.wait_for_reset();
            }
        }
        // Still running: the core could not be reset
        self.cpu.enable_interrupts();
        Err(HalError::Error)
    }

    fn enable_interrupts(&self) -> HalResult<()> {
        self.cpu.enable_interrupts();
        Ok(())
    }

    fn disable_interrupts(&self) -> HalResult<()> {
        self.cpu.disable_interrupts();
        Ok(())
    }

    fn delay_ms(&self, ms: u32) -> HalResult<()> {
        self.busy_wait_ms(ms);
        Ok(())
    }

    fn delay_us(&self, us: u32) -> HalResult<()> {
        self.busy_wait_us(us);
        Ok(())
    }

    fn get_tick(&self) -> HalResult<u32> {
        self.check_initialized()?;
        Ok(self.ticks.get())
    }

    fn get_uptime_ms(&self) -> HalResult<u32> {
        self.get_tick()
    }
}
