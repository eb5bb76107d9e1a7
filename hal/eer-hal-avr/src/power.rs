//! Power driver: sleep modes and wake-up sources
//!
//! | Mode        | SMCR sleep mode |
//! |-------------|-----------------|
//! | `Run`       | none            |
//! | `Sleep`     | idle            |
//! | `DeepSleep` | power-save      |
//! | `Standby`   | power-down      |
//!
//! Wake sources are INT0/INT1 (`Pin` ids 0 and 1, shared with the GPIO
//! external interrupts), Timer2 overflow (`Timer` id 0) and the watchdog
//! interrupt (`Watchdog` id 0). The vectors for these call
//! [`AvrPower::record_wakeup`].

use eer_hal::power::{Power, PowerMode, Wakeup, WakeupSource};
use eer_hal::{HalError, HalResult};

use crate::cpu::Cpu;
use crate::regs::{self, exti, pm, tc, RegisterBus};
use crate::shared::Shared;

/// Supply voltage on a 5 V board
pub const SUPPLY_MILLIVOLTS: u16 = 5000;

/// Typical draw per mode in milliwatts
pub fn consumption_mw(mode: PowerMode) -> u16 {
    match mode {
        PowerMode::Run => 15,
        PowerMode::Sleep => 5,
        PowerMode::DeepSleep => 2,
        PowerMode::Standby => 1,
    }
}

fn sleep_bits(mode: PowerMode) -> Option<u8> {
    match mode {
        PowerMode::Run => None,
        PowerMode::Sleep => Some(pm::SM_IDLE),
        PowerMode::DeepSleep => Some(pm::SM_POWER_SAVE),
        PowerMode::Standby => Some(pm::SM_POWER_DOWN),
    }
}

fn pin_interrupt(id: u8) -> HalResult<u8> {
    match id {
        0 => Ok(exti::INT0),
        1 => Ok(exti::INT1),
        _ => Err(HalError::InvalidParameter),
    }
}

#[derive(Clone, Copy)]
struct PowerState {
    initialized: bool,
    mode: PowerMode,
    wakeup: Option<Wakeup>,
}

impl PowerState {
    const RESET: Self = Self {
        initialized: false,
        mode: PowerMode::Run,
        wakeup: None,
    };
}

/// Sleep controller
pub struct AvrPower<R, C> {
    regs: R,
    cpu: C,
    state: Shared<PowerState>,
}

impl<R: RegisterBus, C: Cpu> AvrPower<R, C> {
    pub const fn new(regs: R, cpu: C) -> Self {
        Self {
            regs,
            cpu,
            state: Shared::new(PowerState::RESET),
        }
    }

    /// Wake-up service routine body
    pub fn record_wakeup(&self, source: WakeupSource, id: u8) {
        self.state
            .update(|s| s.wakeup = Some(Wakeup { source, id }));
    }

    fn check_initialized(&self) -> HalResult<()> {
        if self.state.get().initialized {
            Ok(())
        } else {
            Err(HalError::Error)
        }
    }

    fn write_watchdog(&self, value: u8) {
        critical_section::with(|_| {
            self.regs.write8(regs::WDTCSR, pm::WDCE | pm::WDE);
            self.regs.write8(regs::WDTCSR, value);
        });
    }

    fn set_wakeup(&self, source: WakeupSource, id: u8, enable: bool) -> HalResult<()> {
        self.check_initialized()?;
        match source {
            WakeupSource::Pin => {
                let mask = pin_interrupt(id)?;
                if enable {
                    self.regs.set_bits(regs::EIMSK, mask);
                } else {
                    self.regs.clear_bits(regs::EIMSK, mask);
                }
            }
            WakeupSource::Timer if id == 0 => {
                if enable {
                    self.regs.write8(regs::TCCR2A, 0);
                    self.regs.write8(regs::TIFR2, tc::TOV2);
                    self.regs.set_bits(regs::TIMSK2, tc::TOIE2);
                    self.regs.write8(regs::TCCR2B, tc::CS2_DIV1024);
                } else {
                    self.regs.write8(regs::TCCR2B, 0);
                    self.regs.clear_bits(regs::TIMSK2, tc::TOIE2);
                }
            }
            WakeupSource::Watchdog if id == 0 => {
                self.write_watchdog(if enable {
                    pm::WDIF | pm::WDIE | pm::WDTO_1S
                } else {
                    0
                });
            }
            WakeupSource::Timer | WakeupSource::Watchdog => {
                return Err(HalError::InvalidParameter);
            }
            WakeupSource::Rtc => return Err(HalError::NotSupported),
        }
        debug!("power: wakeup {} {} -> {}", source, id, enable);
        Ok(())
    }
}

impl<R: RegisterBus, C: Cpu> Power for AvrPower<R, C> {
    fn init(&self) -> HalResult<()> {
        self.regs.write8(regs::SMCR, 0);
        self.state.set(PowerState {
            initialized: true,
            ..PowerState::RESET
        });
        Ok(())
    }

    fn deinit(&self) -> HalResult<()> {
        if self.state.get().initialized {
            self.set_wakeup(WakeupSource::Timer, 0, false)?;
            self.set_wakeup(WakeupSource::Watchdog, 0, false)?;
            self.regs.clear_bits(regs::EIMSK, exti::INT0 | exti::INT1);
        }
        self.regs.write8(regs::SMCR, 0);
        self.state.set(PowerState::RESET);
        Ok(())
    }

    fn set_mode(&self, mode: PowerMode) -> HalResult<()> {
        self.check_initialized()?;
        let Some(bits) = sleep_bits(mode) else {
            self.state.update(|s| s.mode = PowerMode::Run);
            return Ok(());
        };

        trace!("power: entering {}", mode);
        self.state.update(|s| s.mode = mode);
        self.regs.write8(regs::SMCR, bits | pm::SE);
        // Interrupts must be on or nothing can wake the core
        self.cpu.enable_interrupts();
        self.cpu.sleep();
        self.regs.clear_bits(regs::SMCR, pm::SE);
        self.state.update(|s| s.mode = PowerMode::Run);
        trace!("power: awake");
        Ok(())
    }

    fn get_mode(&self) -> HalResult<PowerMode> {
        Ok(self.state.get().mode)
    }

    fn enable_wakeup_source(&self, source: WakeupSource, id: u8) -> HalResult<()> {
        self.set_wakeup(source, id, true)
    }

    fn disable_wakeup_source(&self, source: WakeupSource, id: u8) -> HalResult<()> {
        self.set_wakeup(source, id, false)
    }

    fn get_wakeup_source(&self) -> HalResult<Option<Wakeup>> {
        Ok(self.state.get().wakeup)
    }

    fn get_voltage(&self) -> HalResult<u16> {
        Ok(SUPPLY_MILLIVOLTS)
    }

    fn get_power_consumption(&self) -> HalResult<u16> {
        Ok(consumption_mw(self.state.get().mode))
    }
}
