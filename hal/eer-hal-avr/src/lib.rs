//! ATmega328P backend for the EER hardware abstraction layer
//!
//! Implements every `eer-hal` capability on the ATmega328P at 16 MHz:
//!
//! - GPIO with INT0/INT1 edge interrupts and pin-change interrupts
//! - ADC with polled and interrupt-driven conversions
//! - USART0 with an interrupt-fed receive buffer
//! - SPI master, TWI (I2C) master
//! - Timer1 as counter, compare/capture source and PWM generator
//! - Timer0 millisecond tick, reset, sleep modes and wake sources
//!
//! Drivers reach the hardware through [`regs::RegisterBus`] and the core
//! through [`cpu::Cpu`], so their logic runs under host tests against a
//! simulated register file. On the AVR target [`platform`] provides the
//! driver statics, the [`platform::HAL`] handle and the interrupt vectors.
//!
//! The `embedded` module implements the `embedded-hal` and `embedded-io`
//! traits on the drivers for use with ecosystem device crates.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(
    target_arch = "avr",
    feature(asm_experimental_arch, abi_avr_interrupt)
)]

#[macro_use]
mod fmt;

pub mod adc;
pub mod cpu;
pub mod embedded;
pub mod gpio;
pub mod i2c;
#[cfg(target_arch = "avr")]
pub mod platform;
pub mod power;
pub mod regs;
mod shared;
pub mod spi;
pub mod system;
pub mod timer;
pub mod uart;

#[cfg(test)]
mod sim;

/// Core clock frequency in Hz
pub const F_CPU: u32 = 16_000_000;

pub use adc::{AdcChannel, AvrAdc};
pub use gpio::{AvrGpio, AvrPin, Port};
pub use i2c::{AvrI2c, Twi0};
pub use power::AvrPower;
pub use spi::{AvrSpi, Spi0};
pub use system::AvrSystem;
pub use timer::{AvrTimer, Timer1};
pub use uart::{AvrUart, Usart0};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimBus, SimClock, SimCpu};
    use eer_hal::{Hal, Power, System};

    #[test]
    fn test_hal_bring_up_and_teardown() {
        let bus = SimBus::new();
        let clock = SimClock::running();
        let system = AvrSystem::new(&bus, SimCpu::default());
        let gpio = AvrGpio::new(&bus);
        let adc = AvrAdc::new(&bus);
        let uart = AvrUart::new(&bus, &clock);
        let spi = AvrSpi::new(&bus, &clock);
        let i2c = AvrI2c::new(&bus, &clock);
        let timer = AvrTimer::new(&bus);
        let power = AvrPower::new(&bus, SimCpu::default());

        let hal = Hal::new(&gpio, &adc, &uart, &spi, &i2c, &timer, &system, &power);
        hal.init_all().unwrap();
        assert!(hal.system.get_tick().is_ok());
        assert_eq!(hal.power.get_voltage(), Ok(5000));

        hal.deinit_all().unwrap();
        assert_eq!(system.get_tick(), Err(eer_hal::HalError::Error));
        assert_eq!(bus.get(regs::TCCR0B), 0);
    }
}
