//! Driver instances and interrupt vectors for the ATmega328P
//!
//! Every driver lives in a `static` and [`HAL`] bundles references to them.
//! The vectors below forward each interrupt to the matching driver routine,
//! which dispatches to the registered callback.

use eer_hal::Hal;

use crate::adc::AvrAdc;
use crate::cpu::AvrCpu;
use crate::gpio::AvrGpio;
use crate::i2c::AvrI2c;
use crate::power::AvrPower;
use crate::regs::Mmio;
use crate::spi::AvrSpi;
use crate::system::AvrSystem;
use crate::timer::AvrTimer;
use crate::uart::AvrUart;

pub type System = AvrSystem<Mmio, AvrCpu>;
/// Timeouts of the bus drivers are measured against the system tick
pub type Tick = &'static System;

pub static SYSTEM: System = AvrSystem::new(Mmio, AvrCpu);
pub static GPIO: AvrGpio<Mmio> = AvrGpio::new(Mmio);
pub static ADC: AvrAdc<Mmio> = AvrAdc::new(Mmio);
pub static UART: AvrUart<Mmio, Tick> = AvrUart::new(Mmio, &SYSTEM);
pub static SPI: AvrSpi<Mmio, Tick> = AvrSpi::new(Mmio, &SYSTEM);
pub static I2C: AvrI2c<Mmio, Tick> = AvrI2c::new(Mmio, &SYSTEM);
pub static TIMER: AvrTimer<Mmio> = AvrTimer::new(Mmio);
pub static POWER: AvrPower<Mmio, AvrCpu> = AvrPower::new(Mmio, AvrCpu);

/// The board HAL
pub type BoardHal = Hal<
    'static,
    AvrGpio<Mmio>,
    AvrAdc<Mmio>,
    AvrUart<Mmio, Tick>,
    AvrSpi<Mmio, Tick>,
    AvrI2c<Mmio, Tick>,
    AvrTimer<Mmio>,
    System,
    AvrPower<Mmio, AvrCpu>,
>;

pub static HAL: BoardHal = Hal::new(
    &GPIO, &ADC, &UART, &SPI, &I2C, &TIMER, &SYSTEM, &POWER,
);

/// Vector names shadow the driver statics, hence the `super::` paths
#[allow(non_snake_case)]
mod vectors {
    use eer_hal::power::WakeupSource;

    use crate::gpio::Port;

    #[avr_device::interrupt(atmega328p)]
    fn TIMER0_COMPA() {
        super::SYSTEM.on_tick();
    }

    #[avr_device::interrupt(atmega328p)]
    fn INT0() {
        super::POWER.record_wakeup(WakeupSource::Pin, 0);
        super::GPIO.on_external_interrupt(0);
    }

    #[avr_device::interrupt(atmega328p)]
    fn INT1() {
        super::POWER.record_wakeup(WakeupSource::Pin, 1);
        super::GPIO.on_external_interrupt(1);
    }

    #[avr_device::interrupt(atmega328p)]
    fn PCINT0() {
        super::GPIO.on_pin_change(Port::B);
    }

    #[avr_device::interrupt(atmega328p)]
    fn PCINT1() {
        super::GPIO.on_pin_change(Port::C);
    }

    #[avr_device::interrupt(atmega328p)]
    fn PCINT2() {
        super::GPIO.on_pin_change(Port::D);
    }

    #[avr_device::interrupt(atmega328p)]
    fn ADC() {
        super::ADC.on_conversion_complete();
    }

    #[avr_device::interrupt(atmega328p)]
    fn USART_RX() {
        super::UART.on_rx_complete();
    }

    #[avr_device::interrupt(atmega328p)]
    fn USART_TX() {
        super::UART.on_tx_complete();
    }

    #[avr_device::interrupt(atmega328p)]
    fn TIMER1_OVF() {
        super::TIMER.on_overflow();
    }

    #[avr_device::interrupt(atmega328p)]
    fn TIMER1_COMPA() {
        super::TIMER.on_compare(0);
    }

    #[avr_device::interrupt(atmega328p)]
    fn TIMER1_COMPB() {
        super::TIMER.on_compare(1);
    }

    #[avr_device::interrupt(atmega328p)]
    fn TIMER1_CAPT() {
        super::TIMER.on_capture();
    }

    #[avr_device::interrupt(atmega328p)]
    fn TIMER2_OVF() {
        super::POWER.record_wakeup(WakeupSource::Timer, 0);
    }

    #[avr_device::interrupt(atmega328p)]
    fn WDT() {
        super::POWER.record_wakeup(WakeupSource::Watchdog, 0);
    }
}
