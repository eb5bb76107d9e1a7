//! Composite HAL handle
//!
//! [`Hal`] bundles one implementation of each capability. A backend builds a
//! single instance at startup and hands it to application code by shared
//! reference; the fields are never reassigned afterwards.

use crate::adc::Adc;
use crate::error::HalResult;
use crate::gpio::Gpio;
use crate::i2c::I2c;
use crate::power::Power;
use crate::spi::Spi;
use crate::system::System;
use crate::timer::Timer;
use crate::uart::Uart;

/// One reference per peripheral capability
pub struct Hal<'a, G, A, U, S, I, T, Y, P> {
    pub gpio: &'a G,
    pub adc: &'a A,
    pub uart: &'a U,
    pub spi: &'a S,
    pub i2c: &'a I,
    pub timer: &'a T,
    pub system: &'a Y,
    pub power: &'a P,
}

impl<'a, G, A, U, S, I, T, Y, P> Hal<'a, G, A, U, S, I, T, Y, P>
where
    G: Gpio,
    A: Adc,
    U: Uart,
    S: Spi,
    I: I2c,
    T: Timer,
    Y: System,
    P: Power,
{
    #[allow(clippy::too_many_arguments)]
    pub const fn new(
        gpio: &'a G,
        adc: &'a A,
        uart: &'a U,
        spi: &'a S,
        i2c: &'a I,
        timer: &'a T,
        system: &'a Y,
        power: &'a P,
    ) -> Self {
        Self {
            gpio,
            adc,
            uart,
            spi,
            i2c,
            timer,
            system,
            power,
        }
    }

    /// Bring up the peripherals that need no configuration
    ///
    /// System goes first because every timeout depends on its tick.
    /// Configured peripherals (ADC, UART, SPI, I2C, timer) are initialised
    /// by the application with their own config.
    pub fn init_all(&self) -> HalResult<()> {
        self.system.init()?;
        self.gpio.init()?;
        self.power.init()
    }

    /// Shut every peripheral down, System last
    ///
    /// Continues past failures and reports the first one.
    pub fn deinit_all(&self) -> HalResult<()> {
        let results = [
            self.power.deinit(),
            self.timer.deinit(),
            self.i2c.deinit(),
            self.spi.deinit(),
            self.uart.deinit(),
            self.adc.deinit(),
            self.gpio.deinit(),
            self.system.deinit(),
        ];
        results.into_iter().collect()
    }
}
