//! GPIO driver for ports B, C and D
//!
//! Each pin is driven through its port's `DDRx`, `PORTx` and `PINx`
//! registers. Edge interrupts use INT0/INT1 for single-edge triggers (pins
//! PD2 and PD3 only) and the pin-change interrupts for `Trigger::Both`, which
//! works on every pin.
//!
//! Pull-down inputs and open-drain outputs do not exist on this core and are
//! rejected with `NotSupported`. The speed setting is ignored. In the
//! alternate modes the pin is left as an input and the enabled peripheral
//! takes over; the alternate function number is ignored since each pin has
//! its function fixed by silicon.

use eer_hal::callback::{CallbackRegistry, Handler, UserData};
use eer_hal::gpio::{Gpio, GpioConfig, GpioIrq, Level, PinMode, Trigger};
use eer_hal::{HalError, HalResult};

use crate::regs::{self, bit, exti, RegisterBus};
use crate::shared::Shared;

/// Number of addressable pins (3 ports x 8 bits)
pub const PIN_COUNT: usize = 24;

/// I/O port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Port {
    B,
    C,
    D,
}

impl Port {
    const ALL: [Port; 3] = [Port::B, Port::C, Port::D];

    fn index(self) -> usize {
        match self {
            Port::B => 0,
            Port::C => 1,
            Port::D => 2,
        }
    }

    fn pin_reg(self) -> usize {
        match self {
            Port::B => regs::PINB,
            Port::C => regs::PINC,
            Port::D => regs::PIND,
        }
    }

    pub(crate) fn ddr_reg(self) -> usize {
        self.pin_reg() + 1
    }

    pub(crate) fn port_reg(self) -> usize {
        self.pin_reg() + 2
    }

    fn pcmsk_reg(self) -> usize {
        match self {
            Port::B => regs::PCMSK0,
            Port::C => regs::PCMSK1,
            Port::D => regs::PCMSK2,
        }
    }

    /// Bit in `PCICR`/`PCIFR` for this port
    fn pcie(self) -> u8 {
        bit(self.index() as u8)
    }
}

/// Pin identifier: port plus bit number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AvrPin {
    pub port: Port,
    pub bit: u8,
}

impl AvrPin {
    pub const fn new(port: Port, bit: u8) -> Self {
        Self { port, bit }
    }

    pub const fn b(bit: u8) -> Self {
        Self::new(Port::B, bit)
    }

    pub const fn c(bit: u8) -> Self {
        Self::new(Port::C, bit)
    }

    pub const fn d(bit: u8) -> Self {
        Self::new(Port::D, bit)
    }

    /// Reject bits past 7 and PC7, which is not bonded out
    pub fn validate(self) -> HalResult<Self> {
        if self.bit > 7 || (self.port == Port::C && self.bit == 7) {
            return Err(HalError::InvalidParameter);
        }
        Ok(self)
    }

    pub(crate) fn mask(self) -> u8 {
        bit(self.bit)
    }

    fn index(self) -> usize {
        self.port.index() * 8 + usize::from(self.bit)
    }

    /// External interrupt number for PD2 (INT0) and PD3 (INT1)
    pub fn external_interrupt(self) -> Option<u8> {
        match (self.port, self.bit) {
            (Port::D, 2) => Some(0),
            (Port::D, 3) => Some(1),
            _ => None,
        }
    }

    /// ADC channel for PC0..PC5
    pub fn adc_channel(self) -> Option<u8> {
        match (self.port, self.bit) {
            (Port::C, b) if b <= 5 => Some(b),
            _ => None,
        }
    }
}

/// GPIO driver
pub struct AvrGpio<R> {
    regs: R,
    triggers: Shared<[Trigger; PIN_COUNT]>,
    /// Bit per pin index: interrupt unmasked
    enabled: Shared<u32>,
    /// Last sampled `PINx` per port, for pin-change edge detection
    levels: Shared<[u8; 3]>,
    callbacks: CallbackRegistry<GpioIrq<AvrPin>, PIN_COUNT>,
}

impl<R: RegisterBus> AvrGpio<R> {
    pub const fn new(regs: R) -> Self {
        Self {
            regs,
            triggers: Shared::new([Trigger::None; PIN_COUNT]),
            enabled: Shared::new(0),
            levels: Shared::new([0; 3]),
            callbacks: CallbackRegistry::new(),
        }
    }

    fn reset_interrupts(&self) {
        self.regs.clear_bits(regs::EIMSK, exti::INT0 | exti::INT1);
        self.regs.write8(regs::EICRA, 0);
        self.regs.write8(regs::EIFR, exti::INT0 | exti::INT1);
        self.regs.write8(regs::PCICR, 0);
        for port in Port::ALL {
            self.regs.write8(port.pcmsk_reg(), 0);
        }
        self.regs.write8(regs::PCIFR, 0x07);
        self.triggers.set([Trigger::None; PIN_COUNT]);
        self.enabled.set(0);
    }

    fn is_enabled(&self, pin: AvrPin) -> bool {
        self.enabled.get() & (1 << pin.index()) != 0
    }

    fn check_config(pin: AvrPin, config: &GpioConfig) -> HalResult<()> {
        match config.mode {
            PinMode::InputPullDown | PinMode::OutputOpenDrain | PinMode::AlternateOpenDrain => {
                return Err(HalError::NotSupported)
            }
            PinMode::Analog if pin.adc_channel().is_none() => return Err(HalError::NotSupported),
            _ => {}
        }
        match config.trigger {
            Trigger::Rising | Trigger::Falling if pin.external_interrupt().is_none() => {
                Err(HalError::NotSupported)
            }
            _ => Ok(()),
        }
    }

    fn apply_mode(&self, pin: AvrPin, mode: PinMode) {
        let mask = pin.mask();
        let ddr = pin.port.ddr_reg();
        let port = pin.port.port_reg();

        match mode {
            PinMode::Output => self.regs.set_bits(ddr, mask),
            PinMode::InputPullUp => {
                self.regs.clear_bits(ddr, mask);
                self.regs.set_bits(port, mask);
            }
            _ => {
                self.regs.clear_bits(ddr, mask);
                self.regs.clear_bits(port, mask);
            }
        }

        if let Some(ch) = pin.adc_channel() {
            if mode == PinMode::Analog {
                self.regs.set_bits(regs::DIDR0, bit(ch));
            } else {
                self.regs.clear_bits(regs::DIDR0, bit(ch));
            }
        }
    }

    fn arm(&self, pin: AvrPin, trigger: Trigger) -> HalResult<()> {
        match trigger {
            Trigger::None => return Err(HalError::InvalidParameter),
            Trigger::Rising | Trigger::Falling => {
                let n = pin.external_interrupt().ok_or(HalError::NotSupported)?;
                let sense = if trigger == Trigger::Rising {
                    exti::ISC_RISING
                } else {
                    exti::ISC_FALLING
                };
                let shift = n * exti::ISC_BITS;
                self.regs
                    .modify8(regs::EICRA, |v| (v & !(0b11 << shift)) | (sense << shift));
                self.regs.write8(regs::EIFR, bit(n));
                self.regs.set_bits(regs::EIMSK, bit(n));
            }
            Trigger::Both => {
                let level = self.regs.read8(pin.port.pin_reg());
                self.levels.update(|l| l[pin.port.index()] = level);
                self.regs.set_bits(pin.port.pcmsk_reg(), pin.mask());
                self.regs.write8(regs::PCIFR, pin.port.pcie());
                self.regs.set_bits(regs::PCICR, pin.port.pcie());
            }
        }
        self.enabled.update(|e| *e |= 1 << pin.index());
        Ok(())
    }

    fn disarm(&self, pin: AvrPin, trigger: Trigger) {
        match trigger {
            Trigger::None => {}
            Trigger::Rising | Trigger::Falling => {
                if let Some(n) = pin.external_interrupt() {
                    self.regs.clear_bits(regs::EIMSK, bit(n));
                }
            }
            Trigger::Both => {
                let pcmsk = pin.port.pcmsk_reg();
                self.regs.clear_bits(pcmsk, pin.mask());
                if self.regs.read8(pcmsk) == 0 {
                    self.regs.clear_bits(regs::PCICR, pin.port.pcie());
                }
            }
        }
        self.enabled.update(|e| *e &= !(1 << pin.index()));
    }

    fn dispatch(&self, pin: AvrPin) {
        let level = Level::from(self.regs.is_set(pin.port.pin_reg(), pin.mask()));
        self.callbacks.dispatch(pin.index(), |user_data| GpioIrq {
            pin,
            level,
            user_data,
        });
    }

    /// INT0/INT1 service routine body
    pub fn on_external_interrupt(&self, n: u8) {
        let pin = match n {
            0 => AvrPin::d(2),
            1 => AvrPin::d(3),
            _ => return,
        };
        if self.is_enabled(pin) {
            self.dispatch(pin);
        }
    }

    /// PCINTx service routine body
    ///
    /// Dispatches every enabled pin of the port whose level changed since the
    /// previous sample.
    pub fn on_pin_change(&self, port: Port) {
        let now = self.regs.read8(port.pin_reg());
        let watched = self.regs.read8(port.pcmsk_reg());
        let mut previous = 0;
        self.levels.update(|l| {
            previous = l[port.index()];
            l[port.index()] = now;
        });

        let changed = (now ^ previous) & watched;
        for b in 0..8 {
            let pin = AvrPin::new(port, b);
            if changed & pin.mask() != 0 && self.is_enabled(pin) {
                self.dispatch(pin);
            }
        }
    }
}

impl<R: RegisterBus> Gpio for AvrGpio<R> {
    type Pin = AvrPin;

    fn init(&self) -> HalResult<()> {
        self.reset_interrupts();
        debug!("gpio: init");
        Ok(())
    }

    fn deinit(&self) -> HalResult<()> {
        self.reset_interrupts();
        for port in Port::ALL {
            self.regs.write8(port.ddr_reg(), 0);
            self.regs.write8(port.port_reg(), 0);
        }
        self.regs.write8(regs::DIDR0, 0);
        self.callbacks.clear_all();
        Ok(())
    }

    fn configure(&self, pin: AvrPin, config: &GpioConfig) -> HalResult<()> {
        let pin = pin.validate()?;
        Self::check_config(pin, config)?;

        let previous = self.triggers.get()[pin.index()];
        let was_enabled = self.is_enabled(pin);
        if was_enabled {
            self.disarm(pin, previous);
        }

        self.apply_mode(pin, config.mode);
        self.triggers.update(|t| t[pin.index()] = config.trigger);

        if was_enabled && config.trigger != Trigger::None {
            self.arm(pin, config.trigger)?;
        }
        trace!("gpio: configured pin {}", pin);
        Ok(())
    }

    fn write(&self, pin: AvrPin, level: Level) -> HalResult<()> {
        let pin = pin.validate()?;
        match level {
            Level::High => self.regs.set_bits(pin.port.port_reg(), pin.mask()),
            Level::Low => self.regs.clear_bits(pin.port.port_reg(), pin.mask()),
        }
        Ok(())
    }

    fn read(&self, pin: AvrPin) -> HalResult<Level> {
        let pin = pin.validate()?;
        Ok(Level::from(self.regs.is_set(pin.port.pin_reg(), pin.mask())))
    }

    fn toggle(&self, pin: AvrPin) -> HalResult<()> {
        let pin = pin.validate()?;
        // Writing a one to PINx flips the PORTx bit in hardware
        self.regs.write8(pin.port.pin_reg(), pin.mask());
        Ok(())
    }

    fn register_irq(
        &self,
        pin: AvrPin,
        handler: Handler<GpioIrq<AvrPin>>,
        user_data: UserData,
    ) -> HalResult<()> {
        let pin = pin.validate()?;
        self.callbacks.install(pin.index(), handler, user_data)
    }

    fn unregister_irq(&self, pin: AvrPin) -> HalResult<()> {
        let pin = pin.validate()?;
        self.callbacks.clear(pin.index())
    }

    fn enable_irq(&self, pin: AvrPin) -> HalResult<()> {
        let pin = pin.validate()?;
        let trigger = self.triggers.get()[pin.index()];
        self.arm(pin, trigger)
    }

    fn disable_irq(&self, pin: AvrPin) -> HalResult<()> {
        let pin = pin.validate()?;
        let trigger = self.triggers.get()[pin.index()];
        self.disarm(pin, trigger);
        Ok(())
    }
}
