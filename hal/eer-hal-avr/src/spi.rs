//! SPI driver
//!
//! Fixed pins: PB2 (SS), PB3 (MOSI), PB4 (MISO), PB5 (SCK). Transfers are
//! byte-synchronous: each byte is written to `SPDR` and `SPIF` is polled
//! before the next one. Only 8-bit frames exist on this part.
//!
//! The transfer callback runs in the caller's context right after a
//! successful transfer, since the hardware interrupt is not used.

use eer_hal::callback::{CallbackSlot, Handler, UserData};
use eer_hal::spi::{
    BitOrder, DataSize, Spi, SpiConfig, SpiPrescaler, SpiTransferEvent, DUMMY_BYTE,
};
use eer_hal::time::{poll_until, Deadline};
use eer_hal::{Clock, HalError, HalResult};

use crate::gpio::AvrPin;
use crate::regs::{self, spi, RegisterBus};
use crate::shared::Shared;

const SS: u8 = 1 << 2;
const MOSI: u8 = 1 << 3;
const MISO: u8 = 1 << 4;
const SCK: u8 = 1 << 5;

/// SPI instance marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Spi0;

/// `SPI2X` flag and `SPR1:0` bits for a divider
fn clock_bits(p: SpiPrescaler) -> (bool, u8) {
    match p {
        SpiPrescaler::Div2 => (true, 0b00),
        SpiPrescaler::Div4 => (false, 0b00),
        SpiPrescaler::Div8 => (true, 0b01),
        SpiPrescaler::Div16 => (false, 0b01),
        SpiPrescaler::Div32 => (true, 0b10),
        SpiPrescaler::Div64 => (false, 0b10),
        SpiPrescaler::Div128 => (false, 0b11),
    }
}

#[derive(Clone, Copy)]
struct SpiState {
    initialized: bool,
    busy: bool,
}

/// SPI driver
pub struct AvrSpi<R, K> {
    regs: R,
    clock: K,
    state: Shared<SpiState>,
    callback: CallbackSlot<SpiTransferEvent<Spi0>>,
}

impl<R: RegisterBus, K: Clock> AvrSpi<R, K> {
    pub const fn new(regs: R, clock: K) -> Self {
        Self {
            regs,
            clock,
            state: Shared::new(SpiState {
                initialized: false,
                busy: false,
            }),
            callback: CallbackSlot::new(),
        }
    }

    fn exchange(
        &self,
        tx: Option<&[u8]>,
        mut rx: Option<&mut [u8]>,
        len: usize,
        deadline: &Deadline,
    ) -> HalResult<()> {
        for i in 0..len {
            let out = tx.map_or(DUMMY_BYTE, |t| t[i]);
            self.regs.write8(regs::SPDR, out);
            poll_until(&self.clock, deadline, || {
                self.regs.is_set(regs::SPSR, spi::SPIF)
            })?;
            let input = self.regs.read8(regs::SPDR);
            if let Some(buf) = rx.as_deref_mut() {
                buf[i] = input;
            }
        }
        Ok(())
    }
}

impl<R: RegisterBus, K: Clock> Spi for AvrSpi<R, K> {
    type Instance = Spi0;
    type CsPin = AvrPin;

    fn init(&self, config: &SpiConfig) -> HalResult<()> {
        if config.data_size == DataSize::Bits16 {
            return Err(HalError::NotSupported);
        }

        let (double, spr) = clock_bits(config.prescaler);
        let mut control = spi::SPE | spr;
        if config.master {
            control |= spi::MSTR;
        }
        if config.bit_order == BitOrder::LsbFirst {
            control |= spi::DORD;
        }
        if config.mode.cpol() {
            control |= spi::CPOL;
        }
        if config.mode.cpha() {
            control |= spi::CPHA;
        }

        self.regs.write8(regs::SPCR, 0);
        if config.master {
            // SS must stay high (deselected) as an output or the core drops
            // out of master mode
            self.regs.set_bits(regs::PORTB, SS);
            self.regs
                .modify8(regs::DDRB, |v| (v | MOSI | SCK | SS) & !MISO);
        } else {
            self.regs
                .modify8(regs::DDRB, |v| (v | MISO) & !(MOSI | SCK | SS));
        }
        self.regs.write8(regs::SPSR, if double { spi::SPI2X } else { 0 });
        self.regs.write8(regs::SPCR, control);

        self.state.set(SpiState {
            initialized: true,
            busy: false,
        });
        debug!("spi: init, spcr {=u8:#x}", control);
        Ok(())
    }

    fn deinit(&self) -> HalResult<()> {
        self.regs.write8(regs::SPCR, 0);
        self.regs.write8(regs::SPSR, 0);
        self.regs.clear_bits(regs::DDRB, SS | MOSI | MISO | SCK);
        self.regs.clear_bits(regs::PORTB, SS);
        self.callback.clear();
        self.state.set(SpiState {
            initialized: false,
            busy: false,
        });
        Ok(())
    }

    fn transfer(
        &self,
        tx: Option<&[u8]>,
        rx: Option<&mut [u8]>,
        timeout_ms: u32,
    ) -> HalResult<()> {
        let len = match (&tx, &rx) {
            (None, None) => return Err(HalError::InvalidParameter),
            (Some(t), Some(r)) if t.len() != r.len() => return Err(HalError::InvalidParameter),
            (Some(t), _) => t.len(),
            (None, Some(r)) => r.len(),
        };
        if len == 0 {
            return Err(HalError::InvalidParameter);
        }

        let mut claimed = false;
        let state = self.state.update(|s| {
            if s.initialized && !s.busy {
                s.busy = true;
                claimed = true;
            }
        });
        if !state.initialized {
            return Err(HalError::Error);
        }
        if !claimed {
            return Err(HalError::Busy);
        }

        let result = Deadline::start(&self.clock, timeout_ms)
            .and_then(|deadline| self.exchange(tx, rx, len, &deadline));
        self.state.update(|s| s.busy = false);
        result?;

        self.callback.dispatch(|user_data| SpiTransferEvent {
            spi: Spi0,
            size: len,
            user_data,
        });
        Ok(())
    }

    fn is_ready(&self) -> HalResult<bool> {
        let state = self.state.get();
        Ok(state.initialized && !state.busy)
    }

    fn chip_select(&self, pin: AvrPin, active: bool) -> HalResult<()> {
        let pin = pin.validate()?;
        let port = pin.port.port_reg();
        // Set the level before turning the pin into an output
        if active {
            self.regs.clear_bits(port, pin.mask());
        } else {
            self.regs.set_bits(port, pin.mask());
        }
        self.regs.set_bits(pin.port.ddr_reg(), pin.mask());
        Ok(())
    }

    fn register_callback(
        &self,
        handler: Handler<SpiTransferEvent<Spi0>>,
        user_data: UserData,
    ) -> HalResult<()> {
        self.callback.install(handler, user_data);
        Ok(())
    }

    fn unregister_callback(&self) -> HalResult<()> {
        self.callback.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimBus, SimClock};
    use core::sync::atomic::{AtomicU32, Ordering};
    use eer_hal::spi::SpiMode;

    fn invert(b: u8) -> u8 {
        !b
    }

    #[test]
    fn test_init_registers() {
        let bus = SimBus::new();
        let clock = SimClock::running();
        let spi = AvrSpi::new(&bus, &clock);
        spi.init(&SpiConfig {
            mode: SpiMode::Mode3,
            bit_order: BitOrder::LsbFirst,
            prescaler: SpiPrescaler::Div8,
            ..SpiConfig::default()
        })
        .unwrap();

        assert_eq!(
            bus.get(regs::SPCR),
            spi::SPE | spi::MSTR | spi::DORD | spi::CPOL | spi::CPHA | 0b01
        );
        assert_eq!(bus.get(regs::SPSR), spi::SPI2X);
        assert_eq!(bus.get(regs::DDRB), SS | MOSI | SCK);
        assert_eq!(bus.get(regs::PORTB) & SS, SS);
    }

    #[test]
    fn test_sixteen_bit_not_supported() {
        let bus = SimBus::new();
        let clock = SimClock::running();
        let spi = AvrSpi::new(&bus, &clock);
        let cfg = SpiConfig {
            data_size: DataSize::Bits16,
            ..SpiConfig::default()
        };
        assert_eq!(spi.init(&cfg), Err(HalError::NotSupported));
        assert_eq!(bus.write_count(), 0);
    }

    #[test]
    fn test_full_duplex_transfer() {
        let bus = SimBus::new();
        let clock = SimClock::running();
        let spi = AvrSpi::new(&bus, &clock);
        spi.init(&SpiConfig::default()).unwrap();
        bus.spi_response.set(invert);

        let mut rx = [0u8; 3];
        spi.transfer(Some(&[0x01, 0x02, 0x03]), Some(&mut rx), 10).unwrap();
        assert_eq!(bus.spi_tx.borrow().as_slice(), &[0x01, 0x02, 0x03]);
        assert_eq!(rx, [0xFE, 0xFD, 0xFC]);
    }

    #[test]
    fn test_receive_sends_dummy_bytes() {
        let bus = SimBus::new();
        let clock = SimClock::running();
        let spi = AvrSpi::new(&bus, &clock);
        spi.init(&SpiConfig::default()).unwrap();

        let mut rx = [0u8; 2];
        spi.receive(&mut rx, 0).unwrap();
        assert_eq!(bus.spi_tx.borrow().as_slice(), &[DUMMY_BYTE, DUMMY_BYTE]);

        spi.transmit(&[0xAA], 0).unwrap();
        assert_eq!(bus.spi_tx.borrow().last(), Some(&0xAA));
    }

    #[test]
    fn test_bad_buffers() {
        let bus = SimBus::new();
        let clock = SimClock::running();
        let spi = AvrSpi::new(&bus, &clock);
        spi.init(&SpiConfig::default()).unwrap();

        assert_eq!(spi.transfer(None, None, 0), Err(HalError::InvalidParameter));
        let mut rx = [0u8; 2];
        assert_eq!(
            spi.transfer(Some(&[1]), Some(&mut rx), 0),
            Err(HalError::InvalidParameter)
        );
        assert_eq!(spi.transmit(&[], 0), Err(HalError::InvalidParameter));
    }

    #[test]
    fn test_timeout_releases_bus() {
        let bus = SimBus::new();
        let clock = SimClock::running();
        let spi = AvrSpi::new(&bus, &clock);
        spi.init(&SpiConfig::default()).unwrap();

        bus.stall.set(true);
        let mut rx = [0x55u8; 2];
        assert_eq!(spi.transfer(None, Some(&mut rx), 3), Err(HalError::Timeout));
        assert_eq!(rx, [0x55, 0x55]);
        assert_eq!(spi.is_ready(), Ok(true));
    }

    #[test]
    fn test_not_initialized() {
        let bus = SimBus::new();
        let clock = SimClock::running();
        let spi = AvrSpi::new(&bus, &clock);
        assert_eq!(spi.transmit(&[1], 0), Err(HalError::Error));
        assert_eq!(spi.is_ready(), Ok(false));
    }

    #[test]
    fn test_chip_select_active_low() {
        let bus = SimBus::new();
        let clock = SimClock::running();
        let spi = AvrSpi::new(&bus, &clock);
        let cs = AvrPin::d(7);

        spi.chip_select(cs, true).unwrap();
        assert_eq!(bus.get(regs::DDRD) & 0x80, 0x80);
        assert_eq!(bus.get(regs::PORTD) & 0x80, 0);
        spi.chip_select(cs, false).unwrap();
        assert_eq!(bus.get(regs::PORTD) & 0x80, 0x80);

        assert_eq!(
            spi.chip_select(AvrPin::d(8), true),
            Err(HalError::InvalidParameter)
        );
    }

    #[test]
    fn test_callback_after_transfer() {
        static SIZE: AtomicU32 = AtomicU32::new(0);

        fn on_done(e: &SpiTransferEvent<Spi0>) {
            SIZE.store(e.size as u32, Ordering::SeqCst);
        }

        let bus = SimBus::new();
        let clock = SimClock::running();
        let spi = AvrSpi::new(&bus, &clock);
        spi.init(&SpiConfig::default()).unwrap();
        spi.register_callback(on_done, None).unwrap();

        spi.transmit(&[1, 2, 3, 4], 0).unwrap();
        assert_eq!(SIZE.load(Ordering::SeqCst), 4);

        spi.unregister_callback().unwrap();
        spi.transmit(&[1], 0).unwrap();
        assert_eq!(SIZE.load(Ordering::SeqCst), 4);
    }
}
