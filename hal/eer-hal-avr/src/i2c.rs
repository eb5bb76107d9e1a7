//! I2C master driver for the TWI peripheral
//!
//! Each transaction step writes `TWCR`, waits for `TWINT` and checks the
//! status code in `TWSR` against the one expected for that step. Any mismatch
//! (NACK, arbitration lost, bus error) or timeout aborts the transaction. A
//! STOP is always issued at the end, successful or not, and the driver waits
//! for it to complete so the bus is idle on return.
//!
//! A scan keeps going past an address whose probe fails and reports every
//! device that did acknowledge.

use eer_hal::callback::{CallbackSlot, Handler, UserData};
use eer_hal::i2c::{
    is_scannable, AddressMode, I2c, I2cConfig, I2cTransferEvent, SCAN_FIRST_ADDRESS,
    SCAN_LAST_ADDRESS,
};
use eer_hal::time::{poll_until, Deadline, WAIT_FOREVER};
use eer_hal::{Clock, HalError, HalResult};
use embedded_hal::i2c::Operation;

use crate::regs::{self, twi, RegisterBus};
use crate::shared::Shared;
use crate::F_CPU;

/// Per-address probe timeout used by [`I2c::scan`] while the tick runs
pub const SCAN_TIMEOUT_MS: u32 = 10;

/// Transaction timeout for the `embedded-hal` interface while the tick runs
pub const BLOCKING_TIMEOUT_MS: u32 = 100;

/// Polls of `TWSTO` before giving up on a STOP
const STOP_SPIN_LIMIT: u32 = 1_000;

/// TWI instance marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Twi0;

/// Bit-rate register value for an SCL frequency, prescaler 1
///
/// SCL = F_CPU / (16 + 2 * TWBR)
pub fn twbr_for(scl_hz: u32) -> HalResult<u8> {
    if scl_hz == 0 {
        return Err(HalError::InvalidParameter);
    }
    let divider = F_CPU / scl_hz;
    if divider < 16 {
        return Err(HalError::InvalidParameter);
    }
    u8::try_from((divider - 16) / 2).map_err(|_| HalError::InvalidParameter)
}

fn check_address(address: u16) -> HalResult<u8> {
    if address > 0x7F {
        return Err(HalError::InvalidParameter);
    }
    Ok(address as u8)
}

#[derive(Clone, Copy)]
struct I2cState {
    initialized: bool,
    in_transaction: bool,
}

/// TWI master driver
pub struct AvrI2c<R, K> {
    regs: R,
    clock: K,
    state: Shared<I2cState>,
    callback: CallbackSlot<I2cTransferEvent<Twi0>>,
}

impl<R: RegisterBus, K: Clock> AvrI2c<R, K> {
    pub const fn new(regs: R, clock: K) -> Self {
        Self {
            regs,
            clock,
            state: Shared::new(I2cState {
                initialized: false,
                in_transaction: false,
            }),
            callback: CallbackSlot::new(),
        }
    }

    /// Kick off a bus step and wait for its status code
    fn step(&self, control: u8, deadline: &Deadline) -> HalResult<u8> {
        self.regs.write8(regs::TWCR, control | twi::TWINT | twi::TWEN);
        poll_until(&self.clock, deadline, || {
            self.regs.is_set(regs::TWCR, twi::TWINT)
        })?;
        Ok(self.regs.read8(regs::TWSR) & twi::STATUS_MASK)
    }

    fn expect(status: u8, expected: u8) -> HalResult<()> {
        if status == expected {
            Ok(())
        } else {
            trace!("i2c: status {=u8:#x}, expected {=u8:#x}", status, expected);
            Err(HalError::Error)
        }
    }

    /// START on an idle bus
    fn start(&self, deadline: &Deadline) -> HalResult<()> {
        let status = self.step(twi::TWSTA, deadline)?;
        Self::expect(status, twi::START)
    }

    /// Repeated START while the bus is still held
    fn restart(&self, deadline: &Deadline) -> HalResult<()> {
        let status = self.step(twi::TWSTA, deadline)?;
        Self::expect(status, twi::REP_START)
    }

    fn address(&self, address: u8, read: bool, deadline: &Deadline) -> HalResult<()> {
        self.regs.write8(regs::TWDR, (address << 1) | u8::from(read));
        let status = self.step(0, deadline)?;
        let expected = if read {
            twi::MR_SLA_ACK
        } else {
            twi::MT_SLA_ACK
        };
        Self::expect(status, expected)
    }

    fn write_bytes(&self, data: &[u8], deadline: &Deadline) -> HalResult<()> {
        for &byte in data {
            self.regs.write8(regs::TWDR, byte);
            let status = self.step(0, deadline)?;
            Self::expect(status, twi::MT_DATA_ACK)?;
        }
        Ok(())
    }

    /// Read into `buf`, ACKing every byte but a final one that ends the read
    fn read_bytes(
        &self,
        buf: &mut [u8],
        nack_last: bool,
        deadline: &Deadline,
    ) -> HalResult<()> {
        let last = buf.len().saturating_sub(1);
        for (i, slot) in buf.iter_mut().enumerate() {
            let ack = i < last || !nack_last;
            let status = self.step(if ack { twi::TWEA } else { 0 }, deadline)?;
            Self::expect(
                status,
                if ack {
                    twi::MR_DATA_ACK
                } else {
                    twi::MR_DATA_NACK
                },
            )?;
            *slot = self.regs.read8(regs::TWDR);
        }
        Ok(())
    }

    /// Issue STOP and wait until the hardware has released the bus
    fn stop(&self) {
        self.regs
            .write8(regs::TWCR, twi::TWINT | twi::TWSTO | twi::TWEN);
        for _ in 0..STOP_SPIN_LIMIT {
            if !self.regs.is_set(regs::TWCR, twi::TWSTO) {
                return;
            }
        }
        warn!("i2c: stop did not complete");
    }

    fn claim(&self) -> HalResult<()> {
        let mut claimed = false;
        let state = self.state.update(|s| {
            if s.initialized && !s.in_transaction {
                s.in_transaction = true;
                claimed = true;
            }
        });
        if !state.initialized {
            Err(HalError::Error)
        } else if !claimed {
            Err(HalError::Busy)
        } else {
            Ok(())
        }
    }

    fn release(&self) {
        self.state.update(|s| s.in_transaction = false);
    }

    /// Run one transaction body, always finishing with STOP
    fn transaction(
        &self,
        address: u16,
        timeout_ms: u32,
        body: impl FnOnce(u8, &Deadline) -> HalResult<()>,
    ) -> HalResult<()> {
        let address = check_address(address)?;
        let deadline = Deadline::start(&self.clock, timeout_ms)?;
        self.claim()?;

        let result = body(address, &deadline);
        self.stop();
        self.release();
        if let Err(e) = result {
            debug!("i2c: transaction with {=u8:#x} failed: {}", address, e);
        }
        result
    }

    fn bounded(&self, timeout_ms: u32) -> u32 {
        if self.clock.is_running() {
            timeout_ms
        } else {
            WAIT_FOREVER
        }
    }

    /// Run an `embedded-hal` operation list as one transaction
    ///
    /// Adjacent operations of the same direction are merged; a direction
    /// change issues a repeated START.
    pub(crate) fn run_operations(
        &self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> HalResult<()> {
        if operations.is_empty() {
            return Ok(());
        }
        let timeout = self.bounded(BLOCKING_TIMEOUT_MS);
        self.transaction(u16::from(address), timeout, |addr, deadline| {
            let mut direction = None;
            for i in 0..operations.len() {
                let read = matches!(operations[i], Operation::Read(_));
                if direction != Some(read) {
                    if direction.is_some() {
                        self.restart(deadline)?;
                    } else {
                        self.start(deadline)?;
                    }
                    self.address(addr, read, deadline)?;
                    direction = Some(read);
                }
                let read_continues =
                    matches!(operations.get(i + 1), Some(Operation::Read(_)));
                match &mut operations[i] {
                    Operation::Write(data) => self.write_bytes(data, deadline)?,
                    Operation::Read(buf) => self.read_bytes(buf, !read_continues, deadline)?,
                }
            }
            Ok(())
        })
    }

    fn notify(&self, address: u16, tx_len: usize, rx_len: usize) {
        self.callback.dispatch(|user_data| I2cTransferEvent {
            i2c: Twi0,
            address,
            tx_len,
            rx_len,
            user_data,
        });
    }

    /// Address-only probe: START, SLA+W, STOP
    fn probe(&self, address: u8) -> HalResult<bool> {
        let deadline = Deadline::start(&self.clock, self.bounded(SCAN_TIMEOUT_MS))?;
        let result = self
            .start(&deadline)
            .map(|()| self.address(address, false, &deadline).is_ok());
        self.stop();
        result
    }
}

impl<R: RegisterBus, K: Clock> I2c for AvrI2c<R, K> {
    type Instance = Twi0;

    fn init(&self, config: &I2cConfig) -> HalResult<()> {
        if config.addr_mode == AddressMode::TenBit || config.duty_cycle {
            return Err(HalError::NotSupported);
        }
        let twbr = twbr_for(config.scl_hz())?;

        self.regs.write8(regs::TWCR, 0);
        self.regs.write8(regs::TWSR, 0);
        self.regs.write8(regs::TWBR, twbr);
        self.regs.write8(regs::TWCR, twi::TWEN);

        self.state.set(I2cState {
            initialized: true,
            in_transaction: false,
        });
        debug!("i2c: init {} Hz, twbr {}", config.scl_hz(), twbr);
        Ok(())
    }

    fn deinit(&self) -> HalResult<()> {
        self.regs.write8(regs::TWCR, 0);
        self.regs.write8(regs::TWBR, 0);
        self.callback.clear();
        self.state.set(I2cState {
            initialized: false,
            in_transaction: false,
        });
        Ok(())
    }

    fn master_transmit(&self, address: u16, data: &[u8], timeout_ms: u32) -> HalResult<()> {
        if data.is_empty() {
            return Err(HalError::InvalidParameter);
        }
        self.transaction(address, timeout_ms, |addr, deadline| {
            self.start(deadline)?;
            self.address(addr, false, deadline)?;
            self.write_bytes(data, deadline)
        })?;
        self.notify(address, data.len(), 0);
        Ok(())
    }

    fn master_receive(&self, address: u16, buf: &mut [u8], timeout_ms: u32) -> HalResult<()> {
        if buf.is_empty() {
            return Err(HalError::InvalidParameter);
        }
        let len = buf.len();
        self.transaction(address, timeout_ms, |addr, deadline| {
            self.start(deadline)?;
            self.address(addr, true, deadline)?;
            self.read_bytes(buf, true, deadline)
        })?;
        self.notify(address, 0, len);
        Ok(())
    }

    fn master_transmit_receive(
        &self,
        address: u16,
        tx: &[u8],
        rx: &mut [u8],
        timeout_ms: u32,
    ) -> HalResult<()> {
        if tx.is_empty() || rx.is_empty() {
            return Err(HalError::InvalidParameter);
        }
        let rx_len = rx.len();
        self.transaction(address, timeout_ms, |addr, deadline| {
            self.start(deadline)?;
            self.address(addr, false, deadline)?;
            self.write_bytes(tx, deadline)?;
            self.restart(deadline)?;
            self.address(addr, true, deadline)?;
            self.read_bytes(rx, true, deadline)
        })?;
        self.notify(address, tx.len(), rx_len);
        Ok(())
    }

    fn is_busy(&self) -> HalResult<bool> {
        Ok(self.state.get().in_transaction)
    }

    fn scan(&self, found: &mut [u16]) -> HalResult<usize> {
        if found.is_empty() {
            return Err(HalError::InvalidParameter);
        }
        self.claim()?;

        let mut count = 0;
        for address in SCAN_FIRST_ADDRESS..=SCAN_LAST_ADDRESS {
            if count == found.len() {
                break;
            }
            debug_assert!(is_scannable(address));
            match self.probe(address as u8) {
                Ok(true) => {
                    found[count] = address;
                    count += 1;
                }
                Ok(false) => {}
                // The probe already sent STOP; move on to the next address
                Err(e) => trace!("i2c: probe {=u16:#x} failed: {}", address, e),
            }
        }

        self.release();
        info!("i2c: scan found {} device(s)", count);
        Ok(count)
    }

    fn register_callback(
        &self,
        handler: Handler<I2cTransferEvent<Twi0>>,
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

    fn setup<'a>(bus: &'a SimBus, clock: &'a SimClock) -> AvrI2c<&'a SimBus, &'a SimClock> {
        let i2c = AvrI2c::new(bus, clock);
        i2c.init(&I2cConfig::STANDARD).unwrap();
        i2c
    }

    #[test]
    fn test_twbr() {
        assert_eq!(twbr_for(100_000), Ok(72));
        assert_eq!(twbr_for(400_000), Ok(12));
        assert_eq!(twbr_for(1_000_000), Ok(0));
        assert_eq!(twbr_for(2_000_000), Err(HalError::InvalidParameter));
        assert_eq!(twbr_for(10_000), Err(HalError::InvalidParameter));
        assert_eq!(twbr_for(0), Err(HalError::InvalidParameter));
    }

    #[test]
    fn test_init_rejects_unsupported() {
        let bus = SimBus::new();
        let clock = SimClock::running();
        let i2c = AvrI2c::new(&bus, &clock);
        let ten_bit = I2cConfig {
            addr_mode: AddressMode::TenBit,
            ..I2cConfig::STANDARD
        };
        assert_eq!(i2c.init(&ten_bit), Err(HalError::NotSupported));
        let duty = I2cConfig {
            duty_cycle: true,
            ..I2cConfig::FAST
        };
        assert_eq!(i2c.init(&duty), Err(HalError::NotSupported));
        assert_eq!(bus.write_count(), 0);

        i2c.init(&I2cConfig {
            clock_hz: 200_000,
            ..I2cConfig::STANDARD
        })
        .unwrap();
        assert_eq!(bus.get(regs::TWBR), 32);
    }

    #[test]
    fn test_transmit() {
        let bus = SimBus::new();
        let clock = SimClock::running();
        let i2c = setup(&bus, &clock);
        bus.twi_devices.borrow_mut().push(0x3C);

        i2c.master_transmit(0x3C, &[0x00, 0xAF], 50).unwrap();
        assert_eq!(bus.twi_sla.borrow().as_slice(), &[0x78]);
        assert_eq!(bus.twi_tx.borrow().as_slice(), &[0x00, 0xAF]);
        assert_eq!(bus.twi_stops.get(), 1);
        assert!(!bus.twi_bus_held());
        assert_eq!(i2c.is_busy(), Ok(false));
    }

    #[test]
    fn test_address_nack_stops() {
        let bus = SimBus::new();
        let clock = SimClock::running();
        let i2c = setup(&bus, &clock);

        assert_eq!(i2c.master_transmit(0x50, &[1], 50), Err(HalError::Error));
        assert!(bus.twi_tx.borrow().is_empty());
        assert_eq!(bus.twi_stops.get(), 1);
        assert!(!bus.twi_bus_held());
    }

    #[test]
    fn test_data_nack_stops() {
        let bus = SimBus::new();
        let clock = SimClock::running();
        let i2c = setup(&bus, &clock);
        bus.twi_devices.borrow_mut().push(0x50);
        bus.twi_nack_after.set(Some(1));

        assert_eq!(i2c.master_transmit(0x50, &[1, 2, 3], 50), Err(HalError::Error));
        assert_eq!(bus.twi_tx.borrow().as_slice(), &[1, 2]);
        assert!(!bus.twi_bus_held());
    }

    #[test]
    fn test_receive_acks_all_but_last() {
        let bus = SimBus::new();
        let clock = SimClock::running();
        let i2c = setup(&bus, &clock);
        bus.twi_devices.borrow_mut().push(0x68);
        bus.twi_rx.borrow_mut().extend([0x11, 0x22, 0x33]);

        let mut buf = [0u8; 3];
        i2c.master_receive(0x68, &mut buf, 50).unwrap();
        assert_eq!(buf, [0x11, 0x22, 0x33]);
        assert_eq!(bus.twi_sla.borrow().as_slice(), &[0xD1]);
    }

    #[test]
    fn test_write_read_uses_repeated_start() {
        let bus = SimBus::new();
        let clock = SimClock::running();
        let i2c = setup(&bus, &clock);
        bus.twi_devices.borrow_mut().push(0x68);
        bus.twi_rx.borrow_mut().extend([0xAB, 0xCD]);

        let mut buf = [0u8; 2];
        i2c.master_transmit_receive(0x68, &[0x3B], &mut buf, 50).unwrap();
        assert_eq!(buf, [0xAB, 0xCD]);
        assert_eq!(bus.twi_sla.borrow().as_slice(), &[0xD0, 0xD1]);
        assert_eq!(bus.twi_stops.get(), 1);
    }

    #[test]
    fn test_read_half_nack_stops_without_resending() {
        let bus = SimBus::new();
        let clock = SimClock::running();
        let i2c = setup(&bus, &clock);
        bus.twi_devices.borrow_mut().push(0x68);
        bus.twi_reject_reads.set(true);

        let mut buf = [0u8; 2];
        assert_eq!(
            i2c.master_transmit_receive(0x68, &[0x3B], &mut buf, 50),
            Err(HalError::Error)
        );
        assert_eq!(bus.twi_tx.borrow().as_slice(), &[0x3B]);
        assert_eq!(bus.twi_stops.get(), 1);
        assert!(!bus.twi_bus_held());
        assert_eq!(buf, [0, 0]);
    }

    #[test]
    fn test_timeout_still_stops() {
        let bus = SimBus::new();
        let clock = SimClock::running();
        let i2c = setup(&bus, &clock);
        bus.stall.set(true);

        assert_eq!(i2c.master_transmit(0x3C, &[1], 5), Err(HalError::Timeout));
        assert_eq!(bus.twi_stops.get(), 1);
        assert_eq!(i2c.is_busy(), Ok(false));
    }

    #[test]
    fn test_invalid_arguments() {
        let bus = SimBus::new();
        let clock = SimClock::running();
        let i2c = setup(&bus, &clock);
        let writes = bus.write_count();

        assert_eq!(i2c.master_transmit(0x80, &[1], 0), Err(HalError::InvalidParameter));
        assert_eq!(i2c.master_transmit(0x10, &[], 0), Err(HalError::InvalidParameter));
        assert_eq!(i2c.master_receive(0x10, &mut [], 0), Err(HalError::InvalidParameter));
        assert_eq!(i2c.scan(&mut []), Err(HalError::InvalidParameter));
        assert_eq!(bus.write_count(), writes);
    }

    #[test]
    fn test_scan_skips_reserved_and_releases_bus() {
        let bus = SimBus::new();
        let clock = SimClock::running();
        let i2c = setup(&bus, &clock);
        bus.twi_devices
            .borrow_mut()
            .extend([0x03, 0x3C, 0x68, 0x7A]);

        let mut found = [0u16; 8];
        let n = i2c.scan(&mut found).unwrap();
        assert_eq!(&found[..n], &[0x3C, 0x68]);
        assert!(!bus.twi_bus_held());

        // One probe and one STOP per non-reserved address
        let probes = usize::from(SCAN_LAST_ADDRESS - SCAN_FIRST_ADDRESS + 1);
        assert_eq!(bus.twi_sla.borrow().len(), probes);
        assert_eq!(bus.twi_stops.get(), probes);
        assert!(bus
            .twi_sla
            .borrow()
            .iter()
            .all(|sla| is_scannable(u16::from(sla >> 1))));
    }

    #[test]
    fn test_scan_stops_when_full() {
        let bus = SimBus::new();
        let clock = SimClock::running();
        let i2c = setup(&bus, &clock);
        bus.twi_devices.borrow_mut().extend([0x10, 0x20, 0x30]);

        let mut found = [0u16; 2];
        assert_eq!(i2c.scan(&mut found), Ok(2));
        assert_eq!(found, [0x10, 0x20]);
        assert!(!bus.twi_bus_held());
    }

    #[test]
    fn test_scan_continues_past_failed_start() {
        let bus = SimBus::new();
        let clock = SimClock::running();
        let i2c = setup(&bus, &clock);
        bus.twi_devices.borrow_mut().extend([0x09, 0x3C]);
        // Arbitration lost at 0x08 and 0x09
        bus.twi_lost_starts.set(2);

        let mut found = [0u16; 4];
        assert_eq!(i2c.scan(&mut found), Ok(1));
        assert_eq!(found[0], 0x3C);

        let probes = usize::from(SCAN_LAST_ADDRESS - SCAN_FIRST_ADDRESS + 1);
        assert_eq!(bus.twi_sla.borrow().len(), probes - 2);
        assert_eq!(bus.twi_stops.get(), probes);
        assert!(!bus.twi_bus_held());
        assert_eq!(i2c.is_busy(), Ok(false));
    }

    #[test]
    fn test_start_status_is_strict() {
        let bus = SimBus::new();
        let clock = SimClock::running();
        let i2c = setup(&bus, &clock);
        bus.twi_devices.borrow_mut().push(0x3C);

        // A bus left held answers the first START with a repeated START
        bus.hold_twi_bus();
        assert_eq!(i2c.master_transmit(0x3C, &[1], 50), Err(HalError::Error));
        assert!(bus.twi_sla.borrow().is_empty());
        assert_eq!(bus.twi_stops.get(), 1);

        i2c.master_transmit(0x3C, &[1], 50).unwrap();
        assert_eq!(bus.twi_sla.borrow().as_slice(), &[0x78]);
    }

    #[test]
    fn test_callback_reports_lengths() {
        static LENS: AtomicU32 = AtomicU32::new(0);

        fn on_done(e: &I2cTransferEvent<Twi0>) {
            LENS.store((e.tx_len as u32) << 8 | e.rx_len as u32, Ordering::SeqCst);
        }

        let bus = SimBus::new();
        let clock = SimClock::running();
        let i2c = setup(&bus, &clock);
        bus.twi_devices.borrow_mut().push(0x68);
        i2c.register_callback(on_done, None).unwrap();

        let mut buf = [0u8; 6];
        i2c.master_transmit_receive(0x68, &[0x3B], &mut buf, 0).unwrap();
        assert_eq!(LENS.load(Ordering::SeqCst), 0x0106);
    }

    #[test]
    fn test_operation_list_merges_directions() {
        let bus = SimBus::new();
        let clock = SimClock::running();
        let i2c = setup(&bus, &clock);
        bus.twi_devices.borrow_mut().push(0x50);
        bus.twi_rx.borrow_mut().extend([1, 2, 3]);

        let mut head = [0u8; 1];
        let mut tail = [0u8; 2];
        i2c.run_operations(
            0x50,
            &mut [
                Operation::Write(&[0x00]),
                Operation::Write(&[0x10]),
                Operation::Read(&mut head),
                Operation::Read(&mut tail),
            ],
        )
        .unwrap();

        assert_eq!(bus.twi_tx.borrow().as_slice(), &[0x00, 0x10]);
        assert_eq!(bus.twi_sla.borrow().as_slice(), &[0xA0, 0xA1]);
        assert_eq!((head, tail), ([1], [2, 3]));
        assert_eq!(bus.twi_stops.get(), 1);
    }
}
