//! USART0 driver
//!
//! Runs in double-speed asynchronous mode. Registering an RX callback turns on
//! the receive-complete interrupt; from then on every received byte is
//! pushed into a 64-byte ring buffer and handed to the callback. While the
//! interrupt is on, blocking [`Uart::receive`] drains that ring buffer
//! instead of the data register, so the foreground never races the ISR for
//! `UDR0`. Bytes still buffered when the callback is unregistered are
//! returned by `receive` before any new byte from `UDR0`.

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::Deque;

use eer_hal::callback::{CallbackSlot, Handler, UserData};
use eer_hal::time::{poll_until, Deadline};
use eer_hal::uart::{DataBits, Parity, StopBits, Uart, UartConfig, UartRxEvent, UartTxEvent};
use eer_hal::{Clock, HalError, HalResult};

use crate::regs::{self, usart, RegisterBus};
use crate::shared::Shared;
use crate::F_CPU;

/// Capacity of the interrupt-fed receive buffer
pub const RX_BUFFER_SIZE: usize = 64;

/// Largest value of the 12-bit baud rate register
const UBRR_MAX: u32 = 0x0FFF;

/// USART0 instance marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Usart0;

/// Baud rate register value for double-speed mode, rounded to nearest
pub fn ubrr_for(baudrate: u32) -> HalResult<u16> {
    if baudrate == 0 {
        return Err(HalError::InvalidParameter);
    }
    let baud = u64::from(baudrate);
    let divisor = (u64::from(F_CPU) + 4 * baud) / (8 * baud);
    if divisor == 0 || divisor - 1 > u64::from(UBRR_MAX) {
        return Err(HalError::InvalidParameter);
    }
    Ok((divisor - 1) as u16)
}

fn frame_bits(config: &UartConfig) -> HalResult<u8> {
    let size = match config.data_bits {
        DataBits::Five => 0,
        DataBits::Six => 1,
        DataBits::Seven => 2,
        DataBits::Eight => 3,
        DataBits::Nine => return Err(HalError::NotSupported),
    };
    let parity = match config.parity {
        Parity::None => 0,
        Parity::Even => usart::UPM1,
        Parity::Odd => usart::UPM1 | usart::UPM0,
    };
    let stop = match config.stop_bits {
        StopBits::One => 0,
        StopBits::Two => usart::USBS,
    };
    Ok(parity | stop | (size << usart::UCSZ_SHIFT))
}

/// USART0 driver
pub struct AvrUart<R, K> {
    regs: R,
    clock: K,
    initialized: Shared<bool>,
    rx_buffer: Mutex<RefCell<Deque<u8, RX_BUFFER_SIZE>>>,
    rx_callback: CallbackSlot<UartRxEvent<Usart0>>,
    tx_callback: CallbackSlot<UartTxEvent<Usart0>>,
}

impl<R: RegisterBus, K: Clock> AvrUart<R, K> {
    pub const fn new(regs: R, clock: K) -> Self {
        Self {
            regs,
            clock,
            initialized: Shared::new(false),
            rx_buffer: Mutex::new(RefCell::new(Deque::new())),
            rx_callback: CallbackSlot::new(),
            tx_callback: CallbackSlot::new(),
        }
    }

    fn require_init(&self) -> HalResult<()> {
        if self.initialized.get() {
            Ok(())
        } else {
            Err(HalError::Error)
        }
    }

    fn interrupt_driven(&self) -> bool {
        self.regs.is_set(regs::UCSR0B, usart::RXCIE)
    }

    fn pop_buffered(&self) -> Option<u8> {
        critical_section::with(|cs| self.rx_buffer.borrow(cs).borrow_mut().pop_front())
    }

    /// Take one received byte if available
    fn try_read(&self) -> HalResult<Option<u8>> {
        if let Some(byte) = self.pop_buffered() {
            return Ok(Some(byte));
        }
        if self.interrupt_driven() {
            return Ok(None);
        }
        let status = self.regs.read8(regs::UCSR0A);
        if status & usart::RXC == 0 {
            return Ok(None);
        }
        // Error flags belong to the byte in UDR0 and must be read first
        let byte = self.regs.read8(regs::UDR0);
        if status & (usart::FE | usart::DOR | usart::UPE) != 0 {
            warn!("uart: receive error {=u8:#x}", status);
            return Err(HalError::Error);
        }
        Ok(Some(byte))
    }

    /// Drain up to `buf.len()` bytes received by the interrupt handler
    ///
    /// Returns the number of bytes copied.
    pub fn read_buffered(&self, buf: &mut [u8]) -> usize {
        critical_section::with(|cs| {
            let mut rx = self.rx_buffer.borrow(cs).borrow_mut();
            let mut n = 0;
            for slot in buf.iter_mut() {
                match rx.pop_front() {
                    Some(b) => {
                        *slot = b;
                        n += 1;
                    }
                    None => break,
                }
            }
            n
        })
    }

    /// Number of bytes waiting in the receive buffer
    pub fn buffered_len(&self) -> usize {
        critical_section::with(|cs| self.rx_buffer.borrow(cs).borrow().len())
    }

    /// USART RX-complete service routine body
    pub fn on_rx_complete(&self) {
        let status = self.regs.read8(regs::UCSR0A);
        let byte = self.regs.read8(regs::UDR0);
        if status & (usart::FE | usart::DOR | usart::UPE) != 0 {
            return;
        }

        let stored = critical_section::with(|cs| {
            self.rx_buffer.borrow(cs).borrow_mut().push_back(byte).is_ok()
        });
        if !stored {
            warn!("uart: rx buffer full, byte dropped");
        }

        self.rx_callback.dispatch(|user_data| UartRxEvent {
            uart: Usart0,
            byte,
            user_data,
        });
    }

    /// USART TX-complete service routine body
    pub fn on_tx_complete(&self) {
        self.tx_callback.dispatch(|user_data| UartTxEvent {
            uart: Usart0,
            user_data,
        });
    }
}

impl<R: RegisterBus, K: Clock> Uart for AvrUart<R, K> {
    type Instance = Usart0;

    fn init(&self, config: &UartConfig) -> HalResult<()> {
        if config.flow_control {
            return Err(HalError::NotSupported);
        }
        let frame = frame_bits(config)?;
        let ubrr = ubrr_for(config.baudrate)?;

        self.regs.write8(regs::UCSR0B, 0);
        self.regs.write16(regs::UBRR0, ubrr);
        self.regs.write8(regs::UCSR0A, usart::U2X | usart::TXC);
        self.regs.write8(regs::UCSR0C, frame);

        let mut control = usart::RXEN | usart::TXEN;
        if self.rx_callback.is_installed() {
            control |= usart::RXCIE;
        }
        if self.tx_callback.is_installed() {
            control |= usart::TXCIE;
        }
        self.regs.write8(regs::UCSR0B, control);

        self.initialized.set(true);
        debug!("uart: init {} baud, ubrr {}", config.baudrate, ubrr);
        Ok(())
    }

    fn deinit(&self) -> HalResult<()> {
        self.regs.write8(regs::UCSR0B, 0);
        self.regs.write8(regs::UCSR0A, usart::TXC);
        // Reset value: 8N1
        self.regs.write8(regs::UCSR0C, 3 << usart::UCSZ_SHIFT);
        self.regs.write16(regs::UBRR0, 0);
        self.rx_callback.clear();
        self.tx_callback.clear();
        critical_section::with(|cs| self.rx_buffer.borrow(cs).borrow_mut().clear());
        self.initialized.set(false);
        Ok(())
    }

    fn transmit(&self, data: &[u8], timeout_ms: u32) -> HalResult<()> {
        if data.is_empty() {
            return Err(HalError::InvalidParameter);
        }
        self.require_init()?;
        let deadline = Deadline::start(&self.clock, timeout_ms)?;

        for &byte in data {
            poll_until(&self.clock, &deadline, || {
                self.regs.is_set(regs::UCSR0A, usart::UDRE)
            })?;
            self.regs.write8(regs::UDR0, byte);
        }
        Ok(())
    }

    fn receive(&self, buf: &mut [u8], timeout_ms: u32) -> HalResult<()> {
        if buf.is_empty() {
            return Err(HalError::InvalidParameter);
        }
        self.require_init()?;
        let deadline = Deadline::start(&self.clock, timeout_ms)?;

        for slot in buf.iter_mut() {
            *slot = loop {
                if let Some(byte) = self.try_read()? {
                    break byte;
                }
                deadline.check(&self.clock)?;
            };
        }
        Ok(())
    }

    fn is_tx_ready(&self) -> HalResult<bool> {
        self.require_init()?;
        Ok(self.regs.is_set(regs::UCSR0A, usart::UDRE))
    }

    fn is_rx_ready(&self) -> HalResult<bool> {
        self.require_init()?;
        if self.buffered_len() > 0 {
            Ok(true)
        } else if self.interrupt_driven() {
            Ok(false)
        } else {
            Ok(self.regs.is_set(regs::UCSR0A, usart::RXC))
        }
    }

    fn register_rx_callback(
        &self,
        handler: Handler<UartRxEvent<Usart0>>,
        user_data: UserData,
    ) -> HalResult<()> {
        self.rx_callback.install(handler, user_data);
        if self.initialized.get() {
            self.regs.set_bits(regs::UCSR0B, usart::RXCIE);
        }
        Ok(())
    }

    fn unregister_rx_callback(&self) -> HalResult<()> {
        self.regs.clear_bits(regs::UCSR0B, usart::RXCIE);
        self.rx_callback.clear();
        Ok(())
    }

    fn register_tx_callback(
        &self,
        handler: Handler<UartTxEvent<Usart0>>,
        user_data: UserData,
    ) -> HalResult<()> {
        self.tx_callback.install(handler, user_data);
        if self.initialized.get() {
            self.regs.set_bits(regs::UCSR0B, usart::TXCIE);
        }
        Ok(())
    }

    fn unregister_tx_callback(&self) -> HalResult<()> {
        self.regs.clear_bits(regs::UCSR0B, usart::TXCIE);
        self.tx_callback.clear();
        Ok(())
    }
}
