//! `embedded-hal` and `embedded-io` implementations
//!
//! Lets ecosystem device drivers run on top of the backend. The traits take
//! `&mut self`, so they are implemented for shared references to the
//! drivers; `let mut spi = &SPI;` is enough to hand a static driver to a
//! device crate.
//!
//! These interfaces have no timeout argument. SPI and UART wait without a
//! bound, I2C uses [`BLOCKING_TIMEOUT_MS`](crate::i2c::BLOCKING_TIMEOUT_MS)
//! once the system tick runs.

use eer_hal::{Clock, HalError, Spi, Uart, WAIT_FOREVER};
use embedded_hal::i2c::{NoAcknowledgeSource, Operation, SevenBitAddress};
use embedded_hal::{delay, i2c, spi};

use crate::cpu::Cpu;
use crate::i2c::AvrI2c;
use crate::regs::RegisterBus;
use crate::spi::AvrSpi;
use crate::system::AvrSystem;
use crate::uart::AvrUart;

/// Chunk size for in-place SPI transfers
const SPI_CHUNK: usize = 16;

/// HAL error surfaced through the ecosystem traits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Error(pub HalError);

impl From<HalError> for Error {
    fn from(e: HalError) -> Self {
        Self(e)
    }
}

impl i2c::Error for Error {
    fn kind(&self) -> i2c::ErrorKind {
        match self.0 {
            // Address and data NACKs are the common transaction failure
            HalError::Error => i2c::ErrorKind::NoAcknowledge(NoAcknowledgeSource::Unknown),
            _ => i2c::ErrorKind::Other,
        }
    }
}

impl spi::Error for Error {
    fn kind(&self) -> spi::ErrorKind {
        spi::ErrorKind::Other
    }
}

impl embedded_io::Error for Error {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self.0 {
            HalError::Timeout => embedded_io::ErrorKind::TimedOut,
            HalError::InvalidParameter => embedded_io::ErrorKind::InvalidInput,
            HalError::NotSupported => embedded_io::ErrorKind::Unsupported,
            HalError::Error | HalError::Busy => embedded_io::ErrorKind::Other,
        }
    }
}

impl<R: RegisterBus, C: Cpu> delay::DelayNs for &AvrSystem<R, C> {
    fn delay_ns(&mut self, ns: u32) {
        self.busy_wait_us(ns.div_ceil(1000));
    }

    fn delay_us(&mut self, us: u32) {
        self.busy_wait_us(us);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.busy_wait_ms(ms);
    }
}

impl<R: RegisterBus, K: Clock> i2c::ErrorType for &AvrI2c<R, K> {
    type Error = Error;
}

impl<R: RegisterBus, K: Clock> i2c::I2c<SevenBitAddress> for &AvrI2c<R, K> {
    fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        Ok(self.run_operations(address, operations)?)
    }
}

impl<R: RegisterBus, K: Clock> spi::ErrorType for &AvrSpi<R, K> {
    type Error = Error;
}

impl<R: RegisterBus, K: Clock> spi::SpiBus<u8> for &AvrSpi<R, K> {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        if !words.is_empty() {
            Spi::receive(*self, words, WAIT_FOREVER)?;
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        if !words.is_empty() {
            Spi::transmit(*self, words, WAIT_FOREVER)?;
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        let common = read.len().min(write.len());
        let (read_head, read_tail) = read.split_at_mut(common);
        let (write_head, write_tail) = write.split_at(common);
        if common > 0 {
            Spi::transfer(*self, Some(write_head), Some(read_head), WAIT_FOREVER)?;
        }
        // Only one of the tails can be non-empty
        spi::SpiBus::read(self, read_tail)?;
        spi::SpiBus::write(self, write_tail)
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        let mut tx = [0u8; SPI_CHUNK];
        for chunk in words.chunks_mut(SPI_CHUNK) {
            let tx = &mut tx[..chunk.len()];
            tx.copy_from_slice(chunk);
            Spi::transfer(*self, Some(&*tx), Some(chunk), WAIT_FOREVER)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl<R: RegisterBus, K: Clock> embedded_io::ErrorType for &AvrUart<R, K> {
    type Error = Error;
}

impl<R: RegisterBus, K: Clock> embedded_io::Read for &AvrUart<R, K> {
    /// Block for the first byte, then take whatever else is already waiting
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        Uart::receive(*self, &mut buf[..1], WAIT_FOREVER)?;
        let mut n = 1;
        while n < buf.len() && Uart::is_rx_ready(*self)? {
            Uart::receive(*self, &mut buf[n..=n], WAIT_FOREVER)?;
            n += 1;
        }
        Ok(n)
    }
}

impl<R: RegisterBus, K: Clock> embedded_io::Write for &AvrUart<R, K> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        Uart::transmit(*self, buf, WAIT_FOREVER)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        while !Uart::is_tx_ready(*self)? {}
        Ok(())
    }
}
