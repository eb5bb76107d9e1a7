//! I2C bus master capability
//!
//! Every transaction runs START, address, data and STOP, optionally with a
//! repeated START between a write and a read half. A failed step always ends
//! with STOP so the bus is idle when an error is returned.

use crate::callback::{Handler, UserData};
use crate::error::HalResult;

/// First address probed by a bus scan
pub const SCAN_FIRST_ADDRESS: u16 = 0x08;
/// Last address probed by a bus scan
pub const SCAN_LAST_ADDRESS: u16 = 0x77;

/// Check whether a 7-bit address is outside the reserved ranges
pub fn is_scannable(address: u16) -> bool {
    (SCAN_FIRST_ADDRESS..=SCAN_LAST_ADDRESS).contains(&address)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AddressMode {
    #[default]
    SevenBit,
    TenBit,
}

/// Bus speed class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum I2cSpeed {
    /// 100 kHz
    #[default]
    Standard,
    /// 400 kHz
    Fast,
    /// 1 MHz
    FastPlus,
}

impl I2cSpeed {
    pub fn hz(self) -> u32 {
        match self {
            I2cSpeed::Standard => 100_000,
            I2cSpeed::Fast => 400_000,
            I2cSpeed::FastPlus => 1_000_000,
        }
    }
}

/// I2C configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct I2cConfig {
    pub addr_mode: AddressMode,
    pub speed: I2cSpeed,
    /// Explicit SCL frequency in Hz; overrides `speed` when nonzero
    pub clock_hz: u32,
    /// Fast-mode duty cycle: 16/9 when true, 2 when false
    pub duty_cycle: bool,
}

impl I2cConfig {
    /// Standard mode (100 kHz)
    pub const STANDARD: Self = Self::with_speed(I2cSpeed::Standard);

    /// Fast mode (400 kHz)
    pub const FAST: Self = Self::with_speed(I2cSpeed::Fast);

    /// Fast mode plus (1 MHz)
    pub const FAST_PLUS: Self = Self::with_speed(I2cSpeed::FastPlus);

    const fn with_speed(speed: I2cSpeed) -> Self {
        Self {
            addr_mode: AddressMode::SevenBit,
            speed,
            clock_hz: 0,
            duty_cycle: false,
        }
    }

    /// Effective SCL frequency
    pub fn scl_hz(&self) -> u32 {
        if self.clock_hz != 0 {
            self.clock_hz
        } else {
            self.speed.hz()
        }
    }
}

/// Transaction completed
#[derive(Clone, Copy)]
pub struct I2cTransferEvent<I> {
    pub i2c: I,
    pub address: u16,
    /// Bytes written
    pub tx_len: usize,
    /// Bytes read
    pub rx_len: usize,
    pub user_data: UserData,
}

/// I2C capability table
pub trait I2c {
    /// Backend instance identifier carried in events
    type Instance: Copy;

    fn init(&self, config: &I2cConfig) -> HalResult<()>;

    fn deinit(&self) -> HalResult<()>;

    /// Write `data` to a device
    ///
    /// # Arguments
    /// * `address` - 7-bit device address
    /// * `data` - Bytes to write, at least one
    /// * `timeout_ms` - Bound on the whole transaction; zero waits forever
    fn master_transmit(&self, address: u16, data: &[u8], timeout_ms: u32) -> HalResult<()>;

    /// Read `buf.len()` bytes from a device
    fn master_receive(&self, address: u16, buf: &mut [u8], timeout_ms: u32) -> HalResult<()>;

    /// Write then read in a single transaction (repeated start)
    ///
    /// # Arguments
    /// * `address` - 7-bit device address
    /// * `tx` - Bytes to write (typically a register address)
    /// * `rx` - Buffer to read into
    /// * `timeout_ms` - Bound on the whole transaction; zero waits forever
    fn master_transmit_receive(
        &self,
        address: u16,
        tx: &[u8],
        rx: &mut [u8],
        timeout_ms: u32,
    ) -> HalResult<()>;

    /// Check whether a transaction is in progress
    fn is_busy(&self) -> HalResult<bool>;

    /// Probe every non-reserved 7-bit address
    ///
    /// Responding addresses are stored in `found` in ascending order until it
    /// is full. Returns the number stored.
    fn scan(&self, found: &mut [u16]) -> HalResult<usize>;

    fn register_callback(
        &self,
        handler: Handler<I2cTransferEvent<Self::Instance>>,
        user_data: UserData,
    ) -> HalResult<()>;

    fn unregister_callback(&self) -> HalResult<()>;
}
