//! SPI bus capability
//!
//! Byte-synchronous full-duplex transfers. Chip select is a plain GPIO driven
//! by [`Spi::chip_select`], never toggled automatically.

use crate::callback::{Handler, UserData};
use crate::error::HalResult;

/// Byte clocked out when a transfer has no transmit buffer
pub const DUMMY_BYTE: u8 = 0xFF;

/// Clock polarity and phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SpiMode {
    /// CPOL=0, CPHA=0
    #[default]
    Mode0,
    /// CPOL=0, CPHA=1
    Mode1,
    /// CPOL=1, CPHA=0
    Mode2,
    /// CPOL=1, CPHA=1
    Mode3,
}

impl SpiMode {
    pub fn cpol(self) -> bool {
        matches!(self, SpiMode::Mode2 | SpiMode::Mode3)
    }

    pub fn cpha(self) -> bool {
        matches!(self, SpiMode::Mode1 | SpiMode::Mode3)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BitOrder {
    #[default]
    MsbFirst,
    LsbFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataSize {
    #[default]
    Bits8,
    Bits16,
}

/// SPI clock divider relative to the core clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SpiPrescaler {
    Div2,
    #[default]
    Div4,
    Div8,
    Div16,
    Div32,
    Div64,
    Div128,
}

/// SPI configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpiConfig {
    pub mode: SpiMode,
    pub bit_order: BitOrder,
    pub data_size: DataSize,
    pub prescaler: SpiPrescaler,
    /// Master (true) or slave (false)
    pub master: bool,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            mode: SpiMode::Mode0,
            bit_order: BitOrder::MsbFirst,
            data_size: DataSize::Bits8,
            prescaler: SpiPrescaler::Div4,
            master: true,
        }
    }
}

/// Transfer completed
#[derive(Clone, Copy)]
pub struct SpiTransferEvent<I> {
    pub spi: I,
    /// Number of bytes exchanged
    pub size: usize,
    pub user_data: UserData,
}

/// SPI capability table
pub trait Spi {
    /// Backend instance identifier carried in events
    type Instance: Copy;
    /// Pin type accepted by [`Spi::chip_select`]
    type CsPin: Copy;

    fn init(&self, config: &SpiConfig) -> HalResult<()>;

    fn deinit(&self) -> HalResult<()>;

    /// Exchange bytes full-duplex
    ///
    /// Either side may be absent. A missing `tx` clocks out [`DUMMY_BYTE`], a
    /// missing `rx` discards what is read. When both are given their lengths
    /// must match.
    fn transfer(&self, tx: Option<&[u8]>, rx: Option<&mut [u8]>, timeout_ms: u32)
        -> HalResult<()>;

    fn transmit(&self, data: &[u8], timeout_ms: u32) -> HalResult<()> {
        self.transfer(Some(data), None, timeout_ms)
    }

    fn receive(&self, buf: &mut [u8], timeout_ms: u32) -> HalResult<()> {
        self.transfer(None, Some(buf), timeout_ms)
    }

    /// Check whether no transfer is in progress
    fn is_ready(&self) -> HalResult<bool>;

    /// Drive a chip-select line; `active` selects the device
    fn chip_select(&self, pin: Self::CsPin, active: bool) -> HalResult<()>;

    fn register_callback(
        &self,
        handler: Handler<SpiTransferEvent<Self::Instance>>,
        user_data: UserData,
    ) -> HalResult<()>;

    fn unregister_callback(&self) -> HalResult<()>;
}
