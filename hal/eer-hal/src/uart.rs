//! UART serial communication capability
//!
//! Blocking transmit/receive with millisecond timeouts plus interrupt-driven
//! per-byte receive and transmit-complete notifications.
//!
//! Blocking [`Uart::receive`] and a registered RX callback compete for the
//! same received bytes. Using both on one instance at the same time is not
//! supported; callers pick one.

use crate::callback::{Handler, UserData};
use crate::error::HalResult;

/// UART configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UartConfig {
    /// Baud rate in bits per second
    pub baudrate: u32,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub data_bits: DataBits,
    /// Hardware RTS/CTS flow control
    pub flow_control: bool,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            baudrate: 115_200,
            parity: Parity::None,
            stop_bits: StopBits::One,
            data_bits: DataBits::Eight,
            flow_control: false,
        }
    }
}

impl UartConfig {
    /// 8N1 at the given baud rate
    pub const fn baud(baudrate: u32) -> Self {
        Self {
            baudrate,
            parity: Parity::None,
            stop_bits: StopBits::One,
            data_bits: DataBits::Eight,
            flow_control: false,
        }
    }
}

/// Number of data bits per frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
    Nine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Parity {
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StopBits {
    One,
    Two,
}

/// One byte received in interrupt context
#[derive(Clone, Copy)]
pub struct UartRxEvent<I> {
    pub uart: I,
    pub byte: u8,
    pub user_data: UserData,
}

/// Transmission finished; the shift register is empty
#[derive(Clone, Copy)]
pub struct UartTxEvent<I> {
    pub uart: I,
    pub user_data: UserData,
}

/// UART capability table
pub trait Uart {
    /// Backend instance identifier carried in events
    type Instance: Copy;

    fn init(&self, config: &UartConfig) -> HalResult<()>;

    fn deinit(&self) -> HalResult<()>;

    /// Send every byte of `data`
    ///
    /// `timeout_ms` bounds the whole call; zero waits forever.
    fn transmit(&self, data: &[u8], timeout_ms: u32) -> HalResult<()>;

    /// Fill `buf` completely
    ///
    /// `timeout_ms` bounds the whole call; zero waits forever. On timeout the
    /// number of bytes already stored is not reported.
    fn receive(&self, buf: &mut [u8], timeout_ms: u32) -> HalResult<()>;

    /// Check whether the transmit data register can take a byte
    fn is_tx_ready(&self) -> HalResult<bool>;

    /// Check whether a received byte is waiting
    fn is_rx_ready(&self) -> HalResult<bool>;

    fn register_rx_callback(
        &self,
        handler: Handler<UartRxEvent<Self::Instance>>,
        user_data: UserData,
    ) -> HalResult<()>;

    fn unregister_rx_callback(&self) -> HalResult<()>;

    fn register_tx_callback(
        &self,
        handler: Handler<UartTxEvent<Self::Instance>>,
        user_data: UserData,
    ) -> HalResult<()>;

    fn unregister_tx_callback(&self) -> HalResult<()>;
}
