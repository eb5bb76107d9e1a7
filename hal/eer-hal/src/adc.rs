//! ADC capability
//!
//! Single and continuous conversions on backend-defined channels, with an
//! optional per-channel completion callback.

use crate::callback::{Handler, UserData};
use crate::error::HalResult;

/// Conversion reference voltage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AdcReference {
    /// Supply voltage
    #[default]
    Vcc,
    /// External reference pin
    External,
    /// Internal bandgap reference
    Internal,
}

/// ADC clock divider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AdcPrescaler {
    Div2,
    Div4,
    Div8,
    Div16,
    Div32,
    Div64,
    #[default]
    Div128,
}

impl AdcPrescaler {
    pub fn divisor(self) -> u32 {
        match self {
            AdcPrescaler::Div2 => 2,
            AdcPrescaler::Div4 => 4,
            AdcPrescaler::Div8 => 8,
            AdcPrescaler::Div16 => 16,
            AdcPrescaler::Div32 => 32,
            AdcPrescaler::Div64 => 64,
            AdcPrescaler::Div128 => 128,
        }
    }
}

/// Result width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AdcResolution {
    Bits8,
    #[default]
    Bits10,
    Bits12,
    Bits16,
}

impl AdcResolution {
    pub fn bits(self) -> u8 {
        match self {
            AdcResolution::Bits8 => 8,
            AdcResolution::Bits10 => 10,
            AdcResolution::Bits12 => 12,
            AdcResolution::Bits16 => 16,
        }
    }

    /// Largest raw reading at this resolution
    pub fn max_value(self) -> u16 {
        ((1u32 << self.bits()) - 1) as u16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AdcMode {
    /// One conversion per explicit start
    #[default]
    Single,
    /// Re-arm automatically after each completion
    Continuous,
}

/// ADC configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AdcConfig {
    pub reference: AdcReference,
    pub prescaler: AdcPrescaler,
    pub resolution: AdcResolution,
    pub mode: AdcMode,
}

/// Completed conversion event
#[derive(Clone, Copy)]
pub struct AdcConversion<C> {
    pub channel: C,
    pub value: u16,
    pub user_data: UserData,
}

/// ADC capability table
pub trait Adc {
    /// Backend channel identifier
    type Channel: Copy;

    fn init(&self, config: &AdcConfig) -> HalResult<()>;

    fn deinit(&self) -> HalResult<()>;

    /// Begin a conversion on a channel
    fn start_conversion(&self, channel: Self::Channel) -> HalResult<()>;

    /// Stop automatic re-arming; a conversion already running still completes
    fn stop_conversion(&self) -> HalResult<()>;

    /// Check whether the last conversion on `channel` has finished
    fn is_conversion_complete(&self, channel: Self::Channel) -> HalResult<bool>;

    /// Read the raw result
    ///
    /// Starts a conversion if none is in flight and blocks until it
    /// completes. There is no timeout.
    fn read(&self, channel: Self::Channel) -> HalResult<u16>;

    /// Read the result scaled to volts using the configured reference
    fn read_voltage(&self, channel: Self::Channel) -> HalResult<f32>;

    fn register_callback(
        &self,
        channel: Self::Channel,
        handler: Handler<AdcConversion<Self::Channel>>,
        user_data: UserData,
    ) -> HalResult<()>;

    fn unregister_callback(&self, channel: Self::Channel) -> HalResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_max_value() {
        assert_eq!(AdcResolution::Bits8.max_value(), 255);
        assert_eq!(AdcResolution::Bits10.max_value(), 1023);
        assert_eq!(AdcResolution::Bits16.max_value(), u16::MAX);
    }
}
