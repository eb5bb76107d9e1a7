//! Power management capability
//!
//! Voltage and consumption figures are estimates unless the platform has a
//! sensor.

use crate::error::HalResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PowerMode {
    #[default]
    Run,
    Sleep,
    DeepSleep,
    Standby,
}

/// Event class that can end a sleep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WakeupSource {
    Pin,
    Rtc,
    Timer,
    Watchdog,
}

/// Record of the most recent wake event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Wakeup {
    pub source: WakeupSource,
    /// Pin or peripheral number within the source class
    pub id: u8,
}

/// Power capability table
pub trait Power {
    fn init(&self) -> HalResult<()>;

    fn deinit(&self) -> HalResult<()>;

    /// Enter a power mode
    ///
    /// Sleep modes return after the device has woken up.
    fn set_mode(&self, mode: PowerMode) -> HalResult<()>;

    fn get_mode(&self) -> HalResult<PowerMode>;

    fn enable_wakeup_source(&self, source: WakeupSource, id: u8) -> HalResult<()>;

    fn disable_wakeup_source(&self, source: WakeupSource, id: u8) -> HalResult<()>;

    /// Source of the most recent wake event, if one has happened
    fn get_wakeup_source(&self) -> HalResult<Option<Wakeup>>;

    /// Supply voltage in millivolts
    fn get_voltage(&self) -> HalResult<u16>;

    /// Estimated power draw in milliwatts
    fn get_power_consumption(&self) -> HalResult<u16>;
}
