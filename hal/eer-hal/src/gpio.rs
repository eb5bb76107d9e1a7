//! GPIO capability
//!
//! Digital pin configuration, level access and edge interrupts. Pins are
//! identified by a backend-defined [`Gpio::Pin`] value.

use crate::callback::{Handler, UserData};
use crate::error::HalResult;

/// Logic level of a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        self == Level::High
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl core::ops::Not for Level {
    type Output = Level;

    fn not(self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

/// Electrical mode of a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PinMode {
    #[default]
    Input,
    InputPullUp,
    InputPullDown,
    Output,
    OutputOpenDrain,
    Analog,
    Alternate,
    AlternateOpenDrain,
}

impl PinMode {
    pub fn is_output(self) -> bool {
        matches!(self, PinMode::Output | PinMode::OutputOpenDrain)
    }
}

/// Output slew rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PinSpeed {
    #[default]
    Low,
    Medium,
    High,
    VeryHigh,
}

/// Edge that raises a pin interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Trigger {
    #[default]
    None,
    Rising,
    Falling,
    Both,
}

/// Pin configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GpioConfig {
    pub mode: PinMode,
    pub speed: PinSpeed,
    pub trigger: Trigger,
    /// Alternate function number, meaningful in the alternate modes only
    pub alternate: u8,
}

impl GpioConfig {
    /// Push-pull output
    pub const OUTPUT: Self = Self {
        mode: PinMode::Output,
        speed: PinSpeed::Low,
        trigger: Trigger::None,
        alternate: 0,
    };

    /// Floating input
    pub const INPUT: Self = Self {
        mode: PinMode::Input,
        speed: PinSpeed::Low,
        trigger: Trigger::None,
        alternate: 0,
    };

    /// Input with an interrupt on the given edge
    pub const fn interrupt(mode: PinMode, trigger: Trigger) -> Self {
        Self {
            mode,
            speed: PinSpeed::Low,
            trigger,
            alternate: 0,
        }
    }
}

/// Pin interrupt event
#[derive(Clone, Copy)]
pub struct GpioIrq<P> {
    pub pin: P,
    /// Level sampled when the interrupt was serviced
    pub level: Level,
    pub user_data: UserData,
}

/// GPIO capability table
pub trait Gpio {
    /// Backend pin identifier
    type Pin: Copy;

    fn init(&self) -> HalResult<()>;

    /// Return every pin to its reset state and drop all interrupt handlers
    fn deinit(&self) -> HalResult<()>;

    /// Apply a configuration to one pin
    ///
    /// Either the whole configuration is applied or none of it is.
    fn configure(&self, pin: Self::Pin, config: &GpioConfig) -> HalResult<()>;

    fn write(&self, pin: Self::Pin, level: Level) -> HalResult<()>;

    fn read(&self, pin: Self::Pin) -> HalResult<Level>;

    fn toggle(&self, pin: Self::Pin) -> HalResult<()>;

    /// Install an interrupt handler for a pin
    ///
    /// The interrupt itself stays masked until [`Gpio::enable_irq`].
    fn register_irq(
        &self,
        pin: Self::Pin,
        handler: Handler<GpioIrq<Self::Pin>>,
        user_data: UserData,
    ) -> HalResult<()>;

    fn unregister_irq(&self, pin: Self::Pin) -> HalResult<()>;

    /// Unmask the interrupt using the trigger set by [`Gpio::configure`]
    fn enable_irq(&self, pin: Self::Pin) -> HalResult<()>;

    fn disable_irq(&self, pin: Self::Pin) -> HalResult<()>;
}
