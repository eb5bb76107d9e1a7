//! Hardware timer capability
//!
//! A timer is either STOPPED or RUNNING. [`Timer::init`] leaves it stopped.
//! A one-shot timer stops itself on its first overflow or compare event, a
//! continuous timer runs until [`Timer::stop`], and in PWM mode changing the
//! period, a compare value or a duty cycle restarts a stopped timer.

use crate::callback::{Handler, UserData};
use crate::error::HalResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TimerMode {
    OneShot,
    #[default]
    Continuous,
    Pwm,
}

/// Timer event class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TimerEvent {
    Overflow,
    Compare,
    Capture,
}

/// Timer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimerConfig {
    /// Tick frequency in Hz
    pub frequency: u32,
    pub mode: TimerMode,
    /// Period in ticks
    pub period: u32,
    /// Output channel used by PWM mode
    pub channel: u8,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            frequency: 2_000_000,
            mode: TimerMode::Continuous,
            period: 20_000,
            channel: 0,
        }
    }
}

/// Compare value for a duty cycle in percent
///
/// Truncates, so 50% of an odd period rounds down.
pub fn duty_to_compare(period: u32, duty_percent: u8) -> u32 {
    (u64::from(period) * u64::from(duty_percent) / 100) as u32
}

/// Timer event delivered to a callback
#[derive(Clone, Copy)]
pub struct TimerEventInfo<I> {
    pub timer: I,
    pub event: TimerEvent,
    pub channel: u8,
    /// Counter or captured value at the time of the event
    pub value: u32,
    pub user_data: UserData,
}

/// Timer capability table
pub trait Timer {
    /// Backend instance identifier carried in events
    type Instance: Copy;

    fn init(&self, config: &TimerConfig) -> HalResult<()>;

    fn deinit(&self) -> HalResult<()>;

    fn start(&self) -> HalResult<()>;

    fn stop(&self) -> HalResult<()>;

    /// Change the period in ticks
    fn set_period(&self, period: u32) -> HalResult<()>;

    /// Current counter value
    fn get_value(&self) -> HalResult<u32>;

    fn set_compare(&self, channel: u8, value: u32) -> HalResult<()>;

    /// Set a PWM duty cycle in percent (0 to 100)
    ///
    /// Only valid in PWM mode. The compare register receives
    /// [`duty_to_compare`] of the configured period.
    fn set_pwm_duty_cycle(&self, channel: u8, duty_percent: u8) -> HalResult<()>;

    /// Convert microseconds to ticks at the configured frequency
    fn us_to_ticks(&self, us: u32) -> u32;

    /// Convert ticks at the configured frequency to microseconds
    fn ticks_to_us(&self, ticks: u32) -> u32;

    fn register_callback(
        &self,
        event: TimerEvent,
        channel: u8,
        handler: Handler<TimerEventInfo<Self::Instance>>,
        user_data: UserData,
    ) -> HalResult<()>;

    fn unregister_callback(&self, event: TimerEvent, channel: u8) -> HalResult<()>;
}
