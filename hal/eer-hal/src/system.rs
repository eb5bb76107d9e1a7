//! System capability: tick source, reset, interrupts and delays

use crate::error::HalResult;
use crate::time::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResetKind {
    /// Restart execution at the reset vector without resetting peripherals
    Soft,
    /// Full hardware reset
    Hard,
    /// Let the watchdog expire
    Watchdog,
}

/// System capability table
///
/// Every backend's System is also the [`Clock`] that timeouts are measured
/// against, so it must be initialised before any call with a nonzero
/// timeout.
pub trait System: Clock {
    /// Start the millisecond tick; calling it again is a no-op
    fn init(&self) -> HalResult<()>;

    fn deinit(&self) -> HalResult<()>;

    /// Reset the device; returns only if the reset could not be performed
    fn reset(&self, kind: ResetKind) -> HalResult<()>;

    fn enable_interrupts(&self) -> HalResult<()>;

    fn disable_interrupts(&self) -> HalResult<()>;

    /// Busy-wait for `ms` milliseconds
    fn delay_ms(&self, ms: u32) -> HalResult<()>;

    /// Busy-wait for `us` microseconds
    fn delay_us(&self, us: u32) -> HalResult<()>;

    /// Tick counter, read atomically with respect to the tick interrupt
    fn get_tick(&self) -> HalResult<u32>;

    /// Milliseconds since [`System::init`]
    fn get_uptime_ms(&self) -> HalResult<u32>;
}
