//! Millisecond tick source and polling deadlines
//!
//! Blocking operations take a `timeout_ms` argument. Zero waits forever; any
//! other value is measured against the system tick and needs a running
//! [`Clock`].

use crate::error::{HalError, HalResult};

/// Wait without a deadline
pub const WAIT_FOREVER: u32 = 0;

/// Monotonic millisecond tick
///
/// Implemented by the System capability of each backend.
pub trait Clock {
    /// Milliseconds since the tick was started, wrapping at `u32::MAX`
    fn now_ms(&self) -> u32;

    /// Check whether the tick is advancing
    fn is_running(&self) -> bool {
        true
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> u32 {
        (**self).now_ms()
    }

    fn is_running(&self) -> bool {
        (**self).is_running()
    }
}

/// Point in time after which a polling loop gives up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Deadline {
    start: u32,
    timeout_ms: u32,
}

impl Deadline {
    /// Start a deadline `timeout_ms` from now
    ///
    /// Fails with `Error` when a finite timeout is requested but the tick is
    /// not running, since it could never expire.
    pub fn start<C: Clock>(clock: &C, timeout_ms: u32) -> HalResult<Self> {
        if timeout_ms == WAIT_FOREVER {
            return Ok(Self::forever());
        }
        if !clock.is_running() {
            return Err(HalError::Error);
        }
        Ok(Self {
            start: clock.now_ms(),
            timeout_ms,
        })
    }

    /// Deadline that never expires
    pub const fn forever() -> Self {
        Self {
            start: 0,
            timeout_ms: WAIT_FOREVER,
        }
    }

    pub fn is_forever(&self) -> bool {
        self.timeout_ms == WAIT_FOREVER
    }

    pub fn expired<C: Clock>(&self, clock: &C) -> bool {
        !self.is_forever() && clock.now_ms().wrapping_sub(self.start) >= self.timeout_ms
    }

    /// Fail with `Timeout` once the deadline has passed
    pub fn check<C: Clock>(&self, clock: &C) -> HalResult<()> {
        if self.expired(clock) {
            Err(HalError::Timeout)
        } else {
            Ok(())
        }
    }
}

/// Busy-poll `condition` until it holds or the deadline passes
///
/// The condition is always evaluated at least once, so a flag that is
/// already set succeeds even with an expired deadline.
pub fn poll_until<C: Clock>(
    clock: &C,
    deadline: &Deadline,
    mut condition: impl FnMut() -> bool,
) -> HalResult<()> {
    loop {
        if condition() {
            return Ok(());
        }
        deadline.check(clock)?;
    }
}
