//! Interrupt callback registry
//!
//! Drivers keep one [`CallbackSlot`] per event source. The foreground installs
//! and clears handlers, interrupt service routines dispatch through the slot.
//! Handler and user data live in a single cell guarded by a critical section,
//! so an ISR always observes a consistent pair.
//!
//! Handlers run in interrupt context. They must not block and must not call
//! HAL operations that wait on flags set by their own interrupt.

use core::any::Any;
use core::cell::Cell;

use critical_section::Mutex;

use crate::error::{HalError, HalResult};

/// Opaque user context passed back to a handler
///
/// Handlers recover their own type with `downcast_ref`.
pub type UserData = Option<&'static (dyn Any + Send + Sync)>;

/// Handler invoked with the event that triggered it
pub type Handler<E> = fn(&E);

/// A registered handler and its user context
pub struct Callback<E> {
    pub handler: Handler<E>,
    pub user_data: UserData,
}

impl<E> Callback<E> {
    pub const fn new(handler: Handler<E>, user_data: UserData) -> Self {
        Self { handler, user_data }
    }
}

impl<E> Clone for Callback<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for Callback<E> {}

/// Single callback slot shared between foreground and ISR
pub struct CallbackSlot<E> {
    inner: Mutex<Cell<Option<Callback<E>>>>,
}

impl<E> CallbackSlot<E> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Cell::new(None)),
        }
    }

    /// Install a handler, replacing any previous one
    pub fn install(&self, handler: Handler<E>, user_data: UserData) {
        critical_section::with(|cs| {
            self.inner
                .borrow(cs)
                .set(Some(Callback::new(handler, user_data)))
        });
    }

    /// Remove the handler
    pub fn clear(&self) {
        critical_section::with(|cs| self.inner.borrow(cs).set(None));
    }

    /// Check whether a handler is installed
    pub fn is_installed(&self) -> bool {
        self.get().is_some()
    }

    /// Snapshot of the current registration
    pub fn get(&self) -> Option<Callback<E>> {
        critical_section::with(|cs| self.inner.borrow(cs).get())
    }

    /// Invoke the handler, if any, with an event built from its user data
    ///
    /// The slot is read inside a critical section; the handler itself runs
    /// outside it. Returns `true` if a handler ran.
    pub fn dispatch(&self, build: impl FnOnce(UserData) -> E) -> bool {
        match self.get() {
            Some(cb) => {
                let event = build(cb.user_data);
                (cb.handler)(&event);
                true
            }
            None => false,
        }
    }
}

impl<E> Default for CallbackSlot<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed set of callback slots addressed by index
pub struct CallbackRegistry<E, const N: usize> {
    slots: [CallbackSlot<E>; N],
}

impl<E, const N: usize> CallbackRegistry<E, N> {
    pub const fn new() -> Self {
        Self {
            slots: [const { CallbackSlot::new() }; N],
        }
    }

    /// Number of slots
    pub const fn len(&self) -> usize {
        N
    }

    pub const fn is_empty(&self) -> bool {
        N == 0
    }

    /// Access one slot
    pub fn slot(&self, index: usize) -> HalResult<&CallbackSlot<E>> {
        self.slots.get(index).ok_or(HalError::InvalidParameter)
    }

    pub fn install(&self, index: usize, handler: Handler<E>, user_data: UserData) -> HalResult<()> {
        self.slot(index)?.install(handler, user_data);
        Ok(())
    }

    pub fn clear(&self, index: usize) -> HalResult<()> {
        self.slot(index)?.clear();
        Ok(())
    }

    /// Remove every handler
    pub fn clear_all(&self) {
        for slot in &self.slots {
            slot.clear();
        }
    }

    /// Check whether any slot holds a handler
    pub fn any_installed(&self) -> bool {
        self.slots.iter().any(CallbackSlot::is_installed)
    }

    /// Dispatch through one slot; out-of-range indices are ignored
    pub fn dispatch(&self, index: usize, build: impl FnOnce(UserData) -> E) -> bool {
        match self.slots.get(index) {
            Some(slot) => slot.dispatch(build),
            None => false,
        }
    }
}

impl<E, const N: usize> Default for CallbackRegistry<E, N> {
    fn default() -> Self {
        Self::new()
    }
}
