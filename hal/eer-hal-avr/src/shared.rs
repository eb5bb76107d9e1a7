//! Driver state shared with interrupt handlers

use core::cell::Cell;

use critical_section::Mutex;

/// `Copy` state behind a critical section
pub(crate) struct Shared<T: Copy>(Mutex<Cell<T>>);

impl<T: Copy> Shared<T> {
    pub(crate) const fn new(value: T) -> Self {
        Self(Mutex::new(Cell::new(value)))
    }

    pub(crate) fn get(&self) -> T {
        critical_section::with(|cs| self.0.borrow(cs).get())
    }

    pub(crate) fn set(&self, value: T) {
        critical_section::with(|cs| self.0.borrow(cs).set(value));
    }

    /// Read-modify-write in one critical section, returning the new value
    pub(crate) fn update(&self, f: impl FnOnce(&mut T)) -> T {
        critical_section::with(|cs| {
            let cell = self.0.borrow(cs);
            let mut value = cell.get();
            f(&mut value);
            cell.set(value);
            value
        })
    }
}
