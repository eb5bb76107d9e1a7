//! Core instructions that are not register accesses

/// CPU control used by the System and Power drivers
pub trait Cpu {
    /// Set the global interrupt flag (`sei`)
    fn enable_interrupts(&self);

    /// Clear the global interrupt flag (`cli`)
    fn disable_interrupts(&self);

    /// Execute `sleep` with the mode already programmed in `SMCR`
    fn sleep(&self);

    /// Jump to the reset vector
    ///
    /// Only returns on targets that cannot perform the jump.
    fn jump_to_reset(&self);

    /// Spin until an armed watchdog resets the device
    fn wait_for_reset(&self);

    /// Burn at least `cycles` core clock cycles
    fn delay_cycles(&self, cycles: u32);
}

/// The ATmega328P core
#[cfg(target_arch = "avr")]
#[derive(Debug, Clone, Copy, Default)]
pub struct AvrCpu;

#[cfg(target_arch = "avr")]
impl Cpu for AvrCpu {
    fn enable_interrupts(&self) {
        // SAFETY: every ISR-shared value is accessed inside a critical section
        unsafe { avr_device::interrupt::enable() }
    }

    fn disable_interrupts(&self) {
        avr_device::interrupt::disable();
    }

    fn sleep(&self) {
        avr_device::asm::sleep();
    }

    fn jump_to_reset(&self) {
        // SAFETY: the reset vector is always at address 0 and never returns
        unsafe { core::arch::asm!("jmp 0", options(noreturn)) }
    }

    fn wait_for_reset(&self) {
        loop {
            avr_device::asm::nop();
        }
    }

    fn delay_cycles(&self, cycles: u32) {
        avr_device::asm::delay_cycles(cycles);
    }
}
