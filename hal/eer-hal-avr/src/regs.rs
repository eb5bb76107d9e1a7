//! ATmega328P register map and register access
//!
//! Addresses are data-space addresses (I/O address + 0x20), so every register
//! is reached with plain loads and stores. Drivers only talk to hardware
//! through [`RegisterBus`], which lets host tests substitute a simulated bus.

/// Byte-wide register access
pub trait RegisterBus {
    fn read8(&self, addr: usize) -> u8;

    fn write8(&self, addr: usize, value: u8);

    /// Read-modify-write inside a critical section
    ///
    /// Callbacks may touch the same port or interrupt-mask register from an
    /// ISR, so the read and the write-back must not be split by one.
    ///
    /// Writes back any write-one-to-clear flag that reads as set, so never
    /// use it on registers such as `TWCR` where that matters.
    fn modify8(&self, addr: usize, f: impl FnOnce(u8) -> u8) {
        critical_section::with(|_| {
            let value = self.read8(addr);
            self.write8(addr, f(value));
        });
    }

    fn set_bits(&self, addr: usize, mask: u8) {
        self.modify8(addr, |v| v | mask);
    }

    fn clear_bits(&self, addr: usize, mask: u8) {
        self.modify8(addr, |v| v & !mask);
    }

    fn is_set(&self, addr: usize, mask: u8) -> bool {
        self.read8(addr) & mask != 0
    }

    /// Read a 16-bit register pair, low byte first
    ///
    /// The low-byte read latches the high byte into the TEMP register shared
    /// by every 16-bit register, so the pair is read in a critical section.
    fn read16(&self, low: usize) -> u16 {
        critical_section::with(|_| {
            let lo = self.read8(low);
            let hi = self.read8(low + 1);
            u16::from_le_bytes([lo, hi])
        })
    }

    /// Write a 16-bit register pair, high byte first
    fn write16(&self, low: usize, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        critical_section::with(|_| {
            self.write8(low + 1, hi);
            self.write8(low, lo);
        });
    }
}

impl<T: RegisterBus + ?Sized> RegisterBus for &T {
    fn read8(&self, addr: usize) -> u8 {
        (**self).read8(addr)
    }

    fn write8(&self, addr: usize, value: u8) {
        (**self).write8(addr, value)
    }
}

/// Memory-mapped register access on the real device
#[cfg(target_arch = "avr")]
#[derive(Debug, Clone, Copy, Default)]
pub struct Mmio;

#[cfg(target_arch = "avr")]
impl RegisterBus for Mmio {
    #[inline(always)]
    fn read8(&self, addr: usize) -> u8 {
        // SAFETY: callers only pass addresses from this module, all of which
        // are valid byte-wide registers on the ATmega328P
        unsafe { core::ptr::read_volatile(addr as *const u8) }
    }

    #[inline(always)]
    fn write8(&self, addr: usize, value: u8) {
        // SAFETY: see read8
        unsafe { core::ptr::write_volatile(addr as *mut u8, value) }
    }
}

/// Bit mask for bit number `n`
pub const fn bit(n: u8) -> u8 {
    1 << n
}

// GPIO ports
pub const PINB: usize = 0x23;
pub const DDRB: usize = 0x24;
pub const PORTB: usize = 0x25;
pub const PINC: usize = 0x26;
pub const DDRC: usize = 0x27;
pub const PORTC: usize = 0x28;
pub const PIND: usize = 0x29;
pub const DDRD: usize = 0x2A;
pub const PORTD: usize = 0x2B;

// Interrupt flags
pub const TIFR0: usize = 0x35;
pub const TIFR1: usize = 0x36;
pub const TIFR2: usize = 0x37;
pub const PCIFR: usize = 0x3B;
pub const EIFR: usize = 0x3C;
pub const EIMSK: usize = 0x3D;

// Timer0 (system tick)
pub const TCCR0A: usize = 0x44;
pub const TCCR0B: usize = 0x45;
pub const TCNT0: usize = 0x46;
pub const OCR0A: usize = 0x47;

// SPI
pub const SPCR: usize = 0x4C;
pub const SPSR: usize = 0x4D;
pub const SPDR: usize = 0x4E;

// Sleep, reset and watchdog
pub const SMCR: usize = 0x53;
pub const MCUSR: usize = 0x54;
pub const WDTCSR: usize = 0x60;

// Interrupt control
pub const PCICR: usize = 0x68;
pub const EICRA: usize = 0x69;
pub const PCMSK0: usize = 0x6B;
pub const PCMSK1: usize = 0x6C;
pub const PCMSK2: usize = 0x6D;
pub const TIMSK0: usize = 0x6E;
pub const TIMSK1: usize = 0x6F;
pub const TIMSK2: usize = 0x70;

// ADC
pub const ADCL: usize = 0x78;
pub const ADCH: usize = 0x79;
pub const ADCSRA: usize = 0x7A;
pub const ADCSRB: usize = 0x7B;
pub const ADMUX: usize = 0x7C;
pub const DIDR0: usize = 0x7E;

// Timer1 (16 bit)
pub const TCCR1A: usize = 0x80;
pub const TCCR1B: usize = 0x81;
pub const TCNT1: usize = 0x84;
pub const ICR1: usize = 0x86;
pub const OCR1A: usize = 0x88;
pub const OCR1B: usize = 0x8A;

// Timer2 (wake-up source)
pub const TCCR2A: usize = 0xB0;
pub const TCCR2B: usize = 0xB1;

// TWI
pub const TWBR: usize = 0xB8;
pub const TWSR: usize = 0xB9;
pub const TWDR: usize = 0xBB;
pub const TWCR: usize = 0xBC;

// USART0
pub const UCSR0A: usize = 0xC0;
pub const UCSR0B: usize = 0xC1;
pub const UCSR0C: usize = 0xC2;
pub const UBRR0: usize = 0xC4;
pub const UDR0: usize = 0xC6;

/// ADCSRA bits
pub mod adcsra {
    pub const ADEN: u8 = 1 << 7;
    pub const ADSC: u8 = 1 << 6;
    pub const ADATE: u8 = 1 << 5;
    pub const ADIF: u8 = 1 << 4;
    pub const ADIE: u8 = 1 << 3;
    pub const ADPS_MASK: u8 = 0x07;
}

/// ADMUX bits
pub mod admux {
    pub const REFS1: u8 = 1 << 7;
    pub const REFS0: u8 = 1 << 6;
    pub const ADLAR: u8 = 1 << 5;
    pub const MUX_MASK: u8 = 0x0F;
}

/// SPCR / SPSR bits
pub mod spi {
    pub const SPIE: u8 = 1 << 7;
    pub const SPE: u8 = 1 << 6;
    pub const DORD: u8 = 1 << 5;
    pub const MSTR: u8 = 1 << 4;
    pub const CPOL: u8 = 1 << 3;
    pub const CPHA: u8 = 1 << 2;
    pub const SPR_MASK: u8 = 0x03;
    pub const SPIF: u8 = 1 << 7;
    pub const SPI2X: u8 = 1 << 0;
}

/// TWCR bits and TWSR status codes
pub mod twi {
    pub const TWINT: u8 = 1 << 7;
    pub const TWEA: u8 = 1 << 6;
    pub const TWSTA: u8 = 1 << 5;
    pub const TWSTO: u8 = 1 << 4;
    pub const TWEN: u8 = 1 << 2;
    pub const TWPS_MASK: u8 = 0x03;
    pub const STATUS_MASK: u8 = 0xF8;

    pub const START: u8 = 0x08;
    pub const REP_START: u8 = 0x10;
    pub const MT_SLA_ACK: u8 = 0x18;
    pub const MT_SLA_NACK: u8 = 0x20;
    pub const MT_DATA_ACK: u8 = 0x28;
    pub const MT_DATA_NACK: u8 = 0x30;
    pub const ARB_LOST: u8 = 0x38;
    pub const MR_SLA_ACK: u8 = 0x40;
    pub const MR_SLA_NACK: u8 = 0x48;
    pub const MR_DATA_ACK: u8 = 0x50;
    pub const MR_DATA_NACK: u8 = 0x58;
}

/// UCSR0A/B/C bits
pub mod usart {
    pub const RXC: u8 = 1 << 7;
    pub const TXC: u8 = 1 << 6;
    pub const UDRE: u8 = 1 << 5;
    pub const FE: u8 = 1 << 4;
    pub const DOR: u8 = 1 << 3;
    pub const UPE: u8 = 1 << 2;
    pub const U2X: u8 = 1 << 1;

    pub const RXCIE: u8 = 1 << 7;
    pub const TXCIE: u8 = 1 << 6;
    pub const RXEN: u8 = 1 << 4;
    pub const TXEN: u8 = 1 << 3;
    pub const UCSZ2: u8 = 1 << 2;

    pub const UPM1: u8 = 1 << 5;
    pub const UPM0: u8 = 1 << 4;
    pub const USBS: u8 = 1 << 3;
    pub const UCSZ_SHIFT: u8 = 1;
}

/// Timer0/1/2 control and mask bits
pub mod tc {
    pub const COM1A1: u8 = 1 << 7;
    pub const COM1B1: u8 = 1 << 5;
    pub const WGM11: u8 = 1 << 1;
    pub const WGM10: u8 = 1 << 0;
    pub const ICES1: u8 = 1 << 6;
    pub const WGM13: u8 = 1 << 4;
    pub const WGM12: u8 = 1 << 3;
    pub const CS_MASK: u8 = 0x07;

    pub const ICIE1: u8 = 1 << 5;
    pub const OCIE1B: u8 = 1 << 2;
    pub const OCIE1A: u8 = 1 << 1;
    pub const TOIE1: u8 = 1 << 0;

    pub const WGM01: u8 = 1 << 1;
    pub const OCIE0A: u8 = 1 << 1;
    pub const OCF0A: u8 = 1 << 1;
    /// Timer0 clock select, clk/64
    pub const CS0_DIV64: u8 = 0x03;

    pub const TOIE2: u8 = 1 << 0;
    pub const TOV2: u8 = 1 << 0;
    /// Timer2 clock select, clk/1024
    pub const CS2_DIV1024: u8 = 0x07;
}

/// External and pin-change interrupt bits
pub mod exti {
    pub const INT0: u8 = 1 << 0;
    pub const INT1: u8 = 1 << 1;
    /// EICRA sense-control field width per interrupt
    pub const ISC_BITS: u8 = 2;
    pub const ISC_FALLING: u8 = 0b10;
    pub const ISC_RISING: u8 = 0b11;
}

/// SMCR and WDTCSR bits
pub mod pm {
    pub const SE: u8 = 1 << 0;
    pub const SM_MASK: u8 = 0x0E;
    pub const SM_IDLE: u8 = 0b000 << 1;
    pub const SM_POWER_DOWN: u8 = 0b010 << 1;
    pub const SM_POWER_SAVE: u8 = 0b011 << 1;

    pub const WDIF: u8 = 1 << 7;
    pub const WDIE: u8 = 1 << 6;
    pub const WDCE: u8 = 1 << 4;
    pub const WDE: u8 = 1 << 3;
    /// Prescaler bits for the shortest (~15 ms) watchdog period
    pub const WDTO_15MS: u8 = 0;
    /// Prescaler bits for a ~1 s watchdog period
    pub const WDTO_1S: u8 = 0x06;
    pub const WDRF: u8 = 1 << 3;
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU8, Ordering};
    use std::thread;

    /// Bus shared across threads; yields between the halves of every access
    struct ContendedBus {
        regs: [AtomicU8; 4],
    }

    impl RegisterBus for ContendedBus {
        fn read8(&self, addr: usize) -> u8 {
            let value = self.regs[addr].load(Ordering::SeqCst);
            thread::yield_now();
            value
        }

        fn write8(&self, addr: usize, value: u8) {
            self.regs[addr].store(value, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_bit_updates_are_not_lost() {
        let bus = ContendedBus {
            regs: core::array::from_fn(|_| AtomicU8::new(0)),
        };

        thread::scope(|s| {
            for n in 0..8 {
                let bus = &bus;
                s.spawn(move || {
                    for _ in 0..200 {
                        bus.set_bits(0, bit(n));
                        assert!(bus.is_set(0, bit(n)));
                        bus.clear_bits(0, bit(n));
                        assert!(!bus.is_set(0, bit(n)));
                    }
                });
            }
        });
        assert_eq!(bus.read8(0), 0);
    }

    #[test]
    fn test_word_access_order() {
        let bus = ContendedBus {
            regs: core::array::from_fn(|_| AtomicU8::new(0)),
        };
        bus.write16(1, 0xBEEF);
        assert_eq!(bus.read8(1), 0xEF);
        assert_eq!(bus.read8(2), 0xBE);
        assert_eq!(bus.read16(1), 0xBEEF);
    }
}
