//! Simulated ATmega328P peripherals for host tests
//!
//! [`SimBus`] stores every register and models just enough of the TWI, SPI,
//! USART, ADC and port logic for the drivers to complete their polling loops.
//! Setting `stall` freezes every completion flag so timeout paths can be
//! exercised.

use core::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::vec::Vec;

use eer_hal::Clock;

use crate::cpu::Cpu;
use crate::regs::{self, adcsra, admux, spi, twi, usart, RegisterBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TwiPhase {
    Idle,
    Address,
    Writing,
    Reading,
    Rejected,
}

pub struct SimBus {
    regs: [Cell<u8>; 256],
    inputs: [Cell<u8>; 3],
    writes: Cell<usize>,
    pub stall: Cell<bool>,

    twi_phase: Cell<TwiPhase>,
    twi_bus_held: Cell<bool>,
    pub twi_devices: RefCell<Vec<u8>>,
    pub twi_rx: RefCell<VecDeque<u8>>,
    pub twi_tx: RefCell<Vec<u8>>,
    /// Address bytes (SLA+R/W) seen on the bus
    pub twi_sla: RefCell<Vec<u8>>,
    pub twi_stops: Cell<usize>,
    /// NACK data bytes once this many have been accepted
    pub twi_nack_after: Cell<Option<usize>>,
    /// NACK every SLA+R
    pub twi_reject_reads: Cell<bool>,
    /// Lose arbitration on this many upcoming STARTs
    pub twi_lost_starts: Cell<usize>,

    pub spi_tx: RefCell<Vec<u8>>,
    pub spi_response: Cell<fn(u8) -> u8>,

    pub uart_tx: RefCell<Vec<u8>>,
    pub uart_rx: RefCell<VecDeque<u8>>,

    pub adc_values: [Cell<u16>; 8],
}

fn loopback(b: u8) -> u8 {
    b
}

impl SimBus {
    pub fn new() -> Self {
        Self {
            regs: core::array::from_fn(|_| Cell::new(0)),
            inputs: core::array::from_fn(|_| Cell::new(0)),
            writes: Cell::new(0),
            stall: Cell::new(false),
            twi_phase: Cell::new(TwiPhase::Idle),
            twi_bus_held: Cell::new(false),
            twi_devices: RefCell::new(Vec::new()),
            twi_rx: RefCell::new(VecDeque::new()),
            twi_tx: RefCell::new(Vec::new()),
            twi_sla: RefCell::new(Vec::new()),
            twi_stops: Cell::new(0),
            twi_nack_after: Cell::new(None),
            twi_reject_reads: Cell::new(false),
            twi_lost_starts: Cell::new(0),
            spi_tx: RefCell::new(Vec::new()),
            spi_response: Cell::new(loopback),
            uart_tx: RefCell::new(Vec::new()),
            uart_rx: RefCell::new(VecDeque::new()),
            adc_values: core::array::from_fn(|_| Cell::new(0)),
        }
    }

    /// Raw register content, bypassing the peripheral models
    pub fn get(&self, addr: usize) -> u8 {
        self.regs[addr].get()
    }

    /// Set a register without counting it as a driver write
    pub fn poke(&self, addr: usize, value: u8) {
        self.regs[addr].set(value);
    }

    pub fn get16(&self, low: usize) -> u16 {
        u16::from_le_bytes([self.get(low), self.get(low + 1)])
    }

    pub fn poke16(&self, low: usize, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.poke(low, lo);
        self.poke(low + 1, hi);
    }

    /// Number of register writes issued by drivers so far
    pub fn write_count(&self) -> usize {
        self.writes.get()
    }

    /// External level on the input pins of a port
    pub fn drive_input(&self, pin_reg: usize, levels: u8) {
        self.inputs[(pin_reg - regs::PINB) / 3].set(levels);
    }

    pub fn twi_bus_held(&self) -> bool {
        self.twi_bus_held.get()
    }

    /// Leave the bus held as if a previous STOP never went out
    pub fn hold_twi_bus(&self) {
        self.twi_bus_held.set(true);
    }

    fn is_port_pin(addr: usize) -> bool {
        matches!(addr, regs::PINB | regs::PINC | regs::PIND)
    }

    fn port_levels(&self, pin_reg: usize) -> u8 {
        let ddr = self.get(pin_reg + 1);
        let port = self.get(pin_reg + 2);
        let input = self.inputs[(pin_reg - regs::PINB) / 3].get();
        (port & ddr) | (input & !ddr)
    }

    fn usart_status(&self) -> u8 {
        let mut status = self.get(regs::UCSR0A) & (usart::U2X | usart::TXC);
        if !self.stall.get() {
            status |= usart::UDRE;
            if !self.uart_rx.borrow().is_empty() {
                status |= usart::RXC;
            }
        }
        status
    }

    fn adc_write(&self, value: u8) {
        let old = self.get(regs::ADCSRA);
        let mut new = value & !adcsra::ADIF;
        if old & adcsra::ADIF != 0 && value & adcsra::ADIF == 0 {
            new |= adcsra::ADIF;
        }
        let starting = value & adcsra::ADEN != 0 && value & adcsra::ADSC != 0;
        if starting && !self.stall.get() {
            let mux = self.get(regs::ADMUX);
            let raw = self.adc_values[usize::from(mux & 0x07)].get() & 0x3FF;
            if mux & admux::ADLAR != 0 {
                self.poke(regs::ADCL, ((raw & 0x03) << 6) as u8);
                self.poke(regs::ADCH, (raw >> 2) as u8);
            } else {
                self.poke(regs::ADCL, (raw & 0xFF) as u8);
                self.poke(regs::ADCH, (raw >> 8) as u8);
            }
            new = (new & !adcsra::ADSC) | adcsra::ADIF;
        }
        self.poke(regs::ADCSRA, new);
    }

    fn twi_write(&self, value: u8) {
        let mut control = value & !twi::TWINT;
        if value & twi::TWINT == 0 || value & twi::TWEN == 0 {
            self.poke(regs::TWCR, control);
            return;
        }

        if value & twi::TWSTO != 0 {
            self.twi_bus_held.set(false);
            self.twi_phase.set(TwiPhase::Idle);
            self.twi_stops.set(self.twi_stops.get() + 1);
            self.poke(regs::TWCR, control & !twi::TWSTO);
            return;
        }

        if self.stall.get() {
            self.poke(regs::TWCR, control);
            return;
        }

        let lost = self.twi_lost_starts.get();
        let status = if value & twi::TWSTA != 0 && lost > 0 {
            self.twi_lost_starts.set(lost - 1);
            self.twi_phase.set(TwiPhase::Idle);
            twi::ARB_LOST
        } else if value & twi::TWSTA != 0 {
            let status = if self.twi_bus_held.get() {
                twi::REP_START
            } else {
                twi::START
            };
            self.twi_bus_held.set(true);
            self.twi_phase.set(TwiPhase::Address);
            status
        } else {
            match self.twi_phase.get() {
                TwiPhase::Address => {
                    let sla = self.get(regs::TWDR);
                    self.twi_sla.borrow_mut().push(sla);
                    let read = sla & 1 != 0;
                    let ack = self.twi_devices.borrow().contains(&(sla >> 1))
                        && !(read && self.twi_reject_reads.get());
                    self.twi_phase.set(match (ack, read) {
                        (false, _) => TwiPhase::Rejected,
                        (true, false) => TwiPhase::Writing,
                        (true, true) => TwiPhase::Reading,
                    });
                    match (ack, read) {
                        (true, false) => twi::MT_SLA_ACK,
                        (false, false) => twi::MT_SLA_NACK,
                        (true, true) => twi::MR_SLA_ACK,
                        (false, true) => twi::MR_SLA_NACK,
                    }
                }
                TwiPhase::Writing => {
                    let mut tx = self.twi_tx.borrow_mut();
                    let nack = self
                        .twi_nack_after
                        .get()
                        .is_some_and(|limit| tx.len() >= limit);
                    tx.push(self.get(regs::TWDR));
                    if nack {
                        twi::MT_DATA_NACK
                    } else {
                        twi::MT_DATA_ACK
                    }
                }
                TwiPhase::Reading => {
                    let byte = self.twi_rx.borrow_mut().pop_front().unwrap_or(0xFF);
                    self.poke(regs::TWDR, byte);
                    if value & twi::TWEA != 0 {
                        twi::MR_DATA_ACK
                    } else {
                        twi::MR_DATA_NACK
                    }
                }
                TwiPhase::Idle | TwiPhase::Rejected => 0x00,
            }
        };

        let prescaler = self.get(regs::TWSR) & twi::TWPS_MASK;
        self.poke(regs::TWSR, status | prescaler);
        control |= twi::TWINT;
        self.poke(regs::TWCR, control);
    }
}

impl RegisterBus for SimBus {
    fn read8(&self, addr: usize) -> u8 {
        match addr {
            a if Self::is_port_pin(a) => self.port_levels(a),
            regs::UCSR0A => self.usart_status(),
            regs::UDR0 => self.uart_rx.borrow_mut().pop_front().unwrap_or(0),
            regs::SPDR => {
                let spsr = self.get(regs::SPSR);
                self.poke(regs::SPSR, spsr & !spi::SPIF);
                self.get(regs::SPDR)
            }
            a => self.get(a),
        }
    }

    fn write8(&self, addr: usize, value: u8) {
        self.writes.set(self.writes.get() + 1);
        match addr {
            a if Self::is_port_pin(a) => {
                let port = self.get(a + 2);
                self.poke(a + 2, port ^ value);
            }
            regs::SPDR => {
                if !self.stall.get() {
                    self.spi_tx.borrow_mut().push(value);
                    self.poke(regs::SPDR, (self.spi_response.get())(value));
                    let spsr = self.get(regs::SPSR);
                    self.poke(regs::SPSR, spsr | spi::SPIF);
                }
            }
            regs::UDR0 => {
                if !self.stall.get() {
                    self.uart_tx.borrow_mut().push(value);
                    let status = self.get(regs::UCSR0A);
                    self.poke(regs::UCSR0A, status | usart::TXC);
                }
            }
            regs::UCSR0A => {
                let old = self.get(regs::UCSR0A);
                let txc = old & usart::TXC & !(value & usart::TXC);
                self.poke(regs::UCSR0A, (value & usart::U2X) | txc);
            }
            regs::ADCSRA => self.adc_write(value),
            regs::TWCR => self.twi_write(value),
            a => self.poke(a, value),
        }
    }
}

/// Clock advancing `step` milliseconds on every read
pub struct SimClock {
    pub now: Cell<u32>,
    pub step: u32,
    pub running: bool,
}

impl SimClock {
    pub fn running() -> Self {
        Self {
            now: Cell::new(0),
            step: 1,
            running: true,
        }
    }

    pub fn stopped() -> Self {
        Self {
            now: Cell::new(0),
            step: 0,
            running: false,
        }
    }
}

impl Clock for SimClock {
    fn now_ms(&self) -> u32 {
        let t = self.now.get();
        self.now.set(t.wrapping_add(self.step));
        t
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

/// Core stub recording what the drivers asked for
#[derive(Default)]
pub struct SimCpu {
    pub interrupts_enabled: Cell<bool>,
    pub sleeps: Cell<usize>,
    pub reset_jumps: Cell<usize>,
    pub reset_waits: Cell<usize>,
    pub cycles: Cell<u64>,
    /// Runs in place of the `sleep` instruction, e.g. to fire a wake ISR
    pub on_sleep: Cell<Option<fn()>>,
}

impl Cpu for SimCpu {
    fn enable_interrupts(&self) {
        self.interrupts_enabled.set(true);
    }

    fn disable_interrupts(&self) {
        self.interrupts_enabled.set(false);
    }

    fn sleep(&self) {
        self.sleeps.set(self.sleeps.get() + 1);
        if let Some(wake) = self.on_sleep.get() {
            wake();
        }
    }

    fn jump_to_reset(&self) {
        self.reset_jumps.set(self.reset_jumps.get() + 1);
    }

    fn wait_for_reset(&self) {
        self.reset_waits.set(self.reset_waits.get() + 1);
    }

    fn delay_cycles(&self, cycles: u32) {
        self.cycles.set(self.cycles.get() + u64::from(cycles));
    }
}
