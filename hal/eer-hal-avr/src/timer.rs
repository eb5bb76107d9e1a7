//! Timer driver for the 16-bit Timer/Counter1
//!
//! The tick frequency must be the CPU clock divided by one of the hardware
//! prescalers (1, 8, 64, 256, 1024).
//!
//! One-shot and continuous modes run the counter in normal mode and preload
//! `TCNT1` with `65536 - period` on every overflow, so a period is any value
//! from 1 to 65536 ticks; zero selects the full 65536. Compare values in these
//! modes are offsets from the start of the period and follow period changes;
//! an offset past a shortened period moves to its last tick.
//!
//! PWM mode uses fast PWM with `ICR1` as TOP; channel 0 drives OC1A (PB1) and
//! channel 1 drives OC1B (PB2). Input capture is only available outside PWM
//! mode since PWM claims `ICR1`. [`Timer::deinit`] returns both pins to
//! inputs.

use eer_hal::callback::{CallbackRegistry, Handler, UserData};
use eer_hal::timer::{
    duty_to_compare, Timer, TimerConfig, TimerEvent, TimerEventInfo, TimerMode,
};
use eer_hal::{HalError, HalResult};

use crate::regs::{self, bit, tc, RegisterBus};
use crate::shared::Shared;
use crate::F_CPU;

/// Longest period in ticks
pub const MAX_PERIOD: u32 = 1 << 16;

/// Compare channels (OC1A, OC1B)
pub const CHANNEL_COUNT: u8 = 2;

/// Overflow, two compare channels and input capture
const SLOT_COUNT: usize = 4;

/// Timer instance marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timer1;

/// Clock-select bits for a tick frequency
pub fn clock_select(frequency: u32) -> HalResult<u8> {
    if frequency == 0 {
        return Err(HalError::InvalidParameter);
    }
    if F_CPU % frequency != 0 {
        return Err(HalError::NotSupported);
    }
    match F_CPU / frequency {
        1 => Ok(1),
        8 => Ok(2),
        64 => Ok(3),
        256 => Ok(4),
        1024 => Ok(5),
        _ => Err(HalError::NotSupported),
    }
}

fn check_period(period: u32) -> HalResult<u32> {
    match period {
        0 => Ok(MAX_PERIOD),
        p if p > MAX_PERIOD => Err(HalError::InvalidParameter),
        p => Ok(p),
    }
}

/// Counter value that overflows after `period` ticks
fn preload(period: u32) -> u16 {
    (MAX_PERIOD - period) as u16
}

fn check_channel(channel: u8) -> HalResult<()> {
    if channel < CHANNEL_COUNT {
        Ok(())
    } else {
        Err(HalError::InvalidParameter)
    }
}

fn slot_index(event: TimerEvent, channel: u8) -> HalResult<usize> {
    match (event, channel) {
        (TimerEvent::Overflow, 0) => Ok(0),
        (TimerEvent::Compare, ch) if ch < CHANNEL_COUNT => Ok(1 + usize::from(ch)),
        (TimerEvent::Capture, 0) => Ok(3),
        _ => Err(HalError::InvalidParameter),
    }
}

fn compare_reg(channel: u8) -> usize {
    if channel == 0 {
        regs::OCR1A
    } else {
        regs::OCR1B
    }
}

fn output_enable(channel: u8) -> u8 {
    if channel == 0 {
        tc::COM1A1
    } else {
        tc::COM1B1
    }
}

/// Output-compare pin on port B
fn output_pin(channel: u8) -> u8 {
    bit(1 + channel)
}

#[derive(Clone, Copy)]
struct TimerState {
    config: Option<TimerConfig>,
    clock_select: u8,
    running: bool,
    /// Compare offsets per channel outside PWM mode
    compare: [Option<u16>; CHANNEL_COUNT as usize],
}

impl TimerState {
    const RESET: Self = Self {
        config: None,
        clock_select: 0,
        running: false,
        compare: [None; CHANNEL_COUNT as usize],
    };
}

/// Timer/Counter1 driver
pub struct AvrTimer<R> {
    regs: R,
    state: Shared<TimerState>,
    callbacks: CallbackRegistry<TimerEventInfo<Timer1>, SLOT_COUNT>,
}

impl<R: RegisterBus> AvrTimer<R> {
    pub const fn new(regs: R) -> Self {
        Self {
            regs,
            state: Shared::new(TimerState::RESET),
            callbacks: CallbackRegistry::new(),
        }
    }

    fn config(&self) -> HalResult<TimerConfig> {
        self.state.get().config.ok_or(HalError::Error)
    }

    fn is_installed(&self, index: usize) -> bool {
        self.callbacks
            .slot(index)
            .map(|slot| slot.is_installed())
            .unwrap_or(false)
    }

    /// Interrupt enables implied by the mode and the installed callbacks
    fn interrupt_mask(&self, mode: TimerMode) -> u8 {
        let mut mask = 0;
        if mode != TimerMode::Pwm || self.is_installed(0) {
            mask |= tc::TOIE1;
        }
        if self.is_installed(1) {
            mask |= tc::OCIE1A;
        }
        if self.is_installed(2) {
            mask |= tc::OCIE1B;
        }
        if mode != TimerMode::Pwm && self.is_installed(3) {
            mask |= tc::ICIE1;
        }
        mask
    }

    fn update_interrupts(&self) {
        if let Some(config) = self.state.get().config {
            self.regs
                .write8(regs::TIMSK1, self.interrupt_mask(config.mode));
        }
    }

    fn run(&self, clock_select: u8) {
        self.regs
            .modify8(regs::TCCR1B, |v| (v & !tc::CS_MASK) | clock_select);
        self.state.update(|s| s.running = true);
    }

    fn halt(&self) {
        self.regs.clear_bits(regs::TCCR1B, tc::CS_MASK);
        self.state.update(|s| s.running = false);
    }

    /// PWM settings apply immediately and restart a stopped timer
    fn resume_pwm(&self) {
        let state = self.state.get();
        if !state.running {
            self.run(state.clock_select);
        }
    }

    fn enable_output(&self, channel: u8) {
        self.regs.set_bits(regs::DDRB, output_pin(channel));
        self.regs.set_bits(regs::TCCR1A, output_enable(channel));
    }

    /// Release the output-compare pins this timer drives
    fn disable_outputs(&self) {
        let control = self.regs.read8(regs::TCCR1A);
        let pins = (0..CHANNEL_COUNT)
            .filter(|&ch| control & output_enable(ch) != 0)
            .fold(0, |pins, ch| pins | output_pin(ch));
        self.regs.write8(regs::TCCR1A, 0);
        if pins != 0 {
            self.regs.clear_bits(regs::DDRB, pins);
        }
    }

    fn clear_counters(&self) {
        for reg in [regs::TCNT1, regs::OCR1A, regs::OCR1B, regs::ICR1] {
            self.regs.write16(reg, 0);
        }
    }

    /// Place a compare offset inside the current period
    fn write_offset(&self, channel: u8, offset: u16, period: u32) {
        let target = u32::from(preload(period)) + u32::from(offset);
        self.regs.write16(compare_reg(channel), target as u16);
    }

    fn dispatch(&self, index: usize, event: TimerEvent, channel: u8, value: u32) {
        self.callbacks.dispatch(index, |user_data| TimerEventInfo {
            timer: Timer1,
            event,
            channel,
            value,
            user_data,
        });
    }

    /// Timer1 overflow service routine body
    pub fn on_overflow(&self) {
        let Some(config) = self.state.get().config else {
            return;
        };
        if config.mode != TimerMode::Pwm {
            self.regs.write16(regs::TCNT1, preload(config.period));
        }
        if config.mode == TimerMode::OneShot {
            self.halt();
        }
        self.dispatch(0, TimerEvent::Overflow, 0, config.period);
    }

    /// Timer1 compare-match service routine body
    pub fn on_compare(&self, channel: u8) {
        let Some(config) = self.state.get().config else {
            return;
        };
        if channel >= CHANNEL_COUNT {
            return;
        }
        if config.mode == TimerMode::OneShot {
            self.halt();
        }
        let value = u32::from(self.regs.read16(compare_reg(channel)));
        let value = match config.mode {
            TimerMode::Pwm => value,
            _ => value.wrapping_sub(u32::from(preload(config.period))) & 0xFFFF,
        };
        self.dispatch(1 + usize::from(channel), TimerEvent::Compare, channel, value);
    }

    /// Timer1 input-capture service routine body
    pub fn on_capture(&self) {
        let value = u32::from(self.regs.read16(regs::ICR1));
        self.dispatch(3, TimerEvent::Capture, 0, value);
    }
}

impl<R: RegisterBus> Timer for AvrTimer<R> {
    type Instance = Timer1;

    fn init(&self, config: &TimerConfig) -> HalResult<()> {
        let clock_select = clock_select(config.frequency)?;
        let config = &TimerConfig {
            period: check_period(config.period)?,
            ..*config
        };
        if config.mode == TimerMode::Pwm {
            check_channel(config.channel)?;
        }

        // Stop and reset before reprogramming
        self.regs.write8(regs::TCCR1B, 0);
        self.regs.write8(regs::TIMSK1, 0);
        self.disable_outputs();
        self.clear_counters();

        match config.mode {
            TimerMode::OneShot | TimerMode::Continuous => {
                self.regs.write16(regs::TCNT1, preload(config.period));
                self.regs.write8(regs::TCCR1B, tc::ICES1);
            }
            TimerMode::Pwm => {
                self.regs.write16(regs::ICR1, (config.period - 1) as u16);
                self.regs.write16(regs::TCNT1, 0);
                self.regs.write8(regs::TCCR1A, tc::WGM11);
                self.regs.write8(regs::TCCR1B, tc::WGM13 | tc::WGM12);
                self.enable_output(config.channel);
            }
        }
        // Discard stale flags
        self.regs.write8(regs::TIFR1, 0xFF);

        self.state.set(TimerState {
            config: Some(*config),
            clock_select,
            ..TimerState::RESET
        });
        self.update_interrupts();
        debug!(
            "timer: init {} Hz, period {}, cs {}",
            config.frequency,
            config.period,
            clock_select
        );
        Ok(())
    }

    fn deinit(&self) -> HalResult<()> {
        self.regs.write8(regs::TCCR1B, 0);
        self.regs.write8(regs::TIMSK1, 0);
        self.disable_outputs();
        self.clear_counters();
        self.regs.write8(regs::TIFR1, 0xFF);
        self.callbacks.clear_all();
        self.state.set(TimerState::RESET);
        Ok(())
    }

    fn start(&self) -> HalResult<()> {
        let config = self.config()?;
        let state = self.state.get();
        if state.running {
            return Ok(());
        }
        if config.mode != TimerMode::Pwm {
            self.regs.write16(regs::TCNT1, preload(config.period));
        }
        self.run(state.clock_select);
        trace!("timer: start");
        Ok(())
    }

    fn stop(&self) -> HalResult<()> {
        self.config()?;
        self.halt();
        trace!("timer: stop");
        Ok(())
    }

    fn set_period(&self, period: u32) -> HalResult<()> {
        let config = self.config()?;
        let period = check_period(period)?;
        let last_tick = (period - 1) as u16;
        let state = self.state.update(|s| {
            if let Some(c) = s.config.as_mut() {
                c.period = period;
            }
            for offset in s.compare.iter_mut().flatten() {
                *offset = (*offset).min(last_tick);
            }
        });

        if config.mode == TimerMode::Pwm {
            self.regs.write16(regs::ICR1, last_tick);
            self.resume_pwm();
            return Ok(());
        }
        // A running timer picks the new preload up at its next overflow
        if !state.running {
            self.regs.write16(regs::TCNT1, preload(period));
        }
        for (channel, offset) in (0..CHANNEL_COUNT).zip(state.compare) {
            if let Some(offset) = offset {
                self.write_offset(channel, offset, period);
            }
        }
        Ok(())
    }

    fn get_value(&self) -> HalResult<u32> {
        let config = self.config()?;
        let count = u32::from(self.regs.read16(regs::TCNT1));
        Ok(match config.mode {
            TimerMode::Pwm => count,
            _ => count.wrapping_sub(u32::from(preload(config.period))) & 0xFFFF,
        })
    }

    fn set_compare(&self, channel: u8, value: u32) -> HalResult<()> {
        check_channel(channel)?;
        let config = self.config()?;
        if value > config.period {
            return Err(HalError::InvalidParameter);
        }

        match config.mode {
            TimerMode::Pwm => {
                self.regs
                    .write16(compare_reg(channel), value.min(0xFFFF) as u16);
                self.enable_output(channel);
                self.resume_pwm();
            }
            _ => {
                if value == config.period {
                    return Err(HalError::InvalidParameter);
                }
                let offset = value as u16;
                self.state
                    .update(|s| s.compare[usize::from(channel)] = Some(offset));
                self.write_offset(channel, offset, config.period);
            }
        }
        Ok(())
    }

    fn set_pwm_duty_cycle(&self, channel: u8, duty_percent: u8) -> HalResult<()> {
        check_channel(channel)?;
        let config = self.config()?;
        if config.mode != TimerMode::Pwm || duty_percent > 100 {
            return Err(HalError::InvalidParameter);
        }
        self.set_compare(channel, duty_to_compare(config.period, duty_percent))
    }

    fn us_to_ticks(&self, us: u32) -> u32 {
        let Some(config) = self.state.get().config else {
            return 0;
        };
        let ticks = u64::from(us) * u64::from(config.frequency) / 1_000_000;
        u32::try_from(ticks).unwrap_or(u32::MAX)
    }

    fn ticks_to_us(&self, ticks: u32) -> u32 {
        let Some(config) = self.state.get().config else {
            return 0;
        };
        let us = u64::from(ticks) * 1_000_000 / u64::from(config.frequency);
        u32::try_from(us).unwrap_or(u32::MAX)
    }

    fn register_callback(
        &self,
        event: TimerEvent,
        channel: u8,
        handler: Handler<TimerEventInfo<Timer1>>,
        user_data: UserData,
    ) -> HalResult<()> {
        let index = slot_index(event, channel)?;
        let pwm = self
            .state
            .get()
            .config
            .is_some_and(|c| c.mode == TimerMode::Pwm);
        if event == TimerEvent::Capture && pwm {
            return Err(HalError::NotSupported);
        }
        self.callbacks.install(index, handler, user_data)?;
        self.update_interrupts();
        Ok(())
    }

    fn unregister_callback(&self, event: TimerEvent, channel: u8) -> HalResult<()> {
        let index = slot_index(event, channel)?;
        self.callbacks.clear(index)?;
        self.update_interrupts();
        Ok(())
    }
}
