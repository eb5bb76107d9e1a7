//! ADC driver
//!
//! Eight multiplexed channels (ADC0..ADC7). Results are 10-bit right adjusted,
//! or 8-bit left adjusted when the 8-bit resolution is selected; 12 and 16
//! bit resolutions do not exist on this part.
//!
//! Completion is either polled through [`Adc::is_conversion_complete`] or,
//! once a callback is registered or continuous mode is started, delivered by
//! the conversion-complete interrupt. Continuous mode re-arms the next
//! conversion from the interrupt rather than using free-running trigger mode,
//! so [`Adc::stop_conversion`] simply stops re-arming.
//!
//! [`Adc::read`] waits for any conversion in flight, then starts a fresh one
//! on the requested channel and spins until it completes. It has no timeout,
//! and returns `Busy` while a continuous stream owns the multiplexer.

use eer_hal::adc::{
    Adc, AdcConfig, AdcConversion, AdcMode, AdcPrescaler, AdcReference, AdcResolution,
};
use eer_hal::callback::{CallbackRegistry, Handler, UserData};
use eer_hal::{HalError, HalResult};

use crate::regs::{self, adcsra, admux, RegisterBus};
use crate::shared::Shared;

pub const CHANNEL_COUNT: usize = 8;

/// Supply voltage assumed for the Vcc and external references
pub const VCC_VOLTS: f32 = 5.0;
/// Internal bandgap reference
pub const INTERNAL_REF_VOLTS: f32 = 1.1;

/// ADC input channel (0..=7)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdcChannel(pub u8);

impl AdcChannel {
    pub fn validate(self) -> HalResult<u8> {
        if usize::from(self.0) < CHANNEL_COUNT {
            Ok(self.0)
        } else {
            Err(HalError::InvalidParameter)
        }
    }
}

#[derive(Clone, Copy)]
struct AdcState {
    config: Option<AdcConfig>,
    /// Channel of the most recently started conversion
    active: Option<u8>,
    /// Restart from the ISR after each completion
    rearm: bool,
    /// Bit per channel: result ready and not superseded
    complete: u8,
    results: [u16; CHANNEL_COUNT],
}

impl AdcState {
    const RESET: Self = Self {
        config: None,
        active: None,
        rearm: false,
        complete: 0,
        results: [0; CHANNEL_COUNT],
    };
}

fn prescaler_bits(p: AdcPrescaler) -> u8 {
    match p {
        AdcPrescaler::Div2 => 1,
        AdcPrescaler::Div4 => 2,
        AdcPrescaler::Div8 => 3,
        AdcPrescaler::Div16 => 4,
        AdcPrescaler::Div32 => 5,
        AdcPrescaler::Div64 => 6,
        AdcPrescaler::Div128 => 7,
    }
}

fn reference_bits(r: AdcReference) -> u8 {
    match r {
        AdcReference::Vcc => admux::REFS0,
        AdcReference::External => 0,
        AdcReference::Internal => admux::REFS1 | admux::REFS0,
    }
}

/// ADC driver
pub struct AvrAdc<R> {
    regs: R,
    state: Shared<AdcState>,
    callbacks: CallbackRegistry<AdcConversion<AdcChannel>, CHANNEL_COUNT>,
}

impl<R: RegisterBus> AvrAdc<R> {
    pub const fn new(regs: R) -> Self {
        Self {
            regs,
            state: Shared::new(AdcState::RESET),
            callbacks: CallbackRegistry::new(),
        }
    }

    fn config(&self) -> HalResult<AdcConfig> {
        self.state.get().config.ok_or(HalError::Error)
    }

    fn converting(&self) -> bool {
        self.regs.is_set(regs::ADCSRA, adcsra::ADSC)
    }

    fn select(&self, ch: u8) {
        self.regs
            .modify8(regs::ADMUX, |v| (v & !admux::MUX_MASK) | ch);
    }

    fn result(&self, resolution: AdcResolution) -> u16 {
        match resolution {
            AdcResolution::Bits8 => u16::from(self.regs.read8(regs::ADCH)),
            _ => self.regs.read16(regs::ADCL) & 0x03FF,
        }
    }

    fn store(&self, ch: u8, value: u16) {
        self.state.update(|s| {
            s.results[usize::from(ch)] = value;
            s.complete |= 1 << ch;
        });
    }

    fn interrupt_driven(&self) -> bool {
        self.regs.is_set(regs::ADCSRA, adcsra::ADIE)
    }

    /// Harvest a finished conversion when the interrupt is not doing it
    fn poll(&self, config: &AdcConfig) {
        if self.interrupt_driven() || !self.regs.is_set(regs::ADCSRA, adcsra::ADIF) {
            return;
        }
        if let Some(ch) = self.state.get().active {
            let value = self.result(config.resolution);
            self.store(ch, value);
        }
        // ADIF is cleared by writing a one
        self.regs.set_bits(regs::ADCSRA, adcsra::ADIF);
    }

    /// ADC conversion-complete service routine body
    pub fn on_conversion_complete(&self) {
        let Some(config) = self.state.get().config else {
            return;
        };
        let ch = self.regs.read8(regs::ADMUX) & 0x07;
        let value = self.result(config.resolution);
        self.store(ch, value);

        self.callbacks.dispatch(usize::from(ch), |user_data| AdcConversion {
            channel: AdcChannel(ch),
            value,
            user_data,
        });

        if self.state.get().rearm {
            self.regs.set_bits(regs::ADCSRA, adcsra::ADSC);
        }
    }
}

impl<R: RegisterBus> Adc for AvrAdc<R> {
    type Channel = AdcChannel;

    fn init(&self, config: &AdcConfig) -> HalResult<()> {
        if matches!(config.resolution, AdcResolution::Bits12 | AdcResolution::Bits16) {
            return Err(HalError::NotSupported);
        }

        let mut mux = reference_bits(config.reference);
        if config.resolution == AdcResolution::Bits8 {
            mux |= admux::ADLAR;
        }
        self.regs.write8(regs::ADMUX, mux);
        self.regs.write8(regs::ADCSRB, 0);
        self.regs.write8(
            regs::ADCSRA,
            adcsra::ADEN | adcsra::ADIF | prescaler_bits(config.prescaler),
        );

        self.state.set(AdcState {
            config: Some(*config),
            ..AdcState::RESET
        });
        debug!("adc: init, {} bit", config.resolution.bits());
        Ok(())
    }

    fn deinit(&self) -> HalResult<()> {
        self.regs.write8(regs::ADCSRA, adcsra::ADIF);
        self.regs.write8(regs::ADMUX, 0);
        self.callbacks.clear_all();
        self.state.set(AdcState::RESET);
        Ok(())
    }

    fn start_conversion(&self, channel: AdcChannel) -> HalResult<()> {
        let ch = channel.validate()?;
        let config = self.config()?;
        if self.converting() {
            return Err(HalError::Busy);
        }

        let continuous = config.mode == AdcMode::Continuous;
        let callback = self.callbacks.slot(usize::from(ch))?.is_installed();
        self.select(ch);
        self.state.update(|s| {
            s.active = Some(ch);
            s.rearm = continuous;
            s.complete &= !(1 << ch);
        });

        let mut start = adcsra::ADSC;
        if continuous || callback {
            start |= adcsra::ADIE;
        }
        self.regs.set_bits(regs::ADCSRA, start);
        trace!("adc: start ch{}", ch);
        Ok(())
    }

    fn stop_conversion(&self) -> HalResult<()> {
        self.state.update(|s| s.rearm = false);
        if !self.callbacks.any_installed() {
            self.regs.clear_bits(regs::ADCSRA, adcsra::ADIE);
        }
        Ok(())
    }

    fn is_conversion_complete(&self, channel: AdcChannel) -> HalResult<bool> {
        let ch = channel.validate()?;
        let config = self.config()?;
        self.poll(&config);
        Ok(self.state.get().complete & (1 << ch) != 0)
    }

    fn read(&self, channel: AdcChannel) -> HalResult<u16> {
        let ch = channel.validate()?;
        let config = self.config()?;
        if self.state.get().rearm {
            return Err(HalError::Busy);
        }

        while self.converting() {}

        self.select(ch);
        self.state.update(|s| {
            s.active = Some(ch);
            s.complete &= !(1 << ch);
        });
        self.regs.set_bits(regs::ADCSRA, adcsra::ADSC);
        while self.converting() {}

        let value = self.result(config.resolution);
        self.store(ch, value);
        Ok(value)
    }

    fn read_voltage(&self, channel: AdcChannel) -> HalResult<f32> {
        let raw = self.read(channel)?;
        let config = self.config()?;
        let reference = match config.reference {
            AdcReference::Vcc | AdcReference::External => VCC_VOLTS,
            AdcReference::Internal => INTERNAL_REF_VOLTS,
        };
        let full_scale = match config.resolution {
            AdcResolution::Bits8 => 255.0,
            _ => 1023.0,
        };
        Ok(f32::from(raw) * reference / full_scale)
    }

    fn register_callback(
        &self,
        channel: AdcChannel,
        handler: Handler<AdcConversion<AdcChannel>>,
        user_data: UserData,
    ) -> HalResult<()> {
        let ch = channel.validate()?;
        self.callbacks.install(usize::from(ch), handler, user_data)?;
        if self.state.get().config.is_some() {
            self.regs.set_bits(regs::ADCSRA, adcsra::ADIE);
        }
        Ok(())
    }

    fn unregister_callback(&self, channel: AdcChannel) -> HalResult<()> {
        let ch = channel.validate()?;
        self.callbacks.clear(usize::from(ch))?;
        if !self.callbacks.any_installed() && !self.state.get().rearm {
            self.regs.clear_bits(regs::ADCSRA, adcsra::ADIE);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBus;
    use core::sync::atomic::{AtomicU32, Ordering};

    fn single() -> AdcConfig {
        AdcConfig::default()
    }

    #[test]
    fn test_invalid_channel() {
        let bus = SimBus::new();
        let adc = AvrAdc::new(&bus);
        adc.init(&single()).unwrap();
        let writes = bus.write_count();

        assert_eq!(adc.start_conversion(AdcChannel(8)), Err(HalError::InvalidParameter));
        assert_eq!(adc.read(AdcChannel(9)), Err(HalError::InvalidParameter));
        assert_eq!(
            adc.is_conversion_complete(AdcChannel(8)),
            Err(HalError::InvalidParameter)
        );
        assert_eq!(bus.write_count(), writes);
    }

    #[test]
    fn test_unsupported_resolution() {
        let bus = SimBus::new();
        let adc = AvrAdc::new(&bus);
        let cfg = AdcConfig {
            resolution: AdcResolution::Bits12,
            ..single()
        };
        assert_eq!(adc.init(&cfg), Err(HalError::NotSupported));
        assert_eq!(bus.write_count(), 0);
    }

    #[test]
    fn test_init_registers() {
        let bus = SimBus::new();
        let adc = AvrAdc::new(&bus);
        adc.init(&AdcConfig {
            reference: AdcReference::Internal,
            resolution: AdcResolution::Bits8,
            ..single()
        })
        .unwrap();
        assert_eq!(bus.get(regs::ADMUX), admux::REFS1 | admux::REFS0 | admux::ADLAR);
        assert_eq!(bus.get(regs::ADCSRA) & 0x87, adcsra::ADEN | 7);
    }

    #[test]
    fn test_blocking_read_and_voltage() {
        let bus = SimBus::new();
        let adc = AvrAdc::new(&bus);
        adc.init(&single()).unwrap();
        bus.adc_values[3].set(512);

        assert_eq!(adc.read(AdcChannel(3)), Ok(512));
        assert_eq!(bus.get(regs::ADMUX) & 0x0F, 3);

        bus.adc_values[0].set(1023);
        let v = adc.read_voltage(AdcChannel(0)).unwrap();
        assert!((v - 5.0).abs() < 1e-4);
    }

    #[test]
    fn test_eight_bit_read() {
        let bus = SimBus::new();
        let adc = AvrAdc::new(&bus);
        adc.init(&AdcConfig {
            resolution: AdcResolution::Bits8,
            reference: AdcReference::Internal,
            ..single()
        })
        .unwrap();
        bus.adc_values[1].set(0x3FF);
        assert_eq!(adc.read(AdcChannel(1)), Ok(255));
        let v = adc.read_voltage(AdcChannel(1)).unwrap();
        assert!((v - 1.1).abs() < 1e-4);
    }

    #[test]
    fn test_polled_single_conversion() {
        let bus = SimBus::new();
        let adc = AvrAdc::new(&bus);
        adc.init(&single()).unwrap();
        bus.adc_values[2].set(100);

        assert_eq!(adc.is_conversion_complete(AdcChannel(2)), Ok(false));
        adc.start_conversion(AdcChannel(2)).unwrap();
        assert_eq!(adc.is_conversion_complete(AdcChannel(2)), Ok(true));
        assert_eq!(adc.is_conversion_complete(AdcChannel(1)), Ok(false));
        assert_eq!(bus.get(regs::ADCSRA) & adcsra::ADIE, 0);
    }

    #[test]
    fn test_start_while_busy() {
        let bus = SimBus::new();
        let adc = AvrAdc::new(&bus);
        adc.init(&single()).unwrap();
        bus.stall.set(true);
        adc.start_conversion(AdcChannel(0)).unwrap();
        assert_eq!(adc.start_conversion(AdcChannel(1)), Err(HalError::Busy));
    }

    #[test]
    fn test_uninitialized() {
        let bus = SimBus::new();
        let adc = AvrAdc::new(&bus);
        assert_eq!(adc.start_conversion(AdcChannel(0)), Err(HalError::Error));
        assert!(adc.deinit().is_ok());
    }

    #[test]
    fn test_continuous_rearms_and_calls_back() {
        static CALLS: AtomicU32 = AtomicU32::new(0);
        static LAST: AtomicU32 = AtomicU32::new(0);
        static GAIN: u32 = 2;

        fn on_done(c: &AdcConversion<AdcChannel>) {
            CALLS.fetch_add(1, Ordering::SeqCst);
            let gain = c
                .user_data
                .and_then(|d| d.downcast_ref::<u32>())
                .copied()
                .unwrap_or(1);
            LAST.store(u32::from(c.value) * gain, Ordering::SeqCst);
        }

        let bus = SimBus::new();
        let adc = AvrAdc::new(&bus);
        adc.init(&AdcConfig {
            mode: AdcMode::Continuous,
            ..single()
        })
        .unwrap();
        adc.register_callback(AdcChannel(5), on_done, Some(&GAIN)).unwrap();

        // Hold conversions so the ISR re-arm is visible
        bus.stall.set(true);
        adc.start_conversion(AdcChannel(5)).unwrap();
        assert_eq!(bus.get(regs::ADCSRA) & adcsra::ADIE, adcsra::ADIE);

        bus.poke16(regs::ADCL, 300);
        adc.on_conversion_complete();
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        assert_eq!(LAST.load(Ordering::SeqCst), 600);
        assert_ne!(bus.get(regs::ADCSRA) & adcsra::ADSC, 0);

        adc.stop_conversion().unwrap();
        bus.poke(regs::ADCSRA, bus.get(regs::ADCSRA) & !adcsra::ADSC);
        adc.on_conversion_complete();
        assert_eq!(CALLS.load(Ordering::SeqCst), 2);
        assert_eq!(bus.get(regs::ADCSRA) & adcsra::ADSC, 0);
    }

    #[test]
    fn test_read_refused_during_continuous() {
        static STREAMED: AtomicU32 = AtomicU32::new(0);

        fn on_stream(c: &AdcConversion<AdcChannel>) {
            assert_eq!(c.channel, AdcChannel(5));
            STREAMED.fetch_add(1, Ordering::SeqCst);
        }

        let bus = SimBus::new();
        let adc = AvrAdc::new(&bus);
        adc.init(&AdcConfig {
            mode: AdcMode::Continuous,
            ..single()
        })
        .unwrap();
        adc.register_callback(AdcChannel(5), on_stream, None).unwrap();
        bus.stall.set(true);
        adc.start_conversion(AdcChannel(5)).unwrap();

        assert_eq!(adc.read(AdcChannel(2)), Err(HalError::Busy));
        assert_eq!(bus.get(regs::ADMUX) & admux::MUX_MASK, 5);

        adc.on_conversion_complete();
        adc.on_conversion_complete();
        assert_eq!(STREAMED.load(Ordering::SeqCst), 2);

        // Once stopped, blocking reads work again
        adc.stop_conversion().unwrap();
        bus.poke(regs::ADCSRA, bus.get(regs::ADCSRA) & !adcsra::ADSC);
        bus.stall.set(false);
        bus.adc_values[2].set(77);
        assert_eq!(adc.read(AdcChannel(2)), Ok(77));
    }

    #[test]
    fn test_deinit_clears_callbacks() {
        fn ignore(_: &AdcConversion<AdcChannel>) {}

        let bus = SimBus::new();
        let adc = AvrAdc::new(&bus);
        adc.init(&single()).unwrap();
        adc.register_callback(AdcChannel(0), ignore, None).unwrap();
        adc.deinit().unwrap();
        assert!(!adc.callbacks.any_installed());
        assert_eq!(bus.get(regs::ADCSRA) & adcsra::ADEN, 0);
    }
}
