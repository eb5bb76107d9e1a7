//! EER Hardware Abstraction Layer
//!
//! This crate defines one capability trait per peripheral class. Chip-specific
//! backends (currently `eer-hal-avr`) implement them, so the same application
//! code runs on any supported microcontroller.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Application                            │
//! └─────────────────────────────────────────┘
//!                     │  &'static Hal
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  eer-hal (this crate - traits)          │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  eer-hal-avr (ATmega328P registers,     │
//! │  interrupt vectors -> callback slots)   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Traits
//!
//! - [`gpio::Gpio`] - Digital I/O and pin interrupts
//! - [`adc::Adc`] - Analog conversion
//! - [`uart::Uart`] - Serial communication
//! - [`spi::Spi`] - SPI bus operations
//! - [`i2c::I2c`] - I2C bus operations
//! - [`timer::Timer`] - Counters, compare events and PWM
//! - [`system::System`] - Tick, reset, delays
//! - [`power::Power`] - Sleep modes and wake sources
//!
//! Every operation returns [`HalResult`]. Interrupt-driven notifications go
//! through [`callback::CallbackSlot`]s, which pair a handler with its user
//! data atomically.

#![no_std]
#![deny(unsafe_code)]

pub mod adc;
pub mod callback;
pub mod error;
pub mod gpio;
pub mod handle;
pub mod i2c;
pub mod power;
pub mod spi;
pub mod system;
pub mod time;
pub mod timer;
pub mod uart;

// Re-export key types at crate root for convenience
pub use adc::Adc;
pub use callback::{Callback, CallbackRegistry, CallbackSlot, Handler, UserData};
pub use error::{HalError, HalResult, Status};
pub use gpio::{Gpio, Level};
pub use handle::Hal;
pub use i2c::I2c;
pub use power::Power;
pub use spi::Spi;
pub use system::System;
pub use time::{Clock, Deadline, WAIT_FOREVER};
pub use timer::Timer;
pub use uart::Uart;
