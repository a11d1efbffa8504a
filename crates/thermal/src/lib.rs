//! # Thermal Management Crate
//!
//! Heater control for FFF printers, usable on MCU and host alike
//! (`no_std`-friendly):
//!
//! - **Thermistor tables**: monotone piecewise-linear ADC-to-temperature
//!   conversion with an exact inverse at the table vertices.
//! - **ADC sampling**: the four-state oversampling machine that feeds raw
//!   hotend/bed pairs to the controller through a coherent exchange cell.
//! - **Heater power**: fixed-point PID with anti-windup, or bang-bang with
//!   hysteresis.
//! - **Safety**: watch-rise supervision and the thermal-runaway state
//!   machine, plus calibrated min/max gating in the controller.
//! - **Soft PWM**: a timer-tick driver toggling heater outputs from
//!   published duty bytes.
//!
//! Temperatures are 20.12 fixed point ([`Celsius`]); all control arithmetic
//! stays in that domain so MCU builds never touch floating point on the hot
//! path.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod adc;
pub mod controller;
pub mod filter;
pub mod heater;
pub mod pid;
pub mod safety;
pub mod soft_pwm;
pub mod thermistor;

// Re-export key types
pub use adc::{AdcChannel, AdcSampler, AdcSource, RawExchange, RawPair, OVERSAMPLE};
pub use controller::{TemperatureController, ThermalConfig};
pub use filter::{Filter, MovingAverageFilter};
pub use heater::HeaterPower;
pub use pid::{Pid, PidGains};
pub use safety::{HeaterId, RunawayState, ThermalFault, ThermalRunaway, WatchRise};
pub use soft_pwm::SoftPwm;
pub use thermistor::{TempTable, Thermistor};

/// Temperature in °C, 20.12 fixed point: 12 fractional bits of resolution
/// with range far beyond any printer temperature.
pub type Celsius = fixed::types::I20F12;

/// Shorthand for building a [`Celsius`] from an integer degree count.
#[inline]
pub fn celsius(deg: i32) -> Celsius {
    Celsius::from_num(deg)
}
