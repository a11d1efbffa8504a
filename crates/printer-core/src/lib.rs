//! # Printer Core
//!
//! The root of the firmware: one [`Machine`] value owning the motion
//! planner, the step executor, the temperature controller, and the soft-PWM
//! driver. Components that need a capability (the clock, the ADC, the
//! heater pins) receive it at construction; there are no hidden globals.
//!
//! The machine runs the cooperative foreground model of the original
//! firmware: callers invoke [`Machine::idle`] whenever they wait, and
//! `idle` services everything the timer interrupts would: the 1 kHz
//! ADC/soft-PWM tick, the heater manager, the step executor, the watchdog,
//! and the inactivity timers. Blocking operations (a full planner ring, a
//! temperature wait) spin on `idle` and therefore keep the printer alive
//! while they wait.

pub mod config;
pub mod error;
pub mod machine;
pub mod serial;
pub mod settings;
pub mod watchdog;

pub use config::MachineConfig;
pub use error::{KillReason, MachineError, ProtocolError, SettingsError};
pub use machine::{Clock, Machine, MoveOutcome};
pub use serial::{Reply, Session};
pub use settings::{PreheatPreset, Settings};
pub use watchdog::Watchdog;
