//! # In-Process Printer Simulation
//!
//! A deterministic environment for exercising the firmware core end to end
//! without hardware: a quantum clock that advances as the machine polls it,
//! first-order thermal plants behind the real calibration tables, heater
//! pins wired back into the plants, and a harness that drives the idle loop
//! and captures traces for CI assertions.

pub mod clock;
pub mod harness;
pub mod plant;

pub use clock::SimClock;
pub use harness::{Printer, TraceEntry};
pub use plant::{HeaterPlant, PlantAdc, SimPin};
