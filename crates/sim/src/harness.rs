//! The simulation harness: a complete printer wired to the simulated
//! plant, plus trace capture for CI validation.

use std::cell::{Cell, RefCell};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::rc::Rc;

use anyhow::Result;
use motion::NUM_AXIS;
use printer_core::{Machine, MachineConfig};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::clock::SimClock;
use crate::plant::{HeaterPlant, PlantAdc, Plants, SimPin};

/// One sampled point of the simulation, serializable for trace dumps.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TraceEntry {
    pub t_ms: u64,
    pub position_steps: [i32; NUM_AXIS],
    pub hotend_c: f32,
    pub bed_c: f32,
    pub hotend_duty: u8,
    pub bed_duty: u8,
}

/// A fully wired simulated printer.
pub struct Printer {
    pub machine: Machine<SimClock, PlantAdc, SimPin>,
    clock: SimClock,
    plants: Rc<RefCell<Plants>>,
    hotend_pin: Rc<Cell<bool>>,
    bed_pin: Rc<Cell<bool>>,
    hotend_sensor_override: Rc<Cell<Option<f32>>>,
    trace: Vec<TraceEntry>,
    next_trace_ms: u64,
    /// Trace sampling period; 0 disables capture.
    pub trace_period_ms: u64,
}

impl Printer {
    /// Builds a printer with the default configuration and plant constants
    /// that heat like a stock 40 W hotend and a mains bed.
    pub fn new() -> Self {
        Self::with_config(MachineConfig::default())
    }

    pub fn with_config(config: MachineConfig) -> Self {
        let clock = SimClock::new(500);
        let hotend_pin = SimPin::new();
        let bed_pin = SimPin::new();
        let adc = PlantAdc::new(
            HeaterPlant::new(25.0, 4.0, 0.008),
            HeaterPlant::new(25.0, 0.5, 0.005),
            clock.handle(),
            hotend_pin.level_cell(),
            bed_pin.level_cell(),
        );
        let plants = adc.plants();
        let hotend_sensor_override = adc.hotend_sensor_override();
        let machine = Machine::new(
            clock.clone(),
            adc,
            [hotend_pin.clone(), bed_pin.clone()],
            config,
        );
        Self {
            machine,
            clock,
            plants,
            hotend_pin: hotend_pin.level_cell(),
            bed_pin: bed_pin.level_cell(),
            hotend_sensor_override,
            trace: Vec::new(),
            next_trace_ms: 0,
            trace_period_ms: 50,
        }
    }

    /// Runs the idle loop for roughly `ms` of simulated time, capturing
    /// trace entries along the way.
    pub fn run_ms(&mut self, ms: u64) {
        let end_us = self.clock.peek_us() + ms * 1000;
        while self.clock.peek_us() < end_us {
            self.machine.idle();
            let t_ms = self.clock.peek_us() / 1000;
            if self.trace_period_ms > 0 && t_ms >= self.next_trace_ms {
                self.capture(t_ms);
                self.next_trace_ms = t_ms + self.trace_period_ms;
            }
        }
    }

    /// Runs until the planner drains and the stepper goes quiet (or the
    /// machine dies), then returns.
    pub fn run_until_motion_done(&mut self) {
        while !self.machine.is_killed()
            && (!self.machine.planner().is_empty() || self.machine.stepper().is_busy())
        {
            self.run_ms(10);
        }
    }

    fn capture(&mut self, t_ms: u64) {
        let plants = self.plants.borrow();
        self.trace.push(TraceEntry {
            t_ms,
            position_steps: self.machine.stepper().position(),
            hotend_c: plants.hotend_temp(),
            bed_c: plants.bed_temp(),
            hotend_duty: self.machine.temperature().duty(thermal::HeaterId::Hotend),
            bed_duty: self.machine.temperature().duty(thermal::HeaterId::Bed),
        });
    }

    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.clock.peek_us() / 1000
    }

    pub fn hotend_temp(&self) -> f32 {
        self.plants.borrow().hotend_temp()
    }

    pub fn bed_temp(&self) -> f32 {
        self.plants.borrow().bed_temp()
    }

    pub fn hotend_pin_high(&self) -> bool {
        self.hotend_pin.get()
    }

    pub fn bed_pin_high(&self) -> bool {
        self.bed_pin.get()
    }

    /// Simulates a detached hotend sensor: the ADC reports `temp_c` while
    /// the plant keeps responding to the heater output.
    pub fn detach_hotend_sensor(&self, temp_c: f32) {
        self.hotend_sensor_override.set(Some(temp_c));
    }

    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    /// Dumps the captured trace as pretty JSON.
    pub fn dump_trace(&self, path: &Path) -> Result<()> {
        info!(path = %path.display(), "dumping simulation trace");
        let mut file = File::create(path)?;
        let json = serde_json::to_string_pretty(&self.trace)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

impl Default for Printer {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs a compact subscriber for simulation logs. Safe to call from
/// every test; only the first call wins.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}
