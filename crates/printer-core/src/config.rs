//! Machine-level configuration.
//!
//! Motion limits live in [`motion::PlannerConfig`] and thermal tuning in
//! [`thermal::ThermalConfig`]; this struct bundles them with the handful of
//! knobs that belong to the machine itself.

use motion::PlannerConfig;
use thermal::ThermalConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct MachineConfig {
    pub planner: PlannerConfig,
    pub thermal: ThermalConfig,
    /// Steppers are released after this long without queued motion.
    pub stepper_inactive_time_ms: u32,
    /// Watchdog budget; the idle loop must come around faster than this.
    pub watchdog_timeout_ms: u32,
    /// A single command may extrude at most this much filament.
    pub extrude_max_length_mm: f32,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            planner: PlannerConfig::default(),
            thermal: ThermalConfig::default(),
            stepper_inactive_time_ms: 60_000,
            watchdog_timeout_ms: 4_000,
            extrude_max_length_mm: 200.0,
        }
    }
}
