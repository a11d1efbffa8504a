//! Logic for ensuring heater safety.
//!
//! Two guards run per heater, both driven by the foreground heater manager
//! with explicit timestamps so they are deterministic under test:
//!
//! - **Watch-rise**: after a setpoint is applied to a cold heater, the
//!   temperature must climb a minimum amount within the watch period, or
//!   the sensor has fallen off the block / the heater is dead.
//! - **Thermal runaway**: once the heater has reached its target, drifting
//!   below `target - hysteresis` for longer than the protection period
//!   means the sensor no longer tracks the heater. Both conditions are
//!   fatal upstream.

use crate::Celsius;

/// Which heater a fault concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaterId {
    Hotend,
    Bed,
}

/// A fatal thermal condition. The machine layer reacts by killing the
/// printer: heaters off, planner flushed, watchdog starved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThermalFault {
    /// Reading below the calibrated minimum while a target is set:
    /// shorted/detached sensor or broken wiring.
    MinTemp(HeaterId),
    /// Reading above the calibrated maximum while a target is set.
    MaxTemp(HeaterId),
    /// The heater failed to raise the temperature within the watch period.
    HeatingFailed(HeaterId),
    /// Temperature fell away from a reached target for too long.
    Runaway(HeaterId),
}

/// The thermal-runaway protection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunawayState {
    /// No target set.
    Inactive,
    /// Heating toward a freshly set target.
    FirstHeating,
    /// Target reached; the temperature must stay near it.
    Stable,
    /// Tripped.
    Runaway,
}

/// Per-heater runaway supervision. Any change of target restarts the
/// machine from `FirstHeating` (or parks it in `Inactive`).
#[derive(Debug, Clone)]
pub struct ThermalRunaway {
    state: RunawayState,
    armed_target: Celsius,
    period_ms: u32,
    hysteresis: Celsius,
    deadline_ms: u32,
}

impl ThermalRunaway {
    pub fn new(period_ms: u32, hysteresis: Celsius) -> Self {
        Self {
            state: RunawayState::Inactive,
            armed_target: Celsius::ZERO,
            period_ms,
            hysteresis,
            deadline_ms: 0,
        }
    }

    #[inline]
    pub fn state(&self) -> RunawayState {
        self.state
    }

    /// Feeds one observation. Returns the state after the update; the
    /// caller escalates `Runaway` into a fatal fault.
    pub fn update(&mut self, now_ms: u32, current: Celsius, target: Celsius) -> RunawayState {
        if target != self.armed_target {
            self.state = if target > Celsius::ZERO {
                RunawayState::FirstHeating
            } else {
                RunawayState::Inactive
            };
            self.armed_target = target;
            self.deadline_ms = now_ms.wrapping_add(self.period_ms);
        }

        match self.state {
            RunawayState::Inactive | RunawayState::Runaway => {}
            RunawayState::FirstHeating => {
                if current >= self.armed_target {
                    self.state = RunawayState::Stable;
                    self.deadline_ms = now_ms.wrapping_add(self.period_ms);
                }
            }
            RunawayState::Stable => {
                if current >= self.armed_target - self.hysteresis {
                    // Still tracking: push the deadline out.
                    self.deadline_ms = now_ms.wrapping_add(self.period_ms);
                } else if now_ms.wrapping_sub(self.deadline_ms) < u32::MAX / 2 {
                    // Deadline passed while below the band.
                    self.state = RunawayState::Runaway;
                }
            }
        }
        self.state
    }
}

/// The anti-stuck heating watcher: armed when a setpoint is applied to a
/// heater well below it, it demands a minimum rise before its deadline.
#[derive(Debug, Clone)]
pub struct WatchRise {
    period_ms: u32,
    increase: Celsius,
    hysteresis: Celsius,
    watch_target: Celsius,
    deadline_ms: Option<u32>,
}

impl WatchRise {
    pub fn new(period_ms: u32, increase: Celsius, hysteresis: Celsius) -> Self {
        Self {
            period_ms,
            increase,
            hysteresis,
            watch_target: Celsius::ZERO,
            deadline_ms: None,
        }
    }

    /// Arms (or disarms) the watcher for a new setpoint. Heaters already
    /// near their target have nothing to prove.
    pub fn arm(&mut self, now_ms: u32, current: Celsius, target: Celsius) {
        let margin = self.increase + self.hysteresis + Celsius::ONE;
        if target > Celsius::ZERO && current < target - margin {
            self.watch_target = current + self.increase;
            self.deadline_ms = Some(now_ms.wrapping_add(self.period_ms));
        } else {
            self.deadline_ms = None;
        }
    }

    /// Checks a fresh observation. Returns `false` if the watch period
    /// expired without the required rise; on success the watcher re-arms
    /// for the next increment.
    pub fn check(&mut self, now_ms: u32, current: Celsius, target: Celsius) -> bool {
        let Some(deadline) = self.deadline_ms else {
            return true;
        };
        if now_ms.wrapping_sub(deadline) >= u32::MAX / 2 {
            // Deadline still ahead.
            return true;
        }
        if current < self.watch_target {
            self.deadline_ms = None;
            return false;
        }
        self.arm(now_ms, current, target);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(v: f32) -> Celsius {
        Celsius::from_num(v)
    }

    #[test]
    fn runaway_walks_inactive_heating_stable() {
        let mut tr = ThermalRunaway::new(40_000, c(4.0));
        assert_eq!(tr.update(0, c(25.0), c(0.0)), RunawayState::Inactive);
        assert_eq!(tr.update(1_000, c(25.0), c(200.0)), RunawayState::FirstHeating);
        assert_eq!(tr.update(60_000, c(150.0), c(200.0)), RunawayState::FirstHeating);
        assert_eq!(tr.update(90_000, c(200.5), c(200.0)), RunawayState::Stable);
    }

    #[test]
    fn runaway_trips_when_stable_drifts_low_too_long() {
        let mut tr = ThermalRunaway::new(40_000, c(4.0));
        tr.update(0, c(25.0), c(200.0));
        tr.update(60_000, c(200.0), c(200.0));
        assert_eq!(tr.state(), RunawayState::Stable);
        // Within the band: deadline keeps sliding.
        assert_eq!(tr.update(80_000, c(197.0), c(200.0)), RunawayState::Stable);
        // Falls out of the band; period not yet over.
        assert_eq!(tr.update(100_000, c(180.0), c(200.0)), RunawayState::Stable);
        // Still out when the period expires: runaway.
        assert_eq!(tr.update(121_000, c(180.0), c(200.0)), RunawayState::Runaway);
    }

    #[test]
    fn changing_the_target_restarts_supervision() {
        let mut tr = ThermalRunaway::new(40_000, c(4.0));
        tr.update(0, c(25.0), c(200.0));
        tr.update(60_000, c(200.0), c(200.0));
        assert_eq!(tr.update(70_000, c(200.0), c(210.0)), RunawayState::FirstHeating);
        assert_eq!(tr.update(80_000, c(25.0), c(0.0)), RunawayState::Inactive);
    }

    #[test]
    fn watch_rise_fails_a_stuck_heater() {
        let mut watch = WatchRise::new(20_000, c(2.0), c(3.0));
        watch.arm(0, c(25.0), c(200.0));
        // Before the deadline nothing is decided.
        assert!(watch.check(10_000, c(25.5), c(200.0)));
        // Deadline passes with a rise under 2 °C: failure.
        assert!(!watch.check(20_001, c(26.0), c(200.0)));
    }

    #[test]
    fn watch_rise_rearms_after_each_successful_increment() {
        let mut watch = WatchRise::new(20_000, c(2.0), c(3.0));
        watch.arm(0, c(25.0), c(200.0));
        assert!(watch.check(20_001, c(30.0), c(200.0)));
        // Re-armed from 30 °C: another stall now fails at the next deadline.
        assert!(watch.check(30_000, c(31.0), c(200.0)));
        assert!(!watch.check(40_002, c(31.5), c(200.0)));
    }

    #[test]
    fn watch_rise_does_not_arm_near_target() {
        let mut watch = WatchRise::new(20_000, c(2.0), c(3.0));
        watch.arm(0, c(199.0), c(200.0));
        assert!(watch.check(50_000, c(199.0), c(200.0)));
    }
}
