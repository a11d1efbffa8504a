//! Heater power computation: bang-bang or PID, selected per heater.

use crate::pid::Pid;
use crate::Celsius;

/// The control law behind one heater's duty value.
#[derive(Debug, Clone)]
pub enum HeaterPower {
    /// Full power below `target - hysteresis`, off above
    /// `target + hysteresis`, hold the last state inside the band.
    BangBang { hysteresis: Celsius, engaged: bool },
    /// Proportional control through [`Pid`].
    Pid(Pid),
}

impl HeaterPower {
    pub fn bang_bang(hysteresis: Celsius) -> Self {
        Self::BangBang {
            hysteresis,
            engaged: false,
        }
    }

    pub fn pid(pid: Pid) -> Self {
        Self::Pid(pid)
    }

    /// Duty for the current measurement. `dt` is the seconds since the last
    /// evaluation; only the PID law consumes it.
    pub fn compute(&mut self, current: Celsius, target: Celsius, dt: Celsius) -> u8 {
        match self {
            Self::BangBang { hysteresis, engaged } => {
                if current < target - *hysteresis {
                    *engaged = true;
                } else if current > target + *hysteresis {
                    *engaged = false;
                }
                if *engaged {
                    255
                } else {
                    0
                }
            }
            Self::Pid(pid) => pid.update(target - current, dt),
        }
    }

    /// Clears controller state when the heater is switched off.
    pub fn reset(&mut self) {
        match self {
            Self::BangBang { engaged, .. } => *engaged = false,
            Self::Pid(pid) => pid.reset(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(v: f32) -> Celsius {
        Celsius::from_num(v)
    }

    #[test]
    fn bang_bang_holds_state_inside_the_band() {
        let mut power = HeaterPower::bang_bang(c(2.0));
        let dt = c(0.1);
        // Cold: engage.
        assert_eq!(power.compute(c(190.0), c(200.0), dt), 255);
        // Inside the band while rising: stay engaged.
        assert_eq!(power.compute(c(199.0), c(200.0), dt), 255);
        // Above the band: release.
        assert_eq!(power.compute(c(203.0), c(200.0), dt), 0);
        // Back inside the band while falling: stay released.
        assert_eq!(power.compute(c(201.0), c(200.0), dt), 0);
        // Below the band again: re-engage.
        assert_eq!(power.compute(c(197.0), c(200.0), dt), 255);
    }

    #[test]
    fn reset_releases_a_latched_heater() {
        let mut power = HeaterPower::bang_bang(c(2.0));
        assert_eq!(power.compute(c(20.0), c(60.0), c(0.1)), 255);
        power.reset();
        if let HeaterPower::BangBang { engaged, .. } = power {
            assert!(!engaged);
        }
    }
}
