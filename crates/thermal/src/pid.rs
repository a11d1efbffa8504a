//! A fixed-point PID controller for heater power.
//!
//! All arithmetic stays in 20.12 fixed point so the control loop runs in
//! deterministic time on MCUs without an FPU. The integral clamp is
//! precomputed from the output ceiling, the classic anti-windup scheme.

use crate::Celsius;

/// PWM ceiling the controller drives toward.
const OUTPUT_MAX: i32 = 255;

/// Proportional band, °C. Outside it the controller saturates instead of
/// integrating a hopeless error.
const FUNCTIONAL_RANGE: i32 = 10;

/// PID gains, as loaded from the persisted settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

impl Default for PidGains {
    fn default() -> Self {
        // Classic hotend defaults for a 40 W cartridge.
        Self {
            kp: 22.2,
            ki: 1.08,
            kd: 114.0,
        }
    }
}

/// A PID controller producing a 0..=255 duty from a temperature error.
#[derive(Debug, Clone)]
pub struct Pid {
    kp: Celsius,
    ki: Celsius,
    kd: Celsius,
    integral: Celsius,
    previous_error: Celsius,
    integral_max: Celsius,
}

impl Pid {
    pub fn new(gains: PidGains) -> Self {
        let ki = Celsius::from_num(gains.ki);
        // Precompute the integral limit for anti-windup; a zero Ki never
        // integrates, so any limit works.
        let integral_max = if ki > Celsius::ZERO {
            Celsius::from_num(OUTPUT_MAX) / ki
        } else {
            Celsius::ZERO
        };
        Self {
            kp: Celsius::from_num(gains.kp),
            ki,
            kd: Celsius::from_num(gains.kd),
            integral: Celsius::ZERO,
            previous_error: Celsius::ZERO,
            integral_max,
        }
    }

    /// Resets the controller's internal state.
    pub fn reset(&mut self) {
        self.integral = Celsius::ZERO;
        self.previous_error = Celsius::ZERO;
    }

    /// Calculates the next duty for `error = target - current` over a step
    /// of `dt` seconds.
    pub fn update(&mut self, error: Celsius, dt: Celsius) -> u8 {
        let range = Celsius::from_num(FUNCTIONAL_RANGE);
        if error > range {
            // Far below target: full power, no point shaping it.
            self.reset();
            return OUTPUT_MAX as u8;
        }
        if error < -range {
            self.reset();
            return 0;
        }

        let p_term = self.kp * error;

        self.integral += error * dt;
        if self.integral > self.integral_max {
            self.integral = self.integral_max;
        } else if self.integral < -self.integral_max {
            self.integral = -self.integral_max;
        }
        let i_term = self.ki * self.integral;

        let derivative = if dt > Celsius::ZERO {
            (error - self.previous_error) / dt
        } else {
            Celsius::ZERO
        };
        self.previous_error = error;
        let d_term = self.kd * derivative;

        let output: i32 = (p_term + i_term + d_term).to_num();
        output.clamp(0, OUTPUT_MAX) as u8
    }
}
