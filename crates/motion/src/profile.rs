//! Trapezoidal speed profiles across a block's step events.
//!
//! Entry and exit speeds come from look-ahead; this module partitions the
//! block's step events into accelerate / cruise / decelerate phases and
//! derives the fixed-point acceleration rate the step timer consumes. The
//! distance helpers run in double precision: near-zero entry speeds square
//! into values a single-precision subtraction can push negative, and the
//! partition math assumes non-negative radicands throughout.

use crate::block::{Block, FLAG_RECALCULATE};
use crate::math;
use crate::{MIN_STEP_RATE, STEP_TIMER_HZ};

/// Steps covered while the rate changes from `initial_rate` to `target_rate`
/// under `accel` (steps/s², signed). Zero acceleration covers no distance.
pub fn estimate_acceleration_distance(initial_rate: f32, target_rate: f32, accel: f32) -> f32 {
    if accel == 0.0 {
        return 0.0;
    }
    let u = initial_rate as f64;
    let v = target_rate as f64;
    ((v * v - u * u) / (2.0 * accel as f64)) as f32
}

/// Step index where an accelerating ramp from `initial_rate` meets a
/// decelerating ramp into `final_rate`, given `distance` total step events.
/// Used when the block is too short for any cruise phase.
pub fn intersection_distance(initial_rate: f32, final_rate: f32, accel: f32, distance: f32) -> f32 {
    if accel == 0.0 {
        return 0.0;
    }
    let u = initial_rate as f64;
    let v = final_rate as f64;
    let a = accel as f64;
    ((2.0 * a * distance as f64 - u * u + v * v) / (4.0 * a)) as f32
}

/// Highest speed a segment of `distance` mm may start at and still reach
/// `target_velocity` at its end under `accel` (negative while braking).
pub fn max_allowable_speed(accel: f32, target_velocity: f32, distance: f32) -> f32 {
    let v = target_velocity as f64;
    let radicand = v * v - 2.0 * accel as f64 * distance as f64;
    math::sqrt(radicand.max(0.0)) as f32
}

/// 8.24 fixed-point rate increment per tick of the step timer.
pub fn acceleration_rate(accel_steps_per_s2: u32) -> u32 {
    (((accel_steps_per_s2 as u64) << 24) / STEP_TIMER_HZ as u64) as u32
}

/// Recomputes the accel/cruise/decel partition of `block` for the given
/// entry and exit speeds (mm/s) and commits it.
///
/// The commit happens under a critical section and is skipped entirely when
/// the stepper has already claimed the block; a claimed block runs with
/// whatever profile it was published with.
pub fn calculate_trapezoid(block: &mut Block, entry_speed: f32, exit_speed: f32) {
    // Scale speeds into the step-rate domain through the nominal ratio.
    // nominal_speed > 0 for every admitted block.
    let nomr = 1.0 / block.nominal_speed;
    let initial_rate = rate_for(block.nominal_rate, entry_speed * nomr);
    let final_rate = rate_for(block.nominal_rate, exit_speed * nomr);

    let accel = block.acceleration_steps_per_s2 as f32;
    let accelerate_steps = (math::ceilf(estimate_acceleration_distance(
        initial_rate as f32,
        block.nominal_rate as f32,
        accel,
    )) as i64)
        .max(0);
    let decelerate_steps = (math::floorf(estimate_acceleration_distance(
        block.nominal_rate as f32,
        final_rate as f32,
        -accel,
    )) as i64)
        .max(0);

    let mut plateau_steps = block.step_event_count as i64 - accelerate_steps - decelerate_steps;
    let mut accelerate_until = accelerate_steps;
    if plateau_steps < 0 {
        // Too short to reach nominal rate: accelerate straight into the
        // deceleration ramp.
        let steps = math::ceilf(intersection_distance(
            initial_rate as f32,
            final_rate as f32,
            accel,
            block.step_event_count as f32,
        )) as i64;
        accelerate_until = steps.clamp(0, block.step_event_count as i64);
        plateau_steps = 0;
    }
    let decelerate_after = (accelerate_until + plateau_steps) as u32;
    let rate = acceleration_rate(block.acceleration_steps_per_s2);

    critical_section::with(|_| {
        if !block.is_busy() {
            block.accelerate_until = accelerate_until as u32;
            block.decelerate_after = decelerate_after;
            block.initial_rate = initial_rate;
            block.final_rate = final_rate;
            block.acceleration_rate = rate;
            block.flags &= !FLAG_RECALCULATE;
        }
    });
}

fn rate_for(nominal_rate: u32, factor: f32) -> u32 {
    (math::ceilf(nominal_rate as f32 * factor) as u32).max(MIN_STEP_RATE)
}
