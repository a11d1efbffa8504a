//! The consumer side of the block ring.
//!
//! `StepExecutor` plays the role of the step-pulse timer: it claims the tail
//! block, fires step events at the rate the trapezoid prescribes, and
//! retires the block when the last event is done. Rates evolve exactly the
//! way the ISR arithmetic does (the 8.24 `acceleration_rate` accumulated
//! over elapsed timer ticks), so the profile fields are exercised in the
//! same fixed-point domain the hardware would use.
//!
//! Axis interleaving is a Bresenham error accumulator over the dominant
//! axis: every step event advances each participating axis whose
//! accumulator crosses zero, keeping the per-axis step streams evenly
//! distributed across the block.

use crate::block::Block;
use crate::planner::Planner;
use crate::{FAN_COUNT, NUM_AXIS, STEP_TIMER_HZ};

/// Execution state for the block currently being stepped out. A copy of the
/// profile fields is taken at claim time; the block itself stays in the ring
/// with its busy marker set until retirement.
#[derive(Debug)]
struct ActiveBlock {
    steps: [u32; NUM_AXIS],
    direction_bits: u8,
    step_event_count: u32,
    accelerate_until: u32,
    decelerate_after: u32,
    initial_rate: u32,
    nominal_rate: u32,
    final_rate: u32,
    acceleration_rate: u32,
    /// Bresenham accumulators, seeded with -step_event_count/2.
    counter: [i32; NUM_AXIS],
    step_events_completed: u32,
    /// Rate reached at the end of the acceleration phase; deceleration
    /// subtracts from it.
    acc_step_rate: u32,
    acceleration_ticks: u32,
    deceleration_ticks: u32,
}

impl ActiveBlock {
    fn claim(block: &Block) -> Self {
        let seed = -((block.step_event_count >> 1) as i32);
        Self {
            steps: block.steps,
            direction_bits: block.direction_bits,
            step_event_count: block.step_event_count,
            accelerate_until: block.accelerate_until,
            decelerate_after: block.decelerate_after,
            initial_rate: block.initial_rate,
            nominal_rate: block.nominal_rate,
            final_rate: block.final_rate,
            acceleration_rate: block.acceleration_rate,
            counter: [seed; NUM_AXIS],
            step_events_completed: 0,
            acc_step_rate: block.initial_rate,
            acceleration_ticks: 0,
            deceleration_ticks: 0,
        }
    }
}

/// Deterministic block consumer driven by an externally supplied tick count.
#[derive(Debug, Default)]
pub struct StepExecutor {
    current: Option<ActiveBlock>,
    /// Absolute tick at which the next step event fires.
    next_step_due: u64,
    /// Tick the executor has already been advanced to; newly claimed blocks
    /// start no earlier than this.
    clock: u64,
    /// Physical step position, updated per emitted step.
    count_position: [i32; NUM_AXIS],
    /// Fan duties latched from the most recently claimed block.
    fan_speed: [u8; FAN_COUNT],
    /// Step events emitted over the executor's lifetime.
    total_steps: u64,
}

impl StepExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a block is currently being stepped out.
    #[inline]
    pub fn is_busy(&self) -> bool {
        self.current.is_some()
    }

    /// The physical step position counters.
    #[inline]
    pub fn position(&self) -> [i32; NUM_AXIS] {
        self.count_position
    }

    /// Aligns the counters with the planner's logical position, e.g. after
    /// homing or `set_position_mm`.
    pub fn set_position(&mut self, steps: [i32; NUM_AXIS]) {
        self.count_position = steps;
    }

    #[inline]
    pub fn fan_speed(&self) -> [u8; FAN_COUNT] {
        self.fan_speed
    }

    #[inline]
    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    /// Abandons the block in flight. The planner flush that accompanies an
    /// emergency stop clears the ring; the position counters keep whatever
    /// was physically stepped, ready for `sync_from_steppers`.
    pub fn halt(&mut self) {
        self.current = None;
    }

    /// Runs the executor up to `now_ticks` (step-timer ticks), claiming,
    /// stepping and retiring blocks as their events come due.
    pub fn advance(&mut self, planner: &Planner, now_ticks: u64) {
        let window_start = self.clock;
        self.clock = self.clock.max(now_ticks);
        loop {
            if self.current.is_none() {
                let Some(block) = planner.get_current_block() else {
                    return;
                };
                self.fan_speed = block.fan_speed;
                self.current = Some(ActiveBlock::claim(block));
                // Keep cadence across back-to-back blocks; after an idle
                // gap, start at the beginning of this advance window.
                self.next_step_due = self.next_step_due.max(window_start);
            }

            while self.next_step_due <= now_ticks {
                let finished = self.step_event();
                if finished {
                    self.current = None;
                    planner.discard_current_block();
                    break;
                }
            }

            if self.current.is_some() {
                // Next event lies in the future.
                return;
            }
        }
    }

    /// Fires one step event: advances every axis whose accumulator crosses
    /// zero, then schedules the next event from the phase the block is in.
    /// Returns true when the block is exhausted.
    fn step_event(&mut self) -> bool {
        let active = self.current.as_mut().expect("step_event without a block");

        for axis in 0..NUM_AXIS {
            active.counter[axis] += active.steps[axis] as i32;
            if active.counter[axis] > 0 {
                active.counter[axis] -= active.step_event_count as i32;
                self.count_position[axis] += if active.direction_bits & (1 << axis) != 0 {
                    -1
                } else {
                    1
                };
            }
        }
        active.step_events_completed += 1;
        self.total_steps += 1;

        if active.step_events_completed >= active.step_event_count {
            return true;
        }

        let interval = if active.step_events_completed <= active.accelerate_until {
            let ramp = ((active.acceleration_ticks as u64 * active.acceleration_rate as u64)
                >> 24) as u32;
            let rate = (active.initial_rate + ramp).min(active.nominal_rate);
            active.acc_step_rate = rate;
            let interval = tick_interval(rate);
            active.acceleration_ticks += interval;
            interval
        } else if active.step_events_completed > active.decelerate_after {
            let ramp = ((active.deceleration_ticks as u64 * active.acceleration_rate as u64)
                >> 24) as u32;
            let rate = if ramp < active.acc_step_rate {
                (active.acc_step_rate - ramp).max(active.final_rate)
            } else {
                active.final_rate
            };
            let interval = tick_interval(rate);
            active.deceleration_ticks += interval;
            interval
        } else {
            tick_interval(active.nominal_rate)
        };

        self.next_step_due += interval as u64;
        false
    }
}

#[inline]
fn tick_interval(rate: u32) -> u32 {
    (STEP_TIMER_HZ / rate.max(1)).max(1)
}
