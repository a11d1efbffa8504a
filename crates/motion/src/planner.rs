//! Block admission and look-ahead entry-speed optimization.
//!
//! The planner owns the block ring. `try_buffer_line` turns a Cartesian
//! target into a fully formed block (step deltas, nominal speed and rate,
//! per-axis limited acceleration, jerk-bounded junction speed) and
//! publishes it. Every admission then re-runs `recalculate`: a reverse pass
//! pulls entry speeds up to what the downstream neighbor permits, a forward
//! pass caps them to what the upstream neighbor can actually reach, and a
//! final sweep refreshes the trapezoids of every block whose junction
//! changed.
//!
//! Blocks at the tail may be claimed by the stepper at any moment, so the
//! passes never touch the running block, and trapezoid commits are skipped
//! for busy blocks (see [`crate::profile`]).

use core::array::from_fn;

use crate::block::{
    Block, FLAG_NOMINAL_LENGTH, FLAG_RECALCULATE, FLAG_START_FROM_FULL_HALT,
};
use crate::error::PlannerError;
use crate::math;
use crate::profile;
use crate::queue::BlockQueue;
use crate::{BLOCK_BUFFER_SIZE, EXTRUDERS, E_AXIS, FAN_COUNT, MIN_STEPS_PER_SEGMENT, NUM_AXIS};

/// Motion limits and conversion factors. Persisted in the settings image and
/// mutable at runtime through the per-field setters on [`Planner`].
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerConfig {
    pub axis_steps_per_mm: [f32; NUM_AXIS],
    pub max_feedrate_mm_s: [f32; NUM_AXIS],
    pub max_acceleration_mm_s2: [u32; NUM_AXIS],
    /// mm/s² for printing moves.
    pub acceleration: f32,
    /// mm/s² for extruder-only moves.
    pub retract_acceleration: f32,
    /// mm/s² for non-extruding moves.
    pub travel_acceleration: f32,
    pub min_feedrate_mm_s: f32,
    pub min_travel_feedrate_mm_s: f32,
    /// Segments shorter than this are stretched while the buffer drains.
    pub min_segment_time_us: u32,
    /// Largest instantaneous per-axis speed change allowed at a junction.
    pub max_jerk_mm_s: [f32; NUM_AXIS],
    pub flow_percentage: [i16; EXTRUDERS],
    pub volumetric_multiplier: [f32; EXTRUDERS],
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            axis_steps_per_mm: [80.0, 80.0, 400.0, 100.0],
            max_feedrate_mm_s: [300.0, 300.0, 5.0, 25.0],
            max_acceleration_mm_s2: [1500, 1500, 100, 10_000],
            acceleration: 1000.0,
            retract_acceleration: 3000.0,
            travel_acceleration: 1000.0,
            min_feedrate_mm_s: 0.05,
            min_travel_feedrate_mm_s: 0.05,
            min_segment_time_us: 20_000,
            max_jerk_mm_s: [10.0, 10.0, 0.4, 5.0],
            flow_percentage: [100; EXTRUDERS],
            volumetric_multiplier: [1.0; EXTRUDERS],
        }
    }
}

impl PlannerConfig {
    /// Combined flow scaling applied to extruder deltas.
    #[inline]
    fn e_factor(&self, extruder: usize) -> f32 {
        self.flow_percentage[extruder] as f32 * 0.01 * self.volumetric_multiplier[extruder]
    }
}

/// The planner: block ring plus the junction state carried from one
/// admission to the next.
#[derive(Debug)]
pub struct Planner {
    queue: BlockQueue<BLOCK_BUFFER_SIZE>,
    config: PlannerConfig,
    /// Derived from `max_acceleration_mm_s2`, cached in the step domain.
    max_acceleration_steps_per_s2: [u32; NUM_AXIS],
    /// Step position at the end of the last queued block.
    position: [i32; NUM_AXIS],
    /// Per-axis speed vector of the last queued block, mm/s, signed.
    previous_speed: [f32; NUM_AXIS],
    previous_nominal_speed: f32,
    previous_safe_speed: f32,
}

impl Default for Planner {
    fn default() -> Self {
        Self::new(PlannerConfig::default())
    }
}

impl Planner {
    pub fn new(config: PlannerConfig) -> Self {
        let mut planner = Self {
            queue: BlockQueue::new(),
            config,
            max_acceleration_steps_per_s2: [0; NUM_AXIS],
            position: [0; NUM_AXIS],
            previous_speed: [0.0; NUM_AXIS],
            previous_nominal_speed: 0.0,
            previous_safe_speed: 0.0,
        };
        planner.refresh_acceleration_rates();
        planner
    }

    #[inline]
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[inline]
    pub fn moves_planned(&self) -> usize {
        self.queue.moves_planned()
    }

    /// The queued blocks, oldest first.
    pub fn queued_blocks(&self) -> impl Iterator<Item = &Block> {
        let tail = self.queue.tail();
        let count = self.queue.moves_planned();
        (0..count).map(move |i| {
            let mut idx = tail;
            for _ in 0..i {
                idx = self.queue.next_index(idx);
            }
            self.queue.block(idx)
        })
    }

    // ------------------------------------------------------------------
    // Admission
    // ------------------------------------------------------------------

    /// Admits a linear move to `target_mm` at `fr_mm_s`.
    ///
    /// Returns `Ok(false)` when the segment is too short to produce a block
    /// (not an error: the residual distance is picked up by the next move)
    /// and `Err(BufferFull)` when no slot is free; the caller yields to its
    /// idle routine and retries.
    pub fn try_buffer_line(
        &mut self,
        target_mm: &[f32; NUM_AXIS],
        fr_mm_s: f32,
        extruder: u8,
        fan_speed: [u8; FAN_COUNT],
    ) -> Result<bool, PlannerError> {
        if self.queue.is_full() {
            return Err(PlannerError::BufferFull);
        }

        let target: [i32; NUM_AXIS] =
            from_fn(|i| math::lroundf(target_mm[i] * self.config.axis_steps_per_mm[i]));

        let da = target[0] - self.position[0];
        let db = target[1] - self.position[1];
        let dc = target[2] - self.position[2];
        let de_raw = target[E_AXIS] - self.position[E_AXIS];
        // Flow and volumetric multipliers scale the commanded filament
        // movement, not the logical E position.
        let de_scaled = de_raw as f32 * self.config.e_factor(extruder as usize);
        let de = math::lroundf(de_scaled);

        let mut direction_bits = 0u8;
        for (axis, delta) in [da, db, dc, de].into_iter().enumerate() {
            if delta < 0 {
                direction_bits |= 1 << axis;
            }
        }

        let steps: [u32; NUM_AXIS] =
            [da.unsigned_abs(), db.unsigned_abs(), dc.unsigned_abs(), de.unsigned_abs()];
        let step_event_count = *steps.iter().max().unwrap_or(&0);
        if step_event_count < MIN_STEPS_PER_SEGMENT {
            return Ok(false);
        }

        let delta_mm: [f32; NUM_AXIS] = [
            da as f32 / self.config.axis_steps_per_mm[0],
            db as f32 / self.config.axis_steps_per_mm[1],
            dc as f32 / self.config.axis_steps_per_mm[2],
            de as f32 / self.config.axis_steps_per_mm[E_AXIS],
        ];

        let millimeters = if steps[0] < MIN_STEPS_PER_SEGMENT
            && steps[1] < MIN_STEPS_PER_SEGMENT
            && steps[2] < MIN_STEPS_PER_SEGMENT
        {
            math::fabsf(delta_mm[E_AXIS])
        } else {
            math::sqrtf(
                delta_mm[0] * delta_mm[0]
                    + delta_mm[1] * delta_mm[1]
                    + delta_mm[2] * delta_mm[2],
            )
        };
        let inverse_millimeters = 1.0 / millimeters;

        let mut fr = fr_mm_s;
        let floor = if steps[E_AXIS] != 0 {
            self.config.min_feedrate_mm_s
        } else {
            self.config.min_travel_feedrate_mm_s
        };
        if fr < floor {
            fr = floor;
        }

        let mut inverse_mm_s = fr * inverse_millimeters;

        // While the buffer is draining, stretch undersized segments so the
        // stepper does not starve between refills.
        let moves_queued = self.queue.moves_planned();
        if moves_queued > 1 && moves_queued < BLOCK_BUFFER_SIZE / 2 {
            let segment_time_us = math::lroundf(1_000_000.0 * millimeters / fr) as u32;
            if segment_time_us < self.config.min_segment_time_us {
                let stretched = segment_time_us
                    + 2 * (self.config.min_segment_time_us - segment_time_us)
                        / moves_queued as u32;
                inverse_mm_s = 1_000_000.0 / stretched as f32;
            }
        }

        let mut nominal_speed = millimeters * inverse_mm_s;
        let mut nominal_rate_f = math::ceilf(step_event_count as f32 * inverse_mm_s);

        // Per-axis speed vector, capped by the axis feedrate limits. A single
        // scale factor preserves the direction of travel.
        let mut current_speed = [0.0f32; NUM_AXIS];
        let mut speed_factor = 1.0f32;
        for i in 0..NUM_AXIS {
            let cs = delta_mm[i] * inverse_mm_s;
            current_speed[i] = cs;
            let abs_cs = math::fabsf(cs);
            if abs_cs > self.config.max_feedrate_mm_s[i] {
                speed_factor = speed_factor.min(self.config.max_feedrate_mm_s[i] / abs_cs);
            }
        }
        if speed_factor < 1.0 {
            for cs in current_speed.iter_mut() {
                *cs *= speed_factor;
            }
            nominal_speed *= speed_factor;
            nominal_rate_f *= speed_factor;
        }
        let nominal_rate = nominal_rate_f as u32;

        let accel_st = self.limited_acceleration(&steps, step_event_count, inverse_millimeters);
        let acceleration = accel_st as f32 * millimeters / step_event_count as f32;

        // Safe speed: the fastest speed this segment may run at such that an
        // instantaneous full stop still respects every axis jerk limit.
        let mut safe_speed = nominal_speed;
        let mut limited = false;
        for i in 0..NUM_AXIS {
            let jerk = math::fabsf(current_speed[i]);
            let maxj = self.config.max_jerk_mm_s[i];
            if jerk > maxj {
                if limited {
                    let mjerk = maxj * nominal_speed;
                    if jerk * safe_speed > mjerk {
                        safe_speed = mjerk / jerk;
                    }
                } else {
                    limited = true;
                    safe_speed = maxj * nominal_speed / jerk;
                }
            }
        }

        // Junction speed with the previous segment, limited axis by axis.
        // Coasting in the same direction allows the speed difference; a
        // reversal must absorb the larger of the two magnitudes.
        let mut flags = FLAG_RECALCULATE;
        let vmax_junction;
        let fresh_start = moves_queued == 0 || self.previous_nominal_speed <= 0.0001;
        if !fresh_start {
            let mut junction = nominal_speed.min(self.previous_nominal_speed);
            let smaller_speed_factor = junction / self.previous_nominal_speed;
            let mut v_factor = 1.0f32;
            let mut junction_limited = false;
            for axis in 0..NUM_AXIS {
                let mut v_exit = self.previous_speed[axis] * smaller_speed_factor;
                let mut v_entry = current_speed[axis];
                if junction_limited {
                    v_exit *= v_factor;
                    v_entry *= v_factor;
                }
                let jerk = if v_exit > v_entry {
                    if v_entry > 0.0 || v_exit < 0.0 {
                        v_exit - v_entry
                    } else {
                        v_exit.max(-v_entry)
                    }
                } else if v_entry < 0.0 || v_exit > 0.0 {
                    v_entry - v_exit
                } else {
                    (-v_exit).max(v_entry)
                };
                if jerk > self.config.max_jerk_mm_s[axis] {
                    v_factor *= self.config.max_jerk_mm_s[axis] / jerk;
                    junction_limited = true;
                }
            }
            if junction_limited {
                junction *= v_factor;
            }
            // When both segments would have to crawl through the junction
            // anyway, a stop-and-go with separate safe speeds is faster.
            let threshold = junction * 0.99;
            if self.previous_safe_speed > threshold && safe_speed > threshold {
                flags |= FLAG_START_FROM_FULL_HALT;
                junction = safe_speed;
            }
            vmax_junction = junction;
        } else {
            flags |= FLAG_START_FROM_FULL_HALT;
            vmax_junction = safe_speed;
        }

        let v_allowable = profile::max_allowable_speed(-acceleration, 0.0, millimeters);
        // A move with no live predecessor starts from actual standstill;
        // max_entry_speed still carries the jerk bound for look-ahead.
        let entry_speed = if fresh_start {
            0.0
        } else {
            vmax_junction.min(v_allowable)
        };
        if nominal_speed <= v_allowable {
            flags |= FLAG_NOMINAL_LENGTH;
        }

        let head = self.queue.head();
        let block = self.queue.block_mut(head);
        block.reset();
        block.flags = flags;
        block.steps = steps;
        block.step_event_count = step_event_count;
        block.direction_bits = direction_bits;
        block.millimeters = millimeters;
        block.nominal_speed = nominal_speed;
        block.nominal_rate = nominal_rate;
        block.entry_speed = entry_speed;
        block.max_entry_speed = vmax_junction;
        block.acceleration = acceleration;
        block.acceleration_steps_per_s2 = accel_st;
        block.acceleration_rate = profile::acceleration_rate(accel_st);
        block.decelerate_after = step_event_count;
        block.fan_speed = fan_speed;
        block.active_extruder = extruder;

        self.previous_speed = current_speed;
        self.previous_nominal_speed = nominal_speed;
        self.previous_safe_speed = safe_speed;
        self.position = target;

        // Publication point: the consumer may observe the block from here on.
        self.queue.publish_head();
        self.recalculate();
        Ok(true)
    }

    /// Print/travel/retract acceleration in steps/s², reduced until no axis
    /// exceeds its own limit. Below the overflow cutoff the comparison runs
    /// in integer arithmetic; huge segments fall back to floats.
    fn limited_acceleration(
        &self,
        steps: &[u32; NUM_AXIS],
        step_event_count: u32,
        inverse_millimeters: f32,
    ) -> u32 {
        let accel_mm_s2 = if steps[E_AXIS] != 0 && steps[0] == 0 && steps[1] == 0 && steps[2] == 0 {
            self.config.retract_acceleration
        } else if steps[E_AXIS] == 0 {
            self.config.travel_acceleration
        } else {
            self.config.acceleration
        };

        let steps_per_mm = step_event_count as f32 * inverse_millimeters;
        let mut accel_st = math::ceilf(accel_mm_s2 * steps_per_mm) as u32;

        let cutoff_long = u32::MAX / accel_st.max(1);
        if step_event_count <= cutoff_long {
            for i in 0..NUM_AXIS {
                let max_st = self.max_acceleration_steps_per_s2[i];
                if steps[i] != 0 && max_st < accel_st {
                    let comp = max_st as u64 * step_event_count as u64;
                    if steps[i] as u64 * accel_st as u64 > comp {
                        accel_st = (comp / steps[i] as u64) as u32;
                    }
                }
            }
        } else {
            for i in 0..NUM_AXIS {
                let max_st = self.max_acceleration_steps_per_s2[i];
                if steps[i] != 0 && max_st < accel_st {
                    let comp = max_st as f32 * step_event_count as f32;
                    if steps[i] as f32 * accel_st as f32 > comp {
                        accel_st = (comp / steps[i] as f32) as u32;
                    }
                }
            }
        }
        accel_st
    }

    // ------------------------------------------------------------------
    // Look-ahead
    // ------------------------------------------------------------------

    /// Reverse pass, forward pass, then a trapezoid refresh over every block
    /// still flagged for recalculation.
    pub fn recalculate(&mut self) {
        self.reverse_pass();
        self.forward_pass();
        self.recalculate_trapezoids();
    }

    /// Walks from the newest block backward, raising entry speeds toward
    /// what each block's successor can still brake away from. The two oldest
    /// slots are skipped: the stepper may latch either at any moment.
    fn reverse_pass(&mut self) {
        if self.queue.moves_planned() <= 3 {
            return;
        }
        let mut next_idx = self.queue.prev_index(self.queue.head());
        while self.queue.depth(next_idx) >= 3 {
            let cur_idx = self.queue.prev_index(next_idx);
            if self.queue.block(cur_idx).has_flag(FLAG_START_FROM_FULL_HALT) {
                // Everything upstream of a full halt is already optimal.
                break;
            }
            let next_entry = self.queue.block(next_idx).entry_speed;
            let cur = self.queue.block_mut(cur_idx);
            if cur.entry_speed != cur.max_entry_speed {
                cur.entry_speed = if cur.has_flag(FLAG_NOMINAL_LENGTH)
                    || cur.max_entry_speed <= next_entry
                {
                    cur.max_entry_speed
                } else {
                    cur.max_entry_speed.min(profile::max_allowable_speed(
                        -cur.acceleration,
                        next_entry,
                        cur.millimeters,
                    ))
                };
                cur.flags |= FLAG_RECALCULATE;
            }
            next_idx = cur_idx;
        }
    }

    /// Walks from the oldest block forward, capping each entry speed to what
    /// the previous block can physically accelerate to.
    fn forward_pass(&mut self) {
        let head = self.queue.head();
        let mut idx = self.queue.tail();
        while idx != head {
            let next = self.queue.next_index(idx);
            if next == head {
                break;
            }
            let prev = self.queue.block(idx);
            if !prev.has_flag(FLAG_NOMINAL_LENGTH) {
                let prev_entry = prev.entry_speed;
                let prev_accel = prev.acceleration;
                let prev_mm = prev.millimeters;
                let cur = self.queue.block_mut(next);
                if prev_entry < cur.entry_speed {
                    let reachable =
                        profile::max_allowable_speed(-prev_accel, prev_entry, prev_mm);
                    if reachable < cur.entry_speed {
                        cur.entry_speed = reachable;
                        cur.flags |= FLAG_RECALCULATE;
                    }
                }
            }
            idx = next;
        }
    }

    /// Rebuilds the trapezoid of every block whose entry or exit junction
    /// changed. The newest block always brakes to zero: nothing is queued
    /// after it yet.
    fn recalculate_trapezoids(&mut self) {
        let head = self.queue.head();
        let tail = self.queue.tail();
        let mut idx = tail;
        while idx != head {
            let next = self.queue.next_index(idx);
            if next == head {
                break;
            }
            let recalc = self.queue.block(idx).has_flag(FLAG_RECALCULATE)
                || self.queue.block(next).has_flag(FLAG_RECALCULATE);
            if recalc {
                let entry = self.queue.block(idx).entry_speed;
                let exit = self.queue.block(next).entry_speed;
                profile::calculate_trapezoid(self.queue.block_mut(idx), entry, exit);
            }
            idx = next;
        }
        if head != tail {
            let last = self.queue.prev_index(head);
            let entry = self.queue.block(last).entry_speed;
            profile::calculate_trapezoid(self.queue.block_mut(last), entry, 0.0);
        }
    }

    // ------------------------------------------------------------------
    // Consumer side
    // ------------------------------------------------------------------

    /// The block the stepper should execute next, or `None` while the queue
    /// is empty or the tail still awaits a trapezoid refresh. Claims the
    /// block by marking it busy.
    pub fn get_current_block(&self) -> Option<&Block> {
        if self.queue.is_empty() {
            return None;
        }
        let tail = self.queue.tail();
        let block = self.queue.block(tail);
        if block.has_flag(FLAG_RECALCULATE) {
            return None;
        }
        if self.queue.moves_planned() > 1
            && self
                .queue
                .block(self.queue.next_index(tail))
                .has_flag(FLAG_RECALCULATE)
        {
            // The successor's junction is still moving; running the tail now
            // could strand it with an unreachable exit speed.
            return None;
        }
        block.set_busy(true);
        Some(block)
    }

    /// Retires the block previously returned by [`Self::get_current_block`].
    pub fn discard_current_block(&self) {
        if !self.queue.is_empty() {
            self.queue.block(self.queue.tail()).set_busy(false);
            self.queue.advance_tail();
        }
    }

    /// Drops every queued block. The next admitted move starts from a halt.
    pub fn flush(&mut self) {
        let head = self.queue.head();
        let mut idx = self.queue.tail();
        while idx != head {
            self.queue.block(idx).set_busy(false);
            idx = self.queue.next_index(idx);
        }
        self.queue.flush();
        self.previous_speed = [0.0; NUM_AXIS];
        self.previous_nominal_speed = 0.0;
        self.previous_safe_speed = 0.0;
    }

    // ------------------------------------------------------------------
    // Position
    // ------------------------------------------------------------------

    /// Resets the logical position, e.g. after homing. Junction state is
    /// cleared: the next move starts from a halt.
    pub fn set_position_mm(&mut self, target_mm: &[f32; NUM_AXIS]) {
        self.position =
            from_fn(|i| math::lroundf(target_mm[i] * self.config.axis_steps_per_mm[i]));
        self.previous_speed = [0.0; NUM_AXIS];
        self.previous_nominal_speed = 0.0;
        self.previous_safe_speed = 0.0;
    }

    /// Single-axis variant of [`Self::set_position_mm`].
    pub fn set_position_mm_axis(&mut self, axis: usize, mm: f32) {
        self.position[axis] = math::lroundf(mm * self.config.axis_steps_per_mm[axis]);
        self.previous_speed = [0.0; NUM_AXIS];
        self.previous_nominal_speed = 0.0;
        self.previous_safe_speed = 0.0;
    }

    pub fn get_position_mm(&self) -> [f32; NUM_AXIS] {
        from_fn(|i| self.position[i] as f32 / self.config.axis_steps_per_mm[i])
    }

    #[inline]
    pub fn position_steps(&self) -> [i32; NUM_AXIS] {
        self.position
    }

    /// Re-reads the physical position from the stepper's counters after an
    /// abort interrupted queued motion.
    pub fn sync_from_steppers(&mut self, steps: &[i32; NUM_AXIS]) {
        critical_section::with(|_| {
            self.position = *steps;
        });
        self.previous_speed = [0.0; NUM_AXIS];
        self.previous_nominal_speed = 0.0;
        self.previous_safe_speed = 0.0;
    }

    // ------------------------------------------------------------------
    // Runtime configuration
    // ------------------------------------------------------------------

    pub fn apply_config(&mut self, config: PlannerConfig) {
        self.config = config;
        self.refresh_acceleration_rates();
    }

    pub fn set_steps_per_mm(&mut self, axis: usize, value: f32) {
        self.config.axis_steps_per_mm[axis] = value;
        self.refresh_acceleration_rates();
    }

    pub fn set_max_feedrate(&mut self, axis: usize, mm_s: f32) {
        self.config.max_feedrate_mm_s[axis] = mm_s;
    }

    pub fn set_max_acceleration(&mut self, axis: usize, mm_s2: u32) {
        self.config.max_acceleration_mm_s2[axis] = mm_s2;
        self.refresh_acceleration_rates();
    }

    pub fn set_max_jerk(&mut self, axis: usize, mm_s: f32) {
        self.config.max_jerk_mm_s[axis] = mm_s;
    }

    pub fn set_acceleration(&mut self, mm_s2: f32) {
        self.config.acceleration = mm_s2;
    }

    pub fn set_retract_acceleration(&mut self, mm_s2: f32) {
        self.config.retract_acceleration = mm_s2;
    }

    pub fn set_travel_acceleration(&mut self, mm_s2: f32) {
        self.config.travel_acceleration = mm_s2;
    }

    pub fn set_min_feedrate(&mut self, mm_s: f32) {
        self.config.min_feedrate_mm_s = mm_s;
    }

    pub fn set_min_travel_feedrate(&mut self, mm_s: f32) {
        self.config.min_travel_feedrate_mm_s = mm_s;
    }

    pub fn set_min_segment_time(&mut self, us: u32) {
        self.config.min_segment_time_us = us;
    }

    pub fn set_flow_percentage(&mut self, extruder: usize, percent: i16) {
        self.config.flow_percentage[extruder] = percent;
    }

    fn refresh_acceleration_rates(&mut self) {
        for i in 0..NUM_AXIS {
            self.max_acceleration_steps_per_s2[i] = (self.config.max_acceleration_mm_s2[i]
                as f32
                * self.config.axis_steps_per_mm[i]) as u32;
        }
    }
}
