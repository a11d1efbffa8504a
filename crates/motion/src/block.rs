//! A queued linear movement.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::{FAN_COUNT, NUM_AXIS};

/// Entry speed or a neighbor changed; the trapezoid is stale and the block
/// must not be handed to the stepper yet.
pub const FLAG_RECALCULATE: u8 = 1 << 0;
/// The block is long enough to accelerate from standstill to nominal speed
/// and brake back to zero within its own length, so look-ahead can always
/// grant it its full entry speed.
pub const FLAG_NOMINAL_LENGTH: u8 = 1 << 1;
/// The junction with the previous segment forces a stop-and-go; everything
/// before this block is already optimally planned.
pub const FLAG_START_FROM_FULL_HALT: u8 = 1 << 2;

/// One queued movement, ready to be stepped out.
///
/// All fields are written by the producer before the ring's `head` advances;
/// after publication only look-ahead mutates them, and only under the rules
/// in [`crate::planner`]. The busy marker is kept out of the flag byte so the
/// consumer can claim a block without a read-modify-write on shared flags.
#[derive(Debug)]
pub struct Block {
    /// `FLAG_*` bitset.
    pub flags: u8,
    busy: AtomicBool,

    /// Unsigned step counts along each motor axis.
    pub steps: [u32; NUM_AXIS],
    /// `max(steps)`; drives the Bresenham interleave in the executor.
    pub step_event_count: u32,
    /// Bit set per axis travelling in the negative direction.
    pub direction_bits: u8,

    /// Euclidean XYZ length in mm, or `|E|` for extruder-only segments.
    pub millimeters: f32,
    /// Commanded speed in mm/s after feedrate scaling and per-axis clamping.
    pub nominal_speed: f32,
    /// Commanded speed in steps/s.
    pub nominal_rate: u32,
    /// Speed at block start, mm/s. Mutated by look-ahead.
    pub entry_speed: f32,
    /// Jerk-derived ceiling for `entry_speed`.
    pub max_entry_speed: f32,

    /// mm/s² after per-axis limiting.
    pub acceleration: f32,
    /// Same, in steps/s².
    pub acceleration_steps_per_s2: u32,
    /// 8.24 fixed-point rate increment per step-timer tick.
    pub acceleration_rate: u32,

    /// Step index where acceleration ends.
    pub accelerate_until: u32,
    /// Step index where deceleration begins.
    pub decelerate_after: u32,
    /// steps/s at the first step event. Never below `MIN_STEP_RATE`.
    pub initial_rate: u32,
    /// steps/s at the last step event. Never below `MIN_STEP_RATE`.
    pub final_rate: u32,

    /// Fan duties latched when the move was enqueued.
    pub fan_speed: [u8; FAN_COUNT],
    /// Tool index the move extrudes with.
    pub active_extruder: u8,
}

impl Default for Block {
    fn default() -> Self {
        Self {
            flags: 0,
            busy: AtomicBool::new(false),
            steps: [0; NUM_AXIS],
            step_event_count: 0,
            direction_bits: 0,
            millimeters: 0.0,
            nominal_speed: 0.0,
            nominal_rate: 0,
            entry_speed: 0.0,
            max_entry_speed: 0.0,
            acceleration: 0.0,
            acceleration_steps_per_s2: 0,
            acceleration_rate: 0,
            accelerate_until: 0,
            decelerate_after: 0,
            initial_rate: 0,
            final_rate: 0,
            fan_speed: [0; FAN_COUNT],
            active_extruder: 0,
        }
    }
}

impl Block {
    #[inline]
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    /// Whether the consumer is currently stepping this block out. The
    /// producer must not mutate a block while this is set.
    #[inline]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::Release);
    }

    /// Clears every field back to the unqueued state before the builder
    /// refills the slot.
    pub(crate) fn reset(&mut self) {
        let busy = self.busy.load(Ordering::Relaxed);
        *self = Self::default();
        self.busy.store(busy, Ordering::Relaxed);
    }

    /// True when the extruder participates in the move.
    #[inline]
    pub fn is_extruding(&self) -> bool {
        self.steps[crate::E_AXIS] != 0
    }
}
