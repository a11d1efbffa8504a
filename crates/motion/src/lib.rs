//! # Motion Planning Crate
//!
//! The movement pipeline of an FFF printer, from parsed linear-move targets to
//! time-ordered step events, usable on both host and MCU (`no_std`-friendly).
//!
//! ## Pipeline
//!
//! 1.  **Block builder** (`Planner::try_buffer_line`): converts a Cartesian
//!     target plus requested feedrate into a movement [`Block`]: step
//!     deltas, nominal speed and rate, per-axis limited acceleration, and a
//!     jerk-bounded junction speed with the previous segment.
//!
//! 2.  **Look-ahead** (`Planner::recalculate`): a reverse pass followed by a
//!     forward pass over the queued blocks, relaxing entry speeds so every
//!     junction respects the per-axis jerk limits and every block can reach
//!     its exit speed under the configured acceleration.
//!
//! 3.  **Trapezoid generation** (`profile`): partitions each block's step
//!     events into accelerate / cruise / decelerate phases and derives the
//!     fixed-point acceleration rate the step timer consumes.
//!
//! 4.  **Execution** (`StepExecutor`): the consumer side of the ring. Claims
//!     the tail block, interleaves per-axis steps Bresenham-style, and
//!     retires the block when its last step event has fired.
//!
//! The block ring is single-producer/single-consumer: the builder publishes a
//! fully initialized block by advancing `head` (release), the executor
//! observes it via `tail` (acquire) and marks it busy while stepping it out.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod block;
pub mod error;
mod math;
pub mod planner;
pub mod profile;
pub mod queue;
pub mod stepper;

// Re-export core types for easier access
pub use block::Block;
pub use error::PlannerError;
pub use planner::{Planner, PlannerConfig};
pub use stepper::StepExecutor;

/// Number of motor axes: X, Y, Z and the extruder.
pub const NUM_AXIS: usize = 4;

pub const X_AXIS: usize = 0;
pub const Y_AXIS: usize = 1;
pub const Z_AXIS: usize = 2;
pub const E_AXIS: usize = 3;

/// Tool slots addressable by `active_extruder`.
pub const EXTRUDERS: usize = 1;

/// Part-cooling fans latched per block.
pub const FAN_COUNT: usize = 1;

/// Ring capacity. Must be a power of two; one slot is kept free to
/// distinguish full from empty, so at most `BLOCK_BUFFER_SIZE - 1` moves are
/// queued at once.
pub const BLOCK_BUFFER_SIZE: usize = 16;

/// Floor for initial/final step rates. Rates below this would overflow the
/// step-timer period register.
pub const MIN_STEP_RATE: u32 = 120;

/// Moves shorter than this many step events are dropped; their residual is
/// absorbed by the next admitted segment.
pub const MIN_STEPS_PER_SEGMENT: u32 = 6;

/// Step timer tick rate (16 MHz / 8). `Block::acceleration_rate` is an 8.24
/// increment per tick of this clock; retune it if the step timer changes.
pub const STEP_TIMER_HZ: u32 = 2_000_000;
