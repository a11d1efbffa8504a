//! Tests for the block consumer: Bresenham interleaving, trapezoid pacing,
//! claim/retire protocol, and position recovery after a halt.

use motion::{Planner, PlannerConfig, StepExecutor, E_AXIS, STEP_TIMER_HZ, X_AXIS, Y_AXIS};

const NO_FAN: [u8; motion::FAN_COUNT] = [0; motion::FAN_COUNT];

fn ticks(seconds: f32) -> u64 {
    (seconds * STEP_TIMER_HZ as f32) as u64
}

#[test]
fn executes_a_move_to_exact_step_counts() {
    let mut planner = Planner::new(PlannerConfig::default());
    let mut stepper = StepExecutor::new();

    planner
        .try_buffer_line(&[10.0, 0.0, 0.0, 0.0], 60.0, 0, NO_FAN)
        .unwrap();
    stepper.advance(&planner, ticks(5.0));

    assert_eq!(stepper.position()[X_AXIS], 800);
    assert_eq!(stepper.total_steps(), 800);
    assert!(planner.is_empty());
    assert!(!stepper.is_busy());
}

#[test]
fn trapezoid_pacing_is_neither_instant_nor_stalled() {
    let mut planner = Planner::new(PlannerConfig::default());
    let mut stepper = StepExecutor::new();

    planner
        .try_buffer_line(&[10.0, 0.0, 0.0, 0.0], 60.0, 0, NO_FAN)
        .unwrap();

    // 10 mm at 60 mm/s plus both ramps takes roughly 0.22 s; at 0.1 s the
    // move must be in flight.
    stepper.advance(&planner, ticks(0.1));
    let mid = stepper.position()[X_AXIS];
    assert!(mid > 0, "no steps after 100 ms");
    assert!(mid < 800, "move finished impossibly fast");
    assert!(stepper.is_busy());

    stepper.advance(&planner, ticks(2.0));
    assert_eq!(stepper.position()[X_AXIS], 800);
}

#[test]
fn negative_moves_count_down() {
    let mut planner = Planner::new(PlannerConfig::default());
    let mut stepper = StepExecutor::new();

    planner.set_position_mm(&[10.0, 0.0, 0.0, 0.0]);
    stepper.set_position(planner.position_steps());
    planner
        .try_buffer_line(&[0.0, 0.0, 0.0, 0.0], 60.0, 0, NO_FAN)
        .unwrap();
    stepper.advance(&planner, ticks(5.0));

    assert_eq!(stepper.position()[X_AXIS], 0);
}

#[test]
fn bresenham_interleave_lands_both_axes_exactly() {
    let mut planner = Planner::new(PlannerConfig::default());
    let mut stepper = StepExecutor::new();

    planner
        .try_buffer_line(&[10.0, 5.0, 0.0, 0.0], 60.0, 0, NO_FAN)
        .unwrap();
    stepper.advance(&planner, ticks(5.0));

    assert_eq!(stepper.position()[X_AXIS], 800);
    assert_eq!(stepper.position()[Y_AXIS], 400);
}

#[test]
fn consecutive_blocks_drain_in_order() {
    let mut planner = Planner::new(PlannerConfig::default());
    let mut stepper = StepExecutor::new();

    planner
        .try_buffer_line(&[5.0, 0.0, 0.0, 0.0], 60.0, 0, NO_FAN)
        .unwrap();
    planner
        .try_buffer_line(&[10.0, 0.0, 0.0, 1.0], 60.0, 0, NO_FAN)
        .unwrap();
    stepper.advance(&planner, ticks(5.0));

    assert_eq!(stepper.position()[X_AXIS], 800);
    assert_eq!(stepper.position()[E_AXIS], 100);
    assert!(planner.is_empty());
}

#[test]
fn halt_preserves_position_for_resync() {
    let mut planner = Planner::new(PlannerConfig::default());
    let mut stepper = StepExecutor::new();

    planner
        .try_buffer_line(&[10.0, 0.0, 0.0, 0.0], 60.0, 0, NO_FAN)
        .unwrap();
    stepper.advance(&planner, ticks(0.1));
    let frozen = stepper.position();
    assert!(frozen[X_AXIS] > 0 && frozen[X_AXIS] < 800);

    // Emergency stop: abandon the block, flush the ring, re-sync the
    // planner from the physical counters.
    stepper.halt();
    planner.flush();
    planner.sync_from_steppers(&stepper.position());

    assert!(planner.is_empty());
    assert_eq!(planner.position_steps(), frozen);

    // Motion resumes cleanly from the recovered position.
    planner
        .try_buffer_line(&[0.0, 0.0, 0.0, 0.0], 30.0, 0, NO_FAN)
        .unwrap();
    stepper.advance(&planner, ticks(10.0));
    assert_eq!(stepper.position()[X_AXIS], 0);
}

#[test]
fn fan_duty_is_latched_per_block() {
    let mut planner = Planner::new(PlannerConfig::default());
    let mut stepper = StepExecutor::new();

    planner
        .try_buffer_line(&[5.0, 0.0, 0.0, 0.0], 60.0, 0, [128; motion::FAN_COUNT])
        .unwrap();
    stepper.advance(&planner, ticks(0.01));
    assert_eq!(stepper.fan_speed(), [128; motion::FAN_COUNT]);
}
