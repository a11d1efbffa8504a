//! End-to-end scenarios against the simulated printer: a heated print,
//! thermal runaway, emergency stop, bed regulation, and queue saturation.

use motion::{E_AXIS, X_AXIS, Y_AXIS};
use printer_core::{KillReason, MachineError, MoveOutcome};
use sim::harness::init_logging;
use sim::Printer;
use thermal::{celsius, HeaterId, ThermalFault};

/// Runs until the hotend settles at its target, bounded so a broken
/// controller fails the test instead of hanging it.
fn heat_hotend(printer: &mut Printer, target_c: i32) {
    printer.machine.set_target_hotend(celsius(target_c));
    let deadline = printer.now_ms() + 400_000;
    while !printer.machine.temperature().hotend_at_target() {
        assert!(
            printer.now_ms() < deadline,
            "hotend never settled: {} °C after 400 s",
            printer.hotend_temp()
        );
        assert!(!printer.machine.is_killed(), "killed while heating");
        printer.run_ms(100);
    }
}

#[test]
fn heated_square_print_lands_on_exact_steps() {
    init_logging();
    let mut printer = Printer::new();
    heat_hotend(&mut printer, 200);

    // One perimeter of a 50 mm square with a little extrusion per edge.
    let corners = [
        ([50.0, 0.0, 0.0, 2.0], 50.0),
        ([50.0, 50.0, 0.0, 4.0], 50.0),
        ([0.0, 50.0, 0.0, 6.0], 50.0),
        ([0.0, 0.0, 0.0, 8.0], 50.0),
    ];
    for (target, feedrate) in corners {
        let outcome = printer
            .machine
            .enqueue_linear_move(target, feedrate, 0)
            .unwrap();
        assert_eq!(outcome, MoveOutcome::Queued);
    }
    printer.run_until_motion_done();

    let position = printer.machine.stepper().position();
    assert_eq!(position[X_AXIS], 0);
    assert_eq!(position[Y_AXIS], 0);
    assert_eq!(position[E_AXIS], 800); // 8 mm at 100 steps/mm
    assert_eq!(
        printer.machine.planner().position_steps(),
        printer.machine.stepper().position()
    );
    assert!(!printer.trace().is_empty());
}

#[test]
fn detached_sensor_triggers_runaway_and_starves_the_watchdog() {
    init_logging();
    let mut printer = Printer::new();
    heat_hotend(&mut printer, 200);

    // The sensor falls off the block and keeps reading 180 °C while the
    // heater drives the plant ever hotter.
    printer.detach_hotend_sensor(180.0);
    printer.run_ms(45_000);

    assert!(printer.machine.is_killed());
    assert_eq!(
        printer.machine.kill_reason(),
        Some(KillReason::Thermal(ThermalFault::Runaway(HeaterId::Hotend)))
    );
    assert_eq!(printer.machine.temperature().duty(HeaterId::Hotend), 0);
    assert_eq!(printer.machine.temperature().duty(HeaterId::Bed), 0);
    assert!(!printer.hotend_pin_high());
    assert!(!printer.bed_pin_high());
    assert!(printer.machine.planner().is_empty());

    // The kill path stops petting the watchdog: the board resets itself.
    printer.run_ms(5_000);
    assert!(printer.machine.watchdog_expired());
}

#[test]
fn emergency_stop_halts_motion_and_refuses_new_work() {
    init_logging();
    let mut printer = Printer::new();
    for i in 1..=10 {
        printer
            .machine
            .enqueue_linear_move([i as f32 * 20.0, 0.0, 0.0, 0.0], 80.0, 0)
            .unwrap();
    }
    printer.run_ms(300);
    let moved = printer.machine.stepper().position()[X_AXIS];
    assert!(moved > 0);

    printer.machine.emergency_stop();
    assert!(printer.machine.is_killed());
    assert!(printer.machine.planner().is_empty());
    assert_eq!(
        printer.machine.planner().position_steps(),
        printer.machine.stepper().position()
    );
    assert!(!printer.hotend_pin_high());
    assert_eq!(
        printer
            .machine
            .enqueue_linear_move([1.0, 0.0, 0.0, 0.0], 30.0, 0),
        Err(MachineError::Killed(KillReason::EmergencyStop))
    );
}

#[test]
fn bed_bang_bang_holds_the_setpoint() {
    init_logging();
    let mut printer = Printer::new();
    printer.machine.set_target_bed(celsius(60));
    printer.machine.wait_for_bed().unwrap();
    assert!(printer.bed_temp() >= 59.5);
    printer.run_ms(120_000);
    assert!(!printer.machine.is_killed());

    // Held within the hysteresis band around 60 °C.
    assert!(
        (printer.bed_temp() - 60.0).abs() <= 3.0,
        "bed at {} °C",
        printer.bed_temp()
    );
    // The trace shows the heater actually cycling during the hold.
    let hold = printer
        .trace()
        .iter()
        .filter(|e| e.t_ms > 150_000)
        .collect::<Vec<_>>();
    assert!(hold.iter().any(|e| e.bed_duty == 255));
    assert!(hold.iter().any(|e| e.bed_duty == 0));
}

#[test]
fn queue_saturation_blocks_but_loses_nothing() {
    init_logging();
    let mut printer = Printer::new();
    for i in 1..=30 {
        printer
            .machine
            .enqueue_linear_move([i as f32 * 2.0, 0.0, 0.0, 0.0], 30.0, 0)
            .unwrap();
        assert!(printer.machine.planner().moves_planned() <= motion::BLOCK_BUFFER_SIZE - 1);
    }
    printer.run_until_motion_done();
    assert_eq!(printer.machine.stepper().position()[X_AXIS], 60 * 80);
}

#[test]
fn trace_dump_round_trips_as_json() {
    init_logging();
    let mut printer = Printer::new();
    printer
        .machine
        .enqueue_linear_move([5.0, 0.0, 0.0, 0.0], 60.0, 0)
        .unwrap();
    printer.run_until_motion_done();

    let path = std::env::temp_dir().join("printer_sim_trace.json");
    printer.dump_trace(&path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    let entries: Vec<sim::TraceEntry> = serde_json::from_str(&text).unwrap();
    assert_eq!(entries.len(), printer.trace().len());
    std::fs::remove_file(&path).ok();
}
