//! Controller-level behavior: duty rules, calibrated-range gating, the two
//! safety guards, and the cold-extrude predicate.

use thermal::{
    celsius, Celsius, HeaterId, RawPair, TempTable, TemperatureController, ThermalConfig,
    ThermalFault, Thermistor,
};

fn pair(hotend_c: f32, bed_c: f32) -> RawPair {
    let hotend = TempTable::new(thermal::thermistor::HOTEND_TABLE);
    let bed = TempTable::new(thermal::thermistor::BED_TABLE);
    RawPair {
        hotend: hotend.raw_for(Celsius::from_num(hotend_c)),
        bed: bed.raw_for(Celsius::from_num(bed_c)),
    }
}

fn feed(controller: &mut TemperatureController, now_ms: u32, hotend_c: f32, bed_c: f32)
    -> Result<(), ThermalFault>
{
    controller.exchange().publish(pair(hotend_c, bed_c));
    controller.manage(now_ms)
}

#[test]
fn zero_target_means_zero_duty_always() {
    let mut tc = TemperatureController::default();
    // Even a hot reading produces no power while no target is set.
    feed(&mut tc, 0, 240.0, 80.0).unwrap();
    assert_eq!(tc.duty(HeaterId::Hotend), 0);
    assert_eq!(tc.duty(HeaterId::Bed), 0);
}

#[test]
fn cold_hotend_with_target_heats_at_full_power() {
    let mut tc = TemperatureController::default();
    feed(&mut tc, 0, 25.0, 25.0).unwrap();
    tc.set_target_hotend(celsius(210), 0);
    feed(&mut tc, 64, 25.0, 25.0).unwrap();
    // 185 °C below target is far outside the proportional band.
    assert_eq!(tc.duty(HeaterId::Hotend), 255);
}

#[test]
fn out_of_range_reading_is_fatal_only_with_a_target() {
    let mut tc = TemperatureController::default();
    // 300 °C reading, no target: not an error, no power.
    feed(&mut tc, 0, 300.0, 25.0).unwrap();
    assert_eq!(tc.duty(HeaterId::Hotend), 0);

    tc.set_target_hotend(celsius(210), 0);
    assert_eq!(
        feed(&mut tc, 64, 300.0, 25.0),
        Err(ThermalFault::MaxTemp(HeaterId::Hotend))
    );
    assert_eq!(tc.duty(HeaterId::Hotend), 0);
}

#[test]
fn sensor_shorted_low_is_fatal_with_a_target() {
    let mut tc = TemperatureController::default();
    feed(&mut tc, 0, 25.0, 25.0).unwrap();
    tc.set_target_hotend(celsius(210), 0);
    assert_eq!(
        feed(&mut tc, 64, 0.0, 25.0),
        Err(ThermalFault::MinTemp(HeaterId::Hotend))
    );
}

#[test]
fn watch_rise_failure_is_fatal() {
    let mut tc = TemperatureController::default();
    feed(&mut tc, 0, 25.0, 25.0).unwrap();
    tc.set_target_hotend(celsius(200), 0);

    // Temperature never moves. Before the watch period: still fine.
    assert!(feed(&mut tc, 10_000, 25.2, 25.0).is_ok());
    // Past the watch period with a rise under 2 °C: heating failed.
    assert_eq!(
        feed(&mut tc, 20_100, 25.4, 25.0),
        Err(ThermalFault::HeatingFailed(HeaterId::Hotend))
    );
    assert_eq!(tc.duty(HeaterId::Hotend), 0);
}

#[test]
fn thermal_runaway_trips_after_stable_drift() {
    let mut tc = TemperatureController::default();
    feed(&mut tc, 0, 25.0, 25.0).unwrap();
    tc.set_target_hotend(celsius(200), 0);

    // Heats promptly and reaches the target: watch satisfied, runaway
    // machine goes Stable.
    feed(&mut tc, 5_000, 120.0, 25.0).unwrap();
    feed(&mut tc, 10_000, 200.5, 25.0).unwrap();

    // Sensor detaches: reads 180 °C while the heater cooks. Inside the
    // protection period nothing trips yet.
    feed(&mut tc, 20_000, 180.0, 25.0).unwrap();
    // 40 s later, still below target - hysteresis: runaway.
    assert_eq!(
        feed(&mut tc, 61_000, 180.0, 25.0),
        Err(ThermalFault::Runaway(HeaterId::Hotend))
    );
    assert_eq!(tc.duty(HeaterId::Hotend), 0);
    assert_eq!(tc.duty(HeaterId::Bed), 0);
}

#[test]
fn bed_bang_bang_with_hysteresis() {
    let mut tc = TemperatureController::default();
    tc.set_target_bed(celsius(60));
    feed(&mut tc, 0, 25.0, 50.0).unwrap();
    assert_eq!(tc.duty(HeaterId::Bed), 255);
    // Inside the band while rising: stays on.
    feed(&mut tc, 64, 25.0, 59.0).unwrap();
    assert_eq!(tc.duty(HeaterId::Bed), 255);
    // Above the band: off.
    feed(&mut tc, 128, 25.0, 63.0).unwrap();
    assert_eq!(tc.duty(HeaterId::Bed), 0);
}

#[test]
fn bed_outside_calibrated_window_is_forced_off() {
    let mut tc = TemperatureController::default();
    tc.set_target_bed(celsius(60));
    assert_eq!(
        feed(&mut tc, 0, 25.0, 150.0),
        Err(ThermalFault::MaxTemp(HeaterId::Bed))
    );
    assert_eq!(tc.duty(HeaterId::Bed), 0);
}

#[test]
fn cold_extrude_predicate_follows_min_extrude_temp() {
    let mut tc = TemperatureController::default();
    feed(&mut tc, 0, 25.0, 25.0).unwrap();
    assert!(tc.too_cold_to_extrude());
    feed(&mut tc, 64, 180.0, 25.0).unwrap();
    assert!(!tc.too_cold_to_extrude());
    assert!(!tc.hotend_at_target()); // no target set
}

#[test]
fn trend_tracks_the_sign_of_temperature_motion() {
    let mut tc = TemperatureController::default();
    for (i, temp) in [25.0f32, 30.0, 36.0, 41.0, 47.0].iter().enumerate() {
        feed(&mut tc, i as u32 * 64, *temp, 25.0).unwrap();
    }
    assert!(tc.trend_per_sample() > 0.0);
    for (i, temp) in [45.0f32, 43.0, 41.0, 39.0, 37.0, 35.0, 33.0, 31.0, 29.0]
        .iter()
        .enumerate()
    {
        feed(&mut tc, 1000 + i as u32 * 64, *temp, 25.0).unwrap();
    }
    assert!(tc.trend_per_sample() < 0.0);
}

#[test]
fn disable_all_heaters_drops_targets_and_duties() {
    let mut tc = TemperatureController::default();
    feed(&mut tc, 0, 25.0, 25.0).unwrap();
    tc.set_target_hotend(celsius(210), 0);
    tc.set_target_bed(celsius(60));
    feed(&mut tc, 64, 25.0, 25.0).unwrap();
    assert_eq!(tc.duty(HeaterId::Hotend), 255);
    assert_eq!(tc.duty(HeaterId::Bed), 255);

    tc.disable_all_heaters();
    assert_eq!(tc.target_hotend(), Celsius::ZERO);
    assert_eq!(tc.target_bed(), Celsius::ZERO);
    assert_eq!(tc.duty(HeaterId::Hotend), 0);
    assert_eq!(tc.duty(HeaterId::Bed), 0);
}

#[test]
fn config_reflects_overrides() {
    let mut config = ThermalConfig::default();
    config.min_extrude_temp = celsius(160);
    let mut tc = TemperatureController::new(config);
    feed(&mut tc, 0, 165.0, 25.0).unwrap();
    assert!(!tc.too_cold_to_extrude());
}
