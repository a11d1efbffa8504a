//! The foreground temperature controller.
//!
//! Consumes raw pairs from the ADC exchange, converts them through the
//! calibration tables, enforces the calibrated min/max window and both
//! safety guards, and computes the duty bytes the soft-PWM driver reads.
//! A returned [`ThermalFault`] is fatal: the machine layer kills the
//! printer and this controller has already zeroed its outputs.

use core::sync::atomic::{AtomicU8, Ordering};

use crate::adc::RawExchange;
use crate::filter::{Filter, MovingAverageFilter};
use crate::heater::HeaterPower;
use crate::pid::{Pid, PidGains};
use crate::safety::{HeaterId, RunawayState, ThermalFault, ThermalRunaway, WatchRise};
use crate::thermistor::{TempTable, Thermistor, BED_TABLE, HOTEND_TABLE};
use crate::Celsius;

/// Temperature limits and guard tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct ThermalConfig {
    /// Calibrated sensor window for the hotend; readings outside it while a
    /// target is set are treated as wiring faults.
    pub hotend_min: Celsius,
    pub hotend_max: Celsius,
    pub bed_min: Celsius,
    pub bed_max: Celsius,
    pub bed_hysteresis: Celsius,
    /// Extrusion below this hotend temperature is refused upstream.
    pub min_extrude_temp: Celsius,
    pub hotend_gains: PidGains,
    pub watch_period_ms: u32,
    pub watch_increase: Celsius,
    pub watch_hysteresis: Celsius,
    pub runaway_period_ms: u32,
    pub runaway_hysteresis: Celsius,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            hotend_min: Celsius::from_num(5),
            hotend_max: Celsius::from_num(275),
            bed_min: Celsius::from_num(5),
            bed_max: Celsius::from_num(120),
            bed_hysteresis: Celsius::from_num(2),
            min_extrude_temp: Celsius::from_num(170),
            hotend_gains: PidGains::default(),
            watch_period_ms: 20_000,
            watch_increase: Celsius::from_num(2),
            watch_hysteresis: Celsius::from_num(3),
            runaway_period_ms: 40_000,
            runaway_hysteresis: Celsius::from_num(4),
        }
    }
}

/// Foreground half of the thermal pipeline. The ISR half is
/// [`crate::adc::AdcSampler`] plus [`crate::soft_pwm::SoftPwm`]; they meet
/// through [`RawExchange`] and the published duty bytes.
#[derive(Debug)]
pub struct TemperatureController {
    config: ThermalConfig,
    hotend_table: TempTable,
    bed_table: TempTable,
    exchange: RawExchange,

    current_hotend: Celsius,
    current_bed: Celsius,
    target_hotend: Celsius,
    target_bed: Celsius,

    hotend_power: HeaterPower,
    bed_engaged: bool,

    /// Running mean of signed per-sample temperature deltas.
    trend: MovingAverageFilter<f32, 8>,
    have_sample: bool,

    watch: WatchRise,
    runaway_hotend: ThermalRunaway,
    runaway_bed: ThermalRunaway,

    /// Published duties, indexed by [`HeaterId`]. Byte-sized stores keep the
    /// ISR reader coherent without locking.
    duty: [AtomicU8; 2],
    last_manage_ms: Option<u32>,
}

impl Default for TemperatureController {
    fn default() -> Self {
        Self::new(ThermalConfig::default())
    }
}

impl TemperatureController {
    pub fn new(config: ThermalConfig) -> Self {
        Self::with_tables(
            config,
            TempTable::new(HOTEND_TABLE),
            TempTable::new(BED_TABLE),
        )
    }

    pub fn with_tables(config: ThermalConfig, hotend_table: TempTable, bed_table: TempTable) -> Self {
        Self {
            hotend_power: HeaterPower::pid(Pid::new(config.hotend_gains)),
            watch: WatchRise::new(
                config.watch_period_ms,
                config.watch_increase,
                config.watch_hysteresis,
            ),
            runaway_hotend: ThermalRunaway::new(
                config.runaway_period_ms,
                config.runaway_hysteresis,
            ),
            runaway_bed: ThermalRunaway::new(config.runaway_period_ms, config.runaway_hysteresis),
            config,
            hotend_table,
            bed_table,
            exchange: RawExchange::new(),
            current_hotend: Celsius::ZERO,
            current_bed: Celsius::ZERO,
            target_hotend: Celsius::ZERO,
            target_bed: Celsius::ZERO,
            bed_engaged: false,
            trend: MovingAverageFilter::new(),
            have_sample: false,
            duty: [AtomicU8::new(0), AtomicU8::new(0)],
            last_manage_ms: None,
        }
    }

    /// Replaces the hotend control law (e.g. bang-bang on boards without
    /// PID tuning).
    pub fn set_hotend_power(&mut self, power: HeaterPower) {
        self.hotend_power = power;
    }

    /// Applies freshly loaded PID gains.
    pub fn set_hotend_gains(&mut self, gains: PidGains) {
        self.config.hotend_gains = gains;
        self.hotend_power = HeaterPower::pid(Pid::new(gains));
    }

    /// Applies a freshly loaded cold-extrude threshold.
    pub fn set_min_extrude_temp(&mut self, temp: Celsius) {
        self.config.min_extrude_temp = temp;
    }

    /// The raw-pair handoff cell the ADC tick publishes into.
    #[inline]
    pub fn exchange(&self) -> &RawExchange {
        &self.exchange
    }

    #[inline]
    pub fn config(&self) -> &ThermalConfig {
        &self.config
    }

    pub fn set_target_hotend(&mut self, target: Celsius, now_ms: u32) {
        self.target_hotend = target;
        if target <= Celsius::ZERO {
            self.hotend_power.reset();
            self.duty[HeaterId::Hotend as usize].store(0, Ordering::Relaxed);
        }
        self.watch.arm(now_ms, self.current_hotend, target);
    }

    pub fn set_target_bed(&mut self, target: Celsius) {
        self.target_bed = target;
        if target <= Celsius::ZERO {
            self.bed_engaged = false;
            self.duty[HeaterId::Bed as usize].store(0, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn current_hotend(&self) -> Celsius {
        self.current_hotend
    }

    #[inline]
    pub fn current_bed(&self) -> Celsius {
        self.current_bed
    }

    #[inline]
    pub fn target_hotend(&self) -> Celsius {
        self.target_hotend
    }

    #[inline]
    pub fn target_bed(&self) -> Celsius {
        self.target_bed
    }

    /// Published duty for the soft-PWM tick.
    #[inline]
    pub fn duty(&self, heater: HeaterId) -> u8 {
        self.duty[heater as usize].load(Ordering::Relaxed)
    }

    /// Mean signed temperature change per published sample, °C.
    #[inline]
    pub fn trend_per_sample(&self) -> f32 {
        self.trend.output()
    }

    /// Cold-extrusion predicate for the admission path.
    #[inline]
    pub fn too_cold_to_extrude(&self) -> bool {
        self.current_hotend < self.config.min_extrude_temp
    }

    /// Hotend within the settling band of its target.
    pub fn hotend_at_target(&self) -> bool {
        self.target_hotend > Celsius::ZERO
            && (self.current_hotend - self.target_hotend).abs() <= self.config.watch_hysteresis
    }

    /// Drops every setpoint and duty. Called on kill and emergency stop.
    pub fn disable_all_heaters(&mut self) {
        self.target_hotend = Celsius::ZERO;
        self.target_bed = Celsius::ZERO;
        self.hotend_power.reset();
        self.bed_engaged = false;
        self.zero_outputs();
    }

    fn zero_outputs(&self) {
        self.duty[0].store(0, Ordering::Relaxed);
        self.duty[1].store(0, Ordering::Relaxed);
    }

    /// The periodic heater manager, called from the machine's idle loop.
    ///
    /// Consumes at most one published raw pair; without one it returns
    /// immediately. A fault return means the outputs are already zeroed and
    /// the machine must halt.
    pub fn manage(&mut self, now_ms: u32) -> Result<(), ThermalFault> {
        let Some(pair) = self.exchange.take() else {
            return Ok(());
        };

        let hotend = self.hotend_table.celsius(pair.hotend);
        let bed = self.bed_table.celsius(pair.bed);

        if self.have_sample {
            self.trend
                .add_sample((hotend - self.current_hotend).to_num::<f32>());
        }
        self.have_sample = true;
        self.current_hotend = hotend;
        self.current_bed = bed;

        let dt_ms = self
            .last_manage_ms
            .map(|t| now_ms.wrapping_sub(t))
            .unwrap_or(64)
            .max(1);
        self.last_manage_ms = Some(now_ms);
        let dt = Celsius::from_num(dt_ms) / Celsius::from_num(1000);

        // Calibrated-range guards. A cold reading with no target set is just
        // a printer at rest, so the guards arm only alongside a setpoint.
        if self.target_hotend > Celsius::ZERO {
            if hotend < self.config.hotend_min {
                self.zero_outputs();
                return Err(ThermalFault::MinTemp(HeaterId::Hotend));
            }
            if hotend > self.config.hotend_max {
                self.zero_outputs();
                return Err(ThermalFault::MaxTemp(HeaterId::Hotend));
            }
        }
        if self.target_bed > Celsius::ZERO {
            if bed < self.config.bed_min {
                self.zero_outputs();
                return Err(ThermalFault::MinTemp(HeaterId::Bed));
            }
            if bed > self.config.bed_max {
                self.zero_outputs();
                return Err(ThermalFault::MaxTemp(HeaterId::Bed));
            }
        }

        if self.runaway_hotend.update(now_ms, hotend, self.target_hotend)
            == RunawayState::Runaway
        {
            self.zero_outputs();
            return Err(ThermalFault::Runaway(HeaterId::Hotend));
        }
        if self.runaway_bed.update(now_ms, bed, self.target_bed) == RunawayState::Runaway {
            self.zero_outputs();
            return Err(ThermalFault::Runaway(HeaterId::Bed));
        }
        if !self.watch.check(now_ms, hotend, self.target_hotend) {
            self.zero_outputs();
            return Err(ThermalFault::HeatingFailed(HeaterId::Hotend));
        }

        let hotend_duty = if self.target_hotend <= Celsius::ZERO {
            self.hotend_power.reset();
            0
        } else if hotend <= self.config.hotend_min || hotend >= self.config.hotend_max {
            0
        } else {
            self.hotend_power
                .compute(hotend, self.target_hotend, dt)
        };
        self.duty[HeaterId::Hotend as usize].store(hotend_duty, Ordering::Relaxed);

        let bed_duty = if self.target_bed <= Celsius::ZERO {
            self.bed_engaged = false;
            0
        } else if bed < self.config.bed_min || bed > self.config.bed_max {
            self.bed_engaged = false;
            0
        } else {
            if bed < self.target_bed - self.config.bed_hysteresis {
                self.bed_engaged = true;
            } else if bed > self.target_bed + self.config.bed_hysteresis {
                self.bed_engaged = false;
            }
            if self.bed_engaged {
                255
            } else {
                0
            }
        };
        self.duty[HeaterId::Bed as usize].store(bed_duty, Ordering::Relaxed);

        Ok(())
    }
}
