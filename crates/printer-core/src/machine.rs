//! The machine root: planner, step executor, and thermal pipeline under a
//! single owner, driven by the cooperative idle loop.

use core::convert::Infallible;

use embedded_hal::digital::OutputPin;
use motion::{
    Planner, PlannerError, StepExecutor, EXTRUDERS, E_AXIS, FAN_COUNT, NUM_AXIS, STEP_TIMER_HZ,
};
use thermal::{
    AdcSampler, AdcSource, Celsius, HeaterId, SoftPwm, TemperatureController,
};
use tracing::{error, info, warn};

use crate::config::MachineConfig;
use crate::error::{KillReason, MachineError};
use crate::settings::{PreheatPreset, Settings};
use crate::watchdog::Watchdog;

/// Monotonic time source. The single capability that replaces the firmware's
/// free-running millisecond counter; simulations hand the machine a clock
/// that advances as it is polled, hardware hands it a timer register.
pub trait Clock {
    fn now_us(&self) -> u64;
}

/// What became of an admitted move request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Queued,
    /// Queued, but the extrusion component was collapsed (cold or overlong
    /// extrude). The serial layer reports this as an `echo:`.
    QueuedExtrusionClamped,
    /// Too short to produce a block; the residual carries into the next move.
    Dropped,
}

/// ISR cadence for the combined ADC + soft-PWM timer.
const HEATER_TICK_US: u64 = 1000;

const TICKS_PER_US: u64 = (STEP_TIMER_HZ / 1_000_000) as u64;

/// The printer. Owns every subsystem of the core and the capabilities they
/// run on.
pub struct Machine<C: Clock, A: AdcSource, P: OutputPin<Error = Infallible>> {
    clock: C,
    adc: A,
    sampler: AdcSampler,
    pwm: SoftPwm<P, 2>,

    planner: Planner,
    stepper: StepExecutor,
    temperature: TemperatureController,
    watchdog: Watchdog,
    config: MachineConfig,

    fan_speed: [u8; FAN_COUNT],
    feedrate_percentage: i16,
    home_offset: [f32; 3],
    bed_pid: thermal::PidGains,
    preheat: [PreheatPreset; 3],

    running: bool,
    killed: Option<KillReason>,
    steppers_enabled: bool,
    last_motion_ms: u32,
    isr_next_us: u64,
}

impl<C: Clock, A: AdcSource, P: OutputPin<Error = Infallible>> Machine<C, A, P> {
    /// Builds the machine. `heater_pins` are the hotend and bed outputs, in
    /// [`HeaterId`] order.
    pub fn new(clock: C, adc: A, heater_pins: [P; 2], config: MachineConfig) -> Self {
        let defaults = Settings::default();
        Self {
            planner: Planner::new(config.planner.clone()),
            stepper: StepExecutor::new(),
            temperature: TemperatureController::new(config.thermal.clone()),
            watchdog: Watchdog::new(config.watchdog_timeout_ms),
            sampler: AdcSampler::new(),
            pwm: SoftPwm::new(heater_pins),
            clock,
            adc,
            config,
            fan_speed: [0; FAN_COUNT],
            feedrate_percentage: 100,
            home_offset: [0.0; 3],
            bed_pid: defaults.bed_pid,
            preheat: defaults.preheat,
            running: true,
            killed: None,
            steppers_enabled: false,
            last_motion_ms: 0,
            isr_next_us: 0,
        }
    }

    // ------------------------------------------------------------------
    // The idle loop
    // ------------------------------------------------------------------

    /// One pass of the cooperative foreground loop. Safe to call from any
    /// wait: it never blocks.
    pub fn idle(&mut self) {
        let now_us = self.clock.now_us();

        // Catch up the 1 kHz heater timer: ADC state machine plus soft PWM.
        if self.isr_next_us == 0 {
            self.isr_next_us = now_us;
        }
        while self.isr_next_us <= now_us {
            if let Some(pair) = self.sampler.tick(&mut self.adc) {
                self.temperature.exchange().publish(pair);
            }
            let duties = [
                self.temperature.duty(HeaterId::Hotend),
                self.temperature.duty(HeaterId::Bed),
            ];
            let _ = self.pwm.tick(&duties);
            self.isr_next_us += HEATER_TICK_US;
        }

        let now_ms = (now_us / 1000) as u32;
        if self.killed.is_none() {
            if let Err(fault) = self.temperature.manage(now_ms) {
                self.kill(KillReason::Thermal(fault));
            }
        }

        if self.killed.is_none() {
            self.stepper.advance(&self.planner, now_us * TICKS_PER_US);

            self.watchdog.pet(now_ms);
            if self.steppers_enabled
                && self.planner.is_empty()
                && !self.stepper.is_busy()
                && now_ms.wrapping_sub(self.last_motion_ms) > self.config.stepper_inactive_time_ms
            {
                self.steppers_enabled = false;
                info!("steppers released after inactivity");
            }
        }
    }

    /// The heater-manager half of the idle loop on its own, for callers
    /// that drive motion separately.
    pub fn manage_heater_tick(&mut self) {
        let now_ms = (self.clock.now_us() / 1000) as u32;
        if self.killed.is_none() {
            if let Err(fault) = self.temperature.manage(now_ms) {
                self.kill(KillReason::Thermal(fault));
            }
        }
    }

    // ------------------------------------------------------------------
    // Motion
    // ------------------------------------------------------------------

    /// Admits a linear move, blocking on the idle loop while the planner
    /// ring is full. Cold and overlong extrusions are collapsed to zero E
    /// movement rather than refused.
    pub fn enqueue_linear_move(
        &mut self,
        target_mm: [f32; NUM_AXIS],
        feedrate_mm_s: f32,
        extruder: u8,
    ) -> Result<MoveOutcome, MachineError> {
        self.ensure_alive()?;
        if (extruder as usize) >= EXTRUDERS {
            return Err(MachineError::InvalidTool(extruder));
        }

        let mut target = target_mm;
        let mut clamped = false;
        let current_e = self.planner.get_position_mm()[E_AXIS];
        let de = target[E_AXIS] - current_e;
        if de.abs() > f32::EPSILON {
            if self.temperature.too_cold_to_extrude() {
                target[E_AXIS] = current_e;
                clamped = true;
                warn!(hotend = %self.temperature.current_hotend(), "cold extrusion prevented");
            } else if de.abs() > self.config.extrude_max_length_mm {
                target[E_AXIS] = current_e;
                clamped = true;
                warn!(length_mm = de.abs(), "overlong extrusion prevented");
            }
        }

        let fr = feedrate_mm_s * self.feedrate_percentage as f32 * 0.01;
        loop {
            match self
                .planner
                .try_buffer_line(&target, fr, extruder, self.fan_speed)
            {
                Ok(true) => {
                    self.steppers_enabled = true;
                    self.last_motion_ms = (self.clock.now_us() / 1000) as u32;
                    return Ok(if clamped {
                        MoveOutcome::QueuedExtrusionClamped
                    } else {
                        MoveOutcome::Queued
                    });
                }
                Ok(false) => return Ok(MoveOutcome::Dropped),
                Err(PlannerError::BufferFull) => {
                    self.idle();
                    self.ensure_alive()?;
                }
            }
        }
    }

    /// Realigns the logical position after homing; the step counters follow.
    pub fn set_position_mm(&mut self, target_mm: [f32; NUM_AXIS]) {
        self.planner.set_position_mm(&target_mm);
        self.stepper.set_position(self.planner.position_steps());
    }

    /// Single-axis variant of [`Self::set_position_mm`].
    pub fn set_position_mm_axis(&mut self, axis: usize, mm: f32) {
        self.planner.set_position_mm_axis(axis, mm);
        self.stepper.set_position(self.planner.position_steps());
    }

    pub fn get_position_mm(&self) -> [f32; NUM_AXIS] {
        self.planner.get_position_mm()
    }

    // ------------------------------------------------------------------
    // Motion limits (M92/M203/M201/M205-family)
    // ------------------------------------------------------------------

    pub fn set_steps_per_mm(&mut self, axis: usize, value: f32) {
        self.planner.set_steps_per_mm(axis, value);
    }

    pub fn set_max_feedrate(&mut self, axis: usize, mm_s: f32) {
        self.planner.set_max_feedrate(axis, mm_s);
    }

    pub fn set_max_acceleration(&mut self, axis: usize, mm_s2: u32) {
        self.planner.set_max_acceleration(axis, mm_s2);
    }

    pub fn set_max_jerk(&mut self, axis: usize, mm_s: f32) {
        self.planner.set_max_jerk(axis, mm_s);
    }

    pub fn set_acceleration(&mut self, mm_s2: f32) {
        self.planner.set_acceleration(mm_s2);
    }

    pub fn set_retract_acceleration(&mut self, mm_s2: f32) {
        self.planner.set_retract_acceleration(mm_s2);
    }

    pub fn set_travel_acceleration(&mut self, mm_s2: f32) {
        self.planner.set_travel_acceleration(mm_s2);
    }

    pub fn set_min_feedrate(&mut self, mm_s: f32) {
        self.planner.set_min_feedrate(mm_s);
    }

    pub fn set_min_travel_feedrate(&mut self, mm_s: f32) {
        self.planner.set_min_travel_feedrate(mm_s);
    }

    pub fn set_min_segment_time(&mut self, us: u32) {
        self.planner.set_min_segment_time(us);
    }

    // ------------------------------------------------------------------
    // Temperature
    // ------------------------------------------------------------------

    pub fn set_target_hotend(&mut self, target: Celsius) {
        let now_ms = (self.clock.now_us() / 1000) as u32;
        self.temperature.set_target_hotend(target, now_ms);
    }

    pub fn set_target_bed(&mut self, target: Celsius) {
        self.temperature.set_target_bed(target);
    }

    /// M109-style wait: spins the idle loop until the hotend settles at
    /// its target, or until the machine dies trying (the thermal guards
    /// bound the wait).
    pub fn wait_for_hotend(&mut self) -> Result<(), MachineError> {
        if self.temperature.target_hotend() <= Celsius::ZERO {
            return Ok(());
        }
        loop {
            self.ensure_alive()?;
            if self.temperature.hotend_at_target() {
                return Ok(());
            }
            self.idle();
        }
    }

    /// M190-style wait for the bed to reach its target.
    pub fn wait_for_bed(&mut self) -> Result<(), MachineError> {
        let target = self.temperature.target_bed();
        if target <= Celsius::ZERO {
            return Ok(());
        }
        loop {
            self.ensure_alive()?;
            if self.temperature.current_bed() >= target {
                return Ok(());
            }
            self.idle();
        }
    }

    // ------------------------------------------------------------------
    // Peripherals and percentages
    // ------------------------------------------------------------------

    pub fn set_fan_speed(&mut self, fan: usize, duty: u8) {
        self.fan_speed[fan] = duty;
    }

    pub fn set_flow_percentage(&mut self, extruder: usize, percent: i16) {
        self.planner.set_flow_percentage(extruder, percent);
    }

    pub fn set_feedrate_percentage(&mut self, percent: i16) {
        self.feedrate_percentage = percent;
    }

    // ------------------------------------------------------------------
    // Stop paths
    // ------------------------------------------------------------------

    /// M112: heaters off, motion flushed, machine latched off.
    pub fn emergency_stop(&mut self) {
        warn!("emergency stop");
        self.kill(KillReason::EmergencyStop);
    }

    /// The fatal path. Disables the heaters on both sides of the motion
    /// shutdown, recovers the physical position, and latches the machine;
    /// from here only a board reset (the starved watchdog) revives it.
    pub fn kill(&mut self, reason: KillReason) {
        if self.killed.is_some() {
            return;
        }
        error!(?reason, "printer halted");
        self.temperature.disable_all_heaters();
        let _ = self.pwm.force_low();

        self.running = false;
        self.stepper.halt();
        self.planner.flush();
        self.planner.sync_from_steppers(&self.stepper.position());

        self.temperature.disable_all_heaters();
        let _ = self.pwm.force_low();
        self.killed = Some(reason);
    }

    fn ensure_alive(&self) -> Result<(), MachineError> {
        match self.killed {
            Some(reason) => Err(MachineError::Killed(reason)),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    /// Snapshot of everything the settings image persists.
    pub fn settings(&self) -> Settings {
        Settings {
            planner: self.planner.config().clone(),
            home_offset: self.home_offset,
            hotend_pid: self.temperature.config().hotend_gains,
            bed_pid: self.bed_pid,
            min_extrude_temp_c: self.temperature.config().min_extrude_temp.to_num(),
            preheat: self.preheat,
        }
    }

    pub fn apply_settings(&mut self, settings: Settings) {
        self.planner.apply_config(settings.planner);
        self.home_offset = settings.home_offset;
        self.bed_pid = settings.bed_pid;
        self.preheat = settings.preheat;
        self.temperature.set_hotend_gains(settings.hotend_pid);
        self.temperature
            .set_min_extrude_temp(Celsius::from_num(settings.min_extrude_temp_c));
    }

    pub fn save_settings(&self) -> Vec<u8> {
        self.settings().save()
    }

    pub fn load_settings(&mut self, image: &[u8]) -> Result<(), crate::error::SettingsError> {
        let settings = Settings::load(image)?;
        self.apply_settings(settings);
        Ok(())
    }

    // ------------------------------------------------------------------
    // State inspection
    // ------------------------------------------------------------------

    #[inline]
    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    #[inline]
    pub fn stepper(&self) -> &StepExecutor {
        &self.stepper
    }

    #[inline]
    pub fn temperature(&self) -> &TemperatureController {
        &self.temperature
    }

    #[inline]
    pub fn is_killed(&self) -> bool {
        self.killed.is_some()
    }

    #[inline]
    pub fn kill_reason(&self) -> Option<KillReason> {
        self.killed
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running && self.killed.is_none()
    }

    #[inline]
    pub fn steppers_enabled(&self) -> bool {
        self.steppers_enabled
    }

    /// Whether the (unpetted) watchdog would have reset the board by now.
    /// After a kill this is the expected terminal state.
    pub fn watchdog_expired(&self) -> bool {
        let now_ms = (self.clock.now_us() / 1000) as u32;
        self.watchdog.expired(now_ms)
    }
}
