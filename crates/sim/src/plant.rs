//! The physical side of the simulation: heater plants, output pins, and the
//! ADC that reads the plants back through the real calibration tables.

use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::rc::Rc;

use embedded_hal::digital::OutputPin;
use thermal::thermistor::{BED_TABLE, HOTEND_TABLE};
use thermal::{AdcChannel, AdcSource, Celsius, TempTable, Thermistor};

/// First-order heater model: heats at a fixed rate while powered, loses
/// heat toward ambient in proportion to the rise.
#[derive(Debug, Clone)]
pub struct HeaterPlant {
    pub temp_c: f32,
    pub ambient_c: f32,
    /// Heating rate at full power, °C/s.
    pub heat_rate: f32,
    /// Loss coefficient, 1/s.
    pub loss: f32,
}

impl HeaterPlant {
    pub fn new(ambient_c: f32, heat_rate: f32, loss: f32) -> Self {
        Self {
            temp_c: ambient_c,
            ambient_c,
            heat_rate,
            loss,
        }
    }

    fn update(&mut self, dt_s: f32, powered: bool) {
        let heat = if powered { self.heat_rate } else { 0.0 };
        self.temp_c += (heat - (self.temp_c - self.ambient_c) * self.loss) * dt_s;
    }
}

/// The two plants plus the timestamp they were last advanced to.
#[derive(Debug)]
pub struct Plants {
    pub hotend: HeaterPlant,
    pub bed: HeaterPlant,
    last_update_us: u64,
}

/// Heater output pin writing into a shared level cell the plant reads.
#[derive(Clone)]
pub struct SimPin {
    level: Rc<Cell<bool>>,
}

impl SimPin {
    pub fn new() -> Self {
        Self {
            level: Rc::new(Cell::new(false)),
        }
    }

    pub fn level_cell(&self) -> Rc<Cell<bool>> {
        self.level.clone()
    }
}

impl Default for SimPin {
    fn default() -> Self {
        Self::new()
    }
}

impl embedded_hal::digital::ErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.level.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.level.set(true);
        Ok(())
    }
}

/// ADC source backed by the plants. Each read first advances the plants to
/// the current simulated time using the live pin levels, then converts the
/// plant temperature through the inverse calibration table. A sensor
/// override simulates a detached or shorted thermistor: the plant keeps
/// cooking but the ADC reports the override.
pub struct PlantAdc {
    plants: Rc<RefCell<Plants>>,
    clock_us: Rc<Cell<u64>>,
    hotend_pin: Rc<Cell<bool>>,
    bed_pin: Rc<Cell<bool>>,
    hotend_sensor_override: Rc<Cell<Option<f32>>>,
    pending: Option<AdcChannel>,
    hotend_table: TempTable,
    bed_table: TempTable,
}

impl PlantAdc {
    pub fn new(
        hotend: HeaterPlant,
        bed: HeaterPlant,
        clock_us: Rc<Cell<u64>>,
        hotend_pin: Rc<Cell<bool>>,
        bed_pin: Rc<Cell<bool>>,
    ) -> Self {
        Self {
            plants: Rc::new(RefCell::new(Plants {
                hotend,
                bed,
                last_update_us: 0,
            })),
            clock_us,
            hotend_pin,
            bed_pin,
            hotend_sensor_override: Rc::new(Cell::new(None)),
            pending: None,
            hotend_table: TempTable::new(HOTEND_TABLE),
            bed_table: TempTable::new(BED_TABLE),
        }
    }

    /// Shared view of the plants for harness assertions.
    pub fn plants(&self) -> Rc<RefCell<Plants>> {
        self.plants.clone()
    }

    /// Cell that, when set, replaces the hotend sensor reading.
    pub fn hotend_sensor_override(&self) -> Rc<Cell<Option<f32>>> {
        self.hotend_sensor_override.clone()
    }

    fn advance_plants(&mut self) {
        let now = self.clock_us.get();
        let mut plants = self.plants.borrow_mut();
        let dt_s = now.saturating_sub(plants.last_update_us) as f32 / 1_000_000.0;
        if dt_s > 0.0 {
            let hotend_on = self.hotend_pin.get();
            let bed_on = self.bed_pin.get();
            plants.hotend.update(dt_s, hotend_on);
            plants.bed.update(dt_s, bed_on);
            plants.last_update_us = now;
        }
    }
}

impl AdcSource for PlantAdc {
    fn start_conversion(&mut self, channel: AdcChannel) {
        self.pending = Some(channel);
    }

    fn read(&mut self) -> u16 {
        self.advance_plants();
        let plants = self.plants.borrow();
        // Scripted values and plant temperatures are in °C; the tables are
        // in oversampled units, so hand out one sixteenth per conversion.
        match self.pending.take().expect("read without a conversion") {
            AdcChannel::Hotend => {
                let temp = self
                    .hotend_sensor_override
                    .get()
                    .unwrap_or(plants.hotend.temp_c);
                self.hotend_table.raw_for(Celsius::from_num(temp)) / thermal::OVERSAMPLE
            }
            AdcChannel::Bed => {
                self.bed_table.raw_for(Celsius::from_num(plants.bed.temp_c))
                    / thermal::OVERSAMPLE
            }
        }
    }
}

impl Plants {
    pub fn hotend_temp(&self) -> f32 {
        self.hotend.temp_c
    }

    pub fn bed_temp(&self) -> f32 {
        self.bed.temp_c
    }
}
