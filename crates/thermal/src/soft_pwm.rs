//! Software PWM for heater outputs.
//!
//! Runs from the same periodic timer as the ADC sampler, at a 7-bit window:
//! the duty byte is latched (halved into the window) when the counter wraps,
//! the output goes high for the latched count of ticks and low for the rest.
//! Latching only at the wrap point means a foreground duty update can never
//! shorten a pulse mid-window.

use embedded_hal::digital::OutputPin;

const WINDOW_MASK: u8 = 0x7F;

/// Plain-counter soft PWM across `N` heater outputs.
#[derive(Debug)]
pub struct SoftPwm<P: OutputPin, const N: usize> {
    pins: [P; N],
    latched: [u8; N],
    counter: u8,
}

impl<P: OutputPin, const N: usize> SoftPwm<P, N> {
    pub fn new(pins: [P; N]) -> Self {
        Self {
            pins,
            latched: [0; N],
            counter: 0,
        }
    }

    /// One timer tick. `duty` is the current 0..=255 duty per heater, read
    /// from the controller's published bytes.
    pub fn tick(&mut self, duty: &[u8; N]) -> Result<(), P::Error> {
        if self.counter == 0 {
            for i in 0..N {
                self.latched[i] = duty[i] >> 1;
                if self.latched[i] > 0 {
                    self.pins[i].set_high()?;
                } else {
                    self.pins[i].set_low()?;
                }
            }
        }
        for i in 0..N {
            if self.latched[i] < self.counter {
                self.pins[i].set_low()?;
            }
        }
        self.counter = (self.counter + 1) & WINDOW_MASK;
        Ok(())
    }

    /// Drives every output low immediately, bypassing the window. Used on
    /// fatal errors.
    pub fn force_low(&mut self) -> Result<(), P::Error> {
        for pin in self.pins.iter_mut() {
            pin.set_low()?;
        }
        self.latched = [0; N];
        Ok(())
    }

    pub fn pins(&self) -> &[P; N] {
        &self.pins
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use embedded_hal_mock::eh1::pin::{Mock, State, Transaction};

    /// Pin that remembers its level.
    struct LevelPin {
        level: bool,
    }

    impl embedded_hal::digital::ErrorType for LevelPin {
        type Error = Infallible;
    }

    impl OutputPin for LevelPin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.level = false;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.level = true;
            Ok(())
        }
    }

    #[test]
    fn zero_duty_never_drives_the_output() {
        let mut pwm = SoftPwm::new([LevelPin { level: false }]);
        for _ in 0..4 * (WINDOW_MASK as u32 + 1) {
            pwm.tick(&[0]).unwrap();
            assert!(!pwm.pins()[0].level, "output high with zero duty");
        }
    }

    #[test]
    fn duty_maps_to_on_ticks_in_the_window() {
        let mut pwm = SoftPwm::new([LevelPin { level: false }]);
        let duty = 64u8; // latched as 32: high for counts 0..=32
        let mut high = 0u32;
        for _ in 0..=WINDOW_MASK {
            pwm.tick(&[duty]).unwrap();
            if pwm.pins()[0].level {
                high += 1;
            }
        }
        assert_eq!(high, 33);
    }

    #[test]
    fn full_duty_stays_high_for_the_whole_window() {
        let mut pwm = SoftPwm::new([LevelPin { level: false }]);
        for _ in 0..=WINDOW_MASK {
            pwm.tick(&[255]).unwrap();
            assert!(pwm.pins()[0].level);
        }
    }

    #[test]
    fn pin_transitions_follow_the_latch() {
        // duty 4 latches 2: high at the wrap, low once the counter passes
        // the latch, and no further edges until the next wrap.
        let mut expectations = vec![Transaction::set(State::High)];
        for _ in 3..=WINDOW_MASK {
            expectations.push(Transaction::set(State::Low));
        }
        let pin = Mock::new(&expectations);
        let mut pwm = SoftPwm::new([pin]);
        for _ in 0..=WINDOW_MASK {
            pwm.tick(&[4]).unwrap();
        }
        let [mut pin] = pwm.pins;
        pin.done();
    }
}
