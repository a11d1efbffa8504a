//! Signal filtering for the temperature pipeline.
//!
//! The controller keeps a running mean of signed temperature deltas as its
//! trend estimator; the filter is generic so tests can run it over plain
//! integers as well.

use num_traits::FromPrimitive;

/// A generic trait for signal filters.
pub trait Filter<T> {
    /// Adds a new sample to the filter.
    fn add_sample(&mut self, sample: T);
    /// Returns the current filtered output value.
    fn output(&self) -> T;
}

/// A moving average over the last `N` samples.
///
/// Until `N` samples have arrived the average runs over what is there, so
/// the output is meaningful from the first sample on.
#[derive(Debug, Clone)]
pub struct MovingAverageFilter<T, const N: usize>
where
    T: FromPrimitive
        + Copy
        + Default
        + core::ops::Add<Output = T>
        + core::ops::Sub<Output = T>
        + core::ops::Div<Output = T>,
{
    samples: [T; N],
    index: usize,
    sum: T,
    count: usize,
}

impl<T, const N: usize> MovingAverageFilter<T, N>
where
    T: FromPrimitive
        + Copy
        + Default
        + core::ops::Add<Output = T>
        + core::ops::Sub<Output = T>
        + core::ops::Div<Output = T>,
{
    pub fn new() -> Self {
        assert!(N > 0, "window size must be greater than zero");
        Self {
            samples: [T::default(); N],
            index: 0,
            sum: T::default(),
            count: 0,
        }
    }

    /// Drops all accumulated samples.
    pub fn reset(&mut self) {
        self.samples = [T::default(); N];
        self.index = 0;
        self.sum = T::default();
        self.count = 0;
    }
}

impl<T, const N: usize> Default for MovingAverageFilter<T, N>
where
    T: FromPrimitive
        + Copy
        + Default
        + core::ops::Add<Output = T>
        + core::ops::Sub<Output = T>
        + core::ops::Div<Output = T>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Filter<T> for MovingAverageFilter<T, N>
where
    T: FromPrimitive
        + Copy
        + Default
        + core::ops::Add<Output = T>
        + core::ops::Sub<Output = T>
        + core::ops::Div<Output = T>,
{
    fn add_sample(&mut self, sample: T) {
        self.sum = self.sum - self.samples[self.index];
        self.sum = self.sum + sample;
        self.samples[self.index] = sample;
        self.index = (self.index + 1) % N;
        if self.count < N {
            self.count += 1;
        }
    }

    fn output(&self) -> T {
        if self.count == 0 {
            T::default()
        } else {
            self.sum / T::from_usize(self.count).unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_over_the_window() {
        let mut filter: MovingAverageFilter<f32, 4> = MovingAverageFilter::new();
        filter.add_sample(10.0);
        filter.add_sample(12.0);
        filter.add_sample(11.0);
        filter.add_sample(13.0);
        assert_eq!(filter.output(), 11.5);
        filter.add_sample(8.0); // 10.0 drops out
        assert_eq!(filter.output(), 11.0);
    }

    #[test]
    fn partial_window_uses_what_it_has() {
        let mut filter: MovingAverageFilter<f32, 8> = MovingAverageFilter::new();
        filter.add_sample(4.0);
        assert_eq!(filter.output(), 4.0);
        filter.add_sample(8.0);
        assert_eq!(filter.output(), 6.0);
    }
}
