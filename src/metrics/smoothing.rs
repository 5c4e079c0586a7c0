//! Power smoothing, filtering and normalized power.

use std::collections::VecDeque;

/// Rolling mean over a fixed number of samples.
#[derive(Debug)]
pub struct RollingAverage {
    buffer: VecDeque<f64>,
    window_size: usize,
    sum: f64,
}

impl RollingAverage {
    /// Create a new rolling average with the given window size.
    pub fn new(window_size: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(window_size),
            window_size: window_size.max(1),
            sum: 0.0,
        }
    }

    /// 30-sample window used by normalized power at 1 Hz.
    pub fn thirty_second() -> Self {
        Self::new(30)
    }

    /// Add a new value and return the current average.
    pub fn add(&mut self, value: f64) -> f64 {
        self.buffer.push_back(value);
        self.sum += value;

        if self.buffer.len() > self.window_size {
            if let Some(old) = self.buffer.pop_front() {
                self.sum -= old;
            }
        }

        self.sum / self.buffer.len() as f64
    }

    /// Whether the window holds enough samples for a full average.
    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.window_size
    }
}

/// Rejects power values outside plausible bounds.
#[derive(Debug, Clone, Copy)]
pub struct PowerFilter {
    max_power: f64,
}

impl PowerFilter {
    /// Default max power is 2000 W; anything above is sensor noise.
    pub fn new() -> Self {
        Self { max_power: 2000.0 }
    }

    /// Create a power filter with custom max power.
    pub fn with_max_power(max_power: f64) -> Self {
        Self { max_power }
    }

    /// `None` if the value should be discarded.
    pub fn filter(&self, power: f64) -> Option<f64> {
        (power.is_finite() && (0.0..=self.max_power).contains(&power)).then_some(power)
    }
}

impl Default for PowerFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalized Power calculation.
///
/// NP = 4th root of the mean of (30-second rolling average power)^4, over
/// a 1 Hz series. Samples before the first full window are not counted.
#[derive(Debug)]
pub struct NormalizedPowerCalculator {
    rolling_avg: RollingAverage,
    sum_fourth_power: f64,
    count: u64,
}

impl NormalizedPowerCalculator {
    /// Create a new Normalized Power calculator.
    pub fn new() -> Self {
        Self {
            rolling_avg: RollingAverage::thirty_second(),
            sum_fourth_power: 0.0,
            count: 0,
        }
    }

    /// Add a 1 Hz power sample.
    pub fn add(&mut self, power: f64) {
        let avg = self.rolling_avg.add(power);
        if self.rolling_avg.is_full() {
            self.sum_fourth_power += avg.powi(4);
            self.count += 1;
        }
    }

    /// Current Normalized Power, if a full window has been seen.
    pub fn normalized_power(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some((self.sum_fourth_power / self.count as f64).powf(0.25))
    }
}

impl Default for NormalizedPowerCalculator {
    fn default() -> Self {
        Self::new()
    }
}

/// Resample irregular `(seconds, value)` samples onto a 1 Hz grid by
/// holding the last value. Seconds before the first sample read as zero.
pub fn resample_per_second(timestamps: &[f64], values: &[f64], duration_s: f64) -> Vec<f64> {
    let seconds = duration_s.max(0.0).floor() as usize;
    let mut series = Vec::with_capacity(seconds);
    let mut next = 0usize;
    let mut current = 0.0;

    for second in 0..seconds {
        let t = second as f64;
        while next < timestamps.len().min(values.len()) && timestamps[next] <= t {
            current = values[next];
            next += 1;
        }
        series.push(current);
    }
    series
}

/// Normalized power over a 1 Hz series.
pub fn normalized_power(series: &[f64]) -> Option<f64> {
    let mut calculator = NormalizedPowerCalculator::new();
    for power in series {
        calculator.add(*power);
    }
    calculator.normalized_power()
}
