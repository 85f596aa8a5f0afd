//! Frequency/phase iteration space.

use crate::error::{AppResult, SweepError};
use serde::{Deserialize, Serialize};

/// An inclusive, evenly stepped range of setpoints.
///
/// Values are produced as `start + i * step` rather than by repeated
/// addition, so a 0..=180 range with step 1 ends exactly on 180.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepRange {
    /// First setpoint.
    pub start: f64,
    /// Last setpoint (inclusive when it lies on the step lattice).
    pub stop: f64,
    /// Distance between setpoints, must be positive.
    pub step: f64,
}

/// Slack for the last lattice point when `(stop - start) / step` is not integral.
const STEP_EPSILON: f64 = 1e-9;

/// Largest number of setpoints a single range may hold.
pub const MAX_RANGE_POINTS: usize = 1_000_000;

impl SweepRange {
    /// Create and validate a range.
    pub fn new(start: f64, stop: f64, step: f64) -> AppResult<Self> {
        let range = Self { start, stop, step };
        range.validate()?;
        Ok(range)
    }

    /// Check that the range is finite, ascending and has a positive step.
    pub fn validate(&self) -> AppResult<()> {
        if !(self.start.is_finite() && self.stop.is_finite() && self.step.is_finite()) {
            return Err(SweepError::Configuration(format!(
                "Range {:?} contains non-finite values",
                self
            )));
        }
        if self.step <= 0.0 {
            return Err(SweepError::Configuration(format!(
                "Range step must be > 0, got {}",
                self.step
            )));
        }
        if self.start > self.stop {
            return Err(SweepError::Configuration(format!(
                "Range start {} is above stop {}",
                self.start, self.stop
            )));
        }
        if self.point_count().is_none() {
            return Err(SweepError::Configuration(format!(
                "Range {:?} holds more than {} setpoints",
                self, MAX_RANGE_POINTS
            )));
        }
        Ok(())
    }

    fn point_count(&self) -> Option<usize> {
        let steps = ((self.stop - self.start) / self.step + STEP_EPSILON).floor();
        if !steps.is_finite() || steps < 0.0 || steps >= MAX_RANGE_POINTS as f64 {
            return None;
        }
        Some(steps as usize + 1)
    }

    /// Number of setpoints in the range, 0 when the range is invalid.
    pub fn len(&self) -> usize {
        self.point_count().unwrap_or(0)
    }

    /// True only for a range that fails validation.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Setpoints in ascending order.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.len()).map(move |i| self.start + i as f64 * self.step)
    }
}

/// Cartesian iteration space: frequency outer, phase inner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepGrid {
    /// Fundamental frequencies in Hz.
    pub frequencies: SweepRange,
    /// Channel-2 phase offsets in degrees.
    pub phases: SweepRange,
}

impl Default for SweepGrid {
    fn default() -> Self {
        Self {
            frequencies: SweepRange {
                start: 100.0,
                stop: 1000.0,
                step: 10.0,
            },
            phases: SweepRange {
                start: 0.0,
                stop: 180.0,
                step: 1.0,
            },
        }
    }
}

impl SweepGrid {
    /// Build a grid from two validated ranges.
    pub fn new(frequencies: SweepRange, phases: SweepRange) -> AppResult<Self> {
        let grid = Self {
            frequencies,
            phases,
        };
        grid.validate()?;
        Ok(grid)
    }

    /// Both ranges must be valid, every frequency strictly positive and
    /// every frequency must map to its own table key.
    pub fn validate(&self) -> AppResult<()> {
        self.frequencies.validate()?;
        self.phases.validate()?;
        if self.frequencies.start <= 0.0 {
            return Err(SweepError::Configuration(format!(
                "Frequencies must be > 0 Hz, range starts at {}",
                self.frequencies.start
            )));
        }
        // ascending, so colliding keys are neighbours
        let frequencies = self.frequencies();
        if let Some(pair) = frequencies
            .windows(2)
            .find(|pair| frequency_key(pair[0]) == frequency_key(pair[1]))
        {
            return Err(SweepError::Configuration(format!(
                "Frequencies {} and {} share table key '{}'",
                pair[0],
                pair[1],
                frequency_key(pair[0])
            )));
        }
        Ok(())
    }

    /// Frequencies in ascending order.
    pub fn frequencies(&self) -> Vec<f64> {
        self.frequencies.values().collect()
    }

    /// Phases in ascending order.
    pub fn phases(&self) -> Vec<f64> {
        self.phases.values().collect()
    }

    /// Total number of (frequency, phase) points.
    pub fn point_count(&self) -> usize {
        self.frequencies.len().saturating_mul(self.phases.len())
    }
}

/// Table key for a frequency: the truncated integer value.
pub fn frequency_key(frequency: f64) -> String {
    format!("{}", frequency.trunc() as i64)
}
