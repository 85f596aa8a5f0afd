//! Columnar accumulation of one frequency's phase steps and its phase errors.

use super::table::{SweepRow, SweepTable};
use crate::error::{AppResult, SweepError};
use crate::instrument::ChannelReading;

/// Column store for the phase steps of one frequency.
///
/// Columns grow together on [`record`](Self::record). The two phase-error
/// columns are derived in one pass by
/// [`compute_phase_errors`](Self::compute_phase_errors) and go stale as soon
/// as another sample is recorded.
#[derive(Debug, Default, Clone)]
pub struct MeasurementAccumulator {
    f_gen: Vec<f64>,
    phi_gen: Vec<f64>,
    f_ch1: Vec<f64>,
    r_ch1: Vec<f64>,
    phi_ch1: Vec<f64>,
    f_ch2: Vec<f64>,
    r_ch2: Vec<f64>,
    phi_ch2: Vec<f64>,
    dt: Vec<f64>,
    phi_delta_abs: Vec<f64>,
    phi_delta_rel: Vec<f64>,
    derived: bool,
}

impl MeasurementAccumulator {
    /// Empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one phase step.
    pub fn record(
        &mut self,
        f_gen: f64,
        phi_gen: f64,
        ch1: ChannelReading,
        ch2: ChannelReading,
        dt_seconds: f64,
    ) {
        self.f_gen.push(f_gen);
        self.phi_gen.push(phi_gen);
        self.f_ch1.push(ch1.frequency);
        self.r_ch1.push(ch1.amplitude);
        self.phi_ch1.push(ch1.phase);
        self.f_ch2.push(ch2.frequency);
        self.r_ch2.push(ch2.amplitude);
        self.phi_ch2.push(ch2.phase);
        self.dt.push(dt_seconds);
        self.derived = false;
    }

    /// Derive `phi_delta_abs` and `phi_delta_rel` for every recorded step.
    ///
    /// The relative error is a percentage of the commanded phase and is 0
    /// where the commanded phase is exactly 0.
    pub fn compute_phase_errors(&mut self) {
        self.phi_delta_abs = self
            .phi_gen
            .iter()
            .zip(&self.phi_ch2)
            .map(|(commanded, measured)| (commanded - measured).abs())
            .collect();
        self.phi_delta_rel = self
            .phi_gen
            .iter()
            .zip(&self.phi_delta_abs)
            .map(|(commanded, abs)| if *commanded == 0.0 { 0.0 } else { abs / commanded * 100.0 })
            .collect();
        self.derived = true;
    }

    /// Number of recorded steps.
    pub fn len(&self) -> usize {
        self.f_gen.len()
    }

    /// True when nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.f_gen.is_empty()
    }

    /// Whether the phase-error columns match the recorded steps.
    pub fn is_derived(&self) -> bool {
        self.derived
    }

    /// Derived absolute errors (empty until derived).
    pub fn phi_delta_abs(&self) -> &[f64] {
        &self.phi_delta_abs
    }

    /// Derived relative errors (empty until derived).
    pub fn phi_delta_rel(&self) -> &[f64] {
        &self.phi_delta_rel
    }

    /// Drop every column.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Render the rows under `key`.
    pub fn to_table(&self, key: &str) -> AppResult<SweepTable> {
        if !self.derived {
            return Err(SweepError::Processing(format!(
                "phase errors for table '{}' were not derived",
                key
            )));
        }
        let rows = (0..self.len())
            .map(|i| SweepRow {
                f_gen: self.f_gen[i],
                phi_gen: self.phi_gen[i],
                f_ch1: self.f_ch1[i],
                r_ch1: self.r_ch1[i],
                phi_ch1: self.phi_ch1[i],
                f_ch2: self.f_ch2[i],
                r_ch2: self.r_ch2[i],
                phi_ch2: self.phi_ch2[i],
                phi_delta_abs: self.phi_delta_abs[i],
                phi_delta_rel: self.phi_delta_rel[i],
                dt: self.dt[i],
            })
            .collect();
        Ok(SweepTable {
            key: key.to_string(),
            rows,
        })
    }
}
