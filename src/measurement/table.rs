//! Rendered per-frequency result table.

use serde::{Deserialize, Serialize};

/// Column headers in output order.
pub const COLUMNS: [&str; 11] = [
    "f_gen",
    "Phi_gen",
    "f_ch1",
    "R_ch1",
    "Phi_ch1",
    "f_ch2",
    "R_ch2",
    "Phi_ch2",
    "phi_delta_abs",
    "phi_delta_rel",
    "dt",
];

/// One phase step of a frequency sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepRow {
    /// Commanded fundamental frequency, Hz.
    pub f_gen: f64,
    /// Commanded channel-2 phase, degrees.
    #[serde(rename = "Phi_gen")]
    pub phi_gen: f64,
    /// Frequency measured on channel 1.
    pub f_ch1: f64,
    /// Magnitude on channel 1.
    #[serde(rename = "R_ch1")]
    pub r_ch1: f64,
    /// Phase on channel 1, degrees.
    #[serde(rename = "Phi_ch1")]
    pub phi_ch1: f64,
    /// Frequency measured on channel 2.
    pub f_ch2: f64,
    /// Magnitude on channel 2.
    #[serde(rename = "R_ch2")]
    pub r_ch2: f64,
    /// Phase on channel 2, degrees.
    #[serde(rename = "Phi_ch2")]
    pub phi_ch2: f64,
    /// `|phi_gen - phi_ch2|`.
    pub phi_delta_abs: f64,
    /// `phi_delta_abs / phi_gen * 100`, 0 at zero phase.
    pub phi_delta_rel: f64,
    /// Seconds from setpoint start to the recorded sample.
    pub dt: f64,
}

impl SweepRow {
    /// Values in [`COLUMNS`] order.
    pub fn values(&self) -> [f64; 11] {
        [
            self.f_gen,
            self.phi_gen,
            self.f_ch1,
            self.r_ch1,
            self.phi_ch1,
            self.f_ch2,
            self.r_ch2,
            self.phi_ch2,
            self.phi_delta_abs,
            self.phi_delta_rel,
            self.dt,
        ]
    }
}

/// Rows of one frequency, keyed by the integer frequency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepTable {
    /// Table key, e.g. `"110"`.
    pub key: String,
    /// Rows in measurement order.
    pub rows: Vec<SweepRow>,
}

impl SweepTable {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when no rows were recorded.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// One column by header name.
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let index = COLUMNS.iter().position(|c| *c == name)?;
        Some(self.rows.iter().map(|row| row.values()[index]).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(phi_gen: f64) -> SweepRow {
        SweepRow {
            f_gen: 100.0,
            phi_gen,
            f_ch1: 100.0,
            r_ch1: 1.0,
            phi_ch1: 0.0,
            f_ch2: 200.0,
            r_ch2: 1.0,
            phi_ch2: phi_gen,
            phi_delta_abs: 0.0,
            phi_delta_rel: 0.0,
            dt: 2.0,
        }
    }

    #[test]
    fn test_column_lookup() {
        let table = SweepTable {
            key: "100".to_string(),
            rows: vec![row(0.0), row(45.0)],
        };
        assert_eq!(table.column("Phi_gen"), Some(vec![0.0, 45.0]));
        assert_eq!(table.column("f_ch2"), Some(vec![200.0, 200.0]));
        assert_eq!(table.column("nope"), None);
    }

    #[test]
    fn test_serde_headers_match_columns() {
        let json = serde_json::to_value(row(1.0)).unwrap();
        let object = json.as_object().unwrap();
        for name in COLUMNS {
            assert!(object.contains_key(name), "missing {name}");
        }
        assert_eq!(object.len(), COLUMNS.len());
    }
}
