//! Hardware settling times kept as data.
//!
//! The lock-in demodulator has to average over several signal periods before a
//! reading is stable, so low frequencies need a longer wait than high ones.

use crate::error::{AppResult, SweepError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settling wait before sampling, split into two frequency bands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlePolicy {
    /// Frequencies strictly below this use the low-band wait.
    pub threshold_hz: f64,
    /// Wait below the threshold.
    #[serde(with = "humantime_serde")]
    pub low_band: Duration,
    /// Wait at or above the threshold.
    #[serde(with = "humantime_serde")]
    pub high_band: Duration,
}

impl Default for SettlePolicy {
    fn default() -> Self {
        Self {
            threshold_hz: 300.0,
            low_band: Duration::from_secs(4),
            high_band: Duration::from_secs(2),
        }
    }
}

impl SettlePolicy {
    /// Wait to apply before sampling at `frequency`.
    pub fn settle_for(&self, frequency: f64) -> Duration {
        if frequency < self.threshold_hz {
            self.low_band
        } else {
            self.high_band
        }
    }

    /// The low band must wait strictly longer than the high band.
    pub fn validate(&self) -> AppResult<()> {
        if !(self.threshold_hz.is_finite() && self.threshold_hz > 0.0) {
            return Err(SweepError::Configuration(format!(
                "Settle threshold must be a positive frequency, got {}",
                self.threshold_hz
            )));
        }
        if self.low_band <= self.high_band {
            return Err(SweepError::Configuration(format!(
                "Low-band settle ({:?}) must exceed high-band settle ({:?})",
                self.low_band, self.high_band
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_low_band_waits_longer() {
        let policy = SettlePolicy::default();
        assert_eq!(policy.settle_for(100.0), Duration::from_secs(4));
        assert_eq!(policy.settle_for(299.9), Duration::from_secs(4));
        assert_eq!(policy.settle_for(300.0), Duration::from_secs(2));
        assert_eq!(policy.settle_for(1000.0), Duration::from_secs(2));
        assert!(policy.settle_for(290.0) > policy.settle_for(300.0));
    }

    #[test]
    fn test_inverted_bands_rejected() {
        let policy = SettlePolicy {
            threshold_hz: 300.0,
            low_band: Duration::from_secs(2),
            high_band: Duration::from_secs(2),
        };
        assert!(policy.validate().is_err());
        assert!(SettlePolicy::default().validate().is_ok());
    }
}
