//! Instrument facades used by the sweep.
//!
//! The sweep talks to two devices:
//!
//! - a dual-channel function generator, driven through [`FunctionGenerator`]
//!   over any [`CommandBus`](crate::adapters::CommandBus);
//! - a lock-in amplifier, reached through the [`LockIn`] trait. Settings are
//!   pushed once as a [`ChannelSettings`] batch and demodulator samples are
//!   read one at a time.
//!
//! [`mock`] provides a simulated pair of devices that share the generator's
//! output state, so a full sweep can run without hardware.

pub mod generator;
pub mod mock;
pub mod settings;
pub mod waveform;

pub use generator::FunctionGenerator;
pub use settings::{ChannelSetting, ChannelSettings, NodePath, SettingValue};
pub use waveform::{AmplitudeUnit, OutputChannel, WaveShape, WaveformDescriptor};

use crate::error::AppResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Instantaneous demodulator output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DemodSample {
    /// Demodulation frequency estimated by the device, Hz.
    pub frequency: f64,
    /// In-phase component.
    pub x: f64,
    /// Quadrature component.
    pub y: f64,
}

impl DemodSample {
    /// Magnitude `sqrt(x² + y²)`.
    pub fn amplitude(&self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Phase `atan2(y, x)` in degrees.
    pub fn phase_degrees(&self) -> f64 {
        self.y.atan2(self.x).to_degrees()
    }

    /// Polar form of the sample.
    pub fn reading(&self) -> ChannelReading {
        ChannelReading {
            frequency: self.frequency,
            amplitude: self.amplitude(),
            phase: self.phase_degrees(),
        }
    }
}

/// One lock-in channel in polar form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelReading {
    /// Measured frequency, Hz.
    pub frequency: f64,
    /// Magnitude.
    pub amplitude: f64,
    /// Phase, degrees in (-180, 180].
    pub phase: f64,
}

/// Lock-in amplifier acquisition session.
///
/// Calls block the sweep until the device answers; any failure is an
/// acquisition fault and ends the run.
#[async_trait]
pub trait LockIn: Send {
    /// Apply a batch of node settings.
    async fn apply_settings(&mut self, settings: &ChannelSettings) -> AppResult<()>;

    /// Read one demodulator sample from `path`.
    async fn get_sample(&mut self, path: &NodePath) -> AppResult<DemodSample>;
}

#[async_trait]
impl<L: LockIn + ?Sized> LockIn for Box<L> {
    async fn apply_settings(&mut self, settings: &ChannelSettings) -> AppResult<()> {
        (**self).apply_settings(settings).await
    }

    async fn get_sample(&mut self, path: &NodePath) -> AppResult<DemodSample> {
        (**self).get_sample(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_polar_conversion() {
        let sample = DemodSample {
            frequency: 200.0,
            x: 0.0,
            y: 2.0,
        };
        let reading = sample.reading();
        assert_eq!(reading.frequency, 200.0);
        assert!((reading.amplitude - 2.0).abs() < 1e-12);
        assert!((reading.phase - 90.0).abs() < 1e-12);
    }

    #[test]
    fn test_sample_phase_quadrants() {
        let sample = DemodSample {
            frequency: 1.0,
            x: -1.0,
            y: -1.0,
        };
        assert!((sample.phase_degrees() + 135.0).abs() < 1e-9);
        assert!((sample.amplitude() - 2f64.sqrt()).abs() < 1e-12);
    }
}
