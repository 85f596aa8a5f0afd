//! Output-channel waveform descriptors and their generator command sequence.

use crate::error::{AppResult, SweepError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Generator output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum OutputChannel {
    /// Fundamental output.
    Ch1,
    /// Harmonic output.
    Ch2,
}

impl OutputChannel {
    /// Command suffix addressing this channel; channel 1 is the default target.
    pub fn suffix(self) -> &'static str {
        match self {
            OutputChannel::Ch1 => "",
            OutputChannel::Ch2 => ":CH2",
        }
    }
}

impl TryFrom<u8> for OutputChannel {
    type Error = SweepError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(OutputChannel::Ch1),
            2 => Ok(OutputChannel::Ch2),
            other => Err(SweepError::Configuration(format!(
                "Output channel must be 1 or 2, got {other}"
            ))),
        }
    }
}

impl From<OutputChannel> for u8 {
    fn from(channel: OutputChannel) -> Self {
        match channel {
            OutputChannel::Ch1 => 1,
            OutputChannel::Ch2 => 2,
        }
    }
}

/// Function shape understood by `APPL:<shape>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WaveShape {
    /// Sine.
    Sin,
    /// Square.
    Squ,
    /// Ramp.
    Ramp,
    /// Pulse.
    Puls,
    /// Noise.
    Nois,
    /// DC level.
    Dc,
}

impl fmt::Display for WaveShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = match self {
            WaveShape::Sin => "SIN",
            WaveShape::Squ => "SQU",
            WaveShape::Ramp => "RAMP",
            WaveShape::Puls => "PULS",
            WaveShape::Nois => "NOIS",
            WaveShape::Dc => "DC",
        };
        f.write_str(keyword)
    }
}

/// Amplitude unit selected with `VOLT:UNIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AmplitudeUnit {
    /// Peak-to-peak volts.
    Vpp,
    /// RMS volts.
    Vrms,
    /// dBm into 50 Ω.
    Dbm,
}

impl fmt::Display for AmplitudeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = match self {
            AmplitudeUnit::Vpp => "VPP",
            AmplitudeUnit::Vrms => "VRMS",
            AmplitudeUnit::Dbm => "DBM",
        };
        f.write_str(keyword)
    }
}

/// Immutable description of one output channel's waveform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveformDescriptor {
    /// Function shape.
    pub shape: WaveShape,
    /// Frequency in Hz.
    pub frequency: f64,
    /// Amplitude value, interpreted in `unit`.
    pub amplitude: f64,
    /// Amplitude unit.
    pub unit: AmplitudeUnit,
    /// DC offset in volts.
    pub offset: f64,
    /// Phase in degrees.
    pub phase: f64,
    /// Target output.
    pub channel: OutputChannel,
}

impl WaveformDescriptor {
    /// Sine on `channel` with zero offset and zero phase.
    pub fn sine(channel: OutputChannel, frequency: f64, amplitude_vpp: f64) -> AppResult<Self> {
        let waveform = Self {
            shape: WaveShape::Sin,
            frequency,
            amplitude: amplitude_vpp,
            unit: AmplitudeUnit::Vpp,
            offset: 0.0,
            phase: 0.0,
            channel,
        };
        waveform.validate()?;
        Ok(waveform)
    }

    /// Default channel pair: 1 kHz fundamental and its 2 kHz harmonic, 2 Vpp each.
    pub fn default_pair() -> [Self; 2] {
        [
            Self {
                shape: WaveShape::Sin,
                frequency: 1000.0,
                amplitude: 2.0,
                unit: AmplitudeUnit::Vpp,
                offset: 0.0,
                phase: 0.0,
                channel: OutputChannel::Ch1,
            },
            Self {
                shape: WaveShape::Sin,
                frequency: 2000.0,
                amplitude: 2.0,
                unit: AmplitudeUnit::Vpp,
                offset: 0.0,
                phase: 0.0,
                channel: OutputChannel::Ch2,
            },
        ]
    }

    /// Frequency must be positive and every numeric field finite.
    pub fn validate(&self) -> AppResult<()> {
        if !(self.frequency.is_finite() && self.frequency > 0.0) {
            return Err(SweepError::Configuration(format!(
                "Waveform frequency must be > 0 Hz, got {}",
                self.frequency
            )));
        }
        if !(self.amplitude.is_finite() && self.offset.is_finite() && self.phase.is_finite()) {
            return Err(SweepError::Configuration(format!(
                "Waveform on channel {} has non-finite amplitude, offset or phase",
                u8::from(self.channel)
            )));
        }
        Ok(())
    }

    /// Command sequence that programs this waveform and enables the output.
    pub fn setup_commands(&self) -> Vec<String> {
        let ch = self.channel.suffix();
        vec![
            format!(
                "APPL:{}{} {:.6},{:.6},{:.6}",
                self.shape, ch, self.frequency, self.amplitude, self.offset
            ),
            format!("VOLT:UNIT{} {}", ch, self.unit),
            format!("PHAS{} {:.6}", ch, self.phase),
            format!("OUTP{} ON", ch),
            "PHAS:ALIGN".to_string(),
        ]
    }
}

/// Commands that retune both outputs for one sweep point.
///
/// Channel 2 always runs at twice the fundamental, with the swept phase.
pub fn harmonic_setpoint_commands(frequency: f64, phase: f64) -> Vec<String> {
    vec![
        format!("APPL:SIN {:.6}", frequency),
        "PHAS 0".to_string(),
        format!("APPL:SIN:CH2 {:.6}", frequency * 2.0),
        format!("PHAS:CH2 {:.6}", phase),
        "PHAS:ALIGN".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_one_commands_have_no_suffix() {
        let [w1, _] = WaveformDescriptor::default_pair();
        assert_eq!(
            w1.setup_commands(),
            vec![
                "APPL:SIN 1000.000000,2.000000,0.000000",
                "VOLT:UNIT VPP",
                "PHAS 0.000000",
                "OUTP ON",
                "PHAS:ALIGN",
            ]
        );
    }

    #[test]
    fn test_channel_two_commands_use_suffix() {
        let [_, w2] = WaveformDescriptor::default_pair();
        let commands = w2.setup_commands();
        assert_eq!(commands[0], "APPL:SIN:CH2 2000.000000,2.000000,0.000000");
        assert_eq!(commands[1], "VOLT:UNIT:CH2 VPP");
        assert_eq!(commands[3], "OUTP:CH2 ON");
        assert_eq!(commands[4], "PHAS:ALIGN");
    }

    #[test]
    fn test_harmonic_is_twice_fundamental() {
        let commands = harmonic_setpoint_commands(110.0, 90.0);
        assert_eq!(commands[0], "APPL:SIN 110.000000");
        assert_eq!(commands[2], "APPL:SIN:CH2 220.000000");
        assert_eq!(commands[3], "PHAS:CH2 90.000000");
    }

    #[test]
    fn test_invalid_waveforms_rejected() {
        assert!(WaveformDescriptor::sine(OutputChannel::Ch1, 0.0, 2.0).is_err());
        assert!(WaveformDescriptor::sine(OutputChannel::Ch2, 50.0, f64::INFINITY).is_err());
        assert!(OutputChannel::try_from(3).is_err());
    }

    #[test]
    fn test_waveform_deserializes_channel_number() {
        let waveform: WaveformDescriptor = serde_json::from_str(
            r#"{"shape":"SQU","frequency":50.0,"amplitude":1.0,"unit":"VRMS","offset":0.0,"phase":45.0,"channel":2}"#,
        )
        .unwrap();
        assert_eq!(waveform.channel, OutputChannel::Ch2);
        assert_eq!(waveform.setup_commands()[0], "APPL:SQU:CH2 50.000000,1.000000,0.000000");
    }
}
