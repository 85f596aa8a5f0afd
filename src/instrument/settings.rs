//! Lock-in node settings applied as one batch at startup.

use crate::error::{AppResult, SweepError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Hierarchical device node path, e.g. `/dev1234/demods/3/harmonic`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodePath(String);

impl NodePath {
    /// Parse a path. Paths are absolute, lower-cased and have no empty segments.
    pub fn parse(path: &str) -> AppResult<Self> {
        let normalized = path.trim().to_ascii_lowercase();
        let Some(rest) = normalized.strip_prefix('/') else {
            return Err(SweepError::Configuration(format!(
                "Node path '{}' must start with '/'",
                path
            )));
        };
        if rest.is_empty() || rest.split('/').any(|segment| segment.is_empty()) {
            return Err(SweepError::Configuration(format!(
                "Node path '{}' has an empty segment",
                path
            )));
        }
        Ok(Self(normalized))
    }

    /// Build `/<device>/<relative>`.
    pub fn on_device(device: &str, relative: &str) -> AppResult<Self> {
        Self::parse(&format!(
            "/{}/{}",
            device.trim_matches('/'),
            relative.trim_start_matches('/')
        ))
    }

    /// Demodulator sample node of `device`.
    pub fn demod_sample(device: &str, demod: u32) -> AppResult<Self> {
        Self::on_device(device, &format!("demods/{demod}/sample"))
    }

    /// First path segment, the device id.
    pub fn device(&self) -> &str {
        self.0
            .trim_start_matches('/')
            .split('/')
            .next()
            .unwrap_or_default()
    }

    /// The full path string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for NodePath {
    type Error = SweepError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NodePath> for String {
    fn from(path: NodePath) -> Self {
        path.0
    }
}

/// Scalar written to a node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    /// Flags, indices, ranges.
    Int(i64),
    /// Rates, frequencies.
    Float(f64),
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Int(v) => write!(f, "{v}"),
            SettingValue::Float(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        SettingValue::Int(value)
    }
}

impl From<i32> for SettingValue {
    fn from(value: i32) -> Self {
        SettingValue::Int(i64::from(value))
    }
}

impl From<f64> for SettingValue {
    fn from(value: f64) -> Self {
        SettingValue::Float(value)
    }
}

/// One `(path, value)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSetting {
    /// Target node.
    pub path: NodePath,
    /// Value to write.
    pub value: SettingValue,
}

/// Ordered batch of node settings for one device.
///
/// Entry order carries no meaning for the device; paths are unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSettings {
    device: String,
    entries: Vec<ChannelSetting>,
}

impl ChannelSettings {
    /// Start a builder for `device`.
    pub fn builder(device: &str) -> ChannelSettingsBuilder {
        ChannelSettingsBuilder {
            device: device.trim_matches('/').to_ascii_lowercase(),
            entries: Vec::new(),
            error: None,
        }
    }

    /// Lock-in configuration for the second-harmonic phase measurement.
    ///
    /// Demodulator 0 tracks the fundamental through PLL 0; demodulator 3
    /// runs on oscillator 1 at the second harmonic.
    pub fn hf2_second_harmonic(device: &str) -> AppResult<Self> {
        let mut builder = Self::builder(device);
        for input in 0..2 {
            builder = builder
                .set(&format!("sigins/{input}/diff"), 0)
                .set(&format!("sigins/{input}/imp50"), 0)
                .set(&format!("sigins/{input}/ac"), 0)
                .set(&format!("sigins/{input}/range"), 2);
        }
        builder = builder
            .set("oscs/0/freq", 10)
            .set("oscs/1/freq", 10)
            .set("sigouts/0/add", 0)
            .set("sigouts/0/on", 0)
            .set("sigouts/0/range", 0)
            .set("sigouts/0/amplitudes/6", 0)
            .set("sigouts/1/add", 0)
            .set("sigouts/1/on", 0)
            .set("sigouts/1/range", 0)
            .set("sigouts/1/amplitudes/7", 0);
        for pll in 0..2_i64 {
            builder = builder
                .set(&format!("plls/{pll}/adcselect"), 0)
                .set(&format!("plls/{pll}/enable"), 1);
            for demod in pll * 3..pll * 3 + 3 {
                builder = builder.set(&format!("demods/{demod}/oscselect"), pll);
            }
        }
        for demod in 0..6 {
            builder = builder.set(&format!("demods/{demod}/rate"), 450);
        }
        for demod in 0..6 {
            let enable = i64::from(demod == 0 || demod == 3);
            builder = builder.set(&format!("demods/{demod}/enable"), enable);
        }
        builder.set("demods/3/harmonic", 2).build()
    }

    /// Device id every path is rooted at.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> &[ChannelSetting] {
        &self.entries
    }

    /// Value stored for `path`, if any.
    pub fn get(&self, path: &NodePath) -> Option<SettingValue> {
        self.entries
            .iter()
            .find(|entry| &entry.path == path)
            .map(|entry| entry.value)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Collects settings and reports the first invalid or duplicate path on `build`.
pub struct ChannelSettingsBuilder {
    device: String,
    entries: Vec<ChannelSetting>,
    error: Option<SweepError>,
}

impl ChannelSettingsBuilder {
    /// Add `relative` (below the device root) with `value`.
    pub fn set(mut self, relative: &str, value: impl Into<SettingValue>) -> Self {
        if self.error.is_some() {
            return self;
        }
        match NodePath::on_device(&self.device, relative) {
            Ok(path) => self.entries.push(ChannelSetting {
                path,
                value: value.into(),
            }),
            Err(err) => self.error = Some(err),
        }
        self
    }

    /// Validate and finish the batch.
    pub fn build(self) -> AppResult<ChannelSettings> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if self.device.is_empty() {
            return Err(SweepError::Configuration(
                "Channel settings need a device id".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for entry in &self.entries {
            if entry.path.device() != self.device {
                return Err(SweepError::Configuration(format!(
                    "Node '{}' is not on device '{}'",
                    entry.path, self.device
                )));
            }
            if !seen.insert(entry.path.as_str()) {
                return Err(SweepError::Configuration(format!(
                    "Duplicate node path '{}'",
                    entry.path
                )));
            }
        }
        Ok(ChannelSettings {
            device: self.device,
            entries: self.entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_path_normalizes() {
        let path = NodePath::parse(" /DEV1234/Demods/0/Sample ").unwrap();
        assert_eq!(path.as_str(), "/dev1234/demods/0/sample");
        assert_eq!(path.device(), "dev1234");
    }

    #[test]
    fn test_node_path_rejects_relative_and_empty_segments() {
        assert!(NodePath::parse("dev1234/demods").is_err());
        assert!(NodePath::parse("/dev1234//demods").is_err());
        assert!(NodePath::parse("/").is_err());
    }

    #[test]
    fn test_hf2_table_has_unique_paths_and_harmonic() {
        let settings = ChannelSettings::hf2_second_harmonic("dev1234").unwrap();
        assert_eq!(settings.len(), 41);

        let harmonic = NodePath::parse("/dev1234/demods/3/harmonic").unwrap();
        assert_eq!(settings.get(&harmonic), Some(SettingValue::Int(2)));

        let osc = NodePath::parse("/dev1234/demods/4/oscselect").unwrap();
        assert_eq!(settings.get(&osc), Some(SettingValue::Int(1)));

        let enabled: Vec<_> = (0..6)
            .filter(|d| {
                let path = NodePath::parse(&format!("/dev1234/demods/{d}/enable")).unwrap();
                settings.get(&path) == Some(SettingValue::Int(1))
            })
            .collect();
        assert_eq!(enabled, vec![0, 3]);
    }

    #[test]
    fn test_duplicate_path_rejected() {
        let result = ChannelSettings::builder("dev1")
            .set("demods/0/rate", 450)
            .set("demods/0/rate", 900)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_device_rejected() {
        assert!(ChannelSettings::builder("").set("x", 1).build().is_err());
    }
}
