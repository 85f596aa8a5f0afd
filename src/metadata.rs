//! Run metadata written next to the result tables.
//!
//! A `RunMetadata` snapshot captures what is needed to interpret the tables
//! later: the grid, the initial waveforms, every wait of the procedure, the
//! device identifiers and the software version that produced the data. It is
//! written once at run start as `<prefix>_metadata.json`.

use crate::config::{SweepConfig, TimingConfig};
use crate::error::{AppResult, SweepError};
use crate::experiment::SweepGrid;
use crate::instrument::WaveformDescriptor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Descriptive record of one sweep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunMetadata {
    /// The name of the experiment.
    pub experiment_name: String,
    /// Version of the sweep software.
    pub software_version: String,
    /// Run start, UTC.
    pub started_at: DateTime<Utc>,
    /// Frequency and phase ranges.
    pub grid: SweepGrid,
    /// Initial generator waveforms, output 1 then output 2.
    pub waveforms: Vec<WaveformDescriptor>,
    /// Procedure waits.
    pub timing: TimingConfig,
    /// Device identifiers, e.g. `generator` and `lockin`.
    pub devices: BTreeMap<String, String>,
    /// Free-form notes.
    pub annotations: String,
}

impl Default for RunMetadata {
    fn default() -> Self {
        Self {
            experiment_name: "Default Experiment".to_string(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Utc::now(),
            grid: SweepGrid::default(),
            waveforms: Vec::new(),
            timing: TimingConfig::default(),
            devices: BTreeMap::new(),
            annotations: String::new(),
        }
    }
}

/// A builder for constructing `RunMetadata` instances.
#[derive(Default)]
pub struct RunMetadataBuilder {
    inner: RunMetadata,
}

impl RunMetadataBuilder {
    /// Builder with defaults and the current time.
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefill name, grid, waveforms, timing and devices from `config`.
    pub fn from_config(config: &SweepConfig) -> Self {
        Self::new()
            .experiment_name(&config.application.name)
            .grid(config.sweep.clone())
            .waveform(config.generator.channel1.clone())
            .waveform(config.generator.channel2.clone())
            .timing(config.timing.clone())
            .device("generator", &config.generator.resource)
            .device("lockin", &config.lockin.device)
    }

    pub fn experiment_name(mut self, name: &str) -> Self {
        self.inner.experiment_name = name.to_string();
        self
    }

    pub fn started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.inner.started_at = started_at;
        self
    }

    pub fn grid(mut self, grid: SweepGrid) -> Self {
        self.inner.grid = grid;
        self
    }

    pub fn waveform(mut self, waveform: WaveformDescriptor) -> Self {
        self.inner.waveforms.push(waveform);
        self
    }

    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.inner.timing = timing;
        self
    }

    pub fn device(mut self, role: &str, id: &str) -> Self {
        self.inner.devices.insert(role.to_string(), id.to_string());
        self
    }

    pub fn annotations(mut self, annotations: &str) -> Self {
        self.inner.annotations = annotations.to_string();
        self
    }

    pub fn build(self) -> RunMetadata {
        self.inner
    }
}

impl RunMetadata {
    /// Validates the metadata.
    pub fn validate(&self) -> AppResult<()> {
        if self.experiment_name.is_empty() {
            return Err(SweepError::Configuration(
                "Experiment name cannot be empty.".to_string(),
            ));
        }
        Ok(())
    }

    /// Write as pretty JSON to `path`, replacing any previous file.
    pub fn write_json(&self, path: &Path) -> AppResult<()> {
        self.validate()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
