//! Layered sweep configuration using Figment
//!
//! Configuration is assembled from, lowest to highest precedence:
//! 1. built-in defaults, which reproduce the fixed constants of the bench setup;
//! 2. a TOML file (`config/harmonic_sweep.toml` when present, or `--config`);
//! 3. environment variables prefixed with `HARMONIC_SWEEP_`, nested with `__`.
//!
//! ```text
//! HARMONIC_SWEEP_APPLICATION__LOG_LEVEL=debug
//! HARMONIC_SWEEP_TIMING__SETTLE__LOW_BAND=6s
//! HARMONIC_SWEEP_GENERATOR__TRANSPORT=serial
//! ```
//!
//! Durations are written the humantime way (`"200ms"`, `"4s"`).

use crate::data::StoreBackend;
use crate::error::{AppResult, SweepError};
use crate::error_recovery::RetryPolicy;
use crate::experiment::{SettlePolicy, SweepGrid};
use crate::instrument::mock::SimulationModel;
use crate::instrument::{OutputChannel, WaveformDescriptor};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File merged when no explicit path is given and it exists.
pub const DEFAULT_CONFIG_PATH: &str = "config/harmonic_sweep.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "HARMONIC_SWEEP_";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SweepConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Frequency and phase ranges
    pub sweep: SweepGrid,
    /// Delays and settling
    pub timing: TimingConfig,
    /// Generator command retries
    pub retry: RetryPolicy,
    /// Function generator connection and waveforms
    pub generator: GeneratorConfig,
    /// Lock-in device and demodulators
    pub lockin: LockInConfig,
    /// Output files
    pub storage: StorageConfig,
    /// Simulated lock-in response, used by `--simulate` runs
    pub simulation: SimulationModel,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Experiment name written to the run metadata
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Phaseshift_ch2_harmonic2".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Fixed waits of the measurement procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Pause after every generator command
    #[serde(with = "humantime_serde")]
    pub command_delay: Duration,
    /// Pause after the lock-in settings batch
    #[serde(with = "humantime_serde")]
    pub settings_settle: Duration,
    /// Pause after the last phase of a frequency
    #[serde(with = "humantime_serde")]
    pub post_sweep_pause: Duration,
    /// Pause between deriving phase errors and persisting the table
    #[serde(with = "humantime_serde")]
    pub pre_save_pause: Duration,
    /// Wait before each lock-in sample
    pub settle: SettlePolicy,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            command_delay: Duration::from_millis(200),
            settings_settle: Duration::from_secs(1),
            post_sweep_pause: Duration::from_secs(1),
            pre_save_pause: Duration::from_millis(100),
            settle: SettlePolicy::default(),
        }
    }
}

/// How the generator is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorTransport {
    /// VISA resource (USBTMC, GPIB, LXI)
    #[default]
    Visa,
    /// RS-232 port
    Serial,
    /// In-process simulation
    Simulated,
}

/// Function generator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Transport kind
    pub transport: GeneratorTransport,
    /// VISA resource string or serial port name
    pub resource: String,
    /// Serial baud rate
    pub baud_rate: u32,
    /// Open/write timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Appended to every command
    pub line_terminator: String,
    /// Initial waveform of output 1
    pub channel1: WaveformDescriptor,
    /// Initial waveform of output 2
    pub channel2: WaveformDescriptor,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        let [channel1, channel2] = WaveformDescriptor::default_pair();
        Self {
            transport: GeneratorTransport::Visa,
            resource: "USB0::0x0400::0x09C4::DG1D171100665::INSTR".to_string(),
            baud_rate: 9600,
            timeout: Duration::from_secs(5),
            line_terminator: "\n".to_string(),
            channel1,
            channel2,
        }
    }
}

/// Lock-in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInConfig {
    /// Device id, the root of every node path
    pub device: String,
    /// Demodulator locked to the fundamental (channel 1)
    pub fundamental_demod: u32,
    /// Demodulator on the second harmonic (channel 2)
    pub harmonic_demod: u32,
}

impl Default for LockInConfig {
    fn default() -> Self {
        Self {
            device: "dev1234".to_string(),
            fundamental_demod: 0,
            harmonic_demod: 3,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory receiving tables, store and metadata
    pub output_dir: PathBuf,
    /// Prefix of every output file name
    pub file_prefix: String,
    /// Consolidated store format
    pub store_backend: StoreBackend,
    /// Transport fault log
    pub error_log: PathBuf,
    /// Completion marker
    pub finish_marker: PathBuf,
    /// Write `<prefix>_metadata.json` at run start
    pub write_metadata: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data/Phaseshift_ch2_harmonic2"),
            file_prefix: "Phaseshift_ch2_harmonic2".to_string(),
            store_backend: StoreBackend::Csv,
            error_log: PathBuf::from("Error.txt"),
            finish_marker: PathBuf::from("Finish.txt"),
            write_metadata: true,
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl SweepConfig {
    /// Load defaults, the default file when it exists, and the environment.
    pub fn load() -> AppResult<Self> {
        Self::figment(None)
            .extract::<Self>()
            .map_err(SweepError::from)
            .and_then(Self::validated)
    }

    /// Load with `path` as the file layer. The file must exist.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(SweepError::Configuration(format!(
                "Config file {:?} does not exist",
                path
            )));
        }
        Self::figment(Some(path))
            .extract::<Self>()
            .map_err(SweepError::from)
            .and_then(Self::validated)
    }

    /// The provider stack used by [`load`](Self::load) and
    /// [`load_from`](Self::load_from).
    pub fn figment(path: Option<&Path>) -> Figment {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        Figment::from(Serialized::defaults(SweepConfig::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn validated(self) -> AppResult<Self> {
        self.validate()?;
        Ok(self)
    }

    /// Validate configuration after loading
    ///
    /// Checks the log level, grid, settle bands, retry attempts, generator
    /// connection and waveforms, and lock-in demodulators.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(SweepError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        self.sweep.validate()?;
        self.timing.settle.validate()?;
        self.retry.validate()?;

        if self.generator.transport != GeneratorTransport::Simulated
            && self.generator.resource.trim().is_empty()
        {
            return Err(SweepError::Configuration(
                "generator.resource cannot be empty".to_string(),
            ));
        }
        for (name, waveform, channel) in [
            ("channel1", &self.generator.channel1, OutputChannel::Ch1),
            ("channel2", &self.generator.channel2, OutputChannel::Ch2),
        ] {
            waveform.validate()?;
            if waveform.channel != channel {
                return Err(SweepError::Configuration(format!(
                    "generator.{} must target output {}",
                    name,
                    u8::from(channel)
                )));
            }
        }

        if self.lockin.device.trim_matches('/').is_empty() {
            return Err(SweepError::Configuration(
                "lockin.device cannot be empty".to_string(),
            ));
        }
        if self.lockin.fundamental_demod == self.lockin.harmonic_demod {
            return Err(SweepError::Configuration(format!(
                "lockin.fundamental_demod and lockin.harmonic_demod are both {}",
                self.lockin.harmonic_demod
            )));
        }

        if self.storage.file_prefix.trim().is_empty() {
            return Err(SweepError::Configuration(
                "storage.file_prefix cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| SweepError::Configuration(format!("Cannot render config: {e}")))
    }
}
