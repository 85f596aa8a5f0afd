//! Simulated generator bus and lock-in for tests and dry runs.
//!
//! Both devices share one [`GeneratorState`]: the bus updates it from the
//! commands it receives and the lock-in derives its demodulator outputs from
//! it, the way the real cabling feeds the generator outputs into the lock-in
//! inputs.
use crate::adapters::CommandBus;
use crate::error::{AppResult, SweepError};
use crate::instrument::settings::{ChannelSettings, NodePath, SettingValue};
use crate::instrument::{DemodSample, LockIn};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// State of one generator output.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputState {
    /// Frequency, Hz.
    pub frequency: f64,
    /// Amplitude in `unit`.
    pub amplitude: f64,
    /// Offset, V.
    pub offset: f64,
    /// Phase, degrees.
    pub phase: f64,
    /// Amplitude unit keyword.
    pub unit: String,
    /// Output relay.
    pub enabled: bool,
}

impl Default for OutputState {
    fn default() -> Self {
        Self {
            frequency: 1000.0,
            amplitude: 1.0,
            offset: 0.0,
            phase: 0.0,
            unit: "VPP".to_string(),
            enabled: false,
        }
    }
}

/// Everything the simulated generator has been told.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratorState {
    /// Channel 1.
    pub ch1: OutputState,
    /// Channel 2.
    pub ch2: OutputState,
    /// Number of `PHAS:ALIGN` commands received.
    pub alignments: usize,
    /// Every command received, including rejected ones.
    pub commands: Vec<String>,
    /// Number of injected faults that fired.
    pub faults_fired: usize,
}

/// Read access to the shared simulation state.
#[derive(Clone)]
pub struct SimulationHandle(Arc<Mutex<GeneratorState>>);

impl SimulationHandle {
    /// Copy of the current state.
    pub async fn snapshot(&self) -> GeneratorState {
        self.0.lock().await.clone()
    }

    /// Commands received so far.
    pub async fn commands(&self) -> Vec<String> {
        self.0.lock().await.commands.clone()
    }
}

/// What makes an injected fault fire.
#[derive(Debug, Clone, PartialEq)]
pub enum FaultTrigger {
    /// The channel-2 phase command for this (frequency, phase) setpoint.
    Setpoint {
        /// Channel-1 frequency at the time of the phase command.
        frequency: f64,
        /// Requested channel-2 phase.
        phase: f64,
    },
    /// Any command starting with this prefix.
    CommandPrefix(String),
}

/// An injected transport fault.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultRule {
    /// Firing condition.
    pub trigger: FaultTrigger,
    /// How many more times it fires; `None` means always.
    pub remaining: Option<u32>,
}

impl FaultRule {
    /// Fault that always fires at `(frequency, phase)`.
    pub fn at_setpoint(frequency: f64, phase: f64) -> Self {
        Self {
            trigger: FaultTrigger::Setpoint { frequency, phase },
            remaining: None,
        }
    }

    /// Fault that always fires for commands starting with `prefix`.
    pub fn on_prefix(prefix: &str) -> Self {
        Self {
            trigger: FaultTrigger::CommandPrefix(prefix.to_string()),
            remaining: None,
        }
    }

    /// Limit the rule to its first `count` firings.
    pub fn times(mut self, count: u32) -> Self {
        self.remaining = Some(count);
        self
    }
}

/// Response model of the simulated lock-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationModel {
    /// Linear phase lag of the harmonic channel, degrees per kHz.
    pub phase_lag_deg_per_khz: f64,
    /// Half-width of uniform phase noise, degrees.
    pub noise_deg: f64,
    /// Demodulated magnitude per generator volt (peak-to-peak).
    pub amplitude_gain: f64,
    /// Noise generator seed.
    pub seed: u64,
}

impl Default for SimulationModel {
    fn default() -> Self {
        Self {
            phase_lag_deg_per_khz: 0.5,
            noise_deg: 0.0,
            amplitude_gain: 0.5,
            seed: 0,
        }
    }
}

/// Build a generator bus and lock-in wired to the same outputs.
pub fn simulated_pair(
    device: &str,
    fundamental_demod: u32,
    harmonic_demod: u32,
    model: SimulationModel,
) -> (SimulatedBus, SimulatedLockIn) {
    let state = Arc::new(Mutex::new(GeneratorState::default()));
    let bus = SimulatedBus {
        resource: "SIM::GENERATOR::INSTR".to_string(),
        state: state.clone(),
        faults: Vec::new(),
    };
    let rng = StdRng::seed_from_u64(model.seed);
    let lockin = SimulatedLockIn {
        device: device.trim_matches('/').to_ascii_lowercase(),
        fundamental_demod,
        harmonic_demod,
        model,
        state,
        settings: None,
        rng,
        samples_taken: 0,
        fail_after: None,
    };
    (bus, lockin)
}

/// Generator bus that understands the command subset the sweep uses.
pub struct SimulatedBus {
    resource: String,
    state: Arc<Mutex<GeneratorState>>,
    faults: Vec<FaultRule>,
}

impl SimulatedBus {
    /// Add a fault rule.
    pub fn with_fault(mut self, rule: FaultRule) -> Self {
        self.faults.push(rule);
        self
    }

    /// Shared state handle.
    pub fn handle(&self) -> SimulationHandle {
        SimulationHandle(self.state.clone())
    }

    fn transport_error(&self, command: &str, reason: impl ToString) -> SweepError {
        SweepError::Transport {
            resource: self.resource.clone(),
            command: command.to_string(),
            reason: reason.to_string(),
        }
    }

    fn fault_fires(&mut self, command: &str, header: &str, args: &str, ch1_frequency: f64) -> bool {
        for rule in &mut self.faults {
            if rule.remaining == Some(0) {
                continue;
            }
            let matched = match &rule.trigger {
                FaultTrigger::CommandPrefix(prefix) => command.starts_with(prefix.as_str()),
                FaultTrigger::Setpoint { frequency, phase } => {
                    header == "PHAS:CH2"
                        && args.trim().parse::<f64>().ok() == Some(*phase)
                        && ch1_frequency == *frequency
                }
            };
            if matched {
                if let Some(remaining) = rule.remaining.as_mut() {
                    *remaining -= 1;
                }
                return true;
            }
        }
        false
    }
}

fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[async_trait]
impl CommandBus for SimulatedBus {
    async fn write(&mut self, command: &str) -> AppResult<()> {
        let state = self.state.clone();
        let mut state = state.lock().await;
        state.commands.push(command.to_string());

        let (header, args) = command
            .trim()
            .split_once(' ')
            .unwrap_or((command.trim(), ""));
        let header = header.to_ascii_uppercase();

        if self.fault_fires(command, &header, args, state.ch1.frequency) {
            state.faults_fired += 1;
            return Err(self.transport_error(command, "simulated I/O error"));
        }

        let (base, output) = match header.strip_suffix(":CH2") {
            Some(base) => (base.to_string(), &mut state.ch2),
            None => (header.clone(), &mut state.ch1),
        };

        if let Some(_shape) = base.strip_prefix("APPL:") {
            let mut values = args.split(',');
            let frequency = values
                .next()
                .and_then(parse_number)
                .filter(|f| *f > 0.0)
                .ok_or_else(|| self.transport_error(command, "invalid frequency"))?;
            output.frequency = frequency;
            if let Some(amplitude) = values.next().and_then(parse_number) {
                output.amplitude = amplitude;
            }
            if let Some(offset) = values.next().and_then(parse_number) {
                output.offset = offset;
            }
            output.enabled = true;
        } else if base == "PHAS:ALIGN" {
            state.alignments += 1;
        } else if base == "PHAS" {
            output.phase =
                parse_number(args).ok_or_else(|| self.transport_error(command, "invalid phase"))?;
        } else if base == "OUTP" {
            output.enabled = match args.trim().to_ascii_uppercase().as_str() {
                "ON" => true,
                "OFF" => false,
                _ => return Err(self.transport_error(command, "expected ON or OFF")),
            };
        } else if base == "VOLT:UNIT" {
            output.unit = args.trim().to_ascii_uppercase();
        } else {
            return Err(self.transport_error(command, "unknown command"));
        }
        Ok(())
    }

    fn resource(&self) -> &str {
        &self.resource
    }
}

/// Lock-in that demodulates the simulated generator outputs.
pub struct SimulatedLockIn {
    device: String,
    fundamental_demod: u32,
    harmonic_demod: u32,
    model: SimulationModel,
    state: Arc<Mutex<GeneratorState>>,
    settings: Option<ChannelSettings>,
    rng: StdRng,
    samples_taken: usize,
    fail_after: Option<usize>,
}

impl SimulatedLockIn {
    /// Make every sample after the first `count` fail.
    pub fn fail_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Settings applied so far.
    pub fn applied_settings(&self) -> Option<&ChannelSettings> {
        self.settings.as_ref()
    }

    /// Shared state handle.
    pub fn handle(&self) -> SimulationHandle {
        SimulationHandle(self.state.clone())
    }

    fn acquisition_error(path: &NodePath, reason: impl ToString) -> SweepError {
        SweepError::Acquisition {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    fn node_flag(&self, demod: u32, leaf: &str) -> Option<i64> {
        let settings = self.settings.as_ref()?;
        let path = NodePath::on_device(&self.device, &format!("demods/{demod}/{leaf}")).ok()?;
        match settings.get(&path)? {
            SettingValue::Int(v) => Some(v),
            SettingValue::Float(v) => Some(v as i64),
        }
    }

    fn demod_index(&self, path: &NodePath) -> Option<u32> {
        let mut segments = path.as_str().trim_start_matches('/').split('/');
        let device = segments.next()?;
        if device != self.device || segments.next()? != "demods" {
            return None;
        }
        let index = segments.next()?.parse().ok()?;
        (segments.next()? == "sample" && segments.next().is_none()).then_some(index)
    }
}

#[async_trait]
impl LockIn for SimulatedLockIn {
    async fn apply_settings(&mut self, settings: &ChannelSettings) -> AppResult<()> {
        if settings.device() != self.device {
            return Err(SweepError::Acquisition {
                path: format!("/{}", settings.device()),
                reason: format!("device '{}' is not attached", settings.device()),
            });
        }
        info!(
            "Applied {} lock-in settings to simulated '{}'",
            settings.len(),
            self.device
        );
        self.settings = Some(settings.clone());
        Ok(())
    }

    async fn get_sample(&mut self, path: &NodePath) -> AppResult<DemodSample> {
        if self.fail_after.is_some_and(|limit| self.samples_taken >= limit) {
            return Err(Self::acquisition_error(path, "simulated read timeout"));
        }
        let demod = self
            .demod_index(path)
            .ok_or_else(|| Self::acquisition_error(path, "no such sample node"))?;
        if self.node_flag(demod, "enable") == Some(0) {
            return Err(Self::acquisition_error(path, "demodulator disabled"));
        }

        let state = self.state.lock().await.clone();
        let fundamental = state.ch1.frequency;
        let harmonic = self.node_flag(demod, "harmonic").unwrap_or(1).max(1) as f64;

        let (source, phase) = if demod == self.harmonic_demod {
            let lag = self.model.phase_lag_deg_per_khz * fundamental / 1000.0;
            (&state.ch2, state.ch2.phase - lag)
        } else if demod == self.fundamental_demod {
            (&state.ch1, 0.0)
        } else {
            return Err(Self::acquisition_error(path, "demodulator not connected"));
        };

        let noise = if self.model.noise_deg > 0.0 {
            self.rng
                .gen_range(-self.model.noise_deg..=self.model.noise_deg)
        } else {
            0.0
        };
        let magnitude = if source.enabled {
            source.amplitude * self.model.amplitude_gain
        } else {
            0.0
        };
        let radians = (phase + noise).to_radians();
        self.samples_taken += 1;

        let sample = DemodSample {
            frequency: fundamental * harmonic,
            x: magnitude * radians.cos(),
            y: magnitude * radians.sin(),
        };
        debug!("{} -> {:?}", path, sample);
        Ok(sample)
    }
}
