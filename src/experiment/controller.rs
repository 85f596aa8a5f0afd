//! The frequency/phase sweep loop.
//!
//! One run configures both instruments, then walks the grid frequency-major.
//! Every phase step retunes the generator, waits for the lock-in to settle,
//! samples both demodulators and records the row. After the last phase of a
//! frequency the phase errors are derived, the table is persisted under the
//! integer frequency and the accumulator is cleared.
//!
//! Generator transport faults never end a run: the setpoint is journaled,
//! reported and still sampled. Lock-in and persistence faults end it.

use crate::adapters::CommandBus;
use crate::config::{SweepConfig, TimingConfig};
use crate::data::{RunJournal, TableSink};
use crate::error::AppResult;
use crate::error_recovery::{CommandOutcome, RetryPolicy};
use crate::experiment::grid::{frequency_key, SweepGrid};
use crate::instrument::{ChannelSettings, FunctionGenerator, LockIn, NodePath, WaveformDescriptor};
use crate::measurement::MeasurementAccumulator;
use std::fmt;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, trace, warn};

/// Per-phase-step progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseState {
    /// Waiting for the next setpoint.
    Idle,
    /// Generator commands in flight.
    Commanding,
    /// The command sequence hit a transport fault.
    CommandFailed,
    /// The fault was journaled.
    Logged,
    /// All commands were delivered.
    Commanded,
    /// Waiting for the demodulators.
    Settling,
    /// Reading both channels.
    Sampling,
    /// Row appended.
    Recorded,
}

impl fmt::Display for PhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PhaseState::Idle => "Idle",
            PhaseState::Commanding => "Commanding",
            PhaseState::CommandFailed => "CommandFailed",
            PhaseState::Logged => "Logged",
            PhaseState::Commanded => "Commanded",
            PhaseState::Settling => "Settling",
            PhaseState::Sampling => "Sampling",
            PhaseState::Recorded => "Recorded",
        };
        f.write_str(name)
    }
}

struct PhaseStep {
    state: PhaseState,
    frequency: f64,
    phase: f64,
}

impl PhaseStep {
    fn new(frequency: f64, phase: f64) -> Self {
        Self {
            state: PhaseState::Idle,
            frequency,
            phase,
        }
    }

    fn advance(&mut self, next: PhaseState) {
        trace!(
            f = self.frequency,
            p = self.phase,
            "{} -> {}",
            self.state,
            next
        );
        self.state = next;
    }
}

/// A setpoint whose generator commands were not delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedSetpoint {
    /// Fundamental frequency, Hz.
    pub frequency: f64,
    /// Channel-2 phase, degrees.
    pub phase: f64,
    /// Command that failed last.
    pub command: String,
    /// Transport description of the failure.
    pub reason: String,
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SweepReport {
    /// Setpoints with transport faults, in sweep order.
    pub failed_setpoints: Vec<FailedSetpoint>,
    /// Phase steps sampled.
    pub samples: usize,
    /// Keys of the persisted tables, in sweep order.
    pub tables: Vec<String>,
    /// Wall time of the whole run.
    pub elapsed: Duration,
}

impl SweepReport {
    /// True when every setpoint was delivered.
    pub fn is_clean(&self) -> bool {
        self.failed_setpoints.is_empty()
    }
}

/// Instrument configuration and procedure constants for a controller.
#[derive(Debug, Clone)]
pub struct SweepPlan {
    /// Lock-in batch applied at startup.
    pub settings: ChannelSettings,
    /// Initial generator waveforms, output 1 then output 2.
    pub waveforms: [WaveformDescriptor; 2],
    /// Sample node of the fundamental demodulator.
    pub fundamental: NodePath,
    /// Sample node of the harmonic demodulator.
    pub harmonic: NodePath,
    /// Procedure waits.
    pub timing: TimingConfig,
    /// Generator command retries.
    pub retry: RetryPolicy,
}

impl SweepPlan {
    /// Plan for the second-harmonic lock-in setup described by `config`.
    pub fn from_config(config: &SweepConfig) -> AppResult<Self> {
        let device = &config.lockin.device;
        Ok(Self {
            settings: ChannelSettings::hf2_second_harmonic(device)?,
            waveforms: [
                config.generator.channel1.clone(),
                config.generator.channel2.clone(),
            ],
            fundamental: NodePath::demod_sample(device, config.lockin.fundamental_demod)?,
            harmonic: NodePath::demod_sample(device, config.lockin.harmonic_demod)?,
            timing: config.timing.clone(),
            retry: config.retry.clone(),
        })
    }
}

/// Drives one generator and one lock-in through a [`SweepGrid`].
pub struct SweepController<B, L> {
    generator: FunctionGenerator<B>,
    lockin: L,
    plan: SweepPlan,
}

impl<B: CommandBus, L: LockIn> SweepController<B, L> {
    /// Controller over `generator` and `lockin`.
    pub fn new(generator: FunctionGenerator<B>, lockin: L, plan: SweepPlan) -> Self {
        Self {
            generator,
            lockin,
            plan,
        }
    }

    /// The generator driver.
    pub fn generator(&self) -> &FunctionGenerator<B> {
        &self.generator
    }

    /// The lock-in session.
    pub fn lockin(&self) -> &L {
        &self.lockin
    }

    /// Instrument configuration in use.
    pub fn plan(&self) -> &SweepPlan {
        &self.plan
    }

    /// Release both devices.
    pub fn into_parts(self) -> (FunctionGenerator<B>, L) {
        (self.generator, self.lockin)
    }

    /// Apply lock-in settings, let them settle, then program both outputs.
    pub async fn configure(&mut self) -> AppResult<()> {
        info!(
            "Applying {} lock-in settings to '{}'",
            self.plan.settings.len(),
            self.plan.settings.device()
        );
        self.lockin.apply_settings(&self.plan.settings).await?;
        sleep(self.plan.timing.settings_settle).await;

        for waveform in &self.plan.waveforms {
            debug!(
                "Programming output {} ({} {} Hz)",
                u8::from(waveform.channel),
                waveform.shape,
                waveform.frequency
            );
            self.generator.apply_waveform(waveform).await?;
        }
        Ok(())
    }

    /// Configure the instruments and sweep `grid`, persisting to `sink`.
    ///
    /// The sink is not closed here; the caller owns its lifetime.
    pub async fn run<S>(
        &mut self,
        grid: &SweepGrid,
        sink: &mut S,
        journal: &RunJournal,
    ) -> AppResult<SweepReport>
    where
        S: TableSink + ?Sized,
    {
        grid.validate()?;
        let started = Instant::now();
        let mut report = SweepReport::default();

        self.configure().await?;

        let phases = grid.phases();
        let mut values = MeasurementAccumulator::new();
        for frequency in grid.frequencies() {
            info!("f: {}", frequency);
            for &phase in &phases {
                self.measure_phase(frequency, phase, &mut values, journal, &mut report)
                    .await?;
            }

            sleep(self.plan.timing.post_sweep_pause).await;
            values.compute_phase_errors();
            sleep(self.plan.timing.pre_save_pause).await;

            let key = frequency_key(frequency);
            let table = values.to_table(&key)?;
            sink.write_table(&table).await?;
            debug!("Persisted table '{}' ({} rows)", key, table.len());
            report.tables.push(key);
            values.clear();
        }

        report.elapsed = started.elapsed();
        journal.record_completion(report.elapsed.as_secs_f64())?;
        trace!("Run -> Finished");
        info!(
            "Sweep finished in {:.1} s: {} samples, {} failed setpoints",
            report.elapsed.as_secs_f64(),
            report.samples,
            report.failed_setpoints.len()
        );
        Ok(report)
    }

    async fn measure_phase(
        &mut self,
        frequency: f64,
        phase: f64,
        values: &mut MeasurementAccumulator,
        journal: &RunJournal,
        report: &mut SweepReport,
    ) -> AppResult<()> {
        let mut step = PhaseStep::new(frequency, phase);
        let started = Instant::now();

        step.advance(PhaseState::Commanding);
        let outcome = self
            .generator
            .set_harmonic_setpoint(frequency, phase, &self.plan.retry)
            .await?;
        match outcome {
            CommandOutcome::Applied { .. } => step.advance(PhaseState::Commanded),
            CommandOutcome::TransportFault {
                command,
                attempts,
                reason,
            } => {
                step.advance(PhaseState::CommandFailed);
                journal.record_transport_fault(frequency, phase)?;
                warn!(
                    "Generator fault at f={} p={} after {} attempt(s) on '{}': {}",
                    frequency, phase, attempts, command, reason
                );
                report.failed_setpoints.push(FailedSetpoint {
                    frequency,
                    phase,
                    command,
                    reason,
                });
                step.advance(PhaseState::Logged);
            }
        }

        step.advance(PhaseState::Settling);
        sleep(self.plan.timing.settle.settle_for(frequency)).await;

        step.advance(PhaseState::Sampling);
        let ch1 = self.lockin.get_sample(&self.plan.fundamental).await?.reading();
        let ch2 = self.lockin.get_sample(&self.plan.harmonic).await?.reading();

        values.record(
            frequency,
            phase,
            ch1,
            ch2,
            started.elapsed().as_secs_f64(),
        );
        report.samples += 1;
        step.advance(PhaseState::Recorded);
        step.advance(PhaseState::Idle);
        debug!("phi: {} -> ch2 {:.3} deg", phase, ch2.phase);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::grid::SweepRange;
    use crate::instrument::mock::{
        simulated_pair, FaultRule, SimulatedBus, SimulatedLockIn, SimulationModel,
    };
    use crate::measurement::SweepTable;
    use async_trait::async_trait;
    use tempfile::tempdir;

    #[derive(Default)]
    struct MemorySink {
        tables: Vec<SweepTable>,
    }

    #[async_trait]
    impl TableSink for MemorySink {
        async fn write_table(&mut self, table: &SweepTable) -> AppResult<()> {
            self.tables.push(table.clone());
            Ok(())
        }

        async fn close(&mut self) -> AppResult<()> {
            Ok(())
        }
    }

    fn controller(
        bus: SimulatedBus,
        lockin: SimulatedLockIn,
    ) -> SweepController<SimulatedBus, SimulatedLockIn> {
        let config = SweepConfig::default();
        let generator = FunctionGenerator::new(bus, config.timing.command_delay);
        SweepController::new(generator, lockin, SweepPlan::from_config(&config).unwrap())
    }

    fn grid(frequencies: (f64, f64, f64), phases: (f64, f64, f64)) -> SweepGrid {
        SweepGrid::new(
            SweepRange::new(frequencies.0, frequencies.1, frequencies.2).unwrap(),
            SweepRange::new(phases.0, phases.1, phases.2).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_point_duration_and_commands() {
        let dir = tempdir().unwrap();
        let journal = RunJournal::new(dir.path().join("Error.txt"), dir.path().join("Finish.txt"));
        let (bus, lockin) = simulated_pair("dev1234", 0, 3, SimulationModel::default());
        let handle = bus.handle();
        let mut controller = controller(bus, lockin);
        let mut sink = MemorySink::default();

        let report = controller
            .run(&grid((500.0, 500.0, 1.0), (45.0, 45.0, 1.0)), &mut sink, &journal)
            .await
            .unwrap();

        assert!(report.is_clean());
        assert_eq!(report.samples, 1);
        assert_eq!(report.tables, vec!["500"]);

        // settings 1 s + 10 setup commands + 5 setpoint commands at 200 ms,
        // 2 s settle above 300 Hz, 1 s pause, 100 ms before saving
        let expected = Duration::from_millis(1000 + 15 * 200 + 2000 + 1000 + 100);
        assert_eq!(report.elapsed, expected);

        let row = sink.tables[0].rows[0];
        assert_eq!(row.dt, 3.0);
        assert_eq!(row.f_ch2, 1000.0);
        assert!((row.phi_delta_abs - 0.25).abs() < 1e-9);

        let commands = handle.commands().await;
        assert_eq!(commands.len(), 15);
        assert_eq!(
            &commands[10..],
            &[
                "APPL:SIN 500.000000",
                "PHAS 0",
                "APPL:SIN:CH2 1000.000000",
                "PHAS:CH2 45.000000",
                "PHAS:ALIGN",
            ]
        );
        let finish = std::fs::read_to_string(journal.finish_marker()).unwrap();
        assert_eq!(finish.trim_end(), "Measurement done in 7.1 seconds");
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_band_settle_applies_below_threshold() {
        let dir = tempdir().unwrap();
        let journal = RunJournal::new(dir.path().join("Error.txt"), dir.path().join("Finish.txt"));
        let (bus, lockin) = simulated_pair("dev1234", 0, 3, SimulationModel::default());
        let mut controller = controller(bus, lockin);
        let mut sink = MemorySink::default();

        controller
            .run(&grid((290.0, 300.0, 10.0), (0.0, 0.0, 1.0)), &mut sink, &journal)
            .await
            .unwrap();

        let dt: Vec<f64> = sink.tables.iter().map(|t| t.rows[0].dt).collect();
        assert_eq!(dt, vec![5.0, 3.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_fault_is_journaled_and_sampled() {
        let dir = tempdir().unwrap();
        let journal = RunJournal::new(dir.path().join("Error.txt"), dir.path().join("Finish.txt"));
        let (bus, lockin) = simulated_pair("dev1234", 0, 3, SimulationModel::default());
        let bus = bus.with_fault(FaultRule::at_setpoint(100.0, 1.0));
        let mut controller = controller(bus, lockin);
        let mut sink = MemorySink::default();

        let report = controller
            .run(&grid((100.0, 100.0, 1.0), (0.0, 2.0, 1.0)), &mut sink, &journal)
            .await
            .unwrap();

        assert_eq!(report.samples, 3);
        assert_eq!(report.failed_setpoints.len(), 1);
        assert_eq!(report.failed_setpoints[0].command, "PHAS:CH2 1.000000");
        assert_eq!(sink.tables[0].len(), 3);
        assert_eq!(sink.tables[0].rows[1].phi_gen, 1.0);
        let errors = std::fs::read_to_string(journal.error_log()).unwrap();
        assert_eq!(errors.trim_end(), "Measurement Error!f:100,p:1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquisition_fault_aborts_before_persisting() {
        let dir = tempdir().unwrap();
        let journal = RunJournal::new(dir.path().join("Error.txt"), dir.path().join("Finish.txt"));
        let (bus, lockin) = simulated_pair("dev1234", 0, 3, SimulationModel::default());
        let mut controller = controller(bus, lockin.fail_after(4));
        let mut sink = MemorySink::default();

        let result = controller
            .run(&grid((100.0, 110.0, 10.0), (0.0, 1.0, 1.0)), &mut sink, &journal)
            .await;

        assert!(result.is_err());
        assert_eq!(sink.tables.len(), 1);
        assert!(!journal.finish_marker().exists());
    }

    #[tokio::test(start_paused = true)]
    #[tracing_test::traced_test]
    async fn test_state_transitions_and_fault_warning_are_logged() {
        let dir = tempdir().unwrap();
        let journal = RunJournal::new(dir.path().join("Error.txt"), dir.path().join("Finish.txt"));
        let (bus, lockin) = simulated_pair("dev1234", 0, 3, SimulationModel::default());
        let bus = bus.with_fault(FaultRule::at_setpoint(200.0, 0.0));
        let mut controller = controller(bus, lockin);
        let mut sink = MemorySink::default();

        controller
            .run(&grid((200.0, 200.0, 1.0), (0.0, 0.0, 1.0)), &mut sink, &journal)
            .await
            .unwrap();

        assert!(logs_contain("Commanding -> CommandFailed"));
        assert!(logs_contain("CommandFailed -> Logged"));
        assert!(logs_contain("Sampling -> Recorded"));
        assert!(logs_contain("Generator fault at f=200 p=0"));
        assert!(logs_contain("Run -> Finished"));
    }
}
