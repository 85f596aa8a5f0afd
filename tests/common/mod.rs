//! Common test utilities for harmonic-sweep integration tests
//!
//! This module provides reusable test helpers for:
//! - A fast configuration and a simulated rig wired from it
//! - An in-memory table sink
//! - Timing assertions with appropriate tolerances

#![allow(dead_code)] // Not every test file uses every helper

use async_trait::async_trait;
use harmonic_sweep::config::{GeneratorTransport, SweepConfig};
use harmonic_sweep::data::{RunJournal, TableSink};
use harmonic_sweep::error::AppResult;
use harmonic_sweep::experiment::{SweepController, SweepGrid, SweepPlan, SweepRange};
use harmonic_sweep::instrument::mock::{
    simulated_pair, FaultRule, SimulatedBus, SimulatedLockIn, SimulationHandle,
};
use harmonic_sweep::instrument::FunctionGenerator;
use harmonic_sweep::measurement::SweepTable;
use std::path::Path;
use std::time::Duration;

/// Controller over the simulated devices.
pub type SimController = SweepController<SimulatedBus, SimulatedLockIn>;

/// Tables kept in memory, in write order.
#[derive(Default)]
pub struct MemorySink {
    pub tables: Vec<SweepTable>,
    pub closed: bool,
}

impl MemorySink {
    pub fn keys(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.key.as_str()).collect()
    }

    pub fn table(&self, key: &str) -> &SweepTable {
        self.tables
            .iter()
            .find(|t| t.key == key)
            .unwrap_or_else(|| panic!("no table '{key}'"))
    }
}

#[async_trait]
impl TableSink for MemorySink {
    async fn write_table(&mut self, table: &SweepTable) -> AppResult<()> {
        assert!(!self.closed, "write after close");
        self.tables.push(table.clone());
        Ok(())
    }

    async fn close(&mut self) -> AppResult<()> {
        self.closed = true;
        Ok(())
    }
}

/// Grid from `(start, stop, step)` triples.
pub fn grid(frequencies: (f64, f64, f64), phases: (f64, f64, f64)) -> SweepGrid {
    SweepGrid::new(
        SweepRange::new(frequencies.0, frequencies.1, frequencies.2).unwrap(),
        SweepRange::new(phases.0, phases.1, phases.2).unwrap(),
    )
    .unwrap()
}

/// Default configuration on the simulated transport, writing under `dir`.
pub fn simulated_config(dir: &Path, sweep: SweepGrid) -> SweepConfig {
    let mut config = SweepConfig::default();
    config.sweep = sweep;
    config.generator.transport = GeneratorTransport::Simulated;
    config.storage.output_dir = dir.join("data");
    config.storage.error_log = dir.join("Error.txt");
    config.storage.finish_marker = dir.join("Finish.txt");
    config.validate().unwrap();
    config
}

/// Build the simulated rig for `config`, injecting `faults` into the bus.
pub fn rig(config: &SweepConfig, faults: Vec<FaultRule>) -> (SimController, SimulationHandle) {
    let (bus, lockin) = simulated_pair(
        &config.lockin.device,
        config.lockin.fundamental_demod,
        config.lockin.harmonic_demod,
        config.simulation.clone(),
    );
    let bus = faults.into_iter().fold(bus, SimulatedBus::with_fault);
    let handle = bus.handle();
    let generator = FunctionGenerator::new(bus, config.timing.command_delay);
    let plan = SweepPlan::from_config(config).unwrap();
    (SweepController::new(generator, lockin, plan), handle)
}

/// Journal configured by `config`.
pub fn journal(config: &SweepConfig) -> RunJournal {
    RunJournal::new(&config.storage.error_log, &config.storage.finish_marker)
}

/// Lines of a text file, empty when it does not exist.
pub fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .map(|s| s.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Tolerance levels for timing assertions.
#[derive(Debug, Clone, Copy)]
pub enum TimingTolerance {
    /// Exact match - only for simulated time with `start_paused = true`
    Exact,
    /// 20% tolerance - for wall-clock runs
    Normal,
}

impl TimingTolerance {
    pub fn factor(&self) -> f64 {
        match self {
            TimingTolerance::Exact => 0.0,
            TimingTolerance::Normal => 0.20,
        }
    }
}

/// Assert that a duration is within tolerance of an expected value.
pub fn assert_duration_near(
    actual: Duration,
    expected: Duration,
    tolerance: TimingTolerance,
    context: &str,
) {
    let factor = tolerance.factor();
    let min = expected.mul_f64(1.0 - factor);
    let max = expected.mul_f64(1.0 + factor);

    assert!(
        actual >= min && actual <= max,
        "{}: expected {:?} ±{:.0}%, got {:?}",
        context,
        expected,
        factor * 100.0,
        actual
    );
}
