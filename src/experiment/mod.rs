//! Sweep orchestration.
//!
//! - [`grid`]: the frequency/phase iteration space;
//! - [`settle`]: frequency-banded settling times;
//! - [`controller`]: the sweep loop that ties instruments, accumulator and
//!   sinks together.
//!
//! # Example
//!
//! ```rust,ignore
//! use harmonic_sweep::experiment::{SweepController, SweepPlan};
//!
//! let plan = SweepPlan::from_config(&config)?;
//! let mut controller = SweepController::new(generator, lockin, plan);
//! let report = controller.run(&config.sweep, &mut sink, &journal).await?;
//! sink.close().await?;
//! ```

pub mod controller;
pub mod grid;
pub mod settle;

pub use controller::{FailedSetpoint, PhaseState, SweepController, SweepPlan, SweepReport};
pub use grid::{frequency_key, SweepGrid, SweepRange};
pub use settle::SettlePolicy;
