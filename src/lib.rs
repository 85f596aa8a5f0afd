//! Second-harmonic phase-shift sweep.
//!
//! This library drives a dual-channel function generator through a grid of
//! (frequency, phase) setpoints, reads both channels of a lock-in amplifier
//! at every point and stores one phase-error table per frequency. It is used
//! by the `harmonic-sweep` binary and by the integration tests.

pub mod adapters;
pub mod config;
pub mod data;
pub mod error;
pub mod error_recovery;
pub mod experiment;
pub mod instrument;
pub mod measurement;
pub mod metadata;
