//! Per-frequency measurement records.

mod accumulator;
pub mod table;

pub use accumulator::MeasurementAccumulator;
pub use table::{SweepRow, SweepTable, COLUMNS};
