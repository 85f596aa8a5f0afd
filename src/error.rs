//! Custom error types for the sweep.
//!
//! This module defines the primary error type, `SweepError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of failures a measurement run can hit.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically file parsing or type mismatches
//!   in the configuration layers.
//! - **`Configuration`**: Semantic errors in a configuration that parsed fine but is
//!   logically wrong (e.g. an empty frequency range or inverted settle bands).
//! - **`Io`**: Wraps `std::io::Error` for journal and output-directory handling.
//! - **`Transport`**: A generator command could not be delivered. The sweep controller
//!   recovers from these locally; they never abort a run.
//! - **`Acquisition`**: A lock-in sample could not be read. Aborts the run.
//! - **`Persistence`** / **`Csv`** / **`Json`**: Result tables or metadata could not be
//!   written. Aborts the run.
//! - **`Processing`**: Misuse of the measurement accumulator.
//! - **`FeatureNotEnabled`**: The configuration asks for a transport or storage backend
//!   that was not compiled in.
//!
//! By using `#[from]`, `SweepError` can be created from the underlying error types,
//! simplifying error handling with the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, SweepError>;

/// Every failure a sweep can report.
#[derive(Error, Debug)]
pub enum SweepError {
    /// Layered configuration could not be extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but is not usable.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File system failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A generator command could not be delivered.
    #[error("Transport fault on '{resource}' while sending '{command}': {reason}")]
    Transport {
        /// Resource string of the generator bus.
        resource: String,
        /// Command that failed.
        command: String,
        /// Driver-level description of the failure.
        reason: String,
    },

    /// A lock-in sample could not be read.
    #[error("Acquisition fault on '{path}': {reason}")]
    Acquisition {
        /// Node path that was sampled.
        path: String,
        /// Driver-level description of the failure.
        reason: String,
    },

    /// A results table could not be stored.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// CSV encoding or file failure.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Metadata serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Data processing misuse.
    #[error("Data processing error: {0}")]
    Processing(String),

    /// A transport or backend that needs a cargo feature.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl From<figment::Error> for SweepError {
    fn from(err: figment::Error) -> Self {
        SweepError::Config(Box::new(err))
    }
}

impl SweepError {
    /// Whether the sweep controller may continue past this error.
    pub fn is_transport_fault(&self) -> bool {
        matches!(self, SweepError::Transport { .. })
    }
}
