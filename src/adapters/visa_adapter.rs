//! VISA transport for USB/GPIB/Ethernet generators
//!
//! Provides a [`CommandBus`] over the VISA library, which is how the
//! generator is usually attached (USBTMC).

use super::CommandBus;
use crate::error::{AppResult, SweepError};
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "instrument_visa")]
use std::ffi::CString;
#[cfg(feature = "instrument_visa")]
use std::sync::Arc;
#[cfg(feature = "instrument_visa")]
use tokio::sync::Mutex;
#[cfg(feature = "instrument_visa")]
use tracing::debug;
#[cfg(feature = "instrument_visa")]
use visa_rs::prelude::*;

/// VISA adapter for instrument communication
///
/// This adapter wraps the visa-rs crate and provides async I/O
/// using Tokio's blocking task executor for synchronous VISA operations.
///
/// Supports resource strings like:
/// - "USB0::0x0400::0x09C4::DG1D171100665::INSTR" (USBTMC)
/// - "GPIB0::1::INSTR" (GPIB interface)
/// - "TCPIP0::192.168.1.100::INSTR" (Ethernet/LXI)
pub struct VisaAdapter {
    /// VISA resource string (e.g., "GPIB0::1::INSTR")
    pub(crate) resource_string: String,

    /// Open timeout
    pub(crate) timeout: Duration,

    /// Line terminator for commands (typically "\n" for SCPI)
    pub(crate) line_terminator: String,

    /// The open VISA session (behind Arc<Mutex> for async access)
    #[cfg(feature = "instrument_visa")]
    instrument: Option<Arc<Mutex<Instrument>>>,
}

impl VisaAdapter {
    /// Create a new VISA adapter with default settings
    ///
    /// # Arguments
    /// * `resource_string` - VISA resource identifier (e.g., "GPIB0::1::INSTR")
    pub fn new(resource_string: String) -> Self {
        Self {
            resource_string,
            timeout: Duration::from_secs(5),
            line_terminator: "\n".to_string(),
            #[cfg(feature = "instrument_visa")]
            instrument: None,
        }
    }

    /// Set open timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set line terminator for commands
    pub fn with_line_terminator(mut self, terminator: String) -> Self {
        self.line_terminator = terminator;
        self
    }

    fn transport_error(&self, command: &str, reason: impl ToString) -> SweepError {
        SweepError::Transport {
            resource: self.resource_string.clone(),
            command: command.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Open the VISA resource.
    #[cfg(feature = "instrument_visa")]
    pub async fn connect(&mut self) -> AppResult<()> {
        let resource_str = self.resource_string.clone();
        let timeout = self.timeout;

        let instrument = tokio::task::spawn_blocking(move || {
            let rm = DefaultRM::new().map_err(|e| e.to_string())?;
            let c_string = CString::new(resource_str).map_err(|e| e.to_string())?;
            rm.open(&c_string.into(), AccessMode::NO_LOCK, timeout)
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| self.transport_error("<open>", format!("open task panicked: {e}")))?
        .map_err(|e| self.transport_error("<open>", e))?;

        self.instrument = Some(Arc::new(Mutex::new(instrument)));
        debug!(
            "VISA resource '{}' opened with {}ms timeout",
            self.resource_string,
            self.timeout.as_millis()
        );
        Ok(())
    }

    /// Open the VISA resource.
    #[cfg(not(feature = "instrument_visa"))]
    pub async fn connect(&mut self) -> AppResult<()> {
        Err(SweepError::FeatureNotEnabled("instrument_visa".to_string()))
    }

    /// Whether `connect` succeeded.
    pub fn is_connected(&self) -> bool {
        #[cfg(feature = "instrument_visa")]
        {
            self.instrument.is_some()
        }

        #[cfg(not(feature = "instrument_visa"))]
        {
            false
        }
    }

    /// Human-readable adapter summary.
    pub fn info(&self) -> String {
        format!(
            "VisaAdapter({} @ {}ms timeout)",
            self.resource_string,
            self.timeout.as_millis()
        )
    }
}

#[async_trait]
impl CommandBus for VisaAdapter {
    #[cfg(feature = "instrument_visa")]
    async fn write(&mut self, command: &str) -> AppResult<()> {
        let instrument = self
            .instrument
            .as_ref()
            .ok_or_else(|| self.transport_error(command, "VISA instrument not connected"))?
            .clone();

        let command_str = format!("{}{}", command, self.line_terminator);
        let command_for_log = command.to_string();

        // Execute blocking VISA I/O on dedicated thread
        let result = tokio::task::spawn_blocking(move || {
            use std::io::Write;

            let mut instr_guard = instrument.blocking_lock();
            instr_guard.write_all(command_str.as_bytes())?;
            debug!("VISA command sent: {}", command_for_log.trim());
            Ok::<(), std::io::Error>(())
        })
        .await;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(self.transport_error(command, e)),
            Err(e) => Err(self.transport_error(command, format!("VISA I/O task panicked: {e}"))),
        }
    }

    #[cfg(not(feature = "instrument_visa"))]
    async fn write(&mut self, command: &str) -> AppResult<()> {
        Err(self.transport_error(
            command,
            "VISA support not enabled. Rebuild with --features instrument_visa",
        ))
    }

    fn resource(&self) -> &str {
        &self.resource_string
    }
}
