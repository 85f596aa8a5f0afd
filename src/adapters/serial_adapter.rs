//! RS-232 transport for the function generator.

use super::CommandBus;
use crate::error::{AppResult, SweepError};
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;
#[cfg(feature = "instrument_serial")]
use std::sync::Arc;
#[cfg(feature = "instrument_serial")]
use tokio::sync::Mutex;
#[cfg(feature = "instrument_serial")]
use tracing::debug;

/// Serial adapter for RS-232 communication
///
/// This adapter wraps the serialport crate and provides async I/O
/// using Tokio's blocking task executor for synchronous serial operations.
pub struct SerialAdapter {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub(crate) port_name: String,

    /// Baud rate (e.g., 9600, 115200)
    pub(crate) baud_rate: u32,

    /// Write timeout
    pub(crate) timeout: Duration,

    /// Line terminator for commands (e.g., "\n")
    pub(crate) line_terminator: String,

    /// The actual serial port (behind Arc<Mutex> for async access)
    #[cfg(feature = "instrument_serial")]
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialAdapter {
    /// Create a new serial adapter with default settings
    ///
    /// # Arguments
    /// * `port_name` - Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    /// * `baud_rate` - Communication speed (e.g., 9600, 115200)
    pub fn new(port_name: String, baud_rate: u32) -> Self {
        Self {
            port_name,
            baud_rate,
            timeout: Duration::from_secs(5),
            line_terminator: "\n".to_string(),
            #[cfg(feature = "instrument_serial")]
            port: None,
        }
    }

    /// Set write timeout
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
            resource: self.port_name.clone(),
            command: command.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Open the port.
    #[cfg(feature = "instrument_serial")]
    pub async fn connect(&mut self) -> AppResult<()> {
        let port_name = self.port_name.clone();
        let baud_rate = self.baud_rate;
        let timeout = self.timeout;

        let port = tokio::task::spawn_blocking(move || {
            serialport::new(&port_name, baud_rate)
                .timeout(timeout)
                .open()
        })
        .await
        .map_err(|e| self.transport_error("<open>", format!("open task panicked: {e}")))?
        .map_err(|e| self.transport_error("<open>", e))?;

        self.port = Some(Arc::new(Mutex::new(port)));
        debug!(
            "Serial port '{}' opened at {} baud",
            self.port_name, self.baud_rate
        );
        Ok(())
    }

    /// Open the port.
    #[cfg(not(feature = "instrument_serial"))]
    pub async fn connect(&mut self) -> AppResult<()> {
        Err(SweepError::FeatureNotEnabled(
            "instrument_serial".to_string(),
        ))
    }

    /// Whether `connect` succeeded.
    pub fn is_connected(&self) -> bool {
        #[cfg(feature = "instrument_serial")]
        {
            self.port.is_some()
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            false
        }
    }
}

#[async_trait]
impl CommandBus for SerialAdapter {
    #[cfg(feature = "instrument_serial")]
    async fn write(&mut self, command: &str) -> AppResult<()> {
        let port = self
            .port
            .as_ref()
            .ok_or_else(|| self.transport_error(command, "serial port not connected"))?
            .clone();

        let command_str = format!("{}{}", command, self.line_terminator);
        let command_for_log = command.to_string();

        // Execute blocking serial I/O on dedicated thread
        let result = tokio::task::spawn_blocking(move || {
            use std::io::Write;

            let mut port_guard = port.blocking_lock();
            port_guard.write_all(command_str.as_bytes())?;
            port_guard.flush()?;
            debug!("Sent serial command: {}", command_for_log.trim());
            Ok::<(), std::io::Error>(())
        })
        .await;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(self.transport_error(command, e)),
            Err(e) => Err(self.transport_error(command, format!("I/O task panicked: {e}"))),
        }
    }

    #[cfg(not(feature = "instrument_serial"))]
    async fn write(&mut self, command: &str) -> AppResult<()> {
        Err(self.transport_error(
            command,
            "Serial support not enabled. Rebuild with --features instrument_serial",
        ))
    }

    fn resource(&self) -> &str {
        &self.port_name
    }
}
