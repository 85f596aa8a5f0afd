//! Generator transport adapters
//!
//! This module contains implementations of the [`CommandBus`] trait,
//! providing low-level command delivery to the function generator over
//! different communication protocols.

pub mod serial_adapter;
pub mod visa_adapter;

pub use serial_adapter::SerialAdapter;
pub use visa_adapter::VisaAdapter;

use crate::config::{GeneratorConfig, GeneratorTransport};
use crate::error::{AppResult, SweepError};
use async_trait::async_trait;
use tracing::info;

/// Write-only command transport to an instrument.
///
/// Implementations must report every delivery failure as
/// [`SweepError::Transport`](crate::error::SweepError::Transport) so the
/// sweep controller can recover from it.
#[async_trait]
pub trait CommandBus: Send {
    /// Send one command (without terminator).
    async fn write(&mut self, command: &str) -> AppResult<()>;

    /// Resource identifier used in logs and errors.
    fn resource(&self) -> &str;
}

#[async_trait]
impl<B: CommandBus + ?Sized> CommandBus for Box<B> {
    async fn write(&mut self, command: &str) -> AppResult<()> {
        (**self).write(command).await
    }

    fn resource(&self) -> &str {
        (**self).resource()
    }
}

/// Open the hardware transport selected by `config`.
///
/// The simulated transport is not opened here because it has to share its
/// state with the simulated lock-in; see [`crate::instrument::mock`].
pub async fn connect_generator(config: &GeneratorConfig) -> AppResult<Box<dyn CommandBus>> {
    let bus: Box<dyn CommandBus> = match config.transport {
        GeneratorTransport::Visa => {
            let mut adapter = VisaAdapter::new(config.resource.clone())
                .with_timeout(config.timeout)
                .with_line_terminator(config.line_terminator.clone());
            adapter.connect().await?;
            info!("Connected generator: {}", adapter.info());
            Box::new(adapter)
        }
        GeneratorTransport::Serial => {
            let mut adapter = SerialAdapter::new(config.resource.clone(), config.baud_rate)
                .with_timeout(config.timeout)
                .with_line_terminator(config.line_terminator.clone());
            adapter.connect().await?;
            info!(
                "Connected generator on {} at {} baud",
                config.resource, config.baud_rate
            );
            Box::new(adapter)
        }
        GeneratorTransport::Simulated => {
            return Err(SweepError::Configuration(
                "The simulated generator is created together with the simulated lock-in"
                    .to_string(),
            ))
        }
    };
    Ok(bus)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_transport_is_not_a_hardware_bus() {
        let config = GeneratorConfig {
            transport: GeneratorTransport::Simulated,
            ..GeneratorConfig::default()
        };
        assert!(matches!(
            connect_generator(&config).await,
            Err(SweepError::Configuration(_))
        ));
    }

    #[cfg(not(feature = "instrument_visa"))]
    #[tokio::test]
    async fn test_visa_needs_feature() {
        let config = GeneratorConfig::default();
        assert!(matches!(
            connect_generator(&config).await,
            Err(SweepError::FeatureNotEnabled(_))
        ));
    }
}
