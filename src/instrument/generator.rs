//! Paced function-generator driver on top of a [`CommandBus`].
//!
//! The generator needs settling time between successive commands, so every
//! write is followed by a fixed delay before the next one is issued. Commands
//! are never batched.

use crate::adapters::CommandBus;
use crate::error::AppResult;
use crate::error_recovery::{retry_transport, CommandOutcome, RetryPolicy, Retryable};
use crate::instrument::waveform::{harmonic_setpoint_commands, WaveformDescriptor};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Dual-channel function generator reached through `B`.
pub struct FunctionGenerator<B> {
    bus: B,
    command_delay: Duration,
}

impl<B: CommandBus> FunctionGenerator<B> {
    /// Wrap `bus`, pausing `command_delay` after every command.
    pub fn new(bus: B, command_delay: Duration) -> Self {
        Self { bus, command_delay }
    }

    /// Resource string of the underlying bus.
    pub fn resource(&self) -> &str {
        self.bus.resource()
    }

    /// Borrow the underlying bus.
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Send one command and wait the inter-command delay.
    pub async fn send_command(&mut self, command: &str) -> AppResult<()> {
        debug!("[{}] -> {}", self.bus.resource(), command);
        let result = self.bus.write(command).await;
        sleep(self.command_delay).await;
        result
    }

    /// Send `commands` in order, stopping at the first failure.
    pub async fn send_sequence(&mut self, commands: &[String]) -> AppResult<()> {
        for command in commands {
            self.send_command(command).await?;
        }
        Ok(())
    }

    /// Program one output channel and switch it on.
    pub async fn apply_waveform(&mut self, waveform: &WaveformDescriptor) -> AppResult<()> {
        waveform.validate()?;
        self.send_sequence(&waveform.setup_commands()).await
    }

    /// Retune channel 1 to `frequency` at zero phase and channel 2 to the
    /// second harmonic at `phase` degrees, then realign the outputs.
    ///
    /// Transport faults are reported through the returned outcome.
    pub async fn set_harmonic_setpoint(
        &mut self,
        frequency: f64,
        phase: f64,
        policy: &RetryPolicy,
    ) -> AppResult<CommandOutcome> {
        let commands = harmonic_setpoint_commands(frequency, phase);
        let mut attempt = SequenceAttempt {
            generator: self,
            commands: &commands,
        };
        retry_transport(&mut attempt, policy).await
    }
}

struct SequenceAttempt<'a, B> {
    generator: &'a mut FunctionGenerator<B>,
    commands: &'a [String],
}

#[async_trait]
impl<'a, B: CommandBus> Retryable for SequenceAttempt<'a, B> {
    async fn attempt(&mut self) -> AppResult<()> {
        self.generator.send_sequence(self.commands).await
    }
}
