use std::sync::Arc;

use hassprint_core::commands::{decode, EMERGENCY_STOP};
use hassprint_core::{Command, ControlKind, PrinterError};
use tokio::process::Command as Process;
use tracing::{debug, error, info, warn};

use crate::context::Context;

/// Turns inbound control messages into printer operations. Failures are
/// logged and never propagated.
#[derive(Clone)]
pub struct CommandDispatcher {
    ctx: Arc<Context>,
}

impl CommandDispatcher {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    pub async fn dispatch(&self, kind: ControlKind, payload: &[u8]) {
        self.ctx
            .metrics
            .control_rx_total
            .with_label_values(&[kind.topic_suffix()])
            .inc();

        let command = match decode(kind, payload) {
            Ok(Some(command)) => command,
            Ok(None) => {
                debug!(control = kind.topic_suffix(), "Control message needs no action");
                return;
            }
            Err(err) => {
                error!(control = kind.topic_suffix(), %err, "Ignoring malformed control message");
                return;
            }
        };

        info!(control = kind.topic_suffix(), ?command, "Dispatching control command");
        if let Err(err) = self.execute(command).await {
            error!(control = kind.topic_suffix(), %err, "Printer command failed");
        }
    }

    async fn execute(&self, command: Command) -> Result<(), PrinterError> {
        let printer = &self.ctx.printer;
        match command {
            Command::EmergencyStop => printer.commands(&[EMERGENCY_STOP.to_string()]).await,
            Command::Cancel => printer.cancel_print().await,
            Command::Pause => printer.pause_print().await,
            Command::Resume => printer.resume_print().await,
            Command::Home(axes) => printer.home(&axes).await,
            Command::Jog(request) => printer.jog(&request).await,
            Command::Raw(lines) => printer.commands(&lines).await,
            Command::Shutdown => {
                self.spawn_shutdown().await;
                Ok(())
            }
        }
    }

    // Runs in the background; the message handler never waits for it.
    async fn spawn_shutdown(&self) {
        let local = self.ctx.settings().await.shutdown_command;
        let printer = self.ctx.printer.clone();
        tokio::spawn(async move {
            match local {
                Some(cmd) => {
                    info!(command = %cmd, "Running shutdown command");
                    match Process::new("sh").arg("-c").arg(&cmd).status().await {
                        Ok(status) if status.success() => {}
                        Ok(status) => warn!(command = %cmd, %status, "Shutdown command exited with failure"),
                        Err(err) => warn!(command = %cmd, ?err, "Unable to run shutdown command"),
                    }
                }
                None => {
                    if let Err(err) = printer.shutdown_host().await {
                        warn!(%err, "Unable to run host shutdown command");
                    }
                }
            }
        });
    }
}
