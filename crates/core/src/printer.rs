use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::commands::{Axis, JogRequest};

/// Connection state reported by the host, e.g. `Operational`, `Printing`,
/// `Closed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub state: String,
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default)]
    pub baudrate: Option<u32>,
    #[serde(default)]
    pub profile: Option<String>,
}

impl ConnectionState {
    pub fn is_closed(&self) -> bool {
        self.state == "Closed"
    }
}

#[derive(Debug, Error)]
pub enum PrinterError {
    #[error("host request failed: {0}")]
    Request(String),
    #[error("host rejected the request with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("unexpected host response: {0}")]
    Decode(String),
    #[error("operation not supported by this host")]
    Unsupported,
}

/// Printer operations offered by the host.
#[async_trait]
pub trait PrinterControl: Send + Sync {
    async fn commands(&self, commands: &[String]) -> Result<(), PrinterError>;
    async fn home(&self, axes: &[Axis]) -> Result<(), PrinterError>;
    async fn jog(&self, request: &JogRequest) -> Result<(), PrinterError>;
    async fn pause_print(&self) -> Result<(), PrinterError>;
    async fn resume_print(&self) -> Result<(), PrinterError>;
    async fn cancel_print(&self) -> Result<(), PrinterError>;
    /// Current status snapshot (`state`, `job`, `progress`, `currentZ`, ...).
    async fn get_current_data(&self) -> Result<Value, PrinterError>;
    async fn get_current_connection(&self) -> Result<ConnectionState, PrinterError>;
    /// Extruder count of the active printer profile.
    async fn extruder_count(&self) -> Result<usize, PrinterError>;
    /// Runs the host's own configured system shutdown command.
    async fn shutdown_host(&self) -> Result<(), PrinterError> {
        Err(PrinterError::Unsupported)
    }
}
