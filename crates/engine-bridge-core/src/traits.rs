//! Core traits implemented by engine backends.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    OutputStore,
    protocol::{EngineRequest, WireValue},
};

/// Session identifier.
pub type SessionId = Uuid;

/// Session state. The only transition is Running -> Terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// The engine process is live and accepting requests.
    Running,
    /// Shut down or disconnected. Every further operation fails.
    Terminated,
}

/// Engine error.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine not installed: {0}")]
    NotInstalled(String),
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Engine disconnected")]
    Disconnected,
    #[error("{message}")]
    Remote {
        message: String,
        identifier: Option<String>,
    },
}

impl EngineError {
    /// Whether this is a setup/environment failure rather than a runtime one.
    #[must_use]
    pub const fn is_setup(&self) -> bool {
        matches!(self, Self::NotInstalled(_) | Self::SpawnFailed(_))
    }
}

/// Trait for starting engines.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    /// Start one engine and return the channel to it.
    ///
    /// Display output produced by the engine is pushed into `output`.
    async fn launch(&self, output: Arc<OutputStore>) -> Result<Box<dyn EngineChannel>, EngineError>;
}

/// Request/response channel to one running engine.
///
/// Calls are strictly sequential: the caller waits for each response before
/// issuing the next request.
#[async_trait]
pub trait EngineChannel: Send {
    /// Send one request and wait for its values.
    ///
    /// A failed remote evaluation is reported as [`EngineError::Remote`].
    async fn request(&mut self, request: EngineRequest) -> Result<Vec<WireValue>, EngineError>;

    /// Stop the engine. Further requests fail with [`EngineError::Disconnected`].
    async fn close(&mut self) -> Result<(), EngineError>;
}
