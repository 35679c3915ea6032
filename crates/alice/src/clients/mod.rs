//! Per-connection handlers for the two websocket endpoints.

pub mod display;
pub mod sensor;
pub mod ui;

pub use display::{DisplayPower, PowerState};
pub use sensor::SensorClient;
pub use ui::UiClient;

use crate::engine::EngineError;
use aliceproto::ServerMessage;
use thiserror::Error;
use tokio::sync::mpsc;

/// Frames queued for a client's socket writer.
pub type Outbound = mpsc::UnboundedSender<ServerMessage>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The client was sent a fatal error; close the connection.
    #[error("client rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Send and reject in one step.
pub(crate) fn reject(outbound: &Outbound, reason: impl Into<String>) -> ClientError {
    let reason = reason.into();
    let _ = outbound.send(ServerMessage::fatal(reason.clone()));
    ClientError::Rejected(reason)
}
