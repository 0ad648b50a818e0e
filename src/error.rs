//! Error types for the bridge

use thiserror::Error;

use crate::core::bluetooth::{AdapterState, Phase};

/// Errors returned by the connection state machine and its handle.
///
/// Platform-level failures (connect failed, characteristic missing, write
/// rejected) are not errors here; they are reported through the EventSink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// The operation is not valid in the current phase
    #[error("{operation} is not allowed while {phase:?}")]
    InvalidPhase { operation: &'static str, phase: Phase },

    /// The radio is not powered on
    #[error("Bluetooth adapter is not ready: {0:?}")]
    AdapterNotReady(AdapterState),

    /// The manager run loop has stopped
    #[error("Bluetooth manager is no longer running")]
    ManagerClosed,
}

pub type Result<T> = std::result::Result<T, BridgeError>;
