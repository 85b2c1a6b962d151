//! Error taxonomy for the realtime voice layer.
//!
//! Session start-up failures (`ConnectError`) are fatal and surface once to
//! the caller, leaving the session in `Idle`. Everything that can go wrong
//! mid-call (a dropped channel send, a failing search backend) is absorbed
//! locally: the call only ends on explicit user action or transport-level
//! channel closure.

use std::time::Duration;

/// A fatal failure while establishing a realtime session.
///
/// Each variant corresponds to one step of the signaling bootstrap; any of
/// them aborts the whole connect and releases everything already acquired.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The trusted backend refused to mint a short-lived session credential.
    #[error("credential request failed: {0}")]
    Credential(String),

    /// Microphone permission was denied or no capture device exists.
    #[error("microphone access failed: {0}")]
    MediaAccess(String),

    /// Peer construction or the SDP offer/answer exchange failed.
    #[error("session negotiation failed: {0}")]
    Negotiation(String),

    /// The control channel never fired its open event.
    #[error("control channel did not open within {0:?}")]
    ChannelOpenTimeout(Duration),
}

/// A non-fatal control-channel send failure.
///
/// Sends attempted before the channel has opened, or after it has closed,
/// are dropped by the transport. Callers log this and continue; it never
/// tears down a session.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("control channel is not open; event dropped")]
    Dropped,
}

/// A failure while streaming from a search tool backend.
///
/// Never fatal to the session: the dispatcher always resolves the owning
/// tool invocation into a best-effort (possibly empty) result so the model
/// turn can proceed.
#[derive(Debug, thiserror::Error)]
pub enum ToolBackendError {
    #[error("search backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("search backend returned status {0}")]
    Status(u16),
}
