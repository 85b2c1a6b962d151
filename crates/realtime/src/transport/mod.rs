//! Transport seams for the realtime session.
//!
//! The session logic is written against narrow traits rather than a
//! concrete media stack: a [`PeerFactory`] builds one [`PeerTransport`] per
//! call, the transport owns exactly one [`ControlChannel`], and a
//! [`MediaSource`] hands out the exclusively owned microphone track. UI
//! surfaces embedding this crate inject their platform's implementations;
//! the in-memory [`loopback`] pair ships here for tests and local
//! development.

pub mod loopback;

use crate::error::{ChannelError, ConnectError};
use crate::events::{ClientEvent, OutboundEnvelope};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Lifecycle of the control channel multiplexed with the audio media.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Created but the open event has not fired yet. Sends are dropped.
    Pending,
    Open,
    Closed,
}

/// The ordered, bidirectional event pipe carried alongside the audio.
///
/// Messages are opaque JSON strings at this layer; encoding and decoding
/// live in [`crate::events`]. Delivery order matches send order.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Resolves once the channel's open event has fired. Fails if the
    /// channel closes first.
    async fn wait_open(&self) -> Result<(), ChannelError>;

    fn state(&self) -> ChannelState;

    /// Sends one message. Outside the open window this returns
    /// [`ChannelError::Dropped`] and must never panic.
    async fn send(&self, payload: String) -> Result<(), ChannelError>;

    /// Receives the next inbound message, or `None` once the channel has
    /// closed.
    async fn recv(&self) -> Option<String>;

    /// Closes the channel. Idempotent.
    async fn close(&self);
}

/// The negotiated audio+data connection for one call.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Creates the single named data channel. Must be called before
    /// [`PeerTransport::create_offer`] so the channel is part of the offer.
    fn create_control_channel(&self, label: &str) -> Result<Arc<dyn ControlChannel>, ConnectError>;

    /// Attaches the local microphone track to the outgoing media.
    async fn attach_local_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), ConnectError>;

    /// Produces the local session description.
    async fn create_offer(&self) -> Result<String, ConnectError>;

    /// Applies the remote session description received from the signaling
    /// endpoint.
    async fn apply_answer(&self, sdp: &str) -> Result<(), ConnectError>;

    /// Tears the connection down, detaching any remote audio playback.
    /// Idempotent.
    async fn close(&self);
}

/// Builds a fresh peer transport for each call.
pub trait PeerFactory: Send + Sync {
    fn create_peer(&self) -> Result<Box<dyn PeerTransport>, ConnectError>;
}

/// Capture constraints requested for the microphone track.
#[derive(Debug, Clone)]
pub struct AudioConstraints {
    pub channels: u16,
    pub sample_rate_hz: u32,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            channels: 1,
            sample_rate_hz: 24_000,
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

/// Grants access to the local microphone.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquires an exclusive capture handle, failing with
    /// [`ConnectError::MediaAccess`] when permission is denied or no device
    /// exists.
    async fn open_microphone(
        &self,
        constraints: &AudioConstraints,
    ) -> Result<Arc<dyn MediaTrack>, ConnectError>;
}

/// An exclusively owned local capture track.
pub trait MediaTrack: Send + Sync {
    /// Enables or disables the track without releasing the device (mute).
    fn set_enabled(&self, enabled: bool);

    fn enabled(&self) -> bool;

    /// Releases the underlying device. Idempotent.
    fn stop(&self);
}

/// Serializes an outbound event into its envelope and sends it on the
/// channel. A dropped send is a warning, not an error: returns whether the
/// message was handed to the transport.
pub async fn send_event(channel: &dyn ControlChannel, event: &ClientEvent) -> bool {
    let payload = match serde_json::to_string(&OutboundEnvelope::wrap(event)) {
        Ok(payload) => payload,
        Err(error) => {
            warn!(%error, "failed to encode outbound control event");
            return false;
        }
    };
    match channel.send(payload).await {
        Ok(()) => true,
        Err(ChannelError::Dropped) => {
            warn!(state = ?channel.state(), "control channel not open; outbound event dropped");
            false
        }
    }
}
