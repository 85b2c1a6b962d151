//! Mesra Realtime Core
//!
//! This crate implements the realtime voice session and tool-call
//! orchestration layer for the Mesra contact center: session bootstrap
//! (credential mint, microphone capture, SDP exchange), the bidirectional
//! control channel, the call state machine, and the dispatcher that
//! executes model-issued search tool calls against the streaming search
//! backends and feeds their results back into the live conversation.
//!
//! UI surfaces embed a [`session::Session`] and consume derived state
//! (transcript, call status) from its event receiver; the peer transport
//! and microphone are injected through the seams in [`transport`].

pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod format;
pub mod session;
pub mod signaling;
pub mod sse;
pub mod transcript;
pub mod transport;

pub use config::RealtimeConfig;
pub use error::{ChannelError, ConnectError, ToolBackendError};
pub use session::{CallStatus, Session, SessionEvent};
