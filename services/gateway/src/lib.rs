//! Mesra Gateway Library Crate
//!
//! The trusted backend for the realtime voice layer: it holds the upstream
//! provider API key so browsers and kiosks never see it. It mints
//! short-lived realtime session credentials and serves the two streaming
//! search backends that the voice layer's tool calls consume. The
//! `gateway` binary is a thin wrapper around this library.

pub mod config;
pub mod error;
pub mod handlers;
pub mod router;
pub mod search;
pub mod state;
