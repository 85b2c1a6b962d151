//! In-memory transport pair for tests and local development.
//!
//! [`LoopbackHarness`] wires a session-side [`PeerFactory`]/[`MediaSource`]
//! pair to a [`RemoteHandle`] standing in for the remote model: the remote
//! side injects server events, observes every outbound envelope, controls
//! when the channel opens or closes, and can simulate a denied microphone.
//! By default the control channel opens as soon as the answer is applied,
//! mirroring a transport that finishes negotiation immediately.

use super::{
    AudioConstraints, ChannelState, ControlChannel, MediaSource, MediaTrack, PeerFactory,
    PeerTransport,
};
use crate::error::{ChannelError, ConnectError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, watch, Mutex};

struct Shared {
    state: watch::Sender<ChannelState>,
    inbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<String>>,
    outbound_tx: mpsc::UnboundedSender<String>,
    outbound_rx: Mutex<mpsc::UnboundedReceiver<String>>,
    deny_microphone: AtomicBool,
    manual_open: AtomicBool,
    channel_created: AtomicBool,
    peer_closed: AtomicBool,
    mic_stopped: AtomicBool,
    mic_enabled: AtomicBool,
    offer: StdMutex<Option<String>>,
}

pub struct LoopbackHarness {
    shared: Arc<Shared>,
}

impl LoopbackHarness {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ChannelState::Pending);
        Self {
            shared: Arc::new(Shared {
                state,
                inbound_tx,
                inbound_rx: Mutex::new(inbound_rx),
                outbound_tx,
                outbound_rx: Mutex::new(outbound_rx),
                deny_microphone: AtomicBool::new(false),
                manual_open: AtomicBool::new(false),
                channel_created: AtomicBool::new(false),
                peer_closed: AtomicBool::new(false),
                mic_stopped: AtomicBool::new(false),
                mic_enabled: AtomicBool::new(false),
                offer: StdMutex::new(None),
            }),
        }
    }

    pub fn factory(&self) -> LoopbackFactory {
        LoopbackFactory {
            shared: self.shared.clone(),
        }
    }

    pub fn media(&self) -> LoopbackMedia {
        LoopbackMedia {
            shared: self.shared.clone(),
        }
    }

    pub fn remote(&self) -> RemoteHandle {
        RemoteHandle {
            shared: self.shared.clone(),
        }
    }
}

impl Default for LoopbackHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// The remote model's side of the loopback pair.
pub struct RemoteHandle {
    shared: Arc<Shared>,
}

impl RemoteHandle {
    /// Fires the control channel's open event.
    pub fn open_channel(&self) {
        self.shared.state.send_replace(ChannelState::Open);
    }

    /// Closes the channel from the remote end.
    pub fn close_channel(&self) {
        self.shared.state.send_replace(ChannelState::Closed);
    }

    /// Delivers a raw server event to the session.
    pub fn inject(&self, raw: impl Into<String>) {
        let _ = self.shared.inbound_tx.send(raw.into());
    }

    /// Awaits the next outbound envelope sent by the session, decoded as
    /// JSON. Returns `None` once the session side is gone.
    pub async fn next_outbound(&self) -> Option<serde_json::Value> {
        let raw = self.shared.outbound_rx.lock().await.recv().await?;
        serde_json::from_str(&raw).ok()
    }

    /// When set, `apply_answer` no longer opens the channel automatically;
    /// the test drives [`RemoteHandle::open_channel`] itself.
    pub fn set_manual_open(&self, manual: bool) {
        self.shared.manual_open.store(manual, Ordering::SeqCst);
    }

    /// Makes the media source refuse the next microphone request.
    pub fn deny_microphone(&self, deny: bool) {
        self.shared.deny_microphone.store(deny, Ordering::SeqCst);
    }

    pub fn channel_state(&self) -> ChannelState {
        *self.shared.state.borrow()
    }

    pub fn peer_closed(&self) -> bool {
        self.shared.peer_closed.load(Ordering::SeqCst)
    }

    pub fn mic_stopped(&self) -> bool {
        self.shared.mic_stopped.load(Ordering::SeqCst)
    }

    pub fn mic_enabled(&self) -> bool {
        self.shared.mic_enabled.load(Ordering::SeqCst)
    }

    /// The local description produced during the last negotiation.
    pub fn offer(&self) -> Option<String> {
        self.shared.offer.lock().ok().and_then(|g| g.clone())
    }
}

pub struct LoopbackFactory {
    shared: Arc<Shared>,
}

impl PeerFactory for LoopbackFactory {
    fn create_peer(&self) -> Result<Box<dyn PeerTransport>, ConnectError> {
        // A fresh call reuses the harness wiring; reset per-call state.
        self.shared.channel_created.store(false, Ordering::SeqCst);
        self.shared.peer_closed.store(false, Ordering::SeqCst);
        self.shared.state.send_replace(ChannelState::Pending);
        Ok(Box::new(LoopbackPeer {
            shared: self.shared.clone(),
        }))
    }
}

struct LoopbackPeer {
    shared: Arc<Shared>,
}

#[async_trait]
impl PeerTransport for LoopbackPeer {
    fn create_control_channel(
        &self,
        _label: &str,
    ) -> Result<Arc<dyn ControlChannel>, ConnectError> {
        if self.shared.channel_created.swap(true, Ordering::SeqCst) {
            return Err(ConnectError::Negotiation(
                "control channel already created".to_string(),
            ));
        }
        Ok(Arc::new(LoopbackChannel {
            shared: self.shared.clone(),
        }))
    }

    async fn attach_local_track(&self, _track: Arc<dyn MediaTrack>) -> Result<(), ConnectError> {
        Ok(())
    }

    async fn create_offer(&self) -> Result<String, ConnectError> {
        if !self.shared.channel_created.load(Ordering::SeqCst) {
            return Err(ConnectError::Negotiation(
                "data channel must be created before the offer".to_string(),
            ));
        }
        let offer = "v=0\no=- loopback 0 IN IP4 127.0.0.1".to_string();
        if let Ok(mut slot) = self.shared.offer.lock() {
            *slot = Some(offer.clone());
        }
        Ok(offer)
    }

    async fn apply_answer(&self, _sdp: &str) -> Result<(), ConnectError> {
        if !self.shared.manual_open.load(Ordering::SeqCst) {
            self.shared.state.send_replace(ChannelState::Open);
        }
        Ok(())
    }

    async fn close(&self) {
        self.shared.peer_closed.store(true, Ordering::SeqCst);
        self.shared.state.send_replace(ChannelState::Closed);
    }
}

struct LoopbackChannel {
    shared: Arc<Shared>,
}

#[async_trait]
impl ControlChannel for LoopbackChannel {
    async fn wait_open(&self) -> Result<(), ChannelError> {
        let mut rx = self.shared.state.subscribe();
        match rx.wait_for(|s| *s != ChannelState::Pending).await {
            Ok(guard) if *guard == ChannelState::Open => Ok(()),
            _ => Err(ChannelError::Dropped),
        }
    }

    fn state(&self) -> ChannelState {
        *self.shared.state.borrow()
    }

    async fn send(&self, payload: String) -> Result<(), ChannelError> {
        if self.state() != ChannelState::Open {
            return Err(ChannelError::Dropped);
        }
        self.shared
            .outbound_tx
            .send(payload)
            .map_err(|_| ChannelError::Dropped)
    }

    async fn recv(&self) -> Option<String> {
        let mut rx = self.shared.inbound_rx.lock().await;
        let mut state_rx = self.shared.state.subscribe();
        tokio::select! {
            biased;
            msg = rx.recv() => msg,
            _ = async { let _ = state_rx.wait_for(|s| *s == ChannelState::Closed).await; } => {
                // Deliver anything already queued before reporting closure.
                rx.try_recv().ok()
            }
        }
    }

    async fn close(&self) {
        self.shared.state.send_replace(ChannelState::Closed);
    }
}

pub struct LoopbackMedia {
    shared: Arc<Shared>,
}

#[async_trait]
impl MediaSource for LoopbackMedia {
    async fn open_microphone(
        &self,
        _constraints: &AudioConstraints,
    ) -> Result<Arc<dyn MediaTrack>, ConnectError> {
        if self.shared.deny_microphone.load(Ordering::SeqCst) {
            return Err(ConnectError::MediaAccess(
                "microphone permission denied".to_string(),
            ));
        }
        self.shared.mic_stopped.store(false, Ordering::SeqCst);
        self.shared.mic_enabled.store(true, Ordering::SeqCst);
        Ok(Arc::new(LoopbackTrack {
            shared: self.shared.clone(),
        }))
    }
}

struct LoopbackTrack {
    shared: Arc<Shared>,
}

impl MediaTrack for LoopbackTrack {
    fn set_enabled(&self, enabled: bool) {
        self.shared.mic_enabled.store(enabled, Ordering::SeqCst);
    }

    fn enabled(&self) -> bool {
        self.shared.mic_enabled.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.shared.mic_stopped.store(true, Ordering::SeqCst);
        self.shared.mic_enabled.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ClientEvent;
    use crate::transport::send_event;

    fn channel_pair() -> (Arc<dyn ControlChannel>, RemoteHandle) {
        let harness = LoopbackHarness::new();
        let remote = harness.remote();
        let peer = harness.factory().create_peer().unwrap();
        let channel = peer.create_control_channel("events").unwrap();
        (channel, remote)
    }

    #[tokio::test]
    async fn send_before_open_is_dropped_without_panic() {
        let (channel, remote) = channel_pair();
        assert_eq!(channel.state(), ChannelState::Pending);
        assert!(matches!(
            channel.send("{}".to_string()).await,
            Err(ChannelError::Dropped)
        ));
        assert!(!send_event(channel.as_ref(), &ClientEvent::ResponseCreate {}).await);
        drop(remote);
    }

    #[tokio::test]
    async fn send_after_close_is_dropped_without_panic() {
        let (channel, remote) = channel_pair();
        remote.open_channel();
        channel.close().await;
        assert!(matches!(
            channel.send("{}".to_string()).await,
            Err(ChannelError::Dropped)
        ));
        assert_eq!(remote.channel_state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn open_send_receives_on_remote() {
        let (channel, remote) = channel_pair();
        remote.open_channel();
        assert!(send_event(channel.as_ref(), &ClientEvent::ResponseCreate {}).await);
        let value = remote.next_outbound().await.unwrap();
        assert_eq!(value["type"], "response.create");
    }

    #[tokio::test]
    async fn recv_returns_none_after_remote_close() {
        let (channel, remote) = channel_pair();
        remote.open_channel();
        remote.inject(r#"{"type":"session.created"}"#);
        assert!(channel.recv().await.is_some());
        remote.close_channel();
        assert!(channel.recv().await.is_none());
    }

    #[tokio::test]
    async fn wait_open_fails_if_closed_first() {
        let (channel, remote) = channel_pair();
        remote.close_channel();
        assert!(channel.wait_open().await.is_err());
    }

    #[tokio::test]
    async fn offer_requires_channel_first() {
        let harness = LoopbackHarness::new();
        let peer = harness.factory().create_peer().unwrap();
        assert!(peer.create_offer().await.is_err());
        let _channel = peer.create_control_channel("events").unwrap();
        assert!(peer.create_offer().await.is_ok());
    }
}
