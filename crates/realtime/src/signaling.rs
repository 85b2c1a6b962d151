//! One-shot session bootstrap.
//!
//! [`SignalingClient::connect`] performs the whole bootstrap sequence:
//! mint a short-lived credential from the trusted backend, acquire the
//! microphone, build the peer transport with its single data channel,
//! exchange session descriptions over plain HTTP (the data channel does
//! not exist yet), and wait for the channel's open event before declaring
//! the session usable. Each step is a distinct fatal error; any failure
//! aborts the whole operation and releases everything already acquired so
//! no partial session is left dangling.

use crate::config::RealtimeConfig;
use crate::error::ConnectError;
use crate::events::{ClientEvent, CONTROL_CHANNEL_LABEL};
use crate::transport::{
    send_event, AudioConstraints, ControlChannel, MediaSource, MediaTrack, PeerFactory,
    PeerTransport,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};

/// Short-lived opaque session token. Never reused across sessions and
/// implicitly invalidated when the session ends. Displays redacted.
#[derive(Clone)]
pub struct SessionCredential {
    token: String,
}

impl SessionCredential {
    pub fn new(token: String) -> Self {
        Self { token }
    }

    pub(crate) fn token(&self) -> &str {
        &self.token
    }

    fn masked(&self) -> String {
        let tail: String = self
            .token
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("…{tail}")
    }
}

impl std::fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionCredential({})", self.masked())
    }
}

impl std::fmt::Display for SessionCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.masked())
    }
}

/// The live resources of one negotiated call, exclusively owned by its
/// session until teardown.
pub struct Connection {
    pub(crate) credential: SessionCredential,
    pub(crate) peer: Box<dyn PeerTransport>,
    pub(crate) channel: Arc<dyn ControlChannel>,
    pub(crate) microphone: Arc<dyn MediaTrack>,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

/// Performs the session bootstrap against the trusted backend and the
/// remote signaling endpoint.
pub struct SignalingClient {
    http: reqwest::Client,
    config: Arc<RealtimeConfig>,
}

impl SignalingClient {
    pub fn new(config: Arc<RealtimeConfig>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Runs the full bootstrap. On success the returned connection is
    /// active: the control channel has fired its open event and the
    /// session-configuration event has been delivered.
    #[instrument(name = "voice_connect", skip_all)]
    pub(crate) async fn connect(
        &self,
        instructions: &str,
        media: &dyn MediaSource,
        peers: &dyn PeerFactory,
    ) -> Result<Connection, ConnectError> {
        let credential = self.mint_credential(instructions).await?;
        info!(credential = %credential, "session credential minted");

        let microphone = media.open_microphone(&AudioConstraints::default()).await?;

        let peer = match peers.create_peer() {
            Ok(peer) => peer,
            Err(error) => {
                microphone.stop();
                return Err(error);
            }
        };

        match self
            .negotiate(&credential, peer.as_ref(), microphone.clone(), instructions)
            .await
        {
            Ok(channel) => {
                info!("control channel open; session configured");
                Ok(Connection {
                    credential,
                    peer,
                    channel,
                    microphone,
                })
            }
            Err(error) => {
                peer.close().await;
                microphone.stop();
                Err(error)
            }
        }
    }

    async fn negotiate(
        &self,
        credential: &SessionCredential,
        peer: &dyn PeerTransport,
        microphone: Arc<dyn MediaTrack>,
        instructions: &str,
    ) -> Result<Arc<dyn ControlChannel>, ConnectError> {
        // The data channel must exist before the offer so it is part of the
        // negotiated description.
        let channel = peer.create_control_channel(CONTROL_CHANNEL_LABEL)?;
        peer.attach_local_track(microphone).await?;
        let offer = peer.create_offer().await?;

        let answer = self.exchange_sdp(credential, &offer).await?;
        peer.apply_answer(&answer).await?;

        // The session is usable only once the channel's open event fires;
        // anything sent before that is silently dropped by the transport.
        let timeout = self.config.connect_timeout;
        match tokio::time::timeout(timeout, channel.wait_open()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                return Err(ConnectError::Negotiation(
                    "control channel closed before opening".to_string(),
                ));
            }
            Err(_) => return Err(ConnectError::ChannelOpenTimeout(timeout)),
        }

        let configure = ClientEvent::SessionUpdate {
            session: self.config.session_update(instructions),
        };
        if !send_event(channel.as_ref(), &configure).await {
            return Err(ConnectError::Negotiation(
                "control channel dropped the session configuration".to_string(),
            ));
        }

        Ok(channel)
    }

    async fn mint_credential(&self, instructions: &str) -> Result<SessionCredential, ConnectError> {
        let response = self
            .http
            .post(&self.config.credential_url)
            .timeout(self.config.connect_timeout)
            .json(&serde_json::json!({
                "instructions": instructions,
                "model": self.config.model,
                "voice": self.config.voice,
            }))
            .send()
            .await
            .map_err(|e| ConnectError::Credential(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ConnectError::Credential(format!(
                "credential endpoint returned status {}",
                response.status()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ConnectError::Credential(e.to_string()))?;
        Ok(SessionCredential::new(body.token))
    }

    async fn exchange_sdp(
        &self,
        credential: &SessionCredential,
        offer: &str,
    ) -> Result<String, ConnectError> {
        let url = format!("{}?model={}", self.config.sdp_url, self.config.model);
        let response = self
            .http
            .post(&url)
            .timeout(self.config.connect_timeout)
            .bearer_auth(credential.token())
            .header(reqwest::header::CONTENT_TYPE, "application/sdp")
            .body(offer.to_string())
            .send()
            .await
            .map_err(|e| ConnectError::Negotiation(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ConnectError::Negotiation(format!(
                "signaling endpoint returned status {}",
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| ConnectError::Negotiation(e.to_string()))
    }
}
