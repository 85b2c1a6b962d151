//! Lifecycle and event handling for one realtime call.
//!
//! A [`Session`] owns the negotiated connection exclusively: the
//! credential, the microphone track, the peer transport and its control
//! channel. Inbound control events drive the transcript and hand tool
//! calls to the dispatcher on their own tasks; derived state (call status,
//! transcript updates) is republished to the embedding UI surface through
//! an [`mpsc`] receiver handed out at construction. UI surfaces construct
//! independent sessions; there is no ambient shared state.

use crate::config::RealtimeConfig;
use crate::dispatch::{ToolDispatcher, EMPTY_RESULT_FALLBACK};
use crate::error::ConnectError;
use crate::events::{ClientEvent, ConversationItem, ServerEvent, ToolInvocation};
use crate::signaling::{Connection, SignalingClient};
use crate::transcript::{LiveEntry, Speaker, TranscriptLine, TranscriptStore};
use crate::transport::{send_event, ControlChannel, MediaSource, PeerFactory};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Lifecycle of a call. `Ended` is transitional: teardown always settles
/// back in `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Idle,
    Connecting,
    Active,
    Ended,
}

/// Derived state pushed to the embedding UI surface.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StatusChanged(CallStatus),
    /// The accumulated in-progress assistant line; superseded by the next
    /// `LineCommitted`.
    PartialTranscript(String),
    LineCommitted(TranscriptLine),
    /// A new progress note in the live call view.
    LiveNote(LiveEntry),
    /// An in-place update of a live content anchor.
    LiveUpdated(LiveEntry),
    /// A non-fatal error worth surfacing; the call continues.
    SessionError(String),
}

struct CallState {
    status: CallStatus,
    generation: u64,
    conn: Option<Connection>,
    loop_task: Option<JoinHandle<()>>,
}

struct Inner {
    signaling: SignalingClient,
    dispatcher: ToolDispatcher,
    media: Box<dyn MediaSource>,
    peers: Box<dyn PeerFactory>,
    transcript: Arc<Mutex<TranscriptStore>>,
    events_tx: mpsc::Sender<SessionEvent>,
    state: Mutex<CallState>,
}

/// One realtime voice call surface.
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Creates an idle session. The returned receiver carries every
    /// [`SessionEvent`] for the life of the session.
    pub fn new(
        config: RealtimeConfig,
        media: Box<dyn MediaSource>,
        peers: Box<dyn PeerFactory>,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let config = Arc::new(config);
        let (events_tx, events_rx) = mpsc::channel(64);
        let inner = Arc::new(Inner {
            signaling: SignalingClient::new(config.clone()),
            dispatcher: ToolDispatcher::new(config),
            media,
            peers,
            transcript: Arc::new(Mutex::new(TranscriptStore::new())),
            events_tx,
            state: Mutex::new(CallState {
                status: CallStatus::Idle,
                generation: 0,
                conn: None,
                loop_task: None,
            }),
        });
        (Self { inner }, events_rx)
    }

    /// Starts a call. An already connecting or active call is torn down
    /// first — at most one call is live per session. On any bootstrap
    /// failure the session settles back in `Idle` and the error surfaces
    /// exactly once. If [`Session::end`] races a start in progress, the
    /// negotiated resources are released and the session stays `Idle`.
    #[instrument(name = "voice_session", skip_all)]
    pub async fn start(&self, instructions: &str) -> Result<(), ConnectError> {
        self.end().await;

        let my_generation = {
            let mut state = self.inner.state.lock().await;
            state.generation += 1;
            state.status = CallStatus::Connecting;
            state.generation
        };
        self.inner
            .emit(SessionEvent::StatusChanged(CallStatus::Connecting))
            .await;

        let connected = self
            .inner
            .signaling
            .connect(
                instructions,
                self.inner.media.as_ref(),
                self.inner.peers.as_ref(),
            )
            .await;

        match connected {
            Ok(conn) => {
                let channel = conn.channel.clone();
                let mut state = self.inner.state.lock().await;
                if state.generation != my_generation || state.status != CallStatus::Connecting {
                    drop(state);
                    warn!("session ended during connect; releasing negotiated call");
                    conn.channel.close().await;
                    conn.microphone.stop();
                    conn.peer.close().await;
                    return Ok(());
                }
                debug!(credential = %conn.credential, "call is live");
                state.conn = Some(conn);
                state.status = CallStatus::Active;
                let inner = self.inner.clone();
                state.loop_task = Some(tokio::spawn(run_event_loop(inner, channel)));
                drop(state);
                self.inner
                    .emit(SessionEvent::StatusChanged(CallStatus::Active))
                    .await;
                info!("call active");
                Ok(())
            }
            Err(error) => {
                {
                    let mut state = self.inner.state.lock().await;
                    if state.generation == my_generation && state.status == CallStatus::Connecting
                    {
                        state.status = CallStatus::Idle;
                    }
                }
                self.inner
                    .emit(SessionEvent::StatusChanged(CallStatus::Idle))
                    .await;
                self.inner
                    .emit(SessionEvent::SessionError(error.to_string()))
                    .await;
                Err(error)
            }
        }
    }

    /// Ends the call. Idempotent and safe to call at any point, including
    /// mid-connect; every held resource is released best-effort.
    #[instrument(name = "voice_end", skip_all)]
    pub async fn end(&self) {
        self.inner.teardown(true).await;
    }

    /// Sends a typed user message into the live conversation and asks the
    /// model to respond. Outside an active call this is a no-op warning.
    pub async fn send_text(&self, text: &str) {
        let channel = {
            let state = self.inner.state.lock().await;
            state.conn.as_ref().map(|c| c.channel.clone())
        };
        let Some(channel) = channel else {
            warn!("no active call; text message dropped");
            return;
        };

        let delivered = send_event(
            channel.as_ref(),
            &ClientEvent::ConversationItemCreate {
                item: ConversationItem::user_text(text),
            },
        )
        .await;
        if delivered {
            send_event(channel.as_ref(), &ClientEvent::ResponseCreate {}).await;
            let line = self.inner.transcript.lock().await.commit(Speaker::User, text);
            self.inner.emit(SessionEvent::LineCommitted(line)).await;
        }
    }

    /// Mutes or unmutes the microphone without releasing the device.
    pub async fn set_muted(&self, muted: bool) {
        let state = self.inner.state.lock().await;
        if let Some(conn) = state.conn.as_ref() {
            conn.microphone.set_enabled(!muted);
        }
    }

    pub async fn status(&self) -> CallStatus {
        self.inner.state.lock().await.status
    }

    /// Snapshot of the committed transcript.
    pub async fn transcript(&self) -> Vec<TranscriptLine> {
        self.inner.transcript.lock().await.lines().to_vec()
    }

    /// Snapshot of the live call view.
    pub async fn live_view(&self) -> Vec<LiveEntry> {
        self.inner.transcript.lock().await.live().to_vec()
    }
}

async fn run_event_loop(inner: Arc<Inner>, channel: Arc<dyn ControlChannel>) {
    while let Some(raw) = channel.recv().await {
        inner.handle_raw(&raw, &channel).await;
    }
    // Remote closure ends the call; local `end` also lands here via the
    // channel close.
    info!("control channel closed; tearing down call");
    inner.teardown(false).await;
}

impl Inner {
    async fn emit(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event).await;
    }

    /// Releases everything held by the current call. Each release step is
    /// independent so one failing step never prevents the others.
    async fn teardown(&self, abort_loop: bool) {
        let (conn, task) = {
            let mut state = self.state.lock().await;
            // `Ended` means another teardown already took the resources and
            // is mid-flight; entering again would duplicate status events.
            if state.conn.is_none()
                && matches!(state.status, CallStatus::Idle | CallStatus::Ended)
            {
                return;
            }
            state.status = CallStatus::Ended;
            (state.conn.take(), state.loop_task.take())
        };
        self.emit(SessionEvent::StatusChanged(CallStatus::Ended)).await;

        if let Some(conn) = conn {
            conn.channel.close().await;
            conn.microphone.stop();
            conn.peer.close().await;
        }
        if let Some(task) = task {
            if abort_loop {
                task.abort();
            }
        }

        {
            let mut state = self.state.lock().await;
            state.status = CallStatus::Idle;
        }
        self.emit(SessionEvent::StatusChanged(CallStatus::Idle)).await;
    }

    async fn handle_raw(&self, raw: &str, channel: &Arc<dyn ControlChannel>) {
        let event = match serde_json::from_str::<ServerEvent>(raw) {
            Ok(event) => event,
            Err(error) => {
                debug!(%error, "dropping malformed control message");
                return;
            }
        };

        match event {
            ServerEvent::SessionCreated {} => debug!("remote session ready"),
            ServerEvent::AudioTranscriptDelta { delta } => {
                let partial = {
                    let mut transcript = self.transcript.lock().await;
                    transcript.push_partial(&delta).to_string()
                };
                self.emit(SessionEvent::PartialTranscript(partial)).await;
            }
            ServerEvent::AudioTranscriptDone { transcript } => {
                let line = self
                    .transcript
                    .lock()
                    .await
                    .commit(Speaker::Assistant, &transcript);
                self.emit(SessionEvent::LineCommitted(line)).await;
            }
            ServerEvent::InputTranscriptionCompleted { transcript } => {
                let line = self.transcript.lock().await.commit(Speaker::User, &transcript);
                self.emit(SessionEvent::LineCommitted(line)).await;
            }
            ServerEvent::FunctionCallArgumentsDone {
                name,
                call_id,
                arguments,
            } => match ToolInvocation::parse(&name, &call_id, &arguments) {
                Ok(invocation) => {
                    // Dispatch on its own task so the channel keeps
                    // delivering other events while the backend streams.
                    let dispatcher = self.dispatcher.clone();
                    let channel = channel.clone();
                    let transcript = self.transcript.clone();
                    let events = self.events_tx.clone();
                    tokio::spawn(async move {
                        dispatcher
                            .dispatch(invocation, channel, transcript, events)
                            .await;
                    });
                }
                Err(error) => {
                    // The model still owes itself an answer for this call
                    // id, or the turn stalls.
                    warn!(%error, call_id, "unusable tool call; answering with fallback");
                    send_event(
                        channel.as_ref(),
                        &ClientEvent::ConversationItemCreate {
                            item: ConversationItem::FunctionCallOutput {
                                call_id,
                                output: EMPTY_RESULT_FALLBACK.to_string(),
                            },
                        },
                    )
                    .await;
                    send_event(channel.as_ref(), &ClientEvent::ResponseCreate {}).await;
                }
            },
            ServerEvent::Error { error } => {
                warn!(message = %error.message, code = ?error.code, "server reported an error");
                let line = self
                    .transcript
                    .lock()
                    .await
                    .commit(Speaker::System, &format!("error: {}", error.message));
                self.emit(SessionEvent::LineCommitted(line)).await;
                self.emit(SessionEvent::SessionError(error.message)).await;
            }
            ServerEvent::Unrecognized => debug!("ignoring unrecognized control event"),
        }
    }
}
