//! Execution of model-issued tool calls against the streaming search
//! backends.
//!
//! A [`ToolDispatcher`] owns no per-call state: each invocation is routed
//! to the backend matching its tool name, consumed as an incremental
//! event-stream, mirrored into the live call view as it arrives, and
//! always resolved into exactly one function-result event followed by a
//! continuation request — even when the backend fails immediately. A stall
//! here would stall the entire voice turn, so every exit path reaches the
//! result emission with whatever text was accumulated.

use crate::config::RealtimeConfig;
use crate::error::ToolBackendError;
use crate::events::{ClientEvent, ConversationItem, ToolInvocation};
use crate::format::normalize_markup;
use crate::session::SessionEvent;
use crate::sse::SseParser;
use crate::transcript::{Speaker, TranscriptStore};
use crate::transport::{send_event, ControlChannel};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, instrument, warn};

/// Output used when a backend stream ends without producing any content,
/// so the model can still close out its turn.
pub const EMPTY_RESULT_FALLBACK: &str = "The search completed but returned no results.";

/// One record of the search-backend stream contract. The gateway serializes
/// these; the dispatcher decodes them. Unknown record types are skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendRecord {
    /// Informational progress; shown as a live note, never part of the
    /// result text.
    Status { message: String },
    /// A fragment of the primary payload.
    Content {
        #[serde(alias = "text")]
        content: String,
    },
    /// Terminal marker.
    Complete {
        #[serde(default)]
        message: String,
    },
    /// Backend-reported failure; the stream may still end normally.
    Error { message: String },
}

/// Routes tool invocations to their backend and feeds results back onto
/// the control channel.
#[derive(Clone)]
pub struct ToolDispatcher {
    http: reqwest::Client,
    config: Arc<RealtimeConfig>,
}

impl ToolDispatcher {
    pub fn new(config: Arc<RealtimeConfig>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Runs one invocation to completion. Emits exactly one
    /// function-result event (echoing the invocation's `call_id`) followed
    /// by a continuation request; if the control channel has closed in the
    /// meantime both sends degrade to warnings.
    #[instrument(
        name = "tool_call",
        skip_all,
        fields(tool = %invocation.tool, call_id = %invocation.call_id)
    )]
    pub async fn dispatch(
        &self,
        invocation: ToolInvocation,
        channel: Arc<dyn ControlChannel>,
        transcript: Arc<Mutex<TranscriptStore>>,
        events: mpsc::Sender<SessionEvent>,
    ) {
        info!(query = %invocation.query, "dispatching tool call");

        let mut result = String::new();
        if let Err(error) = self
            .consume_stream(&invocation, &transcript, &events, &mut result)
            .await
        {
            warn!(%error, "tool backend stream failed; answering with partial result");
            let _ = events
                .send(SessionEvent::SessionError(format!("search failed: {error}")))
                .await;
        }

        // Result delivery is strictly after all content chunks for this
        // call have been processed, and the model is never left waiting.
        let output = if result.is_empty() {
            EMPTY_RESULT_FALLBACK.to_string()
        } else {
            result.clone()
        };
        send_event(
            channel.as_ref(),
            &ClientEvent::ConversationItemCreate {
                item: ConversationItem::FunctionCallOutput {
                    call_id: invocation.call_id.clone(),
                    output,
                },
            },
        )
        .await;
        send_event(channel.as_ref(), &ClientEvent::ResponseCreate {}).await;

        if !result.is_empty() {
            let line = transcript
                .lock()
                .await
                .commit(Speaker::Assistant, &normalize_markup(&result));
            let _ = events.send(SessionEvent::LineCommitted(line)).await;
        }
    }

    async fn consume_stream(
        &self,
        invocation: &ToolInvocation,
        transcript: &Arc<Mutex<TranscriptStore>>,
        events: &mpsc::Sender<SessionEvent>,
        result: &mut String,
    ) -> Result<(), ToolBackendError> {
        let endpoint = self.config.tool_endpoint(invocation.tool).to_string();
        let response = self
            .http
            .post(&endpoint)
            .timeout(self.config.tool_stream_timeout)
            .json(&serde_json::json!({ "query": invocation.query }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ToolBackendError::Status(response.status().as_u16()));
        }

        let mut parser = SseParser::new();
        let mut body = response.bytes_stream();
        let mut anchor: Option<u64> = None;

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for data in parser.push(&chunk) {
                if self
                    .apply_record(&data, transcript, events, result, &mut anchor)
                    .await
                {
                    return Ok(());
                }
            }
        }
        if let Some(data) = parser.flush() {
            self.apply_record(&data, transcript, events, result, &mut anchor)
                .await;
        }
        Ok(())
    }

    /// Applies one backend record; returns `true` when terminal.
    async fn apply_record(
        &self,
        data: &str,
        transcript: &Arc<Mutex<TranscriptStore>>,
        events: &mpsc::Sender<SessionEvent>,
        result: &mut String,
        anchor: &mut Option<u64>,
    ) -> bool {
        let record = match serde_json::from_str::<BackendRecord>(data) {
            Ok(record) => record,
            Err(error) => {
                debug!(%error, "skipping unparseable backend record");
                return false;
            }
        };

        match record {
            BackendRecord::Status { message } => {
                let entry = transcript.lock().await.note(&message);
                let _ = events.send(SessionEvent::LiveNote(entry)).await;
                false
            }
            BackendRecord::Content { content } => {
                result.push_str(&content);
                // The live view shows the running accumulator, replacing
                // the previous partial rendering at the same anchor.
                let rendered = normalize_markup(result);
                let mut store = transcript.lock().await;
                let id = match anchor {
                    Some(id) => *id,
                    None => {
                        let id = store.begin_anchor();
                        *anchor = Some(id);
                        id
                    }
                };
                let updated = store.update_anchor(id, &rendered);
                drop(store);
                if let Some(entry) = updated {
                    let _ = events.send(SessionEvent::LiveUpdated(entry)).await;
                }
                false
            }
            BackendRecord::Complete { .. } => true,
            BackendRecord::Error { message } => {
                warn!(%message, "search backend reported an error");
                let entry = transcript
                    .lock()
                    .await
                    .note(&format!("search error: {message}"));
                let _ = events.send(SessionEvent::LiveNote(entry)).await;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ToolName;
    use crate::transport::loopback::{LoopbackHarness, RemoteHandle};
    use crate::transport::{PeerFactory, PeerTransport};
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse_body(records: &[serde_json::Value]) -> String {
        records
            .iter()
            .map(|r| format!("data: {r}\n\n"))
            .collect::<String>()
    }

    struct Fixture {
        dispatcher: ToolDispatcher,
        channel: Arc<dyn ControlChannel>,
        remote: RemoteHandle,
        transcript: Arc<Mutex<TranscriptStore>>,
        events_rx: mpsc::Receiver<SessionEvent>,
        events_tx: mpsc::Sender<SessionEvent>,
        _peer: Box<dyn PeerTransport>,
    }

    async fn fixture(server: &MockServer) -> Fixture {
        let config = Arc::new(RealtimeConfig {
            web_search_url: format!("{}/api/search/web", server.uri()),
            document_search_url: format!("{}/api/search/documents", server.uri()),
            tool_stream_timeout: Duration::from_secs(5),
            ..RealtimeConfig::default()
        });
        let harness = LoopbackHarness::new();
        let remote = harness.remote();
        let peer = harness.factory().create_peer().unwrap();
        let channel = peer.create_control_channel("events").unwrap();
        remote.open_channel();
        let (events_tx, events_rx) = mpsc::channel(64);
        Fixture {
            dispatcher: ToolDispatcher::new(config),
            channel,
            remote,
            transcript: Arc::new(Mutex::new(TranscriptStore::new())),
            events_rx,
            events_tx,
            _peer: peer,
        }
    }

    fn invocation(tool: ToolName, query: &str, call_id: &str) -> ToolInvocation {
        ToolInvocation {
            tool,
            call_id: call_id.to_string(),
            query: query.to_string(),
        }
    }

    #[tokio::test]
    async fn accumulates_content_chunks_in_arrival_order() {
        let server = MockServer::start().await;
        let body = sse_body(&[
            serde_json::json!({"type": "status", "message": "Searching the web"}),
            serde_json::json!({"type": "content", "content": "Sunny, "}),
            serde_json::json!({"type": "content", "content": "28°C"}),
            serde_json::json!({"type": "complete", "message": "done"}),
        ]);
        Mock::given(method("POST"))
            .and(path("/api/search/web"))
            .and(body_string_contains("KLIA weather"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let fx = fixture(&server).await;
        fx.dispatcher
            .dispatch(
                invocation(ToolName::WebSearch, "KLIA weather", "c1"),
                fx.channel.clone(),
                fx.transcript.clone(),
                fx.events_tx.clone(),
            )
            .await;

        let first = fx.remote.next_outbound().await.unwrap();
        assert_eq!(first["type"], "conversation.item.create");
        assert_eq!(first["item"]["type"], "function_call_output");
        assert_eq!(first["item"]["call_id"], "c1");
        assert_eq!(first["item"]["output"], "Sunny, 28°C");

        let second = fx.remote.next_outbound().await.unwrap();
        assert_eq!(second["type"], "response.create");

        let store = fx.transcript.lock().await;
        assert_eq!(store.lines().len(), 1);
        assert_eq!(store.lines()[0].text, "Sunny, 28°C");
        // Status note plus one content anchor, consistent with the
        // committed line.
        assert_eq!(store.live().len(), 2);
        assert_eq!(store.live()[0].text, "Searching the web");
        assert_eq!(store.live()[1].text, "Sunny, 28°C");
    }

    #[tokio::test]
    async fn routes_web_search_to_web_backend_only() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/search/web"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                sse_body(&[serde_json::json!({"type": "complete", "message": "ok"})]),
                "text/event-stream",
            ))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/search/documents"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let fx = fixture(&server).await;
        fx.dispatcher
            .dispatch(
                invocation(ToolName::WebSearch, "anything", "c2"),
                fx.channel.clone(),
                fx.transcript.clone(),
                fx.events_tx.clone(),
            )
            .await;
    }

    #[tokio::test]
    async fn routes_document_search_to_document_backend_only() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/search/documents"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                sse_body(&[serde_json::json!({"type": "complete", "message": "ok"})]),
                "text/event-stream",
            ))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/search/web"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let fx = fixture(&server).await;
        fx.dispatcher
            .dispatch(
                invocation(ToolName::DocumentSearch, "passport renewal", "c3"),
                fx.channel.clone(),
                fx.transcript.clone(),
                fx.events_tx.clone(),
            )
            .await;
    }

    #[tokio::test]
    async fn backend_failure_still_answers_the_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/search/web"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let fx = fixture(&server).await;
        fx.dispatcher
            .dispatch(
                invocation(ToolName::WebSearch, "down", "c4"),
                fx.channel.clone(),
                fx.transcript.clone(),
                fx.events_tx.clone(),
            )
            .await;

        let first = fx.remote.next_outbound().await.unwrap();
        assert_eq!(first["item"]["call_id"], "c4");
        assert_eq!(first["item"]["output"], EMPTY_RESULT_FALLBACK);
        let second = fx.remote.next_outbound().await.unwrap();
        assert_eq!(second["type"], "response.create");

        // Nothing to commit when no content arrived.
        assert!(fx.transcript.lock().await.lines().is_empty());
    }

    #[tokio::test]
    async fn eof_without_complete_still_delivers_partial_result() {
        let server = MockServer::start().await;
        let body = sse_body(&[serde_json::json!({"type": "content", "content": "partial"})]);
        Mock::given(method("POST"))
            .and(path("/api/search/web"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let fx = fixture(&server).await;
        fx.dispatcher
            .dispatch(
                invocation(ToolName::WebSearch, "q", "c5"),
                fx.channel.clone(),
                fx.transcript.clone(),
                fx.events_tx.clone(),
            )
            .await;

        let first = fx.remote.next_outbound().await.unwrap();
        assert_eq!(first["item"]["output"], "partial");
    }

    #[tokio::test]
    async fn closed_channel_turns_result_into_noop() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/search/web"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let fx = fixture(&server).await;
        fx.channel.close().await;
        // Must complete without panicking even though nothing can be sent.
        fx.dispatcher
            .dispatch(
                invocation(ToolName::WebSearch, "q", "c6"),
                fx.channel.clone(),
                fx.transcript.clone(),
                fx.events_tx.clone(),
            )
            .await;
    }

    #[tokio::test]
    async fn live_view_and_committed_line_render_identically() {
        let server = MockServer::start().await;
        let body = sse_body(&[
            serde_json::json!({"type": "content", "content": "### Weather\n"}),
            serde_json::json!({"type": "content", "content": "* Sunny"}),
            serde_json::json!({"type": "complete", "message": "done"}),
        ]);
        Mock::given(method("POST"))
            .and(path("/api/search/web"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let fx = fixture(&server).await;
        fx.dispatcher
            .dispatch(
                invocation(ToolName::WebSearch, "weather", "c7"),
                fx.channel.clone(),
                fx.transcript.clone(),
                fx.events_tx.clone(),
            )
            .await;

        let store = fx.transcript.lock().await;
        assert_eq!(store.lines()[0].text, "**Weather**\n• Sunny");
        assert_eq!(store.live().last().unwrap().text, store.lines()[0].text);
    }

    #[test]
    fn backend_record_accepts_text_alias() {
        let record: BackendRecord =
            serde_json::from_str(r#"{"type":"content","text":"aliased"}"#).unwrap();
        assert_eq!(
            record,
            BackendRecord::Content {
                content: "aliased".to_string()
            }
        );
    }

    #[test]
    fn unknown_record_type_fails_decode() {
        assert!(serde_json::from_str::<BackendRecord>(r#"{"type":"heartbeat"}"#).is_err());
    }
}
