//! Streaming search backends for the voice layer's tool calls.
//!
//! Both endpoints accept a query and answer with a `text/event-stream`
//! speaking the record contract the voice layer's dispatcher decodes: one
//! status record, content records as the answer streams in, and a single
//! terminal complete record. An upstream failure becomes an error record in
//! the stream, never a broken response; the stream still completes so the
//! dispatcher can resolve the tool call.

use crate::state::AppState;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::StreamExt;
use mesra_realtime::dispatch::BackendRecord;
use mesra_realtime::sse::SseParser;
use serde::Deserialize;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
}

#[derive(Debug, Clone, Copy)]
pub enum SearchKind {
    Web,
    Documents,
}

impl SearchKind {
    fn model<'a>(&self, state: &'a AppState) -> &'a str {
        match self {
            SearchKind::Web => &state.config.web_search_model,
            SearchKind::Documents => &state.config.document_search_model,
        }
    }

    fn system_prompt(&self) -> &'static str {
        match self {
            SearchKind::Web => {
                "You are a web search assistant for a government contact center. \
                 Answer the query with current, factual information. Be concise; \
                 the answer will be read aloud."
            }
            SearchKind::Documents => {
                "You are a search assistant over government service documents \
                 and procedures. Answer strictly from official procedures such \
                 as licensing, registration and permit workflows. Be concise; \
                 the answer will be read aloud."
            }
        }
    }

    fn status_message(&self) -> &'static str {
        match self {
            SearchKind::Web => "Searching the web",
            SearchKind::Documents => "Searching service documents",
        }
    }
}

pub async fn web_search(
    State(state): State<AppState>,
    Json(payload): Json<SearchRequest>,
) -> impl IntoResponse {
    run(state, SearchKind::Web, payload.query)
}

pub async fn document_search(
    State(state): State<AppState>,
    Json(payload): Json<SearchRequest>,
) -> impl IntoResponse {
    run(state, SearchKind::Documents, payload.query)
}

fn run(state: AppState, kind: SearchKind, query: String) -> impl IntoResponse {
    let (tx, rx) = mpsc::channel::<BackendRecord>(32);
    tokio::spawn(stream_answer(state, kind, query, tx));

    let stream = ReceiverStream::new(rx).map(|record| {
        let event = Event::default()
            .json_data(&record)
            .unwrap_or_else(|_| Event::default().comment("encode failure"));
        Ok::<Event, Infallible>(event)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[instrument(name = "search_stream", skip_all, fields(kind = ?kind))]
async fn stream_answer(
    state: AppState,
    kind: SearchKind,
    query: String,
    tx: mpsc::Sender<BackendRecord>,
) {
    info!(query = %query, "serving search stream");
    let _ = tx
        .send(BackendRecord::Status {
            message: kind.status_message().to_string(),
        })
        .await;

    match forward_upstream(&state, kind, &query, &tx).await {
        Ok(()) => {
            let _ = tx
                .send(BackendRecord::Complete {
                    message: "done".to_string(),
                })
                .await;
        }
        Err(error) => {
            warn!(%error, "search upstream failed");
            let _ = tx
                .send(BackendRecord::Error {
                    message: error.to_string(),
                })
                .await;
            let _ = tx
                .send(BackendRecord::Complete {
                    message: "failed".to_string(),
                })
                .await;
        }
    }
}

/// Bridges one upstream streaming chat completion into content records.
async fn forward_upstream(
    state: &AppState,
    kind: SearchKind,
    query: &str,
    tx: &mpsc::Sender<BackendRecord>,
) -> anyhow::Result<()> {
    let response = state
        .http
        .post(format!("{}/chat/completions", state.config.openai_base_url))
        .bearer_auth(&state.config.openai_api_key)
        .json(&serde_json::json!({
            "model": kind.model(state),
            "stream": true,
            "messages": [
                {"role": "system", "content": kind.system_prompt()},
                {"role": "user", "content": query},
            ],
        }))
        .send()
        .await?;

    if !response.status().is_success() {
        anyhow::bail!("upstream returned status {}", response.status());
    }

    let mut parser = SseParser::new();
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        for data in parser.push(&chunk) {
            if data == "[DONE]" {
                return Ok(());
            }
            forward_chunk(&data, tx).await;
        }
    }
    if let Some(data) = parser.flush() {
        if data != "[DONE]" {
            forward_chunk(&data, tx).await;
        }
    }
    Ok(())
}

async fn forward_chunk(data: &str, tx: &mpsc::Sender<BackendRecord>) {
    #[derive(Deserialize)]
    struct Chunk {
        choices: Vec<Choice>,
    }
    #[derive(Deserialize)]
    struct Choice {
        delta: Delta,
    }
    #[derive(Deserialize)]
    struct Delta {
        #[serde(default)]
        content: Option<String>,
    }

    let chunk: Chunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(error) => {
            debug!(%error, "skipping unparseable upstream chunk");
            return;
        }
    };
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                let _ = tx.send(BackendRecord::Content { content }).await;
            }
        }
    }
}
