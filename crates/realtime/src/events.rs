//! Control-channel message protocol.
//!
//! Every message on the control channel is a JSON object with a `type`
//! discriminant. Inbound messages decode into [`ServerEvent`]; unrecognized
//! types fall into a single catch-all variant and are dropped by the
//! session, never treated as fatal. Outbound messages are built from
//! [`ClientEvent`] and wrapped in an [`OutboundEnvelope`] that adds a
//! generated correlation `event_id`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Label of the single data channel created alongside the audio media.
pub const CONTROL_CHANNEL_LABEL: &str = "oai-events";

/// Events received from the remote model over the control channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// The remote end accepted the session.
    #[serde(rename = "session.created")]
    SessionCreated {},

    /// A partial fragment of the assistant's spoken-audio transcript. The
    /// model may still revise this text, so it is buffered, not committed.
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta { delta: String },

    /// The finished assistant transcript for the current turn. This text
    /// wins over whatever the deltas accumulated.
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone { transcript: String },

    /// The finished transcription of the user's utterance.
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted { transcript: String },

    /// The model finished emitting arguments for a tool call.
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        name: String,
        call_id: String,
        arguments: String,
    },

    /// A server-side error. Visible in the transcript, but never ends the
    /// call by itself.
    #[serde(rename = "error")]
    Error { error: ErrorDetail },

    /// Any event type this client does not consume.
    #[serde(other)]
    Unrecognized,
}

/// Payload of an inbound `error` event.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

/// Events sent to the remote model over the control channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Declares session behavior: modalities, voice, audio formats, input
    /// transcription, turn detection and the tool schema. Omitting a field
    /// silently disables the corresponding capability.
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionUpdate },

    /// Inserts an item into the conversation (a user message or the output
    /// of a completed tool call).
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    /// Asks the model to resume generating a response, e.g. after a tool
    /// result has been delivered.
    #[serde(rename = "response.create")]
    ResponseCreate {},
}

/// Wire envelope for outbound events: the flattened event plus a generated
/// correlation id.
#[derive(Debug, Serialize)]
pub struct OutboundEnvelope<'a> {
    pub event_id: String,
    #[serde(flatten)]
    pub event: &'a ClientEvent,
}

impl<'a> OutboundEnvelope<'a> {
    pub fn wrap(event: &'a ClientEvent) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event,
        }
    }
}

/// The `session` payload of a `session.update` event.
#[derive(Debug, Clone, Serialize)]
pub struct SessionUpdate {
    pub modalities: Vec<String>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub input_audio_transcription: AudioTranscription,
    pub turn_detection: TurnDetection,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioTranscription {
    pub model: String,
}

/// Server-side voice-activity detection parameters.
#[derive(Debug, Clone, Serialize)]
pub struct TurnDetection {
    pub r#type: String,
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

/// Declared schema for one callable tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub r#type: String,
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// A function tool taking a single required free-text `query` parameter.
    pub fn query_function(name: &str, description: &str) -> Self {
        Self {
            r#type: "function".to_string(),
            name: name.to_string(),
            description: description.to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query"
                    }
                },
                "required": ["query"]
            }),
        }
    }
}

/// An item inserted via `conversation.item.create`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    Message {
        role: String,
        content: Vec<ContentPart>,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

impl ConversationItem {
    pub fn user_text(text: &str) -> Self {
        Self::Message {
            role: "user".to_string(),
            content: vec![ContentPart::InputText {
                text: text.to_string(),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText { text: String },
}

/// The two tools this client declares and knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolName {
    WebSearch,
    DocumentSearch,
}

impl ToolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::WebSearch => "web_search",
            ToolName::DocumentSearch => "document_search",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "web_search" => Some(ToolName::WebSearch),
            "document_search" => Some(ToolName::DocumentSearch),
            _ => None,
        }
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A model-issued tool call, parsed from a `function_call_arguments.done`
/// event. The `call_id` is echoed back verbatim in the result event.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub tool: ToolName,
    pub call_id: String,
    pub query: String,
}

/// Why a tool-call event could not be turned into an invocation. The caller
/// still owes the model a result for the call id.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("unparseable tool arguments: {0}")]
    BadArguments(String),
}

impl ToolInvocation {
    /// Builds an invocation from the raw event fields. The argument payload
    /// is itself a JSON-encoded string and is parsed defensively; a missing
    /// `query` field yields an empty query rather than an error.
    pub fn parse(name: &str, call_id: &str, arguments: &str) -> Result<Self, InvocationError> {
        let tool =
            ToolName::parse(name).ok_or_else(|| InvocationError::UnknownTool(name.to_string()))?;

        #[derive(Deserialize)]
        struct Args {
            #[serde(default)]
            query: String,
        }
        let args: Args = serde_json::from_str(arguments)
            .map_err(|e| InvocationError::BadArguments(e.to_string()))?;

        Ok(Self {
            tool,
            call_id: call_id.to_string(),
            query: args.query,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_transcript_delta() {
        let raw = r#"{"type":"response.audio_transcript.delta","delta":"Hel"}"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        match event {
            ServerEvent::AudioTranscriptDelta { delta } => assert_eq!(delta, "Hel"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn decodes_function_call_arguments_done() {
        let raw = r#"{
            "type": "response.function_call_arguments.done",
            "name": "web_search",
            "call_id": "c1",
            "arguments": "{\"query\":\"KLIA weather\"}"
        }"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        let ServerEvent::FunctionCallArgumentsDone {
            name,
            call_id,
            arguments,
        } = event
        else {
            panic!("wrong variant");
        };
        let invocation = ToolInvocation::parse(&name, &call_id, &arguments).unwrap();
        assert_eq!(invocation.tool, ToolName::WebSearch);
        assert_eq!(invocation.call_id, "c1");
        assert_eq!(invocation.query, "KLIA weather");
    }

    #[test]
    fn unknown_event_type_is_unrecognized_not_error() {
        let raw = r#"{"type":"rate_limits.updated","rate_limits":[{"name":"requests"}]}"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        assert!(matches!(event, ServerEvent::Unrecognized));
    }

    #[test]
    fn extra_fields_on_known_events_are_ignored() {
        let raw = r#"{"type":"session.created","session":{"id":"sess_1"},"event_id":"e1"}"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        assert!(matches!(event, ServerEvent::SessionCreated {}));
    }

    #[test]
    fn invocation_rejects_unknown_tool() {
        let err = ToolInvocation::parse("weather_lookup", "c9", "{}").unwrap_err();
        assert!(matches!(err, InvocationError::UnknownTool(_)));
    }

    #[test]
    fn invocation_defaults_missing_query() {
        let invocation = ToolInvocation::parse("document_search", "c2", "{}").unwrap();
        assert_eq!(invocation.query, "");
    }

    #[test]
    fn invocation_rejects_malformed_arguments() {
        let err = ToolInvocation::parse("web_search", "c3", "{\"query\": ").unwrap_err();
        assert!(matches!(err, InvocationError::BadArguments(_)));
    }

    #[test]
    fn envelope_carries_type_and_event_id() {
        let event = ClientEvent::ResponseCreate {};
        let value = serde_json::to_value(OutboundEnvelope::wrap(&event)).unwrap();
        assert_eq!(value["type"], "response.create");
        assert!(value["event_id"].as_str().unwrap().len() > 10);
    }

    #[test]
    fn function_call_output_wire_shape() {
        let event = ClientEvent::ConversationItemCreate {
            item: ConversationItem::FunctionCallOutput {
                call_id: "c1".to_string(),
                output: "Sunny, 28°C".to_string(),
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "conversation.item.create");
        assert_eq!(value["item"]["type"], "function_call_output");
        assert_eq!(value["item"]["call_id"], "c1");
        assert_eq!(value["item"]["output"], "Sunny, 28°C");
    }

    #[test]
    fn session_update_declares_both_tools() {
        let session = SessionUpdate {
            modalities: vec!["text".into(), "audio".into()],
            instructions: "Be helpful.".into(),
            voice: "alloy".into(),
            input_audio_format: "pcm16".into(),
            output_audio_format: "pcm16".into(),
            input_audio_transcription: AudioTranscription {
                model: "whisper-1".into(),
            },
            turn_detection: TurnDetection {
                r#type: "server_vad".into(),
                threshold: 0.5,
                prefix_padding_ms: 200,
                silence_duration_ms: 700,
            },
            tools: vec![
                ToolDefinition::query_function("web_search", "Search the web"),
                ToolDefinition::query_function("document_search", "Search documents"),
            ],
            tool_choice: "auto".into(),
        };
        let value = serde_json::to_value(ClientEvent::SessionUpdate { session }).unwrap();
        assert_eq!(value["type"], "session.update");
        assert_eq!(value["session"]["turn_detection"]["type"], "server_vad");
        let tools = value["session"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0]["parameters"]["required"][0], "query");
    }
}
