//! Realtime session configuration.
//!
//! Everything the voice layer needs at connect time: the trusted-backend
//! endpoints, the remote model identity, audio and turn-detection
//! parameters, the search backend endpoints and the network timeouts.
//! Loaded from the environment at startup, with defaults suitable for a
//! locally running gateway.

use crate::events::{
    AudioTranscription, SessionUpdate, ToolDefinition, ToolName, TurnDetection,
};
use std::time::Duration;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Server-side voice-activity-detection tuning.
#[derive(Debug, Clone)]
pub struct VadConfig {
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 200,
            silence_duration_ms: 700,
        }
    }
}

/// Holds all realtime-layer configuration.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Trusted backend endpoint that mints short-lived session credentials.
    pub credential_url: String,
    /// Remote signaling endpoint for the SDP offer/answer exchange.
    pub sdp_url: String,
    pub model: String,
    pub voice: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub transcription_model: String,
    pub vad: VadConfig,
    /// Streaming search backend for the `web_search` tool.
    pub web_search_url: String,
    /// Streaming search backend for the `document_search` tool.
    pub document_search_url: String,
    /// Bound on each bootstrap network await (credential fetch, SDP
    /// exchange, channel open).
    pub connect_timeout: Duration,
    /// Bound on one complete tool-backend stream, connect included.
    pub tool_stream_timeout: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            credential_url: "http://127.0.0.1:8787/api/voice/token".to_string(),
            sdp_url: "https://api.openai.com/v1/realtime".to_string(),
            model: "gpt-4o-realtime-preview-2024-12-17".to_string(),
            voice: "alloy".to_string(),
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            transcription_model: "whisper-1".to_string(),
            vad: VadConfig::default(),
            web_search_url: "http://127.0.0.1:8787/api/search/web".to_string(),
            document_search_url: "http://127.0.0.1:8787/api/search/documents".to_string(),
            connect_timeout: Duration::from_secs(15),
            tool_stream_timeout: Duration::from_secs(60),
        }
    }
}

impl RealtimeConfig {
    /// Loads configuration from environment variables, falling back to the
    /// defaults above for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("MESRA_CREDENTIAL_URL") {
            config.credential_url = v;
        }
        if let Ok(v) = std::env::var("MESRA_SDP_URL") {
            config.sdp_url = v;
        }
        if let Ok(v) = std::env::var("MESRA_REALTIME_MODEL") {
            config.model = v;
        }
        if let Ok(v) = std::env::var("MESRA_VOICE") {
            config.voice = v;
        }
        if let Ok(v) = std::env::var("MESRA_WEB_SEARCH_URL") {
            config.web_search_url = v;
        }
        if let Ok(v) = std::env::var("MESRA_DOCUMENT_SEARCH_URL") {
            config.document_search_url = v;
        }
        config.connect_timeout = duration_var("MESRA_CONNECT_TIMEOUT_SECS", config.connect_timeout)?;
        config.tool_stream_timeout =
            duration_var("MESRA_TOOL_TIMEOUT_SECS", config.tool_stream_timeout)?;

        Ok(config)
    }

    /// The streaming backend endpoint serving a given tool.
    pub fn tool_endpoint(&self, tool: ToolName) -> &str {
        match tool {
            ToolName::WebSearch => &self.web_search_url,
            ToolName::DocumentSearch => &self.document_search_url,
        }
    }

    /// Builds the session-configuration event payload sent immediately on
    /// channel open. Every capability the session relies on (transcription,
    /// turn detection, tool calling) is declared here.
    pub fn session_update(&self, instructions: &str) -> SessionUpdate {
        SessionUpdate {
            modalities: vec!["text".to_string(), "audio".to_string()],
            instructions: instructions.to_string(),
            voice: self.voice.clone(),
            input_audio_format: self.input_audio_format.clone(),
            output_audio_format: self.output_audio_format.clone(),
            input_audio_transcription: AudioTranscription {
                model: self.transcription_model.clone(),
            },
            turn_detection: TurnDetection {
                r#type: "server_vad".to_string(),
                threshold: self.vad.threshold,
                prefix_padding_ms: self.vad.prefix_padding_ms,
                silence_duration_ms: self.vad.silence_duration_ms,
            },
            tools: vec![
                ToolDefinition::query_function(
                    ToolName::WebSearch.as_str(),
                    "Search the web for current information such as weather, news or schedules.",
                ),
                ToolDefinition::query_function(
                    ToolName::DocumentSearch.as_str(),
                    "Search the indexed government service documents and procedures.",
                ),
            ],
            tool_choice: "auto".to_string(),
        }
    }
}

fn duration_var(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => {
            let secs: u64 = raw
                .parse()
                .map_err(|_| ConfigError::InvalidValue(name.to_string(), raw.clone()))?;
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("MESRA_CREDENTIAL_URL");
            env::remove_var("MESRA_SDP_URL");
            env::remove_var("MESRA_REALTIME_MODEL");
            env::remove_var("MESRA_VOICE");
            env::remove_var("MESRA_WEB_SEARCH_URL");
            env::remove_var("MESRA_DOCUMENT_SEARCH_URL");
            env::remove_var("MESRA_CONNECT_TIMEOUT_SECS");
            env::remove_var("MESRA_TOOL_TIMEOUT_SECS");
        }
    }

    #[test]
    #[serial]
    fn defaults_when_env_is_empty() {
        clear_env_vars();
        let config = RealtimeConfig::from_env().expect("defaults should load");
        assert_eq!(config.voice, "alloy");
        assert_eq!(config.connect_timeout, Duration::from_secs(15));
        assert_eq!(config.tool_stream_timeout, Duration::from_secs(60));
        assert_eq!(config.vad.threshold, 0.5);
    }

    #[test]
    #[serial]
    fn env_overrides_are_applied() {
        clear_env_vars();
        unsafe {
            env::set_var("MESRA_VOICE", "verse");
            env::set_var("MESRA_WEB_SEARCH_URL", "http://search.test/web");
            env::set_var("MESRA_CONNECT_TIMEOUT_SECS", "3");
        }
        let config = RealtimeConfig::from_env().expect("config should load");
        assert_eq!(config.voice, "verse");
        assert_eq!(config.web_search_url, "http://search.test/web");
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        clear_env_vars();
    }

    #[test]
    #[serial]
    fn invalid_timeout_is_rejected() {
        clear_env_vars();
        unsafe {
            env::set_var("MESRA_CONNECT_TIMEOUT_SECS", "soon");
        }
        let err = RealtimeConfig::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "MESRA_CONNECT_TIMEOUT_SECS"),
            other => panic!("expected InvalidValue, got {:?}", other),
        }
        clear_env_vars();
    }

    #[test]
    fn tool_endpoints_route_by_name() {
        let config = RealtimeConfig::default();
        assert_eq!(config.tool_endpoint(ToolName::WebSearch), config.web_search_url);
        assert_eq!(
            config.tool_endpoint(ToolName::DocumentSearch),
            config.document_search_url
        );
    }

    #[test]
    fn session_update_declares_every_capability() {
        let config = RealtimeConfig::default();
        let update = config.session_update("Assist citizens politely.");
        assert_eq!(update.modalities, vec!["text", "audio"]);
        assert_eq!(update.instructions, "Assist citizens politely.");
        assert_eq!(update.input_audio_transcription.model, "whisper-1");
        assert_eq!(update.turn_detection.r#type, "server_vad");
        assert_eq!(update.tools.len(), 2);
        assert_eq!(update.tool_choice, "auto");
    }
}
