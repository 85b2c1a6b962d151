//! Axum Handlers for credential minting and health.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::State;
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub instructions: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    pub expires_at: i64,
}

#[derive(Deserialize)]
struct UpstreamSession {
    client_secret: UpstreamSecret,
}

#[derive(Deserialize)]
struct UpstreamSecret {
    value: String,
    expires_at: i64,
}

/// Mints a short-lived realtime session credential from the upstream
/// provider. The long-lived provider key stays in this process; callers
/// only ever see the ephemeral secret, which the provider invalidates when
/// the session ends.
pub async fn mint_token(
    State(state): State<AppState>,
    Json(payload): Json<TokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.instructions.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "instructions must not be empty".to_string(),
        ));
    }
    let model = payload
        .model
        .unwrap_or_else(|| state.config.realtime_model.clone());
    let voice = payload.voice.unwrap_or_else(|| state.config.voice.clone());

    let response = state
        .http
        .post(format!(
            "{}/realtime/sessions",
            state.config.openai_base_url
        ))
        .bearer_auth(&state.config.openai_api_key)
        .json(&serde_json::json!({
            "model": model,
            "voice": voice,
            "instructions": payload.instructions,
            "modalities": ["text", "audio"],
        }))
        .send()
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?;

    if !response.status().is_success() {
        return Err(ApiError::Upstream(format!(
            "credential mint returned status {}",
            response.status()
        )));
    }

    let session: UpstreamSession = response
        .json()
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?;
    info!(model = %model, "minted realtime session credential");

    Ok(Json(TokenResponse {
        token: session.client_secret.value,
        expires_at: session.client_secret.expires_at,
    }))
}

pub async fn healthz() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tracing::Level;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_state(server: &MockServer) -> AppState {
        AppState::new(Config {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            openai_api_key: "sk-test".to_string(),
            openai_base_url: server.uri(),
            realtime_model: "rt-model".to_string(),
            voice: "alloy".to_string(),
            web_search_model: "search-model".to_string(),
            document_search_model: "doc-model".to_string(),
            log_level: Level::INFO,
        })
    }

    fn request(instructions: &str) -> TokenRequest {
        TokenRequest {
            instructions: instructions.to_string(),
            model: None,
            voice: None,
        }
    }

    #[tokio::test]
    async fn mints_a_token_with_the_configured_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/realtime/sessions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_string_contains("rt-model"))
            .and(body_string_contains("Assist citizens"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "sess_1",
                "client_secret": {"value": "ek_abc123", "expires_at": 1_735_000_000}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let state = test_state(&server);
        let response = mint_token(State(state), Json(request("Assist citizens")))
            .await
            .map(|r| r.into_response())
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn empty_instructions_are_rejected_locally() {
        let server = MockServer::start().await;
        let state = test_state(&server);
        let err = mint_token(State(state), Json(request("   ")))
            .await
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn upstream_rejection_maps_to_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/realtime/sessions"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let state = test_state(&server);
        let err = mint_token(State(state), Json(request("hello")))
            .await
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, ApiError::Upstream(_)));
    }
}
