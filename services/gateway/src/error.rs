//! HTTP error surface for the gateway handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use tracing::error;

/// JSON body returned for every non-success response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    /// The upstream provider rejected or failed the request.
    Upstream(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Upstream(message) => {
                error!(%message, "upstream provider failure");
                (StatusCode::BAD_GATEWAY, Json(ErrorResponse { message })).into_response()
            }
        }
    }
}
