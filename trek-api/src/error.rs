use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use trek_core::EngineError;

#[derive(Debug)]
pub enum AppError {
    AuthenticationError(String),
    AuthorizationError(String),
    Engine(EngineError),
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        Self::Engine(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::AuthenticationError(msg) => {
                (StatusCode::UNAUTHORIZED, json!({ "error": msg }))
            }
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, json!({ "error": msg })),
            AppError::Engine(err) => match err {
                EngineError::Validation { field, message } => (
                    StatusCode::BAD_REQUEST,
                    json!({ "error": message, "field": field }),
                ),
                EngineError::Conflict(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
                EngineError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
                EngineError::Signature(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
                EngineError::Gateway(msg) => {
                    tracing::error!("Gateway error: {}", msg);
                    (
                        StatusCode::BAD_GATEWAY,
                        json!({ "error": "payment provider unavailable" }),
                    )
                }
                EngineError::SideEffect(msg) | EngineError::Store(msg) => {
                    tracing::error!("Internal Server Error: {}", msg);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        json!({ "error": "Internal Server Error" }),
                    )
                }
            },
        };

        (status, Json(body)).into_response()
    }
}
