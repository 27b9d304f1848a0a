//! Client-facing errors of the request pipeline
//!
//! Every error renders as `{"error": "<message>"}`. Internal causes are
//! logged where the error is raised and never included in the body.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProxyError {
    /// Body was not a valid canonical request
    #[error("Invalid JSON")]
    InvalidJson,

    #[error("API key (x-api-key header) or Authorization header required")]
    MissingCredentials,

    /// Request arrived in a dialect other than the canonical one
    #[error(
        "This proxy only accepts the Anthropic Messages API at /v1/messages; \
         /v1/chat/completions is not supported"
    )]
    UnsupportedDialect,

    /// No configured provider can serve the request
    #[error("Internal routing error")]
    Routing,

    /// Upstream could not be reached or its response could not be read
    #[error("Failed to forward request")]
    Forwarding,

    #[error("Not found")]
    NotFound,

    #[error("Storage error")]
    Storage,
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidJson | ProxyError::UnsupportedDialect => StatusCode::BAD_REQUEST,
            ProxyError::MissingCredentials => StatusCode::UNAUTHORIZED,
            ProxyError::Routing | ProxyError::Storage => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Forwarding => StatusCode::BAD_GATEWAY,
            ProxyError::NotFound => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}
