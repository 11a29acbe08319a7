use crate::fetcher::FetchError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use proxy_core::{is_cart_path, ResolveError};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("bad request: {0}")]
    BadRequest(String),
}

#[derive(Serialize)]
struct CartErrorBody {
    error: &'static str,
    message: String,
    description: &'static str,
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Resolve(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Fetch(FetchError::RateLimited { .. }) => StatusCode::TOO_MANY_REQUESTS,
            Self::Fetch(FetchError::InvalidUrl(_)) => StatusCode::BAD_REQUEST,
            Self::Fetch(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Cart paths get a JSON body the storefront UI can render, everything
    /// else plain text.
    pub fn into_response_for(self, path: &str) -> Response {
        let status = self.status_code();
        if is_cart_path(path) {
            let body = CartErrorBody {
                error: if status.is_client_error() {
                    "Cart request rejected"
                } else {
                    "Cart request failed"
                },
                message: self.to_string(),
                description: "Please try again in a moment",
            };
            return (status, Json(body)).into_response();
        }
        let message = match &self {
            Self::Resolve(ResolveError::NoTargetSpecified) => "No target specified".to_string(),
            other if status.is_server_error() => format!("Request failed: {other}"),
            other => other.to_string(),
        };
        (status, message).into_response()
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        self.into_response_for("")
    }
}
