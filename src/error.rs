//! 统一的 API 错误类型与转换。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::dropbox::DropboxError;

/// Marker planted on the response of a rejected-token error so the
/// recovery middleware can dispatch on the error kind.
#[derive(Clone, Copy, Debug)]
pub struct TokenRejectedMarker;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
    Upstream(u16, String),
    OAuthCallback(String),
    TokenRejected,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
            ApiError::Upstream(status, body) => (
                StatusCode::BAD_GATEWAY,
                format!("remote api returned {status}: {body}"),
            )
                .into_response(),
            ApiError::OAuthCallback(msg) => (
                StatusCode::BAD_GATEWAY,
                format!("oauth authorization failed: {msg}"),
            )
                .into_response(),
            ApiError::TokenRejected => {
                let mut response =
                    (StatusCode::UNAUTHORIZED, "access token rejected").into_response();
                response.extensions_mut().insert(TokenRejectedMarker);
                response
            }
        }
    }
}

impl From<DropboxError> for ApiError {
    fn from(error: DropboxError) -> Self {
        match error {
            DropboxError::TokenRejected => ApiError::TokenRejected,
            DropboxError::Api { status, body } => ApiError::Upstream(status, body),
            DropboxError::Http(err) => ApiError::Upstream(502, err.to_string()),
        }
    }
}
