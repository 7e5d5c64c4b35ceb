//! Authentication error types.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Why a request failed bearer authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    NotAuthenticated,
    InvalidToken,
}

/// API authentication error (JSON body plus a `WWW-Authenticate` challenge).
#[derive(Debug)]
pub struct ApiAuthError {
    pub kind: AuthErrorKind,
}

impl ApiAuthError {
    pub(super) fn new(kind: AuthErrorKind) -> Self {
        Self { kind }
    }

    fn message(&self) -> &'static str {
        match self.kind {
            AuthErrorKind::NotAuthenticated => "Not authenticated",
            AuthErrorKind::InvalidToken => "Invalid or expired token",
        }
    }

    fn challenge(&self) -> &'static str {
        match self.kind {
            AuthErrorKind::NotAuthenticated => "Bearer",
            AuthErrorKind::InvalidToken => "Bearer error=\"invalid_token\"",
        }
    }
}

impl IntoResponse for ApiAuthError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: &'static str,
        }

        let mut response = (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: self.message(),
            }),
        )
            .into_response();

        response.headers_mut().insert(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static(self.challenge()),
        );

        response
    }
}
