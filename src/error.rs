//! Error taxonomy shared by the services and the HTTP boundary.
//!
//! Client-facing messages are chosen here. Authorization failures always surface
//! with the same phrase; the specific [`AuthFailure`] kind is only logged.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Message returned for every authorization failure.
pub const UNAUTHORIZED_MESSAGE: &str = "invalid credentials";

const INTERNAL_MESSAGE: &str = "internal server error";

/// Why a credential was rejected. Never shown to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("no refresh token presented")]
    MissingToken,
    #[error("refresh token is not whitelisted")]
    NotWhitelisted,
    #[error("invalid token")]
    InvalidToken,
    #[error("token expired")]
    Expired,
    #[error("unexpected signing algorithm")]
    WrongAlgorithm,
    #[error("whitelist owner does not match token subject")]
    SubjectMismatch,
    #[error("bad credentials")]
    BadCredentials,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{message}")]
    MalformedInput { status: StatusCode, message: String },
    #[error("{0}")]
    Validation(String),
    #[error("unauthorized: {0}")]
    Unauthorized(AuthFailure),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedInput {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MalformedInput { status, .. } => *status,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The message a client is allowed to see.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::MalformedInput { message, .. } => message.clone(),
            Self::Validation(message) | Self::Conflict(message) => message.clone(),
            Self::Unauthorized(_) => UNAUTHORIZED_MESSAGE.to_string(),
            Self::Internal(_) => INTERNAL_MESSAGE.to_string(),
        }
    }
}

impl From<AuthFailure> for Error {
    fn from(failure: AuthFailure) -> Self {
        Self::Unauthorized(failure)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Self::Internal(err) => error!("Internal error: {err:#}"),
            Self::Unauthorized(reason) => warn!(%reason, "Authorization failed"),
            other => warn!("Rejected request: {other}"),
        }

        let body = json!({ "error": { "message": self.public_message() } });

        (self.status(), Json(body)).into_response()
    }
}
