//! Error types for civicd.

use axum::extract::ws::CloseFrame;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Failures on the request side: REST producers and durable writes made from
/// a channel frame.
#[derive(Debug, thiserror::Error)]
pub enum CivicError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(#[from] AuthError),
}

impl CivicError {
    /// Short machine-readable code, used in `error` frames on the chat channel.
    pub fn code(&self) -> &'static str {
        match self {
            CivicError::Db(_) | CivicError::Unavailable(_) => "server_error",
            CivicError::NotFound(_) => "not_found",
            CivicError::Forbidden(_) => "forbidden",
            CivicError::BadRequest(_) => "bad_request",
            CivicError::Unauthorized(_) => "unauthorized",
        }
    }
}

impl IntoResponse for CivicError {
    fn into_response(self) -> Response {
        let status = match &self {
            CivicError::NotFound(_) => StatusCode::NOT_FOUND,
            CivicError::Forbidden(_) => StatusCode::FORBIDDEN,
            CivicError::BadRequest(_) => StatusCode::BAD_REQUEST,
            CivicError::Unauthorized(AuthError::Suspended) => StatusCode::FORBIDDEN,
            CivicError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            CivicError::Db(_) | CivicError::Unavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        }
        (status, self.to_string()).into_response()
    }
}

/// WebSocket close code sent when a handshake is rejected (policy violation).
pub const CLOSE_UNAUTHORIZED: u16 = 1008;

/// Why a credential did not yield a usable identity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,

    #[error("token expired")]
    Expired,

    #[error("invalid token")]
    InvalidToken,

    #[error("unknown user")]
    UnknownUser,

    #[error("user_id mismatch")]
    UserMismatch,

    #[error("user is suspended")]
    Suspended,

    #[error("identity lookup failed")]
    Lookup,
}

impl AuthError {
    /// Credential problems (as opposed to a valid identity that may not
    /// open this channel).
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            AuthError::MissingToken
                | AuthError::Expired
                | AuthError::InvalidToken
                | AuthError::UnknownUser
                | AuthError::Lookup
        )
    }

    pub fn close_frame(&self) -> CloseFrame {
        CloseFrame {
            code: CLOSE_UNAUTHORIZED,
            reason: format!("Unauthorized: {self}").into(),
        }
    }
}
