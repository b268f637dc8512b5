//! HTTP-facing errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tenvis_huddle_core::ParticipantError;
use thiserror::Error;

/// Errors returned by the chat endpoints.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Nick failed validation.
    #[error("Invalid nick: {0}")]
    InvalidNick(&'static str),

    /// Nick is taken by another participant.
    #[error("Nick already in use: {0}")]
    NickInUse(String),

    /// No participant with this nick.
    #[error("Unknown nick: {0}")]
    UnknownNick(String),

    /// Message text is empty.
    #[error("Message text cannot be empty")]
    EmptyMessage,

    /// Message text exceeds the configured limit.
    #[error("Message too long: {0} bytes")]
    MessageTooLong(usize),

    /// Maximum participants reached.
    #[error("Maximum participants reached")]
    RoomFull,

    /// The participant left while its poll was outstanding.
    #[error("Participant left: {0}")]
    Gone(String),

    /// Delivery-layer refusal.
    #[error(transparent)]
    Participant(#[from] ParticipantError),
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidNick(_) | ApiError::EmptyMessage => StatusCode::BAD_REQUEST,
            ApiError::MessageTooLong(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NickInUse(_)
            | ApiError::Participant(ParticipantError::ConflictingWaiter(_)) => {
                StatusCode::CONFLICT
            }
            ApiError::Participant(ParticipantError::NoRuntime(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::UnknownNick(_) => StatusCode::NOT_FOUND,
            ApiError::RoomFull => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Gone(_) => StatusCode::GONE,
        }
    }

    /// Short label used for error metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::InvalidNick(_) => "invalid_nick",
            ApiError::NickInUse(_) => "nick_in_use",
            ApiError::UnknownNick(_) => "unknown_nick",
            ApiError::EmptyMessage => "empty_message",
            ApiError::MessageTooLong(_) => "message_too_long",
            ApiError::RoomFull => "room_full",
            ApiError::Gone(_) => "gone",
            ApiError::Participant(ParticipantError::ConflictingWaiter(_)) => "conflicting_poll",
            ApiError::Participant(ParticipantError::NoRuntime(_)) => "no_runtime",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        crate::metrics::record_error(self.kind());
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status() {
        assert_eq!(
            ApiError::UnknownNick("ghost".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::NickInUse("alice".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(ParticipantError::ConflictingWaiter("alice".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(ParticipantError::NoRuntime("alice".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ApiError::Gone("bob".into()).status(), StatusCode::GONE);
    }

    #[test]
    fn test_error_response() {
        let response = ApiError::InvalidNick("Nick cannot be empty").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
