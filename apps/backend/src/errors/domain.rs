//! Domain-level error type used across the session engine and services.
//!
//! This error type is HTTP-agnostic. Realtime handlers report it to the
//! offending connection as a coded error event; HTTP handlers convert it
//! through `From<GameError> for AppError`.

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Central domain error taxonomy.
///
/// Codes are stable SCREAMING_SNAKE_CASE strings; add variants here rather
/// than passing ad-hoc strings around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameError {
    /// Operation referenced an unknown session id.
    SessionNotFound(String),
    /// Operation referenced an unknown room code.
    RoomNotFound(String),
    /// Room already has two players.
    RoomFull(String),
    /// Operation illegal in the session's current status.
    InvalidTransition(String),
    /// Sequential mode: submission from a slot that is not next in order.
    NotYourTurn(String),
    /// Connection does not own the slot it claims.
    Unauthorized(String),
    /// Malformed or out-of-bounds input.
    Validation(String),
    /// Completion service transport or quota failure.
    ExternalService(String),
}

impl GameError {
    pub fn session_not_found(detail: impl Into<String>) -> Self {
        Self::SessionNotFound(detail.into())
    }
    pub fn room_not_found(detail: impl Into<String>) -> Self {
        Self::RoomNotFound(detail.into())
    }
    pub fn invalid_transition(detail: impl Into<String>) -> Self {
        Self::InvalidTransition(detail.into())
    }
    pub fn not_your_turn(detail: impl Into<String>) -> Self {
        Self::NotYourTurn(detail.into())
    }
    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::Unauthorized(detail.into())
    }
    pub fn validation(detail: impl Into<String>) -> Self {
        Self::Validation(detail.into())
    }
    pub fn external_service(detail: impl Into<String>) -> Self {
        Self::ExternalService(detail.into())
    }

    /// Stable wire code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            GameError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            GameError::RoomNotFound(_) => "ROOM_NOT_FOUND",
            GameError::RoomFull(_) => "ROOM_FULL",
            GameError::InvalidTransition(_) => "INVALID_TRANSITION",
            GameError::NotYourTurn(_) => "NOT_YOUR_TURN",
            GameError::Unauthorized(_) => "UNAUTHORIZED",
            GameError::Validation(_) => "VALIDATION_ERROR",
            GameError::ExternalService(_) => "EXTERNAL_SERVICE_FAILURE",
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            GameError::SessionNotFound(d)
            | GameError::RoomNotFound(d)
            | GameError::RoomFull(d)
            | GameError::InvalidTransition(d)
            | GameError::NotYourTurn(d)
            | GameError::Unauthorized(d)
            | GameError::Validation(d)
            | GameError::ExternalService(d) => d,
        }
    }
}

impl Display for GameError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}: {}", self.code(), self.detail())
    }
}

impl Error for GameError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn codes_are_unique() {
        let all = [
            GameError::session_not_found("a"),
            GameError::room_not_found("a"),
            GameError::RoomFull("a".into()),
            GameError::invalid_transition("a"),
            GameError::not_your_turn("a"),
            GameError::unauthorized("a"),
            GameError::validation("a"),
            GameError::external_service("a"),
        ];
        let codes: HashSet<&str> = all.iter().map(|e| e.code()).collect();
        assert_eq!(codes.len(), all.len());
    }

    #[test]
    fn display_includes_code_and_detail() {
        let err = GameError::not_your_turn("patient-2 acted out of order");
        assert_eq!(err.to_string(), "NOT_YOUR_TURN: patient-2 acted out of order");
    }
}
