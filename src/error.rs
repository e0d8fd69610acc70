use thiserror::Error;

/// Custom error types for the duel server
#[derive(Debug, Error)]
pub enum DuelError {
    /// Room lifecycle errors
    #[error("No active duel for class {0}")]
    RoomNotFound(String),

    #[error("Duel for class {0} already started")]
    GameAlreadyStarted(String),

    #[error("Duel for class {0} is already starting")]
    StartInProgress(String),

    #[error("Duel for class {0} has no study set selected")]
    MissingStudySet(String),

    #[error("Duel for class {0} was replaced while starting")]
    StaleStart(String),

    /// Authorization errors
    #[error("Only the host can start the duel for class {0}")]
    NotHost(String),

    #[error("Class {0} already has a live duel hosted by another user")]
    RoomOwnedByAnotherHost(String),

    #[error("Claimed user {claimed} does not match session user {session}")]
    IdentityMismatch { claimed: i64, session: i64 },

    #[error("Missing access token")]
    MissingToken,

    #[error("Invalid or expired token")]
    InvalidToken,

    /// Signaling errors
    #[error("Invalid duel event: {0}")]
    InvalidEvent(String),

    #[error("Failed to serialize message: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Term lookup errors
    #[error("Failed to load terms: {0}")]
    TermSource(String),

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Convenience type alias for Results using DuelError
pub type Result<T> = std::result::Result<T, DuelError>;

impl DuelError {
    pub fn term_source(msg: impl Into<String>) -> Self {
        DuelError::TermSource(msg.into())
    }

    /// True for errors that mean the caller is not allowed to do what it asked.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            DuelError::NotHost(_)
                | DuelError::RoomOwnedByAnotherHost(_)
                | DuelError::IdentityMismatch { .. }
                | DuelError::MissingToken
                | DuelError::InvalidToken
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DuelError::RoomNotFound("C1".to_string());
        assert_eq!(err.to_string(), "No active duel for class C1");
    }

    #[test]
    fn test_identity_mismatch_display() {
        let err = DuelError::IdentityMismatch { claimed: 7, session: 42 };
        assert_eq!(err.to_string(), "Claimed user 7 does not match session user 42");
    }

    #[test]
    fn test_unauthorized_classification() {
        assert!(DuelError::NotHost("C1".into()).is_unauthorized());
        assert!(DuelError::InvalidToken.is_unauthorized());
        assert!(!DuelError::GameAlreadyStarted("C1".into()).is_unauthorized());
    }

    #[test]
    fn test_error_helpers() {
        let err = DuelError::term_source("database unavailable");
        assert_eq!(err.to_string(), "Failed to load terms: database unavailable");
    }
}
