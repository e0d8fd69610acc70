//! Session identity for websocket connections.
//!
//! The rest of the application issues mock bearer tokens of the form
//! `mock_jwt_token_{userId}`. The duel server trusts the user id carried by the
//! token, never the one claimed inside an event payload.

use crate::error::{DuelError, Result};

const TOKEN_PREFIX: &str = "mock_jwt_token_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub user_id: i64,
}

impl Session {
    pub fn new(user_id: i64) -> Self {
        Self { user_id }
    }

    /// Rejects payloads that claim to act for a different user.
    pub fn ensure_user(&self, claimed: i64) -> Result<()> {
        if claimed != self.user_id {
            return Err(DuelError::IdentityMismatch {
                claimed,
                session: self.user_id,
            });
        }
        Ok(())
    }
}

/// Resolves a session from a `token` query value or an `Authorization` header.
/// The query value wins because browsers cannot set headers on websocket upgrades.
pub fn authenticate(query_token: Option<&str>, authorization: Option<&str>) -> Result<Session> {
    let token = query_token
        .filter(|t| !t.is_empty())
        .or_else(|| authorization.and_then(bearer_token))
        .ok_or(DuelError::MissingToken)?;

    verify_token(token)
}

fn bearer_token(header: &str) -> Option<&str> {
    let mut parts = header.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(scheme), Some(token)) if scheme.eq_ignore_ascii_case("bearer") => Some(token),
        _ => None,
    }
}

pub fn verify_token(token: &str) -> Result<Session> {
    token
        .strip_prefix(TOKEN_PREFIX)
        .and_then(|id| id.parse::<i64>().ok())
        .map(Session::new)
        .ok_or(DuelError::InvalidToken)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_mock_token() {
        let session = verify_token("mock_jwt_token_42").unwrap();
        assert_eq!(session.user_id, 42);
    }

    #[test]
    fn test_verify_rejects_foreign_token() {
        assert!(matches!(verify_token("eyJhbGciOi"), Err(DuelError::InvalidToken)));
        assert!(matches!(verify_token("mock_jwt_token_abc"), Err(DuelError::InvalidToken)));
    }

    #[test]
    fn test_authenticate_prefers_query() {
        let session = authenticate(
            Some("mock_jwt_token_7"),
            Some("Bearer mock_jwt_token_8"),
        )
        .unwrap();
        assert_eq!(session.user_id, 7);
    }

    #[test]
    fn test_authenticate_from_header() {
        let session = authenticate(None, Some("Bearer mock_jwt_token_8")).unwrap();
        assert_eq!(session.user_id, 8);
    }

    #[test]
    fn test_authenticate_missing() {
        assert!(matches!(authenticate(None, None), Err(DuelError::MissingToken)));
        assert!(matches!(
            authenticate(Some(""), Some("Basic abc")),
            Err(DuelError::MissingToken)
        ));
    }

    #[test]
    fn test_ensure_user() {
        let session = Session::new(99);
        assert!(session.ensure_user(99).is_ok());
        assert!(matches!(
            session.ensure_user(100),
            Err(DuelError::IdentityMismatch { claimed: 100, session: 99 })
        ));
    }
}
