use crate::models::role::Role;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Proof of an authenticated identity, as issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub email: String,
    pub user_metadata: Value,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn role(&self) -> Option<Role> {
        Role::from_metadata(&self.user_metadata)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Value stored in the client's session cookie so the session can be restored later.
    pub fn cookie_value(&self) -> String {
        format!("{}:{}", self.id, self.user_id)
    }
}

/// Session lifecycle notifications emitted by an identity provider.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SignedIn(Session),
    TokenRefreshed(Session),
    UserUpdated(Session),
    SignedOut,
    Expired,
}

impl SessionEvent {
    /// The session the event leaves in place, `None` for session loss.
    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionEvent::SignedIn(session) | SessionEvent::TokenRefreshed(session) | SessionEvent::UserUpdated(session) => Some(session),
            SessionEvent::SignedOut | SessionEvent::Expired => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::SignedIn(_) => "signed_in",
            SessionEvent::TokenRefreshed(_) => "token_refreshed",
            SessionEvent::UserUpdated(_) => "user_updated",
            SessionEvent::SignedOut => "signed_out",
            SessionEvent::Expired => "expired",
        }
    }
}

/// Active session joined with its user, as read back from storage.
#[derive(Debug, sqlx::FromRow)]
pub struct SessionUser {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub email: String,
    pub user_metadata: sqlx::types::Json<Value>,
    pub expires_at: DateTime<Utc>,
}

impl From<SessionUser> for Session {
    fn from(row: SessionUser) -> Self {
        Self {
            id: row.session_id,
            user_id: row.user_id,
            email: row.email,
            user_metadata: row.user_metadata.0,
            expires_at: row.expires_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct SessionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}
