use crate::models::profile::Profile;
use crate::models::role::Role;
use crate::models::session::Session;
use chrono::{DateTime, Utc};
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use serde_json::Value;
use uuid::Uuid;
use validator::{Validate, ValidationError};
use zxcvbn::{Score, zxcvbn};

/// Stored account row owned by the identity provider.
#[derive(Debug, sqlx::FromRow)]
pub struct UserAccount {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub user_metadata: sqlx::types::Json<Value>,
    pub email_confirmed_at: Option<DateTime<Utc>>,
}

/// The merged identity + profile view published by the coordinator.
#[derive(Serialize, Debug, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub avatar: String,
    pub profile: Option<Profile>,
}

impl User {
    pub fn from_session(session: &Session, role: Role, profile: Option<Profile>) -> Self {
        Self {
            id: session.user_id,
            name: profile.as_ref().map(|p| p.name().to_string()).unwrap_or_default(),
            email: session.email.clone(),
            role,
            avatar: avatar_initial(&session.email),
            profile,
        }
    }

    pub fn with_profile(&self, profile: Profile) -> Self {
        Self {
            name: profile.name().to_string(),
            profile: Some(profile),
            ..self.clone()
        }
    }
}

pub(crate) fn avatar_initial(email: &str) -> String {
    email
        .chars()
        .next()
        .map(|c| c.to_uppercase().collect())
        .unwrap_or_else(|| "U".to_string())
}

#[derive(Serialize, Debug, Copy, Clone, Eq, PartialEq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthPhase {
    Initializing,
    Unauthenticated,
    ResolvingProfile,
    Authenticated,
}

/// Complete published state; every transition replaces it wholesale.
#[derive(Serialize, Debug, Clone, PartialEq, JsonSchema)]
pub struct AuthSnapshot {
    pub phase: AuthPhase,
    pub user: Option<User>,
    pub loading: bool,
}

impl AuthSnapshot {
    pub fn initializing() -> Self {
        Self {
            phase: AuthPhase::Initializing,
            user: None,
            loading: true,
        }
    }

    pub fn unauthenticated() -> Self {
        Self {
            phase: AuthPhase::Unauthenticated,
            user: None,
            loading: false,
        }
    }

    /// Keeps `user` visible while its profile is re-read; loading only when there is nothing to show.
    pub fn resolving(user: Option<User>) -> Self {
        Self {
            phase: AuthPhase::ResolvingProfile,
            loading: user.is_none(),
            user,
        }
    }

    pub fn authenticated(user: User) -> Self {
        Self {
            phase: AuthPhase::Authenticated,
            user: Some(user),
            loading: false,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self.phase, AuthPhase::Unauthenticated | AuthPhase::Authenticated)
    }
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct SignUpRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8))]
    #[validate(custom(function = "validate_password_strength"))]
    pub password: String,
    pub role: Role,
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct SignInRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CurrentClassRequest {
    #[validate(length(min = 1))]
    pub current_class: String,
}

/// Result of a sign-up the provider accepted.
#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    /// Account created; the email must be confirmed before signing in.
    PendingVerification { user_id: Uuid },
    /// Account created and a session issued straight away.
    SignedIn(Session),
}

#[derive(Serialize, Debug, Copy, Clone, Eq, PartialEq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SignUpStatus {
    PendingVerification,
    SignedIn,
}

#[derive(Serialize, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignUpResponse {
    pub status: SignUpStatus,
    pub user_id: Uuid,
}

impl From<&SignUpOutcome> for SignUpResponse {
    fn from(outcome: &SignUpOutcome) -> Self {
        match outcome {
            SignUpOutcome::PendingVerification { user_id } => Self {
                status: SignUpStatus::PendingVerification,
                user_id: *user_id,
            },
            SignUpOutcome::SignedIn(session) => Self {
                status: SignUpStatus::SignedIn,
                user_id: session.user_id,
            },
        }
    }
}

/// What `update_profile` did.
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileUpdate {
    /// No user was signed in; nothing was written.
    Skipped,
    /// The profile was stored and published.
    Applied(User),
}

#[derive(Serialize, Debug, Copy, Clone, Eq, PartialEq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProfileUpdateStatus {
    Skipped,
    Applied,
}

#[derive(Serialize, Debug, JsonSchema)]
pub struct ProfileUpdateResponse {
    pub status: ProfileUpdateStatus,
    pub snapshot: AuthSnapshot,
}

pub fn validate_password_strength(password: &str) -> Result<(), ValidationError> {
    if zxcvbn(password, &[]).score() < Score::Three {
        return Err(ValidationError::new("password_too_weak"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{sample_session, sample_student_profile};

    #[test]
    fn avatar_is_upper_cased_first_letter() {
        assert_eq!(avatar_initial("asha@example.com"), "A");
        assert_eq!(avatar_initial(""), "U");
    }

    #[test]
    fn user_without_profile_has_empty_name() {
        let session = sample_session(Role::Faculty);
        let user = User::from_session(&session, Role::Faculty, None);
        assert_eq!(user.name, "");
        assert_eq!(user.role, Role::Faculty);
        assert_eq!(user.id, session.user_id);
        assert!(user.profile.is_none());
    }

    #[test]
    fn with_profile_replaces_name_and_profile() {
        let session = sample_session(Role::Student);
        let user = User::from_session(&session, Role::Student, None);
        let profile = Profile::Student(sample_student_profile());
        let updated = user.with_profile(profile.clone());
        assert_eq!(updated.name, profile.name());
        assert_eq!(updated.profile, Some(profile));
        assert_eq!(updated.email, user.email);
    }

    #[test]
    fn weak_passwords_are_rejected() {
        assert!(validate_password_strength("password").is_err());
        assert!(validate_password_strength("correct-horse-battery-staple-42").is_ok());
    }

    #[test]
    fn sign_up_request_requires_an_email() {
        let request = SignUpRequest {
            email: "not-an-email".to_string(),
            password: "correct-horse-battery-staple-42".to_string(),
            role: Role::Student,
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn snapshot_phases() {
        assert!(AuthSnapshot::initializing().loading);
        assert!(!AuthSnapshot::initializing().is_settled());
        assert!(AuthSnapshot::unauthenticated().is_settled());
        assert!(!AuthSnapshot::unauthenticated().loading);
    }
}
