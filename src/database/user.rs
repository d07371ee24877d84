use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::user::UserAccount;
use argon2::Argon2;
use password_hash::rand_core::OsRng;
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use serde_json::Value;
use std::sync::LazyLock;

/// A real Argon2 hash generated once, verified against when the email is unknown
/// so that sign-in latency does not reveal which accounts exist.
static DUMMY_HASH: LazyLock<Option<String>> = LazyLock::new(|| {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(b"dummy-never-matches", &salt)
        .ok()
        .map(|hash| hash.to_string())
});

impl PostgresRepository {
    pub async fn create_user(&self, email: &str, password: &str, user_metadata: &Value, confirmed: bool) -> Result<UserAccount, AppError> {
        let password_hash = hash_password(password)?;

        let user = sqlx::query_as::<_, UserAccount>(
            r#"
            INSERT INTO users (email, password_hash, user_metadata, email_confirmed_at)
            VALUES ($1, $2, $3, CASE WHEN $4 THEN now() ELSE NULL END)
            RETURNING id, email, password_hash, user_metadata, email_confirmed_at
            "#,
        )
        .bind(email)
        .bind(&password_hash)
        .bind(sqlx::types::Json(user_metadata))
        .bind(confirmed)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<UserAccount>, AppError> {
        let user = sqlx::query_as::<_, UserAccount>(
            r#"
            SELECT id, email, password_hash, user_metadata, email_confirmed_at
            FROM users
            WHERE lower(email) = lower($1)
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    pub fn verify_password(user: &UserAccount, password: &str) -> Result<(), AppError> {
        let password_hash = PasswordHash::new(&user.password_hash).map_err(|e| AppError::password_hash("Failed to parse stored password hash", e))?;
        Argon2::default()
            .verify_password(password.as_bytes(), &password_hash)
            .map_err(|_| AppError::InvalidCredentials)?;

        Ok(())
    }

    pub fn dummy_verify(password: &str) {
        if let Some(hash) = DUMMY_HASH.as_deref()
            && let Ok(hash) = PasswordHash::new(hash)
        {
            let _ = Argon2::default().verify_password(password.as_bytes(), &hash);
        }
    }
}

pub(crate) fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}
