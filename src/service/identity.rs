use crate::config::AuthConfig;
use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::session::{Session, SessionEvent, SessionRow, SessionUser};
use crate::models::user::SignUpOutcome;
use chrono::{Duration, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Session-based identity service consumed by the coordinator.
///
/// Implementations own the session; callers only observe it through
/// [`IdentityProvider::current_session`] and the event subscription.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_session(&self) -> Result<Option<Session>, AppError>;

    /// Receives every session change emitted after the call.
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;

    async fn sign_up(&self, email: &str, password: &str, user_metadata: Value) -> Result<SignUpOutcome, AppError>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AppError>;

    async fn sign_out(&self) -> Result<(), AppError>;

    async fn refresh_session(&self) -> Result<Session, AppError>;
}

/// Identity provider for one client, backed by the `users` and `user_session` tables.
pub struct PostgresIdentityProvider {
    repo: PostgresRepository,
    auth: AuthConfig,
    current: Arc<Mutex<Option<Session>>>,
    restore_hint: Mutex<Option<(Uuid, Uuid)>>,
    events: broadcast::Sender<SessionEvent>,
    expiry_watch: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Clears `current` and emits [`SessionEvent::Expired`] once `session` runs out,
/// unless it has been replaced or extended by then.
pub(crate) fn spawn_expiry_watch(current: Arc<Mutex<Option<Session>>>, events: broadcast::Sender<SessionEvent>, session: &Session) -> JoinHandle<()> {
    let session_id = session.id;
    let expires_at = session.expires_at;
    let remaining = (expires_at - Utc::now()).to_std().unwrap_or(std::time::Duration::ZERO);

    tokio::spawn(async move {
        tokio::time::sleep(remaining).await;

        let mut held = current.lock().await;
        if !held.as_ref().is_some_and(|s| s.id == session_id && s.expires_at <= expires_at) {
            return;
        }
        *held = None;
        drop(held);

        info!(%session_id, "session expired");
        if events.send(SessionEvent::Expired).is_err() {
            debug!(%session_id, "expiry dropped without subscribers");
        }
    })
}

impl PostgresIdentityProvider {
    pub fn new(repo: PostgresRepository, auth: AuthConfig, event_buffer: usize) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Self {
            repo,
            auth,
            current: Arc::new(Mutex::new(None)),
            restore_hint: Mutex::new(None),
            events,
            expiry_watch: std::sync::Mutex::new(None),
        }
    }

    /// Session id / user id pair from the client's cookie, looked up on the next `current_session`.
    pub fn with_restored_session(mut self, hint: Option<(Uuid, Uuid)>) -> Self {
        *self.restore_hint.get_mut() = hint;
        self
    }

    fn session_expiry(&self) -> chrono::DateTime<Utc> {
        Utc::now() + Duration::hours(self.auth.session_ttl_hours.max(1))
    }

    /// Replaces the running expiry watch; `None` just stops it.
    fn watch_expiry(&self, session: Option<&Session>) {
        let next = session.map(|session| spawn_expiry_watch(self.current.clone(), self.events.clone(), session));
        if let Ok(mut slot) = self.expiry_watch.lock()
            && let Some(previous) = std::mem::replace(&mut *slot, next)
        {
            previous.abort();
        }
    }

    fn emit(&self, event: SessionEvent) {
        let kind = event.kind();
        // No receivers is fine: nobody is observing this client yet.
        if self.events.send(event).is_err() {
            debug!(event = kind, "session event dropped without subscribers");
        }
    }

    async fn issue_session(&self, user_id: &Uuid, email: &str, user_metadata: &Value) -> Result<Session, AppError> {
        let row: SessionRow = self.repo.create_session(user_id, self.session_expiry()).await?;
        let session = Session {
            id: row.id,
            user_id: row.user_id,
            email: email.to_string(),
            user_metadata: user_metadata.clone(),
            expires_at: row.expires_at,
        };
        *self.current.lock().await = Some(session.clone());
        self.watch_expiry(Some(&session));
        Ok(session)
    }

    async fn load_session(&self, session_id: &Uuid, user_id: &Uuid) -> Result<Option<Session>, AppError> {
        let row: Option<SessionUser> = self.repo.get_active_session_user(session_id, user_id).await?;
        Ok(row.map(Session::from))
    }
}

impl Drop for PostgresIdentityProvider {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.expiry_watch.lock()
            && let Some(handle) = slot.take()
        {
            handle.abort();
        }
    }
}

#[async_trait::async_trait]
impl IdentityProvider for PostgresIdentityProvider {
    async fn current_session(&self) -> Result<Option<Session>, AppError> {
        let mut current = self.current.lock().await;

        if current.is_none()
            && let Some((session_id, user_id)) = self.restore_hint.lock().await.take()
        {
            *current = self.load_session(&session_id, &user_id).await?;
            if current.is_some() {
                info!(%session_id, %user_id, "restored session from cookie");
                self.watch_expiry(current.as_ref());
            }
        }

        let Some(session) = current.clone() else {
            return Ok(None);
        };

        if session.is_expired_at(Utc::now()) {
            *current = None;
            drop(current);
            self.watch_expiry(None);
            if let Err(err) = self.repo.delete_session(&session.id).await {
                warn!(error = ?err, session_id = %session.id, "failed to delete expired session row");
            }
            self.emit(SessionEvent::Expired);
            return Ok(None);
        }

        // The row may have been revoked by another client signing out.
        match self.load_session(&session.id, &session.user_id).await? {
            Some(fresh) => {
                *current = Some(fresh.clone());
                Ok(Some(fresh))
            }
            None => {
                *current = None;
                drop(current);
                self.watch_expiry(None);
                self.emit(SessionEvent::Expired);
                Ok(None)
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn sign_up(&self, email: &str, password: &str, user_metadata: Value) -> Result<SignUpOutcome, AppError> {
        if self.repo.get_user_by_email(email).await?.is_some() {
            return Err(AppError::UserAlreadyExists(email.to_string()));
        }

        let user = self.repo.create_user(email, password, &user_metadata, self.auth.auto_confirm).await?;
        info!(user_id = %user.id, auto_confirm = self.auth.auto_confirm, "account created");

        if !self.auth.auto_confirm {
            return Ok(SignUpOutcome::PendingVerification { user_id: user.id });
        }

        let session = self.issue_session(&user.id, &user.email, &user.user_metadata.0).await?;
        self.emit(SessionEvent::SignedIn(session.clone()));
        Ok(SignUpOutcome::SignedIn(session))
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AppError> {
        let Some(user) = self.repo.get_user_by_email(email).await? else {
            PostgresRepository::dummy_verify(password);
            return Err(AppError::InvalidCredentials);
        };

        PostgresRepository::verify_password(&user, password)?;
        if user.email_confirmed_at.is_none() {
            return Err(AppError::EmailNotConfirmed);
        }

        let session = self.issue_session(&user.id, &user.email, &user.user_metadata.0).await?;
        info!(user_id = %user.id, session_id = %session.id, "signed in");
        self.emit(SessionEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), AppError> {
        let previous = self.current.lock().await.take();
        self.restore_hint.lock().await.take();
        self.watch_expiry(None);

        let result = match &previous {
            Some(session) => self.repo.delete_session(&session.id).await,
            None => Ok(()),
        };

        if let Err(err) = &result {
            warn!(error = ?err, "failed to revoke session row");
        }
        self.emit(SessionEvent::SignedOut);
        result
    }

    async fn refresh_session(&self) -> Result<Session, AppError> {
        let mut current = self.current.lock().await;
        let Some(session) = current.clone() else {
            return Err(AppError::Unauthorized);
        };

        let Some(row) = self.repo.extend_session(&session.id, self.session_expiry()).await? else {
            *current = None;
            drop(current);
            self.watch_expiry(None);
            self.emit(SessionEvent::Expired);
            return Err(AppError::Unauthorized);
        };

        let refreshed = Session {
            expires_at: row.expires_at,
            ..session
        };
        *current = Some(refreshed.clone());
        drop(current);
        self.watch_expiry(Some(&refreshed));

        self.emit(SessionEvent::TokenRefreshed(refreshed.clone()));
        Ok(refreshed)
    }
}
