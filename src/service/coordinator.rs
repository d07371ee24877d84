use crate::database::profile::ProfileStore;
use crate::error::app_error::AppError;
use crate::models::profile::{Profile, ProfileTable};
use crate::models::role::Role;
use crate::models::session::{Session, SessionEvent};
use crate::models::user::{AuthSnapshot, ProfileUpdate, SignUpOutcome, User};
use crate::service::identity::IdentityProvider;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

/// Reconciles the identity provider's session with the stored profile and
/// publishes one consistent [`AuthSnapshot`].
///
/// Every session change takes a ticket; a profile read may only publish while
/// its ticket is the latest one, so results superseded by newer events are
/// dropped instead of overwriting fresher state.
#[derive(Clone)]
pub struct SessionProfileCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    identity: Arc<dyn IdentityProvider>,
    profiles: Arc<dyn ProfileStore>,
    state: Mutex<Reconciliation>,
    published: watch::Sender<AuthSnapshot>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct Reconciliation {
    epoch: u64,
    session: Option<Session>,
}

struct Ticket {
    epoch: u64,
    session: Session,
    role: Role,
}

impl SessionProfileCoordinator {
    pub fn new(identity: Arc<dyn IdentityProvider>, profiles: Arc<dyn ProfileStore>) -> Self {
        let (published, _) = watch::channel(AuthSnapshot::initializing());
        Self {
            inner: Arc::new(Inner {
                identity,
                profiles,
                state: Mutex::new(Reconciliation::default()),
                published,
                listener: Mutex::new(None),
            }),
        }
    }

    /// Subscribes to the provider, then discovers the session it already holds.
    pub async fn start(&self) {
        let events = self.inner.identity.subscribe();
        let handle = tokio::spawn(listen(Arc::downgrade(&self.inner), events));
        if let Some(previous) = self.inner.listener.lock().await.replace(handle) {
            previous.abort();
        }

        self.inner.discover().await;
    }

    /// Stops reacting to provider events. The last snapshot stays readable.
    pub async fn dispose(&self) {
        if let Some(handle) = self.inner.listener.lock().await.take() {
            handle.abort();
        }
    }

    #[cfg(test)]
    pub async fn is_started(&self) -> bool {
        self.inner.listener.lock().await.is_some()
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.inner.published.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.inner.published.subscribe()
    }

    /// Waits until the coordinator is neither initializing nor resolving a profile.
    pub async fn settled(&self) -> AuthSnapshot {
        let mut receiver = self.subscribe();
        match receiver.wait_for(AuthSnapshot::is_settled).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        }
    }

    /// Like [`settled`](Self::settled), but returns whatever is published once `limit` passes.
    pub async fn settled_within(&self, limit: Duration) -> AuthSnapshot {
        match tokio::time::timeout(limit, self.settled()).await {
            Ok(snapshot) => snapshot,
            Err(_) => {
                warn!(timeout_ms = limit.as_millis() as u64, "session did not settle in time");
                self.snapshot()
            }
        }
    }

    /// Applies a session change immediately, bypassing duplicate suppression.
    #[cfg(test)]
    pub async fn handle_session_event(&self, event: SessionEvent) {
        debug!(event = event.kind(), "applying session event");
        self.inner.apply(event.session().cloned()).await;
    }

    pub async fn sign_up(&self, email: &str, password: &str, role: Role) -> Result<SignUpOutcome, AppError> {
        let outcome = self
            .inner
            .identity
            .sign_up(email, password, role.to_metadata())
            .await
            .inspect_err(|err| warn!(error = ?err, %role, "sign-up rejected"))?;

        if let SignUpOutcome::SignedIn(session) = &outcome {
            self.inner.apply(Some(session.clone())).await;
        }
        Ok(outcome)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AppError> {
        let session = self
            .inner
            .identity
            .sign_in_with_password(email, password)
            .await
            .inspect_err(|err| warn!(error = ?err, "sign-in rejected"))?;

        self.inner.apply(Some(session.clone())).await;
        Ok(session)
    }

    /// Clears the published user no matter how the provider call ends.
    pub async fn sign_out(&self) -> Result<(), AppError> {
        let result = self.inner.identity.sign_out().await;
        if let Err(err) = &result {
            warn!(error = ?err, "provider sign-out failed, clearing local session anyway");
        }

        self.inner.apply(None).await;
        result
    }

    pub async fn refresh(&self) -> Result<Session, AppError> {
        let session = self.inner.identity.refresh_session().await?;
        self.inner.apply(Some(session.clone())).await;
        Ok(session)
    }

    /// Stores `profile` for the signed-in user and publishes it once the write succeeded.
    ///
    /// Returns [`ProfileUpdate::Skipped`] without touching the store when nobody is signed in.
    pub async fn update_profile(&self, profile: Profile) -> Result<ProfileUpdate, AppError> {
        let Some(user) = self.snapshot().user else {
            debug!("profile update ignored without a signed-in user");
            return Ok(ProfileUpdate::Skipped);
        };

        let profile = profile.normalized();
        if profile.role() != user.role {
            return Err(AppError::RoleMismatch {
                expected: user.role,
                submitted: profile.role(),
            });
        }
        profile.validate()?;

        if !self.inner.confirm(&user.id).await? {
            warn!(user_id = %user.id, "session ended before the profile update, nothing stored");
            return Err(AppError::Unauthorized);
        }

        if let Err(err) = self.inner.profiles.upsert_profile(&user.id, &profile).await {
            warn!(error = ?err, user_id = %user.id, table = profile.table().name(), "profile upsert failed");
            return Err(err);
        }

        let mut state = self.inner.state.lock().await;
        let current = self.inner.published.borrow().user.clone();
        match current {
            Some(current) if current.id == user.id => {
                // Any profile read still in flight predates this write.
                state.epoch += 1;
                let updated = current.with_profile(profile);
                self.inner.publish(AuthSnapshot::authenticated(updated.clone()));
                let current_class = updated.profile.as_ref().and_then(Profile::current_class);
                info!(user_id = %updated.id, current_class = ?current_class, "profile updated");
                Ok(ProfileUpdate::Applied(updated))
            }
            _ => {
                info!(user_id = %user.id, "profile stored after the signed-in user changed; view left as is");
                Ok(ProfileUpdate::Applied(user.with_profile(profile)))
            }
        }
    }

    /// Asks the provider whether the published user's session is still live and
    /// signs the view out if it is not. Provider failures keep the view as is.
    pub async fn revalidate(&self) {
        let Some(user) = self.snapshot().user else {
            return;
        };

        if let Err(err) = self.inner.confirm(&user.id).await {
            warn!(error = ?err, user_id = %user.id, "session check failed, keeping current view");
        }
    }

    /// Switches the class a faculty member is currently teaching.
    pub async fn set_current_class(&self, class: &str) -> Result<ProfileUpdate, AppError> {
        let Some(user) = self.snapshot().user else {
            return Ok(ProfileUpdate::Skipped);
        };

        let mut faculty = match user.profile {
            Some(Profile::Faculty(faculty)) => faculty,
            Some(Profile::Student(_)) => return Err(AppError::BadRequest("Only faculty accounts have classes".to_string())),
            None => return Err(AppError::BadRequest("Complete your profile before choosing a class".to_string())),
        };

        if !faculty.assigned_classes.iter().any(|assigned| assigned == class) {
            return Err(AppError::BadRequest(format!("{} is not one of your assigned classes", class)));
        }

        faculty.current_class = Some(class.to_string());
        self.update_profile(Profile::Faculty(faculty)).await
    }
}

impl Inner {
    fn publish(&self, snapshot: AuthSnapshot) {
        self.published.send_replace(snapshot);
    }

    /// Starts a new reconciliation round. Must be called with the state lock held.
    fn transition(&self, state: &mut Reconciliation, session: Option<Session>) -> Option<Ticket> {
        state.epoch += 1;
        state.session = session.clone();

        let Some(session) = session else {
            self.publish(AuthSnapshot::unauthenticated());
            return None;
        };

        let role = session.role().unwrap_or_else(|| {
            warn!(user_id = %session.user_id, "session metadata has no recognizable role, assuming student");
            Role::Student
        });

        let shown = self.published.borrow().user.clone();
        let kept = shown.filter(|user| user.id == session.user_id && user.role == role);
        self.publish(AuthSnapshot::resolving(kept));

        Some(Ticket {
            epoch: state.epoch,
            session,
            role,
        })
    }

    async fn apply(&self, session: Option<Session>) {
        let ticket = {
            let mut state = self.state.lock().await;
            self.transition(&mut state, session)
        };

        if let Some(ticket) = ticket {
            self.resolve(ticket).await;
        }
    }

    /// Like `apply`, but ignores events that carry nothing the coordinator has not already applied.
    async fn observe(&self, event: SessionEvent) -> Option<Ticket> {
        let mut state = self.state.lock().await;
        if event.session() == state.session.as_ref() {
            debug!(event = event.kind(), "session event already applied");
            return None;
        }

        debug!(event = event.kind(), "session event received");
        self.transition(&mut state, event.session().cloned())
    }

    async fn resolve(&self, ticket: Ticket) {
        let table = ProfileTable::for_role(ticket.role);
        let profile = match self.profiles.fetch_profile(table, &ticket.session.user_id).await {
            Ok(profile) => profile,
            Err(err) => {
                warn!(error = ?err, user_id = %ticket.session.user_id, table = table.name(), "profile fetch failed, treating as not onboarded");
                None
            }
        };

        let state = self.state.lock().await;
        if state.epoch != ticket.epoch {
            debug!(ticket = ticket.epoch, latest = state.epoch, "discarding superseded profile resolution");
            return;
        }

        let user = User::from_session(&ticket.session, ticket.role, profile);
        info!(user_id = %user.id, role = %user.role, onboarded = user.profile.is_some(), "session reconciled");
        self.publish(AuthSnapshot::authenticated(user));
    }

    /// `Ok(false)` once the provider no longer holds a session for `user_id`; the view is signed out then.
    async fn confirm(&self, user_id: &Uuid) -> Result<bool, AppError> {
        let session = self.identity.current_session().await?;
        if session.as_ref().is_some_and(|session| &session.user_id == user_id) {
            return Ok(true);
        }

        let ticket = {
            let mut state = self.state.lock().await;
            if !state.session.as_ref().is_some_and(|shown| &shown.user_id == user_id) {
                return Ok(false);
            }
            info!(%user_id, "provider session is gone, replacing the view");
            self.transition(&mut state, session)
        };

        if let Some(ticket) = ticket {
            self.resolve(ticket).await;
        }
        Ok(false)
    }

    async fn discover(&self) {
        let marker = {
            let mut state = self.state.lock().await;
            state.epoch += 1;
            state.epoch
        };

        let session = match self.identity.current_session().await {
            Ok(session) => session,
            Err(err) => {
                warn!(error = ?err, "session discovery failed, continuing signed out");
                None
            }
        };

        let ticket = {
            let mut state = self.state.lock().await;
            if state.epoch != marker {
                debug!("session discovery superseded by a newer event");
                return;
            }
            self.transition(&mut state, session)
        };

        if let Some(ticket) = ticket {
            self.resolve(ticket).await;
        }
    }
}

async fn listen(inner: Weak<Inner>, mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        let received = events.recv().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };

        match received {
            Ok(event) => {
                if let Some(ticket) = inner.observe(event).await {
                    tokio::spawn(async move { inner.resolve(ticket).await });
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "session events lagged, rediscovering current session");
                inner.discover().await;
            }
            Err(RecvError::Closed) => break,
        }
    }
}
