use crate::database::profile::ProfileStore;
use crate::error::app_error::AppError;
use crate::models::profile::{FacultyProfile, Profile, ProfileTable, StudentProfile};
use crate::models::role::Role;
use crate::models::session::{Session, SessionEvent};
use crate::models::user::SignUpOutcome;
use crate::service::coordinator::SessionProfileCoordinator;
use crate::service::identity::IdentityProvider;
use crate::service::registry::{CoordinatorFactory, CoordinatorRegistry};
use crate::{Config, build_rocket_with_registry};
use chrono::{Duration, Utc};
use rocket::local::asynchronous::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, broadcast};
use uuid::Uuid;

pub fn sample_student_profile() -> StudentProfile {
    StudentProfile {
        name: "Asha Menon".to_string(),
        roll_number: "S-042".to_string(),
        class_name: "Class 10A".to_string(),
        year: "2026".to_string(),
        department: "Science".to_string(),
        phone: "555-0100".to_string(),
        address: "12 Lake View Road".to_string(),
        parent_name: "Ravi Menon".to_string(),
        parent_phone: "555-0199".to_string(),
    }
}

pub fn sample_faculty_profile() -> FacultyProfile {
    FacultyProfile {
        name: "Dr. Lee Fernandes".to_string(),
        employee_id: "F-107".to_string(),
        department: "Mathematics".to_string(),
        designation: "Associate Professor".to_string(),
        phone: "555-0142".to_string(),
        address: "4 Faculty Quarters".to_string(),
        qualification: "PhD".to_string(),
        experience: "9 years".to_string(),
        assigned_classes: vec!["Class 10A".to_string(), "Class 11B".to_string()],
        current_class: Some("Class 10A".to_string()),
    }
}

pub fn sample_session(role: Role) -> Session {
    Session {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        email: "asha@example.com".to_string(),
        user_metadata: role.to_metadata(),
        expires_at: Utc::now() + Duration::hours(1),
    }
}

#[derive(Clone)]
struct MemoryAccount {
    id: Uuid,
    password: String,
    user_metadata: Value,
}

/// In-process identity provider that emits the same events a real one does.
pub struct MemoryIdentityProvider {
    accounts: Mutex<HashMap<String, MemoryAccount>>,
    current: Mutex<Option<Session>>,
    events: broadcast::Sender<SessionEvent>,
    fail_current: AtomicBool,
    fail_sign_out: AtomicBool,
    require_confirmation: AtomicBool,
}

impl Default for MemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self::with_event_capacity(16)
    }

    /// Subscribers that fall more than `capacity` events behind see a lag.
    pub fn with_event_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            accounts: Mutex::new(HashMap::new()),
            current: Mutex::new(None),
            events,
            fail_current: AtomicBool::new(false),
            fail_sign_out: AtomicBool::new(false),
            require_confirmation: AtomicBool::new(false),
        }
    }

    pub fn register(&self, email: &str, password: &str, role: Role) -> Uuid {
        let id = Uuid::new_v4();
        self.accounts.lock().unwrap().insert(
            email.to_lowercase(),
            MemoryAccount {
                id,
                password: password.to_string(),
                user_metadata: role.to_metadata(),
            },
        );
        id
    }

    /// Replaces the held session without emitting anything.
    pub fn set_current(&self, session: Option<Session>) {
        *self.current.lock().unwrap() = session;
    }

    pub fn emit(&self, event: SessionEvent) {
        *self.current.lock().unwrap() = event.session().cloned();
        let _ = self.events.send(event);
    }

    pub fn fail_current_session(&self, fail: bool) {
        self.fail_current.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sign_out(&self, fail: bool) {
        self.fail_sign_out.store(fail, Ordering::SeqCst);
    }

    pub fn require_confirmation(&self, required: bool) {
        self.require_confirmation.store(required, Ordering::SeqCst);
    }

    fn issue(&self, email: &str, account: &MemoryAccount) -> Session {
        let session = Session {
            id: Uuid::new_v4(),
            user_id: account.id,
            email: email.to_string(),
            user_metadata: account.user_metadata.clone(),
            expires_at: Utc::now() + Duration::hours(1),
        };
        self.emit(SessionEvent::SignedIn(session.clone()));
        session
    }
}

#[async_trait::async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn current_session(&self) -> Result<Option<Session>, AppError> {
        if self.fail_current.load(Ordering::SeqCst) {
            return Err(AppError::Upstream("identity provider unreachable".to_string()));
        }
        let current = self.current.lock().unwrap().clone();
        if current.as_ref().is_some_and(|session| session.is_expired_at(Utc::now())) {
            self.emit(SessionEvent::Expired);
            return Ok(None);
        }
        Ok(current)
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn sign_up(&self, email: &str, password: &str, user_metadata: Value) -> Result<SignUpOutcome, AppError> {
        let key = email.to_lowercase();
        let account = {
            let mut accounts = self.accounts.lock().unwrap();
            if accounts.contains_key(&key) {
                return Err(AppError::UserAlreadyExists(email.to_string()));
            }
            let account = MemoryAccount {
                id: Uuid::new_v4(),
                password: password.to_string(),
                user_metadata,
            };
            accounts.insert(key, account.clone());
            account
        };

        if self.require_confirmation.load(Ordering::SeqCst) {
            return Ok(SignUpOutcome::PendingVerification { user_id: account.id });
        }
        Ok(SignUpOutcome::SignedIn(self.issue(email, &account)))
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AppError> {
        let account = {
            let accounts = self.accounts.lock().unwrap();
            match accounts.get(&email.to_lowercase()) {
                Some(account) if account.password == password => account.clone(),
                _ => return Err(AppError::InvalidCredentials),
            }
        };
        Ok(self.issue(email, &account))
    }

    async fn sign_out(&self) -> Result<(), AppError> {
        self.emit(SessionEvent::SignedOut);
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(AppError::Upstream("sign-out request failed".to_string()));
        }
        Ok(())
    }

    async fn refresh_session(&self) -> Result<Session, AppError> {
        let Some(session) = self.current.lock().unwrap().clone() else {
            return Err(AppError::Unauthorized);
        };
        let refreshed = Session {
            expires_at: session.expires_at + Duration::hours(1),
            ..session
        };
        self.emit(SessionEvent::TokenRefreshed(refreshed.clone()));
        Ok(refreshed)
    }
}

/// Holds a profile fetch after it has read its row until the test releases it.
#[derive(Default)]
pub struct FetchGate {
    pub entered: Notify,
    pub release: Notify,
}

#[derive(Default)]
pub struct MemoryProfileStore {
    rows: Mutex<HashMap<(ProfileTable, Uuid), Profile>>,
    gates: Mutex<HashMap<Uuid, Arc<FetchGate>>>,
    writes: AtomicUsize,
    fail_fetch: AtomicBool,
    fail_upsert: AtomicBool,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a row without counting it as a write.
    pub fn insert(&self, id: Uuid, profile: Profile) {
        self.rows.lock().unwrap().insert((profile.table(), id), profile);
    }

    pub fn get(&self, id: &Uuid) -> Option<Profile> {
        let rows = self.rows.lock().unwrap();
        [ProfileTable::StudentProfiles, ProfileTable::FacultyProfiles]
            .into_iter()
            .find_map(|table| rows.get(&(table, *id)).cloned())
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn fail_upsert(&self, fail: bool) {
        self.fail_upsert.store(fail, Ordering::SeqCst);
    }

    /// Gates the next fetch for `id` only.
    pub fn gate(&self, id: Uuid) -> Arc<FetchGate> {
        let gate = Arc::new(FetchGate::default());
        self.gates.lock().unwrap().insert(id, gate.clone());
        gate
    }
}

#[async_trait::async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn fetch_profile(&self, table: ProfileTable, id: &Uuid) -> Result<Option<Profile>, AppError> {
        let row = self.rows.lock().unwrap().get(&(table, *id)).cloned();
        let gate = self.gates.lock().unwrap().remove(id);
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(AppError::Upstream("profile store unreachable".to_string()));
        }
        Ok(row)
    }

    async fn upsert_profile(&self, id: &Uuid, profile: &Profile) -> Result<(), AppError> {
        if self.fail_upsert.load(Ordering::SeqCst) {
            return Err(AppError::Upstream("profile store unreachable".to_string()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.insert(*id, profile.clone());
        Ok(())
    }
}

/// Rocket client wired to in-memory identity and profile stores shared by every browser client.
pub async fn memory_client() -> (Client, Arc<MemoryIdentityProvider>, Arc<MemoryProfileStore>) {
    let identity = Arc::new(MemoryIdentityProvider::new());
    let profiles = Arc::new(MemoryProfileStore::new());

    let factory: CoordinatorFactory = {
        let identity = identity.clone();
        let profiles = profiles.clone();
        Arc::new(move |_: Option<(Uuid, Uuid)>| SessionProfileCoordinator::new(identity.clone(), profiles.clone()))
    };
    let config = Config::default();
    let registry = Arc::new(CoordinatorRegistry::new(factory, &config.session));

    let client = Client::tracked(build_rocket_with_registry(config, registry))
        .await
        .expect("valid rocket instance");
    (client, identity, profiles)
}
