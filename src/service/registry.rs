use crate::config::{AuthConfig, SessionConfig};
use crate::database::postgres_repository::PostgresRepository;
use crate::service::coordinator::SessionProfileCoordinator;
use crate::service::identity::PostgresIdentityProvider;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Builds a coordinator for a client, given the session the client's cookie points at.
pub type CoordinatorFactory = Arc<dyn Fn(Option<(Uuid, Uuid)>) -> SessionProfileCoordinator + Send + Sync>;

struct Entry {
    coordinator: SessionProfileCoordinator,
    last_seen: Instant,
}

/// One started coordinator per browser client, disposed after a period of inactivity.
pub struct CoordinatorRegistry {
    factory: CoordinatorFactory,
    idle_timeout: Duration,
    cleanup_interval: Duration,
    settle_timeout: Duration,
    entries: Mutex<HashMap<Uuid, Entry>>,
}

impl CoordinatorRegistry {
    pub fn new(factory: CoordinatorFactory, config: &SessionConfig) -> Self {
        Self {
            factory,
            idle_timeout: Duration::from_secs(config.idle_timeout_seconds.max(1)),
            cleanup_interval: Duration::from_secs(config.cleanup_interval_seconds.max(1)),
            settle_timeout: Duration::from_millis(config.settle_timeout_ms),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Registry whose coordinators talk to Postgres for both identity and profiles.
    pub fn postgres(repo: PostgresRepository, auth: AuthConfig, config: &SessionConfig) -> Self {
        let event_buffer = config.event_buffer;
        let factory: CoordinatorFactory = Arc::new(move |restore: Option<(Uuid, Uuid)>| {
            let identity = PostgresIdentityProvider::new(repo.clone(), auth.clone(), event_buffer).with_restored_session(restore);
            SessionProfileCoordinator::new(Arc::new(identity), Arc::new(repo.clone()))
        });
        Self::new(factory, config)
    }

    pub fn settle_timeout(&self) -> Duration {
        self.settle_timeout
    }

    /// Returns the client's coordinator, creating and starting one on first contact.
    pub async fn get_or_start(&self, client_id: Uuid, restore: Option<(Uuid, Uuid)>) -> SessionProfileCoordinator {
        let coordinator = {
            let mut entries = self.entries.lock().await;
            if let Some(entry) = entries.get_mut(&client_id) {
                entry.last_seen = Instant::now();
                return entry.coordinator.clone();
            }

            let coordinator = (self.factory)(restore);
            entries.insert(
                client_id,
                Entry {
                    coordinator: coordinator.clone(),
                    last_seen: Instant::now(),
                },
            );
            coordinator
        };

        info!(%client_id, restoring = restore.is_some(), "starting session coordinator");
        coordinator.start().await;
        coordinator
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    #[cfg(test)]
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Disposes every coordinator not used within the idle timeout, as of `now`.
    pub async fn evict_idle(&self, now: Instant) -> usize {
        let idle: Vec<SessionProfileCoordinator> = {
            let mut entries = self.entries.lock().await;
            let expired: Vec<Uuid> = entries
                .iter()
                .filter(|(_, entry)| now.saturating_duration_since(entry.last_seen) >= self.idle_timeout)
                .map(|(id, _)| *id)
                .collect();
            expired.iter().filter_map(|id| entries.remove(id)).map(|entry| entry.coordinator).collect()
        };

        for coordinator in &idle {
            coordinator.dispose().await;
        }
        if !idle.is_empty() {
            debug!(evicted = idle.len(), "disposed idle session coordinators");
        }
        idle.len()
    }

    pub fn spawn_cleanup_task(self: Arc<Self>) {
        let cleanup_interval = self.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            loop {
                ticker.tick().await;
                self.evict_idle(Instant::now()).await;
            }
        });
    }
}
