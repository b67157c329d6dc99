//! Session store.
//!
//! One orchestrator per session id, each behind its own async mutex so turns of
//! the same session run one at a time while different sessions proceed in
//! parallel. The store is bounded twice: least-recently-used eviction past
//! `max_sessions`, and an idle TTL enforced on access and by a sweeper task.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use lru::LruCache;
use parlor_agent::{AgentRuntime, Orchestrator};
use parlor_core::config::{AssistantConfig, SessionConfig};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub type SharedOrchestrator = Arc<tokio::sync::Mutex<Orchestrator>>;

struct SessionSlot {
    orchestrator: SharedOrchestrator,
    last_seen: Instant,
}

pub struct SessionStore {
    runtime: Arc<AgentRuntime>,
    assistant_name: String,
    user_name: String,
    idle_ttl: Duration,
    sessions: Mutex<LruCache<String, SessionSlot>>,
}

impl SessionStore {
    pub fn new(
        runtime: Arc<AgentRuntime>,
        assistant: &AssistantConfig,
        sessions: &SessionConfig,
    ) -> Self {
        Self::with_limits(
            runtime,
            assistant,
            sessions.max_sessions,
            Duration::from_secs(sessions.idle_ttl_secs),
        )
    }

    pub fn with_limits(
        runtime: Arc<AgentRuntime>,
        assistant: &AssistantConfig,
        max_sessions: usize,
        idle_ttl: Duration,
    ) -> Self {
        let capacity = NonZeroUsize::new(max_sessions).unwrap_or(NonZeroUsize::MIN);
        Self {
            runtime,
            assistant_name: assistant.name.clone(),
            user_name: assistant.user_name.clone(),
            idle_ttl,
            sessions: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns the session's orchestrator, creating it when the id is new or its
    /// previous session expired. The flag is true when a session was created.
    pub fn get_or_create(&self, session_id: &str) -> (SharedOrchestrator, bool) {
        let now = Instant::now();
        let mut sessions = self.lock();

        if let Some(slot) = sessions.get_mut(session_id) {
            if now.duration_since(slot.last_seen) < self.idle_ttl {
                slot.last_seen = now;
                return (slot.orchestrator.clone(), false);
            }
            sessions.pop(session_id);
            debug!(event_name = "session.expired", session_id, "idle session dropped on access");
        }

        let mut orchestrator = Orchestrator::new(self.runtime.clone(), self.assistant_name.clone());
        orchestrator.set_user_name(self.user_name.clone());
        let orchestrator = Arc::new(tokio::sync::Mutex::new(orchestrator));

        let slot = SessionSlot { orchestrator: orchestrator.clone(), last_seen: now };
        if let Some((evicted, _)) = sessions.push(session_id.to_string(), slot) {
            debug!(
                event_name = "session.evicted",
                session_id = %evicted,
                "least recently used session evicted"
            );
        }
        info!(event_name = "session.created", session_id, "session created");
        (orchestrator, true)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.lock().contains(session_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every session idle for longer than the TTL; returns how many went.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.lock();
        let expired = sessions
            .iter()
            .filter(|(_, slot)| now.duration_since(slot.last_seen) >= self.idle_ttl)
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>();
        for id in &expired {
            sessions.pop(id);
        }
        expired.len()
    }

    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = store.sweep_expired();
                if removed > 0 {
                    info!(
                        event_name = "session.sweep.completed",
                        removed,
                        remaining = store.len(),
                        "expired sessions swept"
                    );
                }
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, SessionSlot>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use parlor_agent::{AgentRuntime, RuntimeSettings, ScriptedClient};
    use parlor_core::config::AppConfig;
    use parlor_core::{AgentCatalog, Persona};

    use super::SessionStore;

    fn store(max_sessions: usize, idle_ttl: Duration) -> SessionStore {
        let runtime = Arc::new(AgentRuntime::new(
            Arc::new(AgentCatalog::embedded().expect("catalog")),
            Persona::embedded().expect("persona"),
            Arc::new(ScriptedClient::new()),
            RuntimeSettings::default(),
        ));
        SessionStore::with_limits(runtime, &AppConfig::default().assistant, max_sessions, idle_ttl)
    }

    #[tokio::test]
    async fn same_id_reuses_orchestrator() {
        let store = store(4, Duration::from_secs(60));

        let (first, created_first) = store.get_or_create("s1");
        let (second, created_second) = store.get_or_create("s1");

        assert!(created_first);
        assert!(!created_second);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn new_sessions_use_configured_names() {
        let store = store(4, Duration::from_secs(60));

        let (orchestrator, _) = store.get_or_create("s1");
        let orchestrator = orchestrator.lock().await;

        assert_eq!(orchestrator.assistant_name(), "Healthy Diet Assistant");
        assert_eq!(orchestrator.user_name(), "User");
    }

    #[tokio::test]
    async fn least_recently_used_session_is_evicted() {
        let store = store(2, Duration::from_secs(60));

        store.get_or_create("a");
        store.get_or_create("b");
        store.get_or_create("a");
        store.get_or_create("c");

        assert!(store.contains("a"));
        assert!(!store.contains("b"));
        assert!(store.contains("c"));
    }

    #[tokio::test]
    async fn expired_session_is_replaced_on_access() {
        let store = store(4, Duration::ZERO);

        let (first, _) = store.get_or_create("s1");
        let (second, created) = store.get_or_create("s1");

        assert!(created);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn sweep_removes_idle_sessions() {
        let store = store(4, Duration::ZERO);
        store.get_or_create("a");
        store.get_or_create("b");

        assert_eq!(store.sweep_expired(), 2);
        assert!(store.is_empty());
    }
}
