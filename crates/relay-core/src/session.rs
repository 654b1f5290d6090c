//! Session manager (C9): decides when to auto-create a new logical session.

use std::sync::RwLock;

use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub model: String,
    pub created_at: u64,
    pub active: bool,
}

/// `should_auto_create((p1,m),(p2,m)) == false` and
/// `should_auto_create((p,m1),(p,m2)) == true` whenever `m1 != m2`.
pub fn should_auto_create(detected_model: &str, current: Option<&Session>) -> bool {
    match current {
        None => true,
        Some(session) => session.model != detected_model,
    }
}

/// Single-writer, many-readers session store: at most one session is active
/// process-wide.
#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<Vec<Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<Session> {
        self.sessions
            .read()
            .expect("session lock poisoned")
            .iter()
            .find(|s| s.active)
            .cloned()
    }

    pub fn list(&self) -> Vec<Session> {
        self.sessions.read().expect("session lock poisoned").clone()
    }

    /// Creates and activates a new session for `(provider, model)` if
    /// [`should_auto_create`] says so, deactivating the previous active
    /// session. Returns the active session after the call.
    pub fn ensure_session(&self, provider: &str, model: &str, created_at: u64) -> Session {
        let mut sessions = self.sessions.write().expect("session lock poisoned");
        let current = sessions.iter().find(|s| s.active).cloned();

        if !should_auto_create(model, current.as_ref()) {
            return current.expect("should_auto_create(false) implies a current session");
        }

        for session in sessions.iter_mut() {
            session.active = false;
        }

        let new_session = Session {
            id: Uuid::new_v4().to_string(),
            name: format!("{provider}:{model}"),
            provider: provider.to_string(),
            model: model.to_string(),
            created_at,
            active: true,
        };
        sessions.push(new_session.clone());
        new_session
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(provider: &str, model: &str) -> Session {
        Session {
            id: "s1".to_string(),
            name: format!("{provider}:{model}"),
            provider: provider.to_string(),
            model: model.to_string(),
            created_at: 0,
            active: true,
        }
    }

    #[test]
    fn no_current_session_always_creates() {
        assert!(should_auto_create("m", None));
    }

    #[test]
    fn provider_only_change_does_not_create() {
        let current = session("openai", "gpt-4");
        assert!(!should_auto_create("gpt-4", Some(&current)));
    }

    #[test]
    fn model_change_creates_regardless_of_provider() {
        let current = session("openai", "gpt-4");
        assert!(should_auto_create("gpt-4-turbo", Some(&current)));
    }

    #[test]
    fn manager_deactivates_previous_session_on_model_change() {
        let manager = SessionManager::new();
        let first = manager.ensure_session("openai", "gpt-4", 1);
        assert!(first.active);

        let second = manager.ensure_session("openai", "gpt-4-turbo", 2);
        assert_ne!(first.id, second.id);

        let sessions = manager.list();
        let stored_first = sessions.iter().find(|s| s.id == first.id).unwrap();
        assert!(!stored_first.active);
        assert!(manager.active().unwrap().id == second.id);
    }

    #[test]
    fn manager_reuses_session_when_model_unchanged() {
        let manager = SessionManager::new();
        let first = manager.ensure_session("openai", "gpt-4", 1);
        let second = manager.ensure_session("anthropic", "gpt-4", 2);
        assert_eq!(first.id, second.id);
    }
}
