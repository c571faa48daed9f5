use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
    sync::{Arc, Mutex, MutexGuard},
};

use crate::error::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    RequestGenerated,
    LicenseRequested,
    LicenseReceived,
    Updated,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Updated | Self::Failed)
    }

    fn successor(&self) -> Option<Self> {
        match self {
            Self::Created => Some(Self::RequestGenerated),
            Self::RequestGenerated => Some(Self::LicenseRequested),
            Self::LicenseRequested => Some(Self::LicenseReceived),
            Self::LicenseReceived => Some(Self::Updated),
            Self::Updated | Self::Failed => None,
        }
    }

    /// Stages only move one step forward; any live stage may fail.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        match next {
            Self::Failed => !self.is_terminal(),
            next => self.successor() == Some(next),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionRecord {
    /// Identifier assigned by the key system
    pub cdm_session_id: String,
    pub state: SessionState,
    pub history: Vec<SessionState>,
    /// Stage and reason of the failure, if any
    pub failure: Option<(Stage, String)>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    next_id: u64,
    sessions: BTreeMap<SessionId, SessionRecord>,
}

/// Every decryption session the coordinator has created, with its stage history.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Records a freshly created session in the `Created` state.
    pub fn register<S: Into<String>>(&self, cdm_session_id: S) -> SessionId {
        let mut inner = self.lock();
        let id = SessionId(inner.next_id);
        inner.next_id += 1;
        inner.sessions.insert(
            id,
            SessionRecord {
                cdm_session_id: cdm_session_id.into(),
                state: SessionState::Created,
                history: vec![SessionState::Created],
                failure: None,
            },
        );
        id
    }

    /// Moves a session forward. Returns `false` and leaves the record untouched when the
    /// transition is out of order or the session is unknown.
    pub fn transition(&self, id: SessionId, next: SessionState) -> bool {
        let mut inner = self.lock();
        let Some(record) = inner.sessions.get_mut(&id) else {
            tracing::warn!("drm: transition of unknown session {id}");
            return false;
        };
        if !record.state.can_transition_to(next) {
            tracing::warn!(
                "drm: refused transition of session {id} from {:?} to {next:?}",
                record.state
            );
            return false;
        }

        record.state = next;
        record.history.push(next);
        true
    }

    pub fn fail<E: ToString>(&self, id: SessionId, stage: Stage, reason: E) -> bool {
        let mut inner = self.lock();
        let Some(record) = inner.sessions.get_mut(&id) else {
            return false;
        };
        if !record.state.can_transition_to(SessionState::Failed) {
            return false;
        }

        record.state = SessionState::Failed;
        record.history.push(SessionState::Failed);
        record.failure = Some((stage, reason.to_string()));
        true
    }

    pub fn state(&self, id: SessionId) -> Option<SessionState> {
        self.lock().sessions.get(&id).map(|r| r.state)
    }

    pub fn history(&self, id: SessionId) -> Vec<SessionState> {
        self.lock()
            .sessions
            .get(&id)
            .map(|r| r.history.clone())
            .unwrap_or_default()
    }

    pub fn record(&self, id: SessionId) -> Option<SessionRecord> {
        self.lock().sessions.get(&id).cloned()
    }

    /// All sessions in creation order.
    pub fn sessions(&self) -> Vec<(SessionId, SessionState)> {
        self.lock()
            .sessions
            .iter()
            .map(|(id, record)| (*id, record.state))
            .collect()
    }

    pub fn count(&self, state: SessionState) -> usize {
        self.lock()
            .sessions
            .values()
            .filter(|r| r.state == state)
            .count()
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remove(&self, id: SessionId) -> Option<SessionRecord> {
        self.lock().sessions.remove(&id)
    }

    pub fn clear(&self) {
        self.lock().sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_history() {
        let registry = SessionRegistry::new();
        let id = registry.register("cdm-0");

        for state in [
            SessionState::RequestGenerated,
            SessionState::LicenseRequested,
            SessionState::LicenseReceived,
            SessionState::Updated,
        ] {
            assert!(registry.transition(id, state));
        }

        assert_eq!(registry.state(id), Some(SessionState::Updated));
        assert_eq!(registry.history(id).len(), 5);
        assert!(!registry.fail(id, Stage::UpdateSession, "too late"));
    }

    #[test]
    fn test_out_of_order_transition_is_refused() {
        let registry = SessionRegistry::new();
        let id = registry.register("cdm-0");

        assert!(!registry.transition(id, SessionState::LicenseReceived));
        assert_eq!(registry.state(id), Some(SessionState::Created));
    }

    #[test]
    fn test_failure_is_terminal() {
        let registry = SessionRegistry::new();
        let id = registry.register("cdm-0");
        assert!(registry.transition(id, SessionState::RequestGenerated));
        assert!(registry.fail(id, Stage::RequestLicense, "403"));

        assert!(!registry.transition(id, SessionState::LicenseRequested));
        let record = registry.record(id).unwrap();
        assert_eq!(record.state, SessionState::Failed);
        assert_eq!(record.failure, Some((Stage::RequestLicense, "403".to_string())));
    }

    #[test]
    fn test_ids_are_unique_and_removable() {
        let registry = SessionRegistry::new();
        let first = registry.register("a");
        let second = registry.register("b");
        assert_ne!(first, second);
        assert_eq!(registry.len(), 2);

        assert!(registry.remove(first).is_some());
        assert_eq!(registry.sessions(), vec![(second, SessionState::Created)]);

        registry.clear();
        assert!(registry.is_empty());
    }
}
