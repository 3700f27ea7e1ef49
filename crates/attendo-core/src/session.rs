//! One presence tracker per camera session.

use crate::clock::Clock;
use crate::tracker::{PresenceTracker, Sighting};
use crate::types::AppearanceRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Identifies a tracking session. The nil UUID is the default session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub const DEFAULT: SessionId = SessionId(Uuid::nil());

    pub fn new_random() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(SessionId)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),
    #[error("the default session cannot be ended")]
    DefaultSession,
}

/// Live trackers keyed by session.
pub struct SessionRegistry {
    timeout: Duration,
    clock: Arc<dyn Clock>,
    sessions: HashMap<SessionId, PresenceTracker>,
}

impl SessionRegistry {
    /// Registry holding only the default session.
    pub fn new(timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        let mut sessions = HashMap::new();
        sessions.insert(SessionId::DEFAULT, PresenceTracker::new(timeout, clock.clone()));
        Self { timeout, clock, sessions }
    }

    pub fn start(&mut self) -> SessionId {
        let id = SessionId::new_random();
        self.sessions
            .insert(id, PresenceTracker::new(self.timeout, self.clock.clone()));
        tracing::info!(session = %id, "tracking session started");
        id
    }

    /// Feed one sample to a session's tracker at the registry clock's time.
    pub fn observe(
        &mut self,
        id: SessionId,
        visible: &[Sighting],
    ) -> Result<Vec<AppearanceRecord>, SessionError> {
        let tracker = self
            .sessions
            .get_mut(&id)
            .ok_or(SessionError::UnknownSession(id))?;
        Ok(tracker.observe_now(visible))
    }

    /// Discard a session, closing whatever it still had open.
    pub fn end(&mut self, id: SessionId) -> Result<Vec<AppearanceRecord>, SessionError> {
        if id == SessionId::DEFAULT {
            return Err(SessionError::DefaultSession);
        }
        let mut tracker = self
            .sessions
            .remove(&id)
            .ok_or(SessionError::UnknownSession(id))?;
        let closed = tracker.flush();
        tracing::info!(session = %id, closed = closed.len(), "tracking session ended");
        Ok(closed)
    }

    /// Close timed-out intervals in every session.
    pub fn expire_all(&mut self) -> Vec<AppearanceRecord> {
        let now = self.clock.now();
        self.sessions
            .values_mut()
            .flat_map(|tracker| tracker.expire(now))
            .collect()
    }

    /// Close every open interval in every session.
    pub fn flush_all(&mut self) -> Vec<AppearanceRecord> {
        self.sessions
            .values_mut()
            .flat_map(|tracker| tracker.flush())
            .collect()
    }

    /// Drop open intervals for a label removed from the roster.
    pub fn forget_label(&mut self, label: &str) -> usize {
        self.sessions
            .values_mut()
            .map(|tracker| tracker.forget(label))
            .filter(|removed| *removed)
            .count()
    }

    pub fn present(&self, id: SessionId) -> Result<Vec<String>, SessionError> {
        self.sessions
            .get(&id)
            .map(PresenceTracker::present)
            .ok_or(SessionError::UnknownSession(id))
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
