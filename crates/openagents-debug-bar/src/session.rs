use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("sessions are not available in this context")]
    Unavailable,
    #[error("session start rejected: {0}")]
    Rejected(String),
}

/// Start/close access to whatever session mechanism the host provides.
///
/// `start` is idempotent and `close` only flushes an open session, so a
/// second `close` in a row is a no-op. Values are only visible while the
/// session is open.
pub trait SessionGateway: Send + Sync {
    fn is_started(&self) -> bool;

    fn start(&self) -> Result<(), SessionError>;

    fn close(&self) -> Result<(), SessionError>;

    fn get(&self, key: &str) -> Option<String>;

    fn insert(&self, key: &str, value: String);

    fn remove(&self, key: &str) -> Option<String>;

    fn entries(&self) -> Vec<(String, String)>;
}

/// Request extension carrying the host session into the debug bar middleware.
#[derive(Clone)]
pub struct SessionHandle(Arc<dyn SessionGateway>);

impl SessionHandle {
    pub fn new(gateway: Arc<dyn SessionGateway>) -> Self {
        Self(gateway)
    }

    pub fn detached() -> Self {
        Self(Arc::new(DetachedSession))
    }

    pub fn gateway(&self) -> &dyn SessionGateway {
        self.0.as_ref()
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("is_started", &self.0.is_started())
            .finish()
    }
}

impl From<MemorySession> for SessionHandle {
    fn from(session: MemorySession) -> Self {
        Self(Arc::new(session))
    }
}

/// Gateway for contexts without session support (console runs, or hosts
/// that never attached a session).
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedSession;

impl SessionGateway for DetachedSession {
    fn is_started(&self) -> bool {
        false
    }

    fn start(&self) -> Result<(), SessionError> {
        Ok(())
    }

    fn close(&self) -> Result<(), SessionError> {
        Ok(())
    }

    fn get(&self, _key: &str) -> Option<String> {
        None
    }

    fn insert(&self, _key: &str, _value: String) {}

    fn remove(&self, _key: &str) -> Option<String> {
        None
    }

    fn entries(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

#[derive(Debug, Default)]
struct MemorySessionState {
    started: bool,
    reject_start: Option<String>,
    values: BTreeMap<String, String>,
    flush_count: u64,
}

/// In-process session. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemorySession {
    state: Arc<Mutex<MemorySessionState>>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started() -> Self {
        let session = Self::default();
        session.lock().started = true;
        session
    }

    /// A session whose `start` always fails, the way a session backend does
    /// once response headers are already on the wire.
    pub fn rejecting(reason: impl Into<String>) -> Self {
        let session = Self::default();
        session.lock().reject_start = Some(reason.into());
        session
    }

    /// Number of times an open session was flushed by `close`.
    pub fn flush_count(&self) -> u64 {
        self.lock().flush_count
    }

    fn lock(&self) -> MutexGuard<'_, MemorySessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionGateway for MemorySession {
    fn is_started(&self) -> bool {
        self.lock().started
    }

    fn start(&self) -> Result<(), SessionError> {
        let mut state = self.lock();
        if state.started {
            return Ok(());
        }
        if let Some(reason) = state.reject_start.as_ref() {
            return Err(SessionError::Rejected(reason.clone()));
        }
        state.started = true;
        Ok(())
    }

    fn close(&self) -> Result<(), SessionError> {
        let mut state = self.lock();
        if state.started {
            state.started = false;
            state.flush_count += 1;
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Option<String> {
        let state = self.lock();
        if !state.started {
            return None;
        }
        state.values.get(key).cloned()
    }

    fn insert(&self, key: &str, value: String) {
        let mut state = self.lock();
        if !state.started {
            tracing::debug!(key, "session closed; dropping write");
            return;
        }
        state.values.insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) -> Option<String> {
        let mut state = self.lock();
        if !state.started {
            return None;
        }
        state.values.remove(key)
    }

    fn entries(&self) -> Vec<(String, String)> {
        let state = self.lock();
        if !state.started {
            return Vec::new();
        }
        state
            .values
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

/// Opens the session for the lifetime of the guard and closes it on drop,
/// including when a panel panics mid-render.
pub struct SessionScope<'a> {
    gateway: &'a dyn SessionGateway,
    was_started: bool,
}

impl<'a> SessionScope<'a> {
    pub fn open(gateway: &'a dyn SessionGateway) -> Self {
        let was_started = gateway.is_started();
        if !was_started {
            if let Err(error) = gateway.start() {
                tracing::debug!(error = %error, "debug bar session start skipped");
            }
        }
        Self {
            gateway,
            was_started,
        }
    }

    /// Whether the session was already open before this scope began.
    pub fn was_started(&self) -> bool {
        self.was_started
    }

    pub fn gateway(&self) -> &dyn SessionGateway {
        self.gateway
    }
}

impl Drop for SessionScope<'_> {
    fn drop(&mut self) {
        if let Err(error) = self.gateway.close() {
            tracing::debug!(error = %error, "debug bar session close skipped");
        }
    }
}
