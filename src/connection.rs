//! Connection wrapper
//!
//! Owns one database handle and tracks its lifecycle: use count, error
//! count, last-used time, and status. The pool hands a wrapper to exactly
//! one caller at a time; the wrapper's own lock turns any stray concurrent
//! use into serialization instead of corruption.

use crate::db::{DbHandle, QueryResult, Value};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Lifecycle state of a pooled connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Idle,
    Active,
    Waiting,
    Error,
    Closed,
}

/// Point-in-time view of a single connection
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub id: String,
    pub status: ConnectionStatus,
    pub age_ms: u64,
    pub idle_ms: Option<u64>,
    pub usage_count: u64,
    pub error_count: u64,
}

pub struct ConnectionWrapper {
    id: String,
    created_at: Instant,
    state: Mutex<WrapperState>,
}

impl std::fmt::Debug for ConnectionWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionWrapper")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .finish()
    }
}

struct WrapperState {
    handle: Option<Box<dyn DbHandle>>,
    status: ConnectionStatus,
    last_used_at: Option<Instant>,
    usage_count: u64,
    error_count: u64,
}

impl ConnectionWrapper {
    pub(crate) fn new(handle: Box<dyn DbHandle>) -> Self {
        Self {
            id: format!("conn-{}", Uuid::new_v4()),
            created_at: Instant::now(),
            state: Mutex::new(WrapperState {
                handle: Some(handle),
                status: ConnectionStatus::Idle,
                last_used_at: None,
                usage_count: 0,
                error_count: 0,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.lock().status
    }

    pub fn usage_count(&self) -> u64 {
        self.state.lock().usage_count
    }

    pub fn error_count(&self) -> u64 {
        self.state.lock().error_count
    }

    /// Time since last use, if the connection has ever been used
    pub fn idle_for(&self) -> Option<Duration> {
        self.state.lock().last_used_at.map(|t| t.elapsed())
    }

    /// Execute a statement on the owned handle and record the outcome.
    ///
    /// SQL errors propagate to the caller unchanged; the wrapper flips to
    /// [`ConnectionStatus::Error`] so the next sweep replaces it.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let mut state = self.state.lock();

        state.status = ConnectionStatus::Active;
        state.last_used_at = Some(Instant::now());

        let result = match state.handle.as_mut() {
            Some(handle) => handle.execute(sql, params),
            None => {
                state.status = ConnectionStatus::Closed;
                return Err(Error::Database(format!("connection {} is closed", self.id)));
            }
        };

        match result {
            Ok(result) => {
                state.usage_count += 1;
                state.status = ConnectionStatus::Idle;
                Ok(result)
            }
            Err(e) => {
                state.error_count += 1;
                state.status = ConnectionStatus::Error;
                Err(e)
            }
        }
    }

    /// Probe the handle. Any failure means unhealthy.
    pub fn is_healthy(&self) -> bool {
        let mut state = self.state.lock();
        match state.handle.as_mut() {
            Some(handle) => handle.probe().is_ok(),
            None => false,
        }
    }

    /// Close the underlying handle. Idempotent and always safe.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if let Some(mut handle) = state.handle.take() {
            handle.close();
        }
        state.status = ConnectionStatus::Closed;
    }

    pub(crate) fn set_status(&self, status: ConnectionStatus) {
        self.state.lock().status = status;
    }

    /// Stamp the last-used time, used when a connection returns to idle
    pub(crate) fn touch(&self) {
        self.state.lock().last_used_at = Some(Instant::now());
    }

    pub fn info(&self) -> ConnectionInfo {
        let state = self.state.lock();
        ConnectionInfo {
            id: self.id.clone(),
            status: state.status,
            age_ms: self.created_at.elapsed().as_millis() as u64,
            idle_ms: state.last_used_at.map(|t| t.elapsed().as_millis() as u64),
            usage_count: state.usage_count,
            error_count: state.error_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DatabaseManager, SqliteManager};

    fn wrapper() -> (tempfile::TempDir, ConnectionWrapper) {
        let dir = tempfile::tempdir().unwrap();
        let manager = SqliteManager::new(dir.path().join("test.db"));
        let handle = manager.open(Duration::from_secs(30)).unwrap();
        (dir, ConnectionWrapper::new(handle))
    }

    #[test]
    fn execute_tracks_usage() {
        let (_dir, conn) = wrapper();

        conn.execute("CREATE TABLE t (x INTEGER)", &[]).unwrap();
        conn.execute("INSERT INTO t VALUES (1)", &[]).unwrap();

        assert_eq!(conn.usage_count(), 2);
        assert_eq!(conn.error_count(), 0);
        assert_eq!(conn.status(), ConnectionStatus::Idle);
        assert!(conn.idle_for().is_some());
    }

    #[test]
    fn failed_execute_marks_error() {
        let (_dir, conn) = wrapper();

        assert!(conn.execute("NOT VALID SQL", &[]).is_err());
        assert_eq!(conn.error_count(), 1);
        assert_eq!(conn.status(), ConnectionStatus::Error);
    }

    #[test]
    fn close_is_idempotent_and_kills_health() {
        let (_dir, conn) = wrapper();
        assert!(conn.is_healthy());

        conn.close();
        conn.close();

        assert_eq!(conn.status(), ConnectionStatus::Closed);
        assert!(!conn.is_healthy());
        assert!(conn.execute("SELECT 1", &[]).is_err());
    }

    #[test]
    fn ids_are_unique() {
        let (_dir_a, a) = wrapper();
        let (_dir_b, b) = wrapper();
        assert_ne!(a.id(), b.id());
    }
}
