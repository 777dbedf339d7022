//! Database capability layer
//!
//! The pool never talks to SQLite directly. It is handed a [`DatabaseManager`]
//! at construction and opens handles through it, which keeps the pool core
//! testable against stub databases and keeps driver choices out of the
//! acquire/release paths.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// A single SQL parameter or result cell
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

/// Outcome of a single statement execution
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Rows changed by an INSERT/UPDATE/DELETE; zero for queries
    pub rows_affected: u64,
    /// Result rows for a SELECT; empty for statements
    pub rows: Vec<Vec<Value>>,
}

/// One open handle to the underlying database
pub trait DbHandle: Send {
    /// Execute a single statement with positional parameters
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Trivial liveness probe; any error means the handle is unusable
    fn probe(&mut self) -> Result<()>;

    /// Release the handle. Idempotent and always safe.
    fn close(&mut self);
}

/// Opens database handles for the pool
pub trait DatabaseManager: Send + Sync {
    /// Open a new handle, failing with [`Error::CreateFailed`] if the open
    /// phase exceeds `creation_timeout`
    fn open(&self, creation_timeout: Duration) -> Result<Box<dyn DbHandle>>;
}

/// SQLite-backed [`DatabaseManager`] for a single database file
pub struct SqliteManager {
    path: PathBuf,
}

impl SqliteManager {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DatabaseManager for SqliteManager {
    fn open(&self, creation_timeout: Duration) -> Result<Box<dyn DbHandle>> {
        let started = Instant::now();

        let conn = rusqlite::Connection::open(&self.path)
            .map_err(|e| Error::CreateFailed(e.to_string()))?;

        // WAL keeps readers from blocking behind the writer; the busy
        // timeout must cover worst-case writer stalls (>= 30s).
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
            .map_err(|e| Error::CreateFailed(e.to_string()))?;
        conn.busy_timeout(Duration::from_secs(30))
            .map_err(|e| Error::CreateFailed(e.to_string()))?;

        // The open is a blocking call, so the timeout is checked after the
        // fact; a handle that arrived late is discarded.
        if started.elapsed() > creation_timeout {
            drop(conn);
            return Err(Error::CreateFailed(format!(
                "connection creation exceeded {:?}",
                creation_timeout
            )));
        }

        Ok(Box::new(SqliteHandle { conn: Some(conn) }))
    }
}

struct SqliteHandle {
    conn: Option<rusqlite::Connection>,
}

impl SqliteHandle {
    fn conn(&self) -> Result<&rusqlite::Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| Error::Database("connection is closed".to_string()))
    }
}

impl DbHandle for SqliteHandle {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let column_count = stmt.column_count();

        let bound: Vec<&dyn rusqlite::ToSql> =
            params.iter().map(|v| v as &dyn rusqlite::ToSql).collect();

        if column_count == 0 {
            let rows_affected = stmt.execute(&bound[..])? as u64;
            return Ok(QueryResult {
                rows_affected,
                rows: Vec::new(),
            });
        }

        let mut out = Vec::new();
        let mut rows = stmt.query(&bound[..])?;
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(column_count);
            for i in 0..column_count {
                cells.push(Value::from_sql_ref(row.get_ref(i)?));
            }
            out.push(cells);
        }

        Ok(QueryResult {
            rows_affected: 0,
            rows: out,
        })
    }

    fn probe(&mut self) -> Result<()> {
        let conn = self.conn()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err((_conn, e)) = conn.close() {
                tracing::warn!("error closing sqlite handle: {}", e);
            }
        }
    }
}

impl Value {
    fn from_sql_ref(value: rusqlite::types::ValueRef<'_>) -> Self {
        use rusqlite::types::ValueRef;
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(r) => Value::Real(r),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

impl rusqlite::ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, ValueRef};
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(r) => ToSqlOutput::Borrowed(ValueRef::Real(*r)),
            Value::Text(t) => ToSqlOutput::Borrowed(ValueRef::Text(t.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}
