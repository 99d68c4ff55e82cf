use log::warn;
use rusqlite::{Connection, params};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::app::PROJECT_DIRS;
use crate::reconciler::{DisplayFields, Entry, ListChange};
use crate::ui::Surface;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("no data directory available")]
    NoDataDir,
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn db_path() -> Option<PathBuf> {
    let proj = PROJECT_DIRS.as_ref()?;
    Some(proj.data_dir().join("cache.sqlite"))
}

fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Rendered entries per scope (a conversation or the user list), so a
/// restart can show the last known list before the first snapshot lands.
pub struct Cache {
    conn: Connection,
}

impl Cache {
    pub fn open_default() -> Result<Self, CacheError> {
        let path = db_path().ok_or(CacheError::NoDataDir)?;
        Self::open(&path)
    }

    pub fn open(path: &Path) -> Result<Self, CacheError> {
        ensure_dir(path)?;
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, CacheError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, CacheError> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS entries (
                scope TEXT NOT NULL,
                id TEXT NOT NULL,
                timestamp INTEGER,
                provisional INTEGER NOT NULL DEFAULT 0,
                fields_json TEXT NOT NULL,
                PRIMARY KEY (scope, id)
            );
            "#,
        )?;
        Ok(Self { conn })
    }

    pub fn put(&self, scope: &str, entry: &Entry) -> Result<(), CacheError> {
        let fields = serde_json::to_string(entry.fields())?;
        self.conn.execute(
            r#"
            INSERT INTO entries (scope, id, timestamp, provisional, fields_json)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(scope, id) DO UPDATE SET
                fields_json=excluded.fields_json
            "#,
            params![scope, entry.id(), entry.ordering_key(), entry.is_provisional(), fields],
        )?;
        Ok(())
    }

    /// The newest `limit` entries of `scope`, oldest first. Rows without a
    /// timestamp come back without an ordering key.
    pub fn entries(&self, scope: &str, limit: usize) -> Result<Vec<Entry>, CacheError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, timestamp, provisional, fields_json FROM (
                SELECT rowid, id, timestamp, provisional, fields_json FROM entries
                WHERE scope = ?1
                ORDER BY timestamp DESC, rowid DESC
                LIMIT ?2
            )
            ORDER BY timestamp ASC, rowid ASC
            "#,
        )?;
        let rows = stmt.query_map(params![scope, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, timestamp, provisional, fields_json) = row?;
            let fields: DisplayFields = serde_json::from_str(&fields_json)?;
            out.push(Entry::new(id, timestamp, provisional, fields));
        }
        Ok(out)
    }

    pub fn clear(&self, scope: &str) -> Result<usize, CacheError> {
        Ok(self
            .conn
            .execute("DELETE FROM entries WHERE scope = ?1", params![scope])?)
    }
}

/// Surface wrapper that records every inserted or updated entry.
pub struct CachingSurface<S> {
    cache: Cache,
    scope: String,
    inner: S,
}

impl<S> CachingSurface<S> {
    pub fn new(cache: Cache, scope: impl Into<String>, inner: S) -> Self {
        Self {
            cache,
            scope: scope.into(),
            inner,
        }
    }
}

impl<S: Surface> Surface for CachingSurface<S> {
    fn apply(&mut self, change: &ListChange) {
        if let ListChange::Inserted { entry, .. } | ListChange::Updated { entry, .. } = change {
            if let Err(e) = self.cache.put(&self.scope, entry) {
                warn!("[cache] could not store {}: {e}", entry.id());
            }
        }
        self.inner.apply(change);
    }
}
