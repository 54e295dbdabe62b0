//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation. The connection sits behind
//! a mutex so one handle can be shared (`Arc<Database>`) between the engines
//! and their background tasks.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use directories::ProjectDirs;
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::migrations;

pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/keychat/keychat.db`
    /// - macOS:   `~/Library/Application Support/org.keychat.keychat/keychat.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\keychat\keychat\data\keychat.db`
    pub fn new() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("org", "keychat", "keychat").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        Self::open_at(&data_dir.join("keychat.db"))
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        tracing::info!(path = %path.display(), "opening database");

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// A private database that vanishes when dropped.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Lock and return the underlying connection.
    ///
    /// Callers should prefer the typed CRUD helpers. Do not hold the guard
    /// across an `.await`.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Filesystem path of the open database, `None` for in-memory ones.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");

        let db = Database::open_at(&path).expect("should open");
        assert_eq!(db.path(), Some(path.as_path()));
        drop(db);

        // Reopening runs migrations against an existing schema.
        Database::open_at(&path).expect("should reopen");
    }

    #[test]
    fn in_memory_has_no_path() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.path().is_none());
    }
}
