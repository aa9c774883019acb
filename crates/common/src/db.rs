//! SQLite storage for the registered vCenter account

use crate::{Credentials, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Database wrapper for the single-row account table
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path.as_ref())?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        info!("Opened database at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS vcenter_account (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                vcenter TEXT NOT NULL,
                username TEXT NOT NULL,
                password TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Replace the stored account with `creds`
    pub fn save_credentials(&self, creds: &Credentials) -> Result<()> {
        let mut conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();

        let tx = conn.transaction()?;
        tx.execute("DELETE FROM vcenter_account", [])?;
        tx.execute(
            "INSERT INTO vcenter_account (id, vcenter, username, password, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4)",
            params![creds.vcenter, creds.username, creds.password, now],
        )?;
        tx.commit()?;

        debug!(vcenter = %creds.vcenter, username = %creds.username, "Saved vCenter account");
        Ok(())
    }

    /// Load the stored account, if one was registered
    pub fn load_credentials(&self) -> Result<Option<Credentials>> {
        let conn = self.conn.lock();

        let creds = conn
            .query_row(
                "SELECT vcenter, username, password FROM vcenter_account WHERE id = 1",
                [],
                |row| {
                    Ok(Credentials {
                        vcenter: row.get(0)?,
                        username: row.get(1)?,
                        password: row.get(2)?,
                    })
                },
            )
            .optional()?;

        Ok(creds)
    }
}
