use crate::error::StoreError;
use crate::store::{Batch, DocumentStore};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Document store backed by a single SQLite file. Batches commit in one transaction.
/// Queries run on the blocking pool so a slow disk never holds a runtime worker.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();
        if db_path.as_os_str().is_empty() {
            return Err(StoreError::NotConfigured {
                message: "store path is empty".to_string(),
            });
        }
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|err| StoreError::Backend {
                message: format!("creating {}: {err}", parent.display()),
            })?;
        }
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        lock(&self.conn)
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&conn);
            f(&mut *guard)
        })
        .await
        .map_err(|err| StoreError::Backend {
            message: format!("sqlite task failed: {err}"),
        })?
    }

    pub fn document_names(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT name FROM documents ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut names = Vec::new();
        for r in rows {
            names.push(r?);
        }
        Ok(names)
    }
}

fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

fn init(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
          name TEXT PRIMARY KEY CHECK (name <> '' AND name = trim(name)),
          body TEXT NOT NULL,
          updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        );
        "#,
    )?;
    Ok(())
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn read(&self, name: &str) -> Result<Option<Value>, StoreError> {
        let name = name.to_string();
        let body: Option<String> = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT body FROM documents WHERE name = ?1",
                        params![name],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;
        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    async fn write_batch(&self, documents: Batch) -> Result<(), StoreError> {
        let mut encoded = Vec::with_capacity(documents.len());
        for (name, value) in documents {
            let body = serde_json::to_string_pretty(&value)?;
            encoded.push((name, body));
        }

        let written = self
            .with_conn(move |conn| {
                // Dropping the transaction without commit rolls back every staged upsert.
                let tx = conn.transaction()?;
                for (name, body) in &encoded {
                    tx.execute(
                        r#"
                        INSERT INTO documents (name, body)
                        VALUES (?1, ?2)
                        ON CONFLICT(name) DO UPDATE SET
                          body=excluded.body,
                          updated_at=strftime('%Y-%m-%dT%H:%M:%fZ','now')
                        "#,
                        params![name, body],
                    )?;
                }
                tx.commit()?;
                Ok(encoded.len())
            })
            .await?;
        tracing::debug!(documents = written, "committed document batch");
        Ok(())
    }
}
