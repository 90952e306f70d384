//! Shared SQLite object store
//!
//! One SQLite file, placed on storage every member can reach, holds one
//! row per object. SQLite serializes writers, and every write bumps the
//! row's version, so version-conditional updates come for free.
//!
//! Statements run on the blocking pool. A caller that stops waiting (for
//! example on a store timeout) gets control back at once; the statement
//! itself is bounded by the connection's busy timeout.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use super::{Annotations, ObjectKey, ObjectStore, StoredObject, Version};
use crate::error::{Error, Result};

/// Object store backed by a SQLite database file
pub struct SqliteStore {
    /// Database connection
    conn: Arc<Mutex<Connection>>,
    /// Location of the database file
    path: PathBuf,
}

impl SqliteStore {
    /// Create or open the store database
    pub fn open(path: PathBuf, timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.busy_timeout(timeout)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS objects (
                kind TEXT NOT NULL,
                namespace TEXT NOT NULL,
                name TEXT NOT NULL,
                annotations TEXT NOT NULL,
                version INTEGER NOT NULL,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (kind, namespace, name)
            );
            "#,
        )?;

        tracing::debug!("Opened sqlite store at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Location of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `op` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| Error::Transport("sqlite connection lock poisoned".into()))?;
            op(&conn)
        })
        .await
        .map_err(|e| Error::Transport(format!("sqlite task failed: {}", e)))?
    }

    fn current_version(conn: &Connection, key: &ObjectKey) -> Result<Option<Version>> {
        let version: Option<i64> = conn
            .query_row(
                "SELECT version FROM objects WHERE kind = ?1 AND namespace = ?2 AND name = ?3",
                params![key.kind.as_str(), key.namespace, key.name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(version.map(|v| v as Version))
    }
}

#[async_trait]
impl ObjectStore for SqliteStore {
    async fn get(&self, key: &ObjectKey) -> Result<StoredObject> {
        let key = key.clone();
        self.with_conn(move |conn| {
            let row: Option<(String, i64)> = conn
                .query_row(
                    "SELECT annotations, version FROM objects WHERE kind = ?1 AND namespace = ?2 AND name = ?3",
                    params![key.kind.as_str(), key.namespace, key.name],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match row {
                Some((json, version)) => Ok(StoredObject {
                    annotations: serde_json::from_str(&json)?,
                    version: version as Version,
                }),
                None => Err(key.not_found()),
            }
        })
        .await
    }

    async fn update(
        &self,
        key: &ObjectKey,
        annotations: &Annotations,
        expected: Option<Version>,
    ) -> Result<Version> {
        let json = serde_json::to_string(annotations)?;
        let key = key.clone();
        self.with_conn(move |conn| {
            let updated: Option<i64> = match expected {
                Some(expected) => conn
                    .query_row(
                        r#"
                        UPDATE objects SET annotations = ?4, version = version + 1, updated_at = CURRENT_TIMESTAMP
                        WHERE kind = ?1 AND namespace = ?2 AND name = ?3 AND version = ?5
                        RETURNING version
                        "#,
                        params![key.kind.as_str(), key.namespace, key.name, json, expected as i64],
                        |row| row.get(0),
                    )
                    .optional()?,
                None => conn
                    .query_row(
                        r#"
                        UPDATE objects SET annotations = ?4, version = version + 1, updated_at = CURRENT_TIMESTAMP
                        WHERE kind = ?1 AND namespace = ?2 AND name = ?3
                        RETURNING version
                        "#,
                        params![key.kind.as_str(), key.namespace, key.name, json],
                        |row| row.get(0),
                    )
                    .optional()?,
            };

            if let Some(version) = updated {
                tracing::trace!("sqlite store: {} now at version {}", key, version);
                return Ok(version as Version);
            }

            // Nothing matched: either the object is gone or the version moved on
            match (Self::current_version(conn, &key)?, expected) {
                (None, _) => Err(key.not_found()),
                (Some(found), Some(expected)) => Err(key.version_conflict(expected, found)),
                (Some(_), None) => Err(Error::Transport(format!("update of {} was not applied", key))),
            }
        })
        .await
    }

    async fn create(&self, key: &ObjectKey, annotations: &Annotations) -> Result<Version> {
        let json = serde_json::to_string(annotations)?;
        let key = key.clone();
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                r#"
                INSERT OR IGNORE INTO objects (kind, namespace, name, annotations, version)
                VALUES (?1, ?2, ?3, ?4, 1)
                "#,
                params![key.kind.as_str(), key.namespace, key.name, json],
            )?;
            if inserted == 0 {
                return Err(key.already_exists());
            }
            Ok(1)
        })
        .await
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Transport(format!("SQLite error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{AnnotatedResource, CachedObject};
    use crate::store::ResourceKind;
    use tempfile::tempdir;

    fn member(name: &str) -> ObjectKey {
        ObjectKey::new(ResourceKind::Member, "db", name)
    }

    #[tokio::test]
    async fn test_sqlite_store_basic() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("store.db"), Duration::from_secs(1)).unwrap();

        assert!(store.get(&member("pg-0")).await.unwrap_err().is_not_found());

        let mut annotations = Annotations::new();
        annotations.insert("MemberState".into(), "INIT".into());
        assert_eq!(store.create(&member("pg-0"), &annotations).await.unwrap(), 1);

        annotations.insert("MemberState".into(), "STANDBY".into());
        assert_eq!(store.update(&member("pg-0"), &annotations, Some(1)).await.unwrap(), 2);

        let object = store.get(&member("pg-0")).await.unwrap();
        assert_eq!(object.version, 2);
        assert_eq!(object.annotations.get("MemberState").unwrap(), "STANDBY");
    }

    #[tokio::test]
    async fn test_sqlite_version_conflict() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("store.db"), Duration::from_secs(1)).unwrap();
        store.create(&member("pg-1"), &Annotations::new()).await.unwrap();
        store.update(&member("pg-1"), &Annotations::new(), Some(1)).await.unwrap();

        match store.update(&member("pg-1"), &Annotations::new(), Some(1)).await {
            Err(Error::PreconditionFailed { expected, found, .. }) => {
                assert_eq!(expected, "1");
                assert_eq!(found, "2");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sqlite_update_missing_object() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("store.db"), Duration::from_secs(1)).unwrap();
        let err = store.update(&member("pg-9"), &Annotations::new(), None).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_sqlite_shared_between_handles() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let first = SqliteStore::open(path.clone(), Duration::from_secs(1)).unwrap();
        let second = SqliteStore::open(path, Duration::from_secs(1)).unwrap();

        first.create(&member("pg-0"), &Annotations::new()).await.unwrap();
        assert!(matches!(
            second.create(&member("pg-0"), &Annotations::new()).await,
            Err(Error::AlreadyExists { .. })
        ));
        assert_eq!(second.get(&member("pg-0")).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_busy_connection_does_not_block_resource_timeout() {
        let dir = tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path().join("store.db"), Duration::from_secs(1)).unwrap());
        store.create(&member("pg-0"), &Annotations::new()).await.unwrap();

        let mut object = CachedObject::new(store.clone(), member("pg-0"), Duration::from_millis(50));
        let busy = store.conn.lock().unwrap();
        let err = object.fetch().await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)), "unexpected error: {:?}", err);
        drop(busy);

        object.fetch().await.unwrap();
        assert_eq!(object.version(), Some(1));
    }
}
