//! SQLite-backed template store.
//!
//! A single key-value table; the `faces.v1` row holds a JSON object
//! mapping student id to an encoded PNG.

use rollcall_core::{StoreError, TemplateStore, TEMPLATE_NAMESPACE};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

type TemplateMap = BTreeMap<String, String>;

pub struct SqliteTemplateStore {
    conn: Mutex<Connection>,
}

impl SqliteTemplateStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Backend(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path).map_err(backend)?;
        tracing::debug!(path = %path.display(), "opened template database");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(backend)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                namespace TEXT PRIMARY KEY,
                value     TEXT NOT NULL
            );",
        )
        .map_err(backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("database lock poisoned".into()))
    }

    /// Apply `f` to the template map inside one transaction.
    fn update<T>(&self, f: impl FnOnce(&mut TemplateMap) -> T) -> Result<T, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(backend)?;
        let mut map = read_map(&tx)?;
        let out = f(&mut map);
        tx.execute(
            "INSERT INTO kv (namespace, value) VALUES (?1, ?2)
             ON CONFLICT(namespace) DO UPDATE SET value = excluded.value",
            params![TEMPLATE_NAMESPACE, serde_json::to_string(&map)?],
        )
        .map_err(backend)?;
        tx.commit().map_err(backend)?;
        Ok(out)
    }
}

fn read_map(conn: &Connection) -> Result<TemplateMap, StoreError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM kv WHERE namespace = ?1",
            params![TEMPLATE_NAMESPACE],
            |row| row.get(0),
        )
        .optional()
        .map_err(backend)?;

    let Some(raw) = raw else {
        return Ok(TemplateMap::new());
    };
    match serde_json::from_str(&raw) {
        Ok(map) => Ok(map),
        Err(e) => {
            tracing::warn!(error = %e, "template namespace is corrupt; treating as empty");
            Ok(TemplateMap::new())
        }
    }
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl TemplateStore for SqliteTemplateStore {
    fn save(&self, student_id: &str, template: &str) -> Result<(), StoreError> {
        self.update(|map| {
            map.insert(student_id.to_string(), template.to_string());
        })?;
        tracing::info!(student = student_id, "face template saved");
        Ok(())
    }

    fn load(&self, student_id: &str) -> Result<Option<String>, StoreError> {
        let conn = self.lock()?;
        Ok(read_map(&conn)?.remove(student_id))
    }

    fn remove(&self, student_id: &str) -> Result<bool, StoreError> {
        self.update(|map| map.remove(student_id).is_some())
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        Ok(read_map(&conn)?.into_keys().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_template_is_none() {
        let store = SqliteTemplateStore::open_in_memory().unwrap();
        assert_eq!(store.load("S001").unwrap(), None);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_save_load_overwrite() {
        let store = SqliteTemplateStore::open_in_memory().unwrap();
        store.save("S001", "data:image/png;base64,AAAA").unwrap();
        store.save("S002", "data:image/png;base64,BBBB").unwrap();
        store.save("S001", "data:image/png;base64,CCCC").unwrap();
        assert_eq!(
            store.load("S001").unwrap().as_deref(),
            Some("data:image/png;base64,CCCC")
        );
        assert_eq!(store.list().unwrap(), vec!["S001", "S002"]);
    }

    #[test]
    fn test_namespace_holds_json_map() {
        let store = SqliteTemplateStore::open_in_memory().unwrap();
        store.save("S001", "blob").unwrap();
        let conn = store.lock().unwrap();
        let raw: String = conn
            .query_row(
                "SELECT value FROM kv WHERE namespace = 'faces.v1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(raw, r#"{"S001":"blob"}"#);
    }

    #[test]
    fn test_corrupt_namespace_reads_empty() {
        let store = SqliteTemplateStore::open_in_memory().unwrap();
        store
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO kv (namespace, value) VALUES ('faces.v1', 'not json')",
                [],
            )
            .unwrap();
        assert_eq!(store.load("S001").unwrap(), None);
        store.save("S001", "fresh").unwrap();
        assert_eq!(store.load("S001").unwrap().as_deref(), Some("fresh"));
    }

    #[test]
    fn test_remove() {
        let store = SqliteTemplateStore::open_in_memory().unwrap();
        store.save("S001", "a").unwrap();
        assert!(store.remove("S001").unwrap());
        assert!(!store.remove("S001").unwrap());
        assert_eq!(store.load("S001").unwrap(), None);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = std::env::temp_dir().join(format!("rollcall-store-{}", std::process::id()));
        let path = dir.join("nested").join("rollcall.db");
        {
            let store = SqliteTemplateStore::open(&path).unwrap();
            store.save("S003", "kept").unwrap();
        }
        let store = SqliteTemplateStore::open(&path).unwrap();
        assert_eq!(store.load("S003").unwrap().as_deref(), Some("kept"));
        drop(store);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
