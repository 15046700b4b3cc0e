//! SQLite storage backend
//!
//! Documents and events are stored as JSON text. Edge listings are ordered by
//! `sort_value DESC, dst DESC` and paginated by zero-based offset: cursor `n` names the
//! n-th edge of the listing, and a listing resumes at offset `n + 1`.
//!
//! `rusqlite` is blocking, so every call runs on the blocking thread pool with
//! the single connection behind a mutex.

use crate::core::types::{EdgeRecord, EventRecord, Fields};
use crate::storage::{merge_document, GraphStorage, PageCursors, StorageError, StorageResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const TABLES: [&str; 4] = ["objects", "edges", "events", "unique_keys"];

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS objects (
    id          TEXT PRIMARY KEY,
    object_type TEXT NOT NULL,
    doc         TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS edges (
    src        TEXT NOT NULL,
    name       TEXT NOT NULL,
    dst        TEXT NOT NULL,
    sort_value TEXT NOT NULL,
    PRIMARY KEY (src, name, dst)
);

CREATE INDEX IF NOT EXISTS edges_sorting ON edges (src, name, sort_value, dst);

CREATE TABLE IF NOT EXISTS events (
    id         TEXT PRIMARY KEY,
    created_at INTEGER NOT NULL,
    body       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS unique_keys (
    key TEXT PRIMARY KEY
);
"#;

/// SQLite backend
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Task(format!("cannot create {}: {}", parent.display(), e)))?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        tracing::info!(path = %path.display(), "Opened SQLite storage");
        Ok(Self::from_connection(conn))
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> StorageResult<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    async fn run<T, F>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

/// Offset a listing resumes at; `None` for a cursor that is not a number
fn resume_offset(after: Option<&str>) -> Option<i64> {
    match after {
        None => Some(0),
        Some(cursor) => cursor.trim().parse::<i64>().ok().map(|n| n.saturating_add(1).max(0)),
    }
}

fn parse_doc(text: &str) -> StorageResult<Fields> {
    match serde_json::from_str(text)? {
        serde_json::Value::Object(doc) => Ok(doc),
        _ => Err(StorageError::Corrupt("object document is not a JSON object".to_string())),
    }
}

#[async_trait]
impl GraphStorage for SqliteStore {
    async fn init(&self) -> StorageResult<()> {
        self.run(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        tracing::info!("SQLite schema initialised");
        Ok(())
    }

    async fn check_db(&self) -> StorageResult<()> {
        self.run(|conn| {
            let mut stmt = conn.prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
            for table in TABLES {
                if !stmt.exists(params![table])? {
                    return Err(StorageError::SchemaMissing(format!("table '{}' not found", table)));
                }
            }
            Ok(())
        })
        .await
    }

    async fn get_object(&self, id: &str) -> StorageResult<Option<Fields>> {
        let id = id.to_string();
        self.run(move |conn| {
            let text: Option<String> = conn
                .query_row("SELECT doc FROM objects WHERE id = ?1", params![id], |row| row.get(0))
                .optional()?;
            text.as_deref().map(parse_doc).transpose()
        })
        .await
    }

    async fn create_object(&self, doc: &Fields) -> StorageResult<()> {
        let field = |key: &str| {
            doc.get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| StorageError::Corrupt(format!("object document without {}", key)))
        };
        let id = field("id")?;
        let object_type = field("object_type")?;
        let text = serde_json::to_string(doc)?;

        self.run(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO objects (id, object_type, doc) VALUES (?1, ?2, ?3)",
                params![id, object_type, text],
            )?;
            if inserted == 0 {
                return Err(StorageError::AlreadyExists(id));
            }
            Ok(())
        })
        .await
    }

    async fn update_object(&self, id: &str, delta: &Fields, delete_fields: &[String]) -> StorageResult<()> {
        let id = id.to_string();
        let delta = delta.clone();
        let delete_fields = delete_fields.to_vec();

        self.run(move |conn| {
            let tx = conn.transaction()?;
            let text: Option<String> = tx
                .query_row("SELECT doc FROM objects WHERE id = ?1", params![id], |row| row.get(0))
                .optional()?;
            if let Some(text) = text {
                let mut doc = parse_doc(&text)?;
                merge_document(&mut doc, &delta, &delete_fields);
                tx.execute(
                    "UPDATE objects SET doc = ?2 WHERE id = ?1",
                    params![id, serde_json::to_string(&doc)?],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete_object(&self, id: &str) -> StorageResult<()> {
        let id = id.to_string();
        self.run(move |conn| {
            conn.execute("DELETE FROM objects WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }

    async fn get_edge(&self, src: &str, name: &str, dst: &str) -> StorageResult<Option<EdgeRecord>> {
        let (src, name, dst) = (src.to_string(), name.to_string(), dst.to_string());
        self.run(move |conn| {
            let sort_value: Option<String> = conn
                .query_row(
                    "SELECT sort_value FROM edges WHERE src = ?1 AND name = ?2 AND dst = ?3",
                    params![src, name, dst],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(sort_value.map(|sort_value| EdgeRecord {
                src,
                edge_name: name,
                dst,
                sort_value,
            }))
        })
        .await
    }

    async fn create_edge(&self, edge: &EdgeRecord) -> StorageResult<()> {
        let edge = edge.clone();
        self.run(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO edges (src, name, dst, sort_value) VALUES (?1, ?2, ?3, ?4)",
                params![edge.src, edge.edge_name, edge.dst, edge.sort_value],
            )?;
            if inserted == 0 {
                return Err(StorageError::AlreadyExists(format!(
                    "{}/{}/{}",
                    edge.src, edge.edge_name, edge.dst
                )));
            }
            Ok(())
        })
        .await
    }

    async fn delete_edge(&self, src: &str, name: &str, dst: &str) -> StorageResult<()> {
        let (src, name, dst) = (src.to_string(), name.to_string(), dst.to_string());
        self.run(move |conn| {
            conn.execute(
                "DELETE FROM edges WHERE src = ?1 AND name = ?2 AND dst = ?3",
                params![src, name, dst],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_edges(&self, src: &str, name: &str, count: usize, after: Option<&str>) -> StorageResult<Vec<String>> {
        let Some(offset) = resume_offset(after) else {
            tracing::debug!(src, name, cursor = ?after, "Non-numeric edge cursor");
            return Ok(Vec::new());
        };
        let (src, name) = (src.to_string(), name.to_string());
        let limit = i64::try_from(count).unwrap_or(i64::MAX);

        self.run(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT dst FROM edges WHERE src = ?1 AND name = ?2 \
                 ORDER BY sort_value DESC, dst DESC LIMIT ?3 OFFSET ?4",
            )?;
            let rows = stmt.query_map(params![src, name, limit, offset], |row| row.get::<_, String>(0))?;
            let dsts = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(dsts)
        })
        .await
    }

    async fn get_edge_count(&self, src: &str, name: &str) -> StorageResult<u64> {
        let (src, name) = (src.to_string(), name.to_string());
        self.run(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM edges WHERE src = ?1 AND name = ?2",
                params![src, name],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    fn first_and_last_params(&self, page: &[String], after: Option<&str>) -> PageCursors {
        if page.is_empty() {
            return PageCursors::default();
        }
        let first = resume_offset(after).unwrap_or(0);
        let last = first + page.len() as i64 - 1;
        PageCursors {
            first: Some(first.to_string()),
            last: Some(last.to_string()),
        }
    }

    async fn save_event(&self, event: &EventRecord) -> StorageResult<()> {
        let id = event.id.clone();
        let created_at = event.created_at;
        let body = serde_json::to_string(event)?;
        self.run(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO events (id, created_at, body) VALUES (?1, ?2, ?3)",
                params![id, created_at, body],
            )?;
            if inserted == 0 {
                return Err(StorageError::AlreadyExists(id));
            }
            Ok(())
        })
        .await
    }

    async fn get_event(&self, id: &str) -> StorageResult<Option<EventRecord>> {
        let id = id.to_string();
        self.run(move |conn| {
            let body: Option<String> = conn
                .query_row("SELECT body FROM events WHERE id = ?1", params![id], |row| row.get(0))
                .optional()?;
            Ok(body.map(|body| serde_json::from_str(&body)).transpose()?)
        })
        .await
    }

    async fn add_unique(&self, key: &str) -> StorageResult<()> {
        let key = key.to_string();
        self.run(move |conn| {
            let inserted = conn.execute("INSERT OR IGNORE INTO unique_keys (key) VALUES (?1)", params![key])?;
            if inserted == 0 {
                return Err(StorageError::AlreadyReserved(key));
            }
            Ok(())
        })
        .await
    }

    async fn remove_unique(&self, key: &str) -> StorageResult<()> {
        let key = key.to_string();
        self.run(move |conn| {
            conn.execute("DELETE FROM unique_keys WHERE key = ?1", params![key])?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::contract;

    async fn store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.init().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_check_db_requires_init() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(matches!(store.check_db().await, Err(StorageError::SchemaMissing(_))));
        store.init().await.unwrap();
        store.init().await.unwrap();
        assert!(store.check_db().await.is_ok());
    }

    #[tokio::test]
    async fn test_object_contract() {
        contract::objects(&store().await).await;
    }

    #[tokio::test]
    async fn test_edge_contract() {
        contract::edges(&store().await).await;
    }

    #[tokio::test]
    async fn test_unique_contract() {
        contract::unique_keys(&store().await).await;
    }

    #[tokio::test]
    async fn test_event_contract() {
        contract::events(&store().await).await;
    }

    #[tokio::test]
    async fn test_offset_cursors() {
        let store = store().await;
        contract::edges(&store).await;

        assert!(store.get_edges("src", "friends", 10, Some("abc")).await.unwrap().is_empty());
        assert_eq!(store.get_edges("src", "friends", 10, Some("-5")).await.unwrap().len(), 4);

        let page = vec!["x".to_string(), "y".to_string()];
        let cursors = store.first_and_last_params(&page, Some("4"));
        assert_eq!(cursors.first.as_deref(), Some("5"));
        assert_eq!(cursors.last.as_deref(), Some("6"));
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("graph.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.init().await.unwrap();
            store.add_unique("user-email-a").await.unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert!(store.check_db().await.is_ok());
        assert!(matches!(
            store.add_unique("user-email-a").await,
            Err(StorageError::AlreadyReserved(_))
        ));
    }
}
