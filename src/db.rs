// 🗄️ Revision Store - SQLite persistence for tools, revisions and events
//
//   tools      current state, one row per name (soft delete = deleted_at)
//   revisions  append-only snapshots, never edited or removed
//   events     audit trail, one row per committed change
//
// Same-tool writers are serialized by compare-and-swap on tools.version.

use crate::entities::{Revision, Tool};
use crate::error::{CatalogError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

// ============================================================================
// REVISION STORE
// ============================================================================

/// Persistence boundary of the merge engine and orchestrator.
pub trait RevisionStore: Send + Sync {
    /// Active tool by name. Soft-deleted tools read as `None`.
    fn get(&self, name: &str) -> Result<Option<Tool>>;

    fn get_including_deleted(&self, name: &str) -> Result<Option<Tool>>;

    /// Insert a new tool together with revision 1.
    fn create(&self, tool: &Tool, actor: &str, comment: Option<&str>) -> Result<(Tool, Revision)>;

    /// Overwrite the tool and append a revision, provided its version is
    /// still `expected_version`.
    fn save(
        &self,
        tool: &Tool,
        expected_version: i64,
        actor: &str,
        comment: Option<&str>,
    ) -> Result<(Tool, Revision)>;

    /// Revisions oldest first
    fn list_revisions(&self, name: &str, include_deleted: bool) -> Result<Vec<Revision>>;

    /// A revision of `name`. Ids belonging to another tool are `NotFound`.
    fn get_revision(&self, name: &str, id: i64) -> Result<Revision>;

    fn head_revision(&self, name: &str) -> Result<Revision>;

    fn soft_delete(&self, name: &str, actor: &str) -> Result<Tool>;
}

// ============================================================================
// EVENTS (audit trail)
// ============================================================================

/// Event for audit trail: every committed change is an event
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: Value,
    pub actor: String,
}

impl Event {
    pub fn new(event_type: &str, entity_type: &str, entity_id: &str, data: Value, actor: &str) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Tools Table (current state, full snapshot as JSON)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS tools (
            name TEXT PRIMARY KEY NOT NULL,
            data TEXT NOT NULL,
            version INTEGER NOT NULL,
            created_date TEXT NOT NULL,
            modified_date TEXT NOT NULL,
            deleted_at TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Revisions Table (append-only history)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS revisions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tool_name TEXT NOT NULL,
            version INTEGER NOT NULL,
            snapshot TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            author TEXT NOT NULL,
            comment TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (tool_name, version)
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail / event sourcing)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_revisions_tool ON revisions(tool_name, version)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
        [],
    )?;

    Ok(())
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(conn: &Connection, entity_type: &str, entity_id: &str) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            Ok(Event {
                event_id: row.get(0)?,
                timestamp: parse_timestamp(row, 1)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: parse_json(row, 5)?,
                actor: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// SQLITE STORE
// ============================================================================

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        setup_database(&conn)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    pub fn record_event(&self, event: &Event) -> Result<()> {
        insert_event(&self.conn.lock(), event)
    }

    pub fn events_for(&self, entity_type: &str, entity_id: &str) -> Result<Vec<Event>> {
        get_events_for_entity(&self.conn.lock(), entity_type, entity_id)
    }

    /// Names of active tools, sorted
    pub fn list_names(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT name FROM tools WHERE deleted_at IS NULL ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }
}

impl RevisionStore for SqliteStore {
    fn get(&self, name: &str) -> Result<Option<Tool>> {
        load_tool(&self.conn.lock(), name, false)
    }

    fn get_including_deleted(&self, name: &str) -> Result<Option<Tool>> {
        load_tool(&self.conn.lock(), name, true)
    }

    fn create(&self, tool: &Tool, actor: &str, comment: Option<&str>) -> Result<(Tool, Revision)> {
        let snapshot = tool.snapshot()?;
        let data_json = serde_json::to_string(&snapshot)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let result = tx.execute(
            "INSERT INTO tools (name, data, version, created_date, modified_date, deleted_at)
             VALUES (?1, ?2, 1, ?3, ?4, NULL)",
            params![
                tool.name,
                data_json,
                tool.created_date.to_rfc3339(),
                tool.modified_date.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, msg))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(match row_state(&tx, &tool.name)? {
                    Some((_, true)) => CatalogError::validation(
                        "name",
                        format!("'{}' belongs to a deleted tool and cannot be reused", tool.name),
                    ),
                    Some((found, false)) => CatalogError::ConcurrentModification {
                        name: tool.name.clone(),
                        expected: 0,
                        found,
                    },
                    None => CatalogError::Storage(rusqlite::Error::SqliteFailure(err, msg)),
                });
            }
            Err(e) => return Err(e.into()),
        }

        let revision = insert_revision(&tx, &tool.name, 1, snapshot, actor, comment, tool.modified_date)?;
        tx.commit()?;

        let mut created = tool.clone();
        created.version = 1;
        created.deleted_at = None;
        Ok((created, revision))
    }

    fn save(
        &self,
        tool: &Tool,
        expected_version: i64,
        actor: &str,
        comment: Option<&str>,
    ) -> Result<(Tool, Revision)> {
        let snapshot = tool.snapshot()?;
        let data_json = serde_json::to_string(&snapshot)?;
        let next_version = expected_version + 1;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE tools SET data = ?1, version = ?2, modified_date = ?3
             WHERE name = ?4 AND version = ?5 AND deleted_at IS NULL",
            params![
                data_json,
                next_version,
                tool.modified_date.to_rfc3339(),
                tool.name,
                expected_version,
            ],
        )?;

        if updated == 0 {
            return Err(match row_state(&tx, &tool.name)? {
                Some((found, false)) => CatalogError::ConcurrentModification {
                    name: tool.name.clone(),
                    expected: expected_version,
                    found,
                },
                _ => CatalogError::not_found(format!("tool '{}'", tool.name)),
            });
        }

        let revision = insert_revision(
            &tx,
            &tool.name,
            next_version,
            snapshot,
            actor,
            comment,
            tool.modified_date,
        )?;
        tx.commit()?;

        let mut saved = tool.clone();
        saved.version = next_version;
        saved.deleted_at = None;
        Ok((saved, revision))
    }

    fn list_revisions(&self, name: &str, include_deleted: bool) -> Result<Vec<Revision>> {
        let conn = self.conn.lock();
        if load_tool(&conn, name, include_deleted)?.is_none() {
            return Err(CatalogError::not_found(format!("tool '{}'", name)));
        }

        let mut stmt = conn.prepare(
            "SELECT id, tool_name, version, snapshot, content_hash, author, comment, created_at
             FROM revisions
             WHERE tool_name = ?1
             ORDER BY version ASC",
        )?;
        let revisions = stmt
            .query_map(params![name], row_to_revision)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(revisions)
    }

    fn get_revision(&self, name: &str, id: i64) -> Result<Revision> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, tool_name, version, snapshot, content_hash, author, comment, created_at
             FROM revisions
             WHERE id = ?1 AND tool_name = ?2",
            params![id, name],
            row_to_revision,
        )
        .optional()?
        .ok_or_else(|| CatalogError::not_found(format!("revision {} of tool '{}'", id, name)))
    }

    fn head_revision(&self, name: &str) -> Result<Revision> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, tool_name, version, snapshot, content_hash, author, comment, created_at
             FROM revisions
             WHERE tool_name = ?1
             ORDER BY version DESC
             LIMIT 1",
            params![name],
            row_to_revision,
        )
        .optional()?
        .ok_or_else(|| CatalogError::not_found(format!("tool '{}'", name)))
    }

    fn soft_delete(&self, name: &str, actor: &str) -> Result<Tool> {
        let conn = self.conn.lock();
        let now = Utc::now();

        let updated = conn.execute(
            "UPDATE tools SET deleted_at = ?1 WHERE name = ?2 AND deleted_at IS NULL",
            params![now.to_rfc3339(), name],
        )?;
        if updated == 0 {
            return Err(CatalogError::not_found(format!("tool '{}'", name)));
        }

        tracing::info!(tool = %name, actor = %actor, "Soft-deleted tool");

        load_tool(&conn, name, true)?.ok_or_else(|| CatalogError::not_found(format!("tool '{}'", name)))
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn load_tool(conn: &Connection, name: &str, include_deleted: bool) -> Result<Option<Tool>> {
    let row = conn
        .query_row(
            "SELECT data, version, deleted_at FROM tools WHERE name = ?1",
            params![name],
            |row| {
                let deleted_at: Option<String> = row.get(2)?;
                let deleted_at = match deleted_at {
                    Some(ts) => Some(parse_rfc3339(2, &ts)?),
                    None => None,
                };
                Ok((parse_json(row, 0)?, row.get::<_, i64>(1)?, deleted_at))
            },
        )
        .optional()?;

    let Some((data, version, deleted_at)) = row else {
        return Ok(None);
    };
    if deleted_at.is_some() && !include_deleted {
        return Ok(None);
    }

    let mut tool = Tool::from_snapshot(data)?;
    tool.version = version;
    tool.deleted_at = deleted_at;
    Ok(Some(tool))
}

/// (version, is_deleted) of a tools row, if any
fn row_state(tx: &Transaction<'_>, name: &str) -> Result<Option<(i64, bool)>> {
    let state = tx
        .query_row(
            "SELECT version, deleted_at IS NOT NULL FROM tools WHERE name = ?1",
            params![name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(state)
}

fn insert_revision(
    tx: &Transaction<'_>,
    name: &str,
    version: i64,
    snapshot: Value,
    author: &str,
    comment: Option<&str>,
    created_at: DateTime<Utc>,
) -> Result<Revision> {
    let content_hash = Revision::compute_content_hash(&snapshot);

    tx.execute(
        "INSERT INTO revisions (
            tool_name, version, snapshot, content_hash, author, comment, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            name,
            version,
            serde_json::to_string(&snapshot)?,
            content_hash,
            author,
            comment,
            created_at.to_rfc3339(),
        ],
    )?;

    Ok(Revision {
        id: tx.last_insert_rowid(),
        tool_name: name.to_string(),
        version,
        snapshot,
        content_hash,
        author: author.to_string(),
        comment: comment.map(str::to_string),
        created_at,
    })
}

fn row_to_revision(row: &Row<'_>) -> rusqlite::Result<Revision> {
    Ok(Revision {
        id: row.get(0)?,
        tool_name: row.get(1)?,
        version: row.get(2)?,
        snapshot: parse_json(row, 3)?,
        content_hash: row.get(4)?,
        author: row.get(5)?,
        comment: row.get(6)?,
        created_at: parse_timestamp(row, 7)?,
    })
}

fn parse_json(row: &Row<'_>, idx: usize) -> rusqlite::Result<Value> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    parse_rfc3339(idx, &text)
}

fn parse_rfc3339(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_tool(name: &str) -> Tool {
        let mut tool = Tool::new(name, "importer", Utc::now());
        tool.title = "Foo".to_string();
        tool.description = "Does foo things".to_string();
        tool.url = "https://foo.toolforge.org".to_string();
        tool
    }

    #[test]
    fn test_create_and_get() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tool = create_test_tool("toolforge-foo");

        let (created, revision) = store.create(&tool, "importer", None).unwrap();

        assert_eq!(created.version, 1);
        assert_eq!(revision.version, 1);
        assert_eq!(revision.author, "importer");
        assert_eq!(revision.snapshot["title"], "Foo");

        let loaded = store.get("toolforge-foo").unwrap().unwrap();
        assert_eq!(loaded.title, "Foo");
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.created_date, tool.created_date);

        println!("✅ Create/get test PASSED");
    }

    #[test]
    fn test_create_twice_is_concurrent_modification() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tool = create_test_tool("toolforge-foo");

        store.create(&tool, "importer", None).unwrap();
        let err = store.create(&tool, "importer", None).unwrap_err();

        assert!(matches!(err, CatalogError::ConcurrentModification { found: 1, .. }));
        assert_eq!(store.list_revisions("toolforge-foo", false).unwrap().len(), 1);
    }

    #[test]
    fn test_save_compare_and_swap() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (mut tool, _) = store.create(&create_test_tool("toolforge-foo"), "importer", None).unwrap();

        tool.title = "Foo2".to_string();
        let (saved, revision) = store.save(&tool, 1, "editor", Some("retitle")).unwrap();
        assert_eq!(saved.version, 2);
        assert_eq!(revision.comment.as_deref(), Some("retitle"));

        // A second writer still holding version 1 loses
        tool.title = "Foo3".to_string();
        match store.save(&tool, 1, "editor", None) {
            Err(CatalogError::ConcurrentModification { expected, found, .. }) => {
                assert_eq!(expected, 1);
                assert_eq!(found, 2);
            }
            other => panic!("expected concurrent modification, got {:?}", other),
        }

        assert_eq!(store.get("toolforge-foo").unwrap().unwrap().title, "Foo2");
        assert_eq!(store.list_revisions("toolforge-foo", false).unwrap().len(), 2);

        println!("✅ Compare-and-swap test PASSED");
    }

    #[test]
    fn test_revisions_scoped_to_tool() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (_, foo_rev) = store.create(&create_test_tool("foo"), "importer", None).unwrap();
        store.create(&create_test_tool("bar"), "importer", None).unwrap();

        assert!(store.get_revision("foo", foo_rev.id).is_ok());
        assert!(matches!(
            store.get_revision("bar", foo_rev.id),
            Err(CatalogError::NotFound(_))
        ));
        assert!(matches!(store.get_revision("foo", 9999), Err(CatalogError::NotFound(_))));
    }

    #[test]
    fn test_head_revision_and_ordering() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (mut tool, _) = store.create(&create_test_tool("foo"), "importer", None).unwrap();

        for (i, title) in ["B", "C"].iter().enumerate() {
            tool.title = title.to_string();
            tool = store.save(&tool, i as i64 + 1, "editor", None).unwrap().0;
        }

        let versions: Vec<i64> = store
            .list_revisions("foo", false)
            .unwrap()
            .iter()
            .map(|r| r.version)
            .collect();
        assert_eq!(versions, vec![1, 2, 3]);

        let head = store.head_revision("foo").unwrap();
        assert_eq!(head.version, 3);
        assert_eq!(head.snapshot["title"], "C");
    }

    #[test]
    fn test_soft_delete() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create(&create_test_tool("foo"), "importer", None).unwrap();

        let deleted = store.soft_delete("foo", "admin").unwrap();
        assert!(deleted.is_deleted());

        assert!(store.get("foo").unwrap().is_none());
        assert!(store.get_including_deleted("foo").unwrap().is_some());
        assert!(store.list_revisions("foo", false).is_err());
        assert_eq!(store.list_revisions("foo", true).unwrap().len(), 1);
        assert!(store.list_names().unwrap().is_empty());

        // Already deleted
        assert!(matches!(store.soft_delete("foo", "admin"), Err(CatalogError::NotFound(_))));

        // Names are never reused
        match store.create(&create_test_tool("foo"), "importer", None) {
            Err(CatalogError::Validation { field, .. }) => assert_eq!(field, "name"),
            other => panic!("expected validation error, got {:?}", other),
        }

        println!("✅ Soft delete test PASSED");
    }

    #[test]
    fn test_save_deleted_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (tool, _) = store.create(&create_test_tool("foo"), "importer", None).unwrap();
        store.soft_delete("foo", "admin").unwrap();

        assert!(matches!(store.save(&tool, 1, "editor", None), Err(CatalogError::NotFound(_))));
    }

    #[test]
    fn test_event_log() {
        let store = SqliteStore::open_in_memory().unwrap();

        let event = Event::new(
            "tool_created",
            "tool",
            "toolforge-foo",
            serde_json::json!({"version": 1}),
            "importer",
        );
        store.record_event(&event).unwrap();

        let events = store.events_for("tool", "toolforge-foo").unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "tool_created");
        assert_eq!(events[0].actor, "importer");
        assert_eq!(events[0].data["version"], 1);

        println!("✅ Event log test PASSED");
    }
}
