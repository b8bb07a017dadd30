//! The embedded transactional index: one `rusqlite` connection guarding the
//! `content_objects`, `pending_uploads`, `migrations`, and `pending_migrations`
//! tables. All mutating access goes through a single mutex-guarded connection
//! so that every write is wrapped in a transaction, per the core's
//! shared-resource policy.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use entropy_core::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS content_objects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hash TEXT NOT NULL,
    digest TEXT NOT NULL,
    content_path TEXT NOT NULL,
    content_type TEXT NOT NULL,
    created TEXT NOT NULL,
    UNIQUE (hash, digest)
);
CREATE UNIQUE INDEX IF NOT EXISTS content_objects_digest ON content_objects (digest);

CREATE TABLE IF NOT EXISTS pending_uploads (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    object_id TEXT NOT NULL,
    backend TEXT NOT NULL,
    scheduled TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS pending_uploads_scheduled ON pending_uploads (scheduled);

CREATE TABLE IF NOT EXISTS migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    destination TEXT,
    start INTEGER NOT NULL,
    current INTEGER NOT NULL,
    end_id INTEGER NOT NULL,
    concurrency INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS pending_migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    migration_id INTEGER NOT NULL REFERENCES migrations(id),
    object_id TEXT NOT NULL,
    last_failure TEXT
);
CREATE INDEX IF NOT EXISTS pending_migrations_migration ON pending_migrations (migration_id);
";

/// A row in `content_objects`, carrying the ordinal surrogate id C9 iterates
/// over alongside the fields of `ContentObject`.
#[derive(Debug, Clone)]
pub struct ContentRow {
    pub ordinal: i64,
    pub hash: String,
    pub digest: String,
    pub content_path: String,
    pub content_type: String,
    pub created: DateTime<Utc>,
}

/// A row in `pending_uploads`.
#[derive(Debug, Clone)]
pub struct PendingUploadRow {
    pub id: i64,
    pub object_id: String,
    pub backend: String,
    pub scheduled: DateTime<Utc>,
}

/// A row in `migrations`.
#[derive(Debug, Clone)]
pub struct MigrationRow {
    pub id: i64,
    pub source: String,
    pub destination: Option<String>,
    pub start: i64,
    pub current: i64,
    pub end: i64,
    pub concurrency: i64,
}

/// A row in `pending_migrations`.
#[derive(Debug, Clone)]
pub struct PendingMigrationRow {
    pub id: i64,
    pub migration_id: i64,
    pub object_id: String,
    pub last_failure: Option<String>,
}

/// Guards the single SQLite connection for a local backend instance.
pub struct Index {
    conn: Mutex<Connection>,
}

impl Index {
    /// Open (creating if absent) the index database at `path` and ensure its
    /// schema exists.
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::index("open", e))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| Error::index("create schema", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// An in-memory index, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::index("open in-memory", e))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| Error::index("create schema", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn find_by_hash_digest(&self, hash: &str, digest: &str) -> Result<Option<ContentRow>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT id, hash, digest, content_path, content_type, created
             FROM content_objects WHERE hash = ?1 AND digest = ?2",
            params![hash, digest],
            row_to_content,
        )
        .optional()
        .map_err(|e| Error::index("find_by_hash_digest", e))
    }

    pub fn insert_content(
        &self,
        hash: &str,
        digest: &str,
        content_path: &str,
        content_type: &str,
        created: DateTime<Utc>,
    ) -> Result<ContentRow> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO content_objects (hash, digest, content_path, content_type, created)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![hash, digest, content_path, content_type, created.to_rfc3339()],
        )
        .map_err(|e| Error::index("insert_content", e))?;
        let ordinal = conn.last_insert_rowid();
        Ok(ContentRow {
            ordinal,
            hash: hash.to_string(),
            digest: digest.to_string(),
            content_path: content_path.to_string(),
            content_type: content_type.to_string(),
            created,
        })
    }

    pub fn update_content_metadata(
        &self,
        ordinal: i64,
        content_type: &str,
        created: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE content_objects SET content_type = ?1, created = ?2 WHERE id = ?3",
            params![content_type, created.to_rfc3339(), ordinal],
        )
        .map_err(|e| Error::index("update_content_metadata", e))?;
        Ok(())
    }

    pub fn max_ordinal(&self) -> Result<i64> {
        let conn = self.lock();
        conn.query_row("SELECT COALESCE(MAX(id), 0) FROM content_objects", [], |r| {
            r.get(0)
        })
        .map_err(|e| Error::index("max_ordinal", e))
    }

    /// `_nextObject`: find the smallest-ordinal row with `id > current AND
    /// id <= end`, transactionally advance `migrations.current` to it, and
    /// insert a `pending_migrations` row pointing at it. Returns `None` when
    /// exhausted. Runs inside one SQLite transaction so concurrent callers
    /// never observe (or advance past) the same object twice.
    pub fn next_migration_object(&self, migration_id: i64) -> Result<Option<PendingMigrationRow>> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(|e| Error::index("next_object tx", e))?;

        let (current, end): (i64, i64) = tx
            .query_row(
                "SELECT current, end_id FROM migrations WHERE id = ?1",
                params![migration_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .map_err(|e| Error::index("next_object load migration", e))?;

        let next_ordinal: Option<i64> = tx
            .query_row(
                "SELECT id FROM content_objects WHERE id > ?1 AND id <= ?2 ORDER BY id ASC LIMIT 1",
                params![current, end],
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| Error::index("next_object find row", e))?;

        let Some(ordinal) = next_ordinal else {
            tx.commit().map_err(|e| Error::index("next_object commit (empty)", e))?;
            return Ok(None);
        };

        tx.execute(
            "UPDATE migrations SET current = ?1 WHERE id = ?2",
            params![ordinal, migration_id],
        )
        .map_err(|e| Error::index("next_object advance current", e))?;

        let object_id: String = tx
            .query_row(
                "SELECT hash || ':' || digest FROM content_objects WHERE id = ?1",
                params![ordinal],
                |r| r.get(0),
            )
            .map_err(|e| Error::index("next_object load object_id", e))?;

        tx.execute(
            "INSERT INTO pending_migrations (migration_id, object_id, last_failure)
             VALUES (?1, ?2, NULL)",
            params![migration_id, object_id],
        )
        .map_err(|e| Error::index("next_object insert pending", e))?;
        let pending_id = tx.last_insert_rowid();

        tx.commit().map_err(|e| Error::index("next_object commit", e))?;

        Ok(Some(PendingMigrationRow {
            id: pending_id,
            migration_id,
            object_id,
            last_failure: None,
        }))
    }

    pub fn create_migration(
        &self,
        source: &str,
        destination: Option<&str>,
        start: i64,
        end: i64,
        concurrency: i64,
    ) -> Result<MigrationRow> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO migrations (source, destination, start, current, end_id, concurrency)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![source, destination, start, start - 1, end, concurrency],
        )
        .map_err(|e| Error::index("create_migration", e))?;
        let id = conn.last_insert_rowid();
        Ok(MigrationRow {
            id,
            source: source.to_string(),
            destination: destination.map(str::to_string),
            start,
            current: start - 1,
            end,
            concurrency,
        })
    }

    pub fn pending_migrations_for(&self, migration_id: i64) -> Result<Vec<PendingMigrationRow>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, migration_id, object_id, last_failure
                 FROM pending_migrations WHERE migration_id = ?1",
            )
            .map_err(|e| Error::index("pending_migrations_for prepare", e))?;
        let rows = stmt
            .query_map(params![migration_id], |r| {
                Ok(PendingMigrationRow {
                    id: r.get(0)?,
                    migration_id: r.get(1)?,
                    object_id: r.get(2)?,
                    last_failure: r.get(3)?,
                })
            })
            .map_err(|e| Error::index("pending_migrations_for query", e))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::index("pending_migrations_for collect", e))
    }

    pub fn delete_pending_migration(&self, id: i64) -> Result<()> {
        let conn = self.lock();
        conn.execute("DELETE FROM pending_migrations WHERE id = ?1", params![id])
            .map_err(|e| Error::index("delete_pending_migration", e))?;
        Ok(())
    }

    pub fn record_migration_failure(&self, id: i64, trace: &str) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE pending_migrations SET last_failure = ?1 WHERE id = ?2",
            params![trace, id],
        )
        .map_err(|e| Error::index("record_migration_failure", e))?;
        Ok(())
    }

    pub fn create_pending_upload(
        &self,
        object_id: &str,
        backend: &str,
        scheduled: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO pending_uploads (object_id, backend, scheduled) VALUES (?1, ?2, ?3)",
            params![object_id, backend, scheduled.to_rfc3339()],
        )
        .map_err(|e| Error::index("create_pending_upload", e))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn earliest_due_upload(&self, now: DateTime<Utc>) -> Result<Option<PendingUploadRow>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT id, object_id, backend, scheduled FROM pending_uploads
             WHERE scheduled <= ?1 ORDER BY scheduled ASC LIMIT 1",
            params![now.to_rfc3339()],
            row_to_upload,
        )
        .optional()
        .map_err(|e| Error::index("earliest_due_upload", e))
    }

    pub fn earliest_upload(&self) -> Result<Option<PendingUploadRow>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT id, object_id, backend, scheduled FROM pending_uploads
             ORDER BY scheduled ASC LIMIT 1",
            [],
            row_to_upload,
        )
        .optional()
        .map_err(|e| Error::index("earliest_upload", e))
    }

    pub fn delete_pending_upload(&self, id: i64) -> Result<()> {
        let conn = self.lock();
        conn.execute("DELETE FROM pending_uploads WHERE id = ?1", params![id])
            .map_err(|e| Error::index("delete_pending_upload", e))?;
        Ok(())
    }

    pub fn reschedule_pending_upload(&self, id: i64, scheduled: DateTime<Utc>) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE pending_uploads SET scheduled = ?1 WHERE id = ?2",
            params![scheduled.to_rfc3339(), id],
        )
        .map_err(|e| Error::index("reschedule_pending_upload", e))?;
        Ok(())
    }
}

fn row_to_content(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContentRow> {
    let created: String = row.get(5)?;
    Ok(ContentRow {
        ordinal: row.get(0)?,
        hash: row.get(1)?,
        digest: row.get(2)?,
        content_path: row.get(3)?,
        content_type: row.get(4)?,
        created: DateTime::parse_from_rfc3339(&created)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn row_to_upload(row: &rusqlite::Row<'_>) -> rusqlite::Result<PendingUploadRow> {
    let scheduled: String = row.get(3)?;
    Ok(PendingUploadRow {
        id: row.get(0)?,
        object_id: row.get(1)?,
        backend: row.get(2)?,
        scheduled: DateTime::parse_from_rfc3339(&scheduled)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}
