//! Verification queue repositories.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tokio::sync::Mutex;
use uuid::Uuid;

use reid_core::{
    new_v7, Enqueued, Error, NewVerificationEntry, Result, VerificationEntry,
    VerificationRepository,
};

const SELECT_COLUMNS: &str = "id, entity_type, entity_id, investigation_id, source, priority, \
     status, requires_review, notes, created_at";

fn parse_column<T: std::str::FromStr<Err = String>>(row: &PgRow, column: &str) -> Result<T> {
    let raw: String = row.get(column);
    raw.parse().map_err(Error::Serialization)
}

fn row_to_entry(row: &PgRow) -> Result<VerificationEntry> {
    Ok(VerificationEntry {
        id: row.get("id"),
        entity_type: row.get("entity_type"),
        entity_id: row.get("entity_id"),
        investigation_id: row.get("investigation_id"),
        source: parse_column(row, "source")?,
        priority: parse_column(row, "priority")?,
        status: parse_column(row, "status")?,
        requires_review: row.get("requires_review"),
        notes: row.get("notes"),
        created_at: row.get("created_at"),
    })
}

/// PostgreSQL implementation of [`VerificationRepository`].
#[derive(Clone)]
pub struct PgVerificationRepository {
    pool: Pool<Postgres>,
}

impl PgVerificationRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn open_entry_id(&self, entity_type: &str, entity_id: Uuid) -> Result<Option<Uuid>> {
        sqlx::query_scalar(
            "SELECT id FROM verification_queue
             WHERE entity_type = $1 AND entity_id = $2 AND status = 'pending'
             LIMIT 1",
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)
    }
}

#[async_trait]
impl VerificationRepository for PgVerificationRepository {
    async fn insert_if_absent(&self, entry: NewVerificationEntry) -> Result<Enqueued> {
        let id = new_v7();

        // Check-and-insert in one statement; the partial unique index turns a
        // concurrent duplicate into a no-op instead of an error.
        let inserted = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO verification_queue
                 (id, entity_type, entity_id, investigation_id, source, priority, status, requires_review, notes, created_at)
             SELECT $1, $2, $3, $4, $5, $6, 'pending', TRUE, $7, $8
             WHERE NOT EXISTS (
                 SELECT 1 FROM verification_queue
                 WHERE entity_type = $2 AND entity_id = $3 AND status = 'pending'
             )
             ON CONFLICT (entity_type, entity_id) WHERE status = 'pending' DO NOTHING
             RETURNING id",
        )
        .bind(id)
        .bind(&entry.entity_type)
        .bind(entry.entity_id)
        .bind(entry.investigation_id)
        .bind(entry.source.to_string())
        .bind(entry.priority.to_string())
        .bind(&entry.notes)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        if let Some(id) = inserted {
            return Ok(Enqueued { id, created: true });
        }

        let existing = self
            .open_entry_id(&entry.entity_type, entry.entity_id)
            .await?
            .ok_or_else(|| {
                Error::Internal(format!(
                    "verification entry for {}/{} neither inserted nor found",
                    entry.entity_type, entry.entity_id
                ))
            })?;
        Ok(Enqueued {
            id: existing,
            created: false,
        })
    }

    async fn get(&self, id: Uuid) -> Result<Option<VerificationEntry>> {
        let sql = format!("SELECT {} FROM verification_queue WHERE id = $1", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        row.as_ref().map(row_to_entry).transpose()
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<VerificationEntry>> {
        let sql = format!(
            "SELECT {} FROM verification_queue
             WHERE status = 'pending'
             ORDER BY CASE priority WHEN 'high' THEN 0 WHEN 'medium' THEN 1 ELSE 2 END,
                      created_at
             LIMIT $1",
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        rows.iter().map(row_to_entry).collect()
    }
}

/// In-process [`VerificationRepository`] for tests and database-less runs.
#[derive(Default)]
pub struct MemoryVerificationRepository {
    entries: Mutex<Vec<VerificationEntry>>,
}

impl MemoryVerificationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl VerificationRepository for MemoryVerificationRepository {
    async fn insert_if_absent(&self, entry: NewVerificationEntry) -> Result<Enqueued> {
        // Lock held across check and insert.
        let mut entries = self.entries.lock().await;
        if let Some(open) = entries.iter().find(|e| {
            e.status.is_open() && e.entity_type == entry.entity_type && e.entity_id == entry.entity_id
        }) {
            return Ok(Enqueued {
                id: open.id,
                created: false,
            });
        }
        let id = new_v7();
        entries.push(VerificationEntry::pending(id, entry));
        Ok(Enqueued { id, created: true })
    }

    async fn get(&self, id: Uuid) -> Result<Option<VerificationEntry>> {
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .find(|e| e.id == id)
            .cloned())
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<VerificationEntry>> {
        let mut pending: Vec<VerificationEntry> = self
            .entries
            .lock()
            .await
            .iter()
            .filter(|e| e.status.is_open())
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }
}
