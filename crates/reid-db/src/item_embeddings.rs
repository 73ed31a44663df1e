//! pgvector-backed ANN store for the similarity index.

use async_trait::async_trait;
use chrono::Utc;
use pgvector::Vector;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use reid_core::{
    decode_le, encode_le, AnnBackend, Error, IndexFilter, ItemMetadata, Result, StoredEmbedding,
};

/// Cosine-distance expression for a query of the given dimension.
///
/// Supported dimensions are cast so the planner can use the matching partial
/// HNSW index; anything else falls back to a sequential scan.
fn distance_expr(dimension: usize) -> String {
    match dimension {
        768 | 1024 | 1536 => format!(
            "embedding::vector({d}) <=> $2::vector({d})",
            d = dimension
        ),
        2048 => "embedding::halfvec(2048) <=> ($2::vector)::halfvec(2048)".to_string(),
        _ => "embedding <=> $2::vector".to_string(),
    }
}

/// PostgreSQL implementation of [`AnnBackend`].
#[derive(Clone)]
pub struct PgAnnBackend {
    pool: Pool<Postgres>,
}

impl PgAnnBackend {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Number of stored `(item, model)` records.
    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM item_embedding")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)
    }
}

#[async_trait]
impl AnnBackend for PgAnnBackend {
    async fn upsert(&self, record: &StoredEmbedding) -> Result<()> {
        let metadata = serde_json::to_value(&record.metadata)?;
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO item_embedding
                 (item_id, model_name, content_hash, dimension, embedding, embedding_le, metadata, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
             ON CONFLICT (item_id, model_name) DO UPDATE SET
                 content_hash = EXCLUDED.content_hash,
                 dimension = EXCLUDED.dimension,
                 embedding = EXCLUDED.embedding,
                 embedding_le = EXCLUDED.embedding_le,
                 metadata = EXCLUDED.metadata,
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(record.item_id)
        .bind(&record.model)
        .bind(&record.content_hash)
        .bind(record.vector.len() as i32)
        .bind(Vector::from(record.vector.clone()))
        .bind(encode_le(&record.vector))
        .bind(metadata)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        tracing::trace!(
            subsystem = "database",
            component = "ann",
            op = "upsert",
            item_id = %record.item_id,
            model = %record.model,
            "Upserted item embedding"
        );
        Ok(())
    }

    async fn nearest(
        &self,
        model: &str,
        query: &[f32],
        k: usize,
        exclude: Option<Uuid>,
        filter: &IndexFilter,
    ) -> Result<Vec<(Uuid, f32)>> {
        let sql = format!(
            "SELECT item_id, ({expr})::float8 AS distance
             FROM item_embedding
             WHERE model_name = $1
               AND dimension = $3
               AND ($4::uuid IS NULL OR item_id <> $4)
               AND ($5::text IS NULL OR lower(metadata->>'species') = lower($5))
             ORDER BY {expr}
             LIMIT $6",
            expr = distance_expr(query.len())
        );

        let rows = sqlx::query(&sql)
            .bind(model)
            .bind(Vector::from(query.to_vec()))
            .bind(query.len() as i32)
            .bind(exclude)
            .bind(filter.species.as_deref())
            .bind(k as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let distance: f64 = row.get("distance");
                (row.get::<Uuid, _>("item_id"), distance as f32)
            })
            .collect())
    }

    async fn load_all(&self) -> Result<Vec<StoredEmbedding>> {
        let rows = sqlx::query(
            "SELECT item_id, model_name, content_hash, embedding_le, metadata
             FROM item_embedding
             ORDER BY created_at, item_id, model_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding_le");
                let metadata: serde_json::Value = row.get("metadata");
                Ok(StoredEmbedding {
                    item_id: row.get("item_id"),
                    model: row.get("model_name"),
                    content_hash: row.get("content_hash"),
                    vector: decode_le(&blob)?,
                    metadata: serde_json::from_value::<ItemMetadata>(metadata)?,
                })
            })
            .collect()
    }
}
