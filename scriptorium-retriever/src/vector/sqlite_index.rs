//! Local vector index in the scriptorium SQLite database.
//!
//! Embeddings are stored as little-endian f16 blobs to halve their size;
//! queries load every candidate row and score it with cosine similarity in
//! memory, which is plenty for a single corpus.

use super::{IndexResult, Metadata, VectorIndex, VectorMatch, VectorRecord, matches_filter};
use async_trait::async_trait;
use chrono::Utc;
use half::f16;
use itertools::Itertools;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

#[derive(Clone, Debug)]
pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    /// Creates the `vectors` table in `pool` if needed.
    pub async fn new(pool: SqlitePool) -> IndexResult<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vectors (
                id TEXT PRIMARY KEY,
                embedding BLOB NOT NULL,
                metadata TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    /// Number of stored vectors.
    pub async fn len(&self) -> IndexResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as usize)
    }

    pub async fn is_empty(&self) -> IndexResult<bool> {
        Ok(self.len().await? == 0)
    }
}

pub(crate) fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let halves: Vec<f16> = embedding.iter().map(|v| f16::from_f32(*v)).collect();
    bytemuck::cast_slice::<f16, u8>(&halves).to_vec()
}

pub(crate) fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    let mut halves = vec![f16::ZERO; bytes.len() / 2];
    let byte_len = halves.len() * 2;
    bytemuck::cast_slice_mut::<f16, u8>(&mut halves).copy_from_slice(&bytes[..byte_len]);
    halves.into_iter().map(f16::to_f32).collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot_product = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let norm_a = norm_a.sqrt();
    let norm_b = norm_b.sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

fn decode_metadata(raw: &str) -> IndexResult<Metadata> {
    Ok(serde_json::from_str(raw)?)
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, record: VectorRecord) -> IndexResult<()> {
        let metadata = serde_json::to_string(&record.metadata)?;
        sqlx::query(
            r#"
            INSERT INTO vectors (id, embedding, metadata, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                embedding = excluded.embedding,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.id)
        .bind(encode_embedding(&record.embedding))
        .bind(metadata)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &Metadata,
    ) -> IndexResult<Vec<VectorMatch>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query("SELECT id, embedding, metadata FROM vectors")
            .fetch_all(&self.pool)
            .await?;

        let mut matches = Vec::new();
        for row in rows {
            let raw: String = row.try_get("metadata")?;
            let metadata = match decode_metadata(&raw) {
                Ok(metadata) => metadata,
                Err(err) => {
                    let id: String = row.try_get("id")?;
                    tracing::warn!("Skipping vector {} with bad metadata: {}", id, err);
                    continue;
                }
            };
            if !matches_filter(&metadata, filter) {
                continue;
            }
            let bytes: Vec<u8> = row.try_get("embedding")?;
            let score = cosine_similarity(vector, &decode_embedding(&bytes));
            matches.push(VectorMatch {
                id: row.try_get("id")?,
                score,
                metadata,
            });
        }

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn fetch(&self, ids: &[String]) -> IndexResult<HashMap<String, VectorRecord>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = std::iter::repeat_n("?", ids.len()).join(", ");
        let sql = format!("SELECT id, embedding, metadata FROM vectors WHERE id IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut records = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let bytes: Vec<u8> = row.try_get("embedding")?;
            let raw: String = row.try_get("metadata")?;
            records.insert(
                id.clone(),
                VectorRecord {
                    id,
                    embedding: decode_embedding(&bytes),
                    metadata: decode_metadata(&raw)?,
                },
            );
        }
        Ok(records)
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}
