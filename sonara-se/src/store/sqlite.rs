//! SQLite-backed vector store adapter
//!
//! Attribute filtering happens in SQL; the distance scan over the
//! surviving rows runs in Rust. This adapter is the seam where a real
//! ANN index would be plugged in; the linear scan is the reference
//! behavior, not an index implementation.

use async_trait::async_trait;
use sonara_common::instruments::InstrumentKind;
use sonara_common::{Error, InstrumentFlags, Result};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use super::{
    decode_vector, encode_vector, squared_l2, SearchFilter, StoreHit, StoreRecord, VectorStore,
    NO_TRACK_ID,
};

/// Vector store over the `embeddings` table.
#[derive(Debug, Clone)]
pub struct SqliteVectorStore {
    pool: SqlitePool,
    dim: usize,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool, dim: usize) -> Self {
        Self { pool, dim }
    }

    /// Configured embedding dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Render the attribute predicate as a SQL WHERE clause. Track-id
    /// values are bound; instrument columns are fixed identifiers.
    fn filter_sql(filter: &SearchFilter) -> String {
        let mut clauses = Vec::new();

        if filter.exclude_track_id.is_some() {
            clauses.push("track_id != ?".to_string());
        }
        if !filter.exclude_track_ids.is_empty() {
            let placeholders = vec!["?"; filter.exclude_track_ids.len()].join(", ");
            clauses.push(format!("track_id NOT IN ({placeholders})"));
        }
        if !filter.any_instruments.is_empty() {
            let flags = filter
                .any_instruments
                .iter()
                .map(|kind| format!("{} = 1", kind.column()))
                .collect::<Vec<_>>()
                .join(" OR ");
            clauses.push(format!("({flags})"));
        }

        if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        }
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn insert(
        &self,
        vector: &[f32],
        track_id: Option<i64>,
        flags: InstrumentFlags,
    ) -> Result<i64> {
        if vector.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }

        let track_id = track_id.unwrap_or(NO_TRACK_ID);
        let result = sqlx::query(
            r#"
            INSERT INTO embeddings (track_id, vector, guitar, drum, bass, piano)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(track_id)
        .bind(encode_vector(vector))
        .bind(flags.contains(InstrumentKind::Guitar))
        .bind(flags.contains(InstrumentKind::Drum))
        .bind(flags.contains(InstrumentKind::Bass))
        .bind(flags.contains(InstrumentKind::Piano))
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!(id, track_id, "Stored embedding");
        Ok(id)
    }

    async fn record_by_id(&self, id: i64) -> Result<Option<StoreRecord>> {
        let row = sqlx::query(
            "SELECT id, track_id, vector, guitar, drum, bass, piano FROM embeddings WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let blob: Vec<u8> = row.get("vector");
                Ok(Some(StoreRecord {
                    id: row.get("id"),
                    track_id: row.get("track_id"),
                    vector: decode_vector(&blob, self.dim)?,
                    flags: InstrumentFlags {
                        guitar: row.get("guitar"),
                        drum: row.get("drum"),
                        bass: row.get("bass"),
                        piano: row.get("piano"),
                    },
                }))
            }
            None => Ok(None),
        }
    }

    async fn vector_for_track(&self, track_id: i64) -> Result<Option<Vec<f32>>> {
        // A track may have been re-processed; take the most recent record.
        let row = sqlx::query(
            "SELECT vector FROM embeddings WHERE track_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(track_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let blob: Vec<u8> = row.get("vector");
                Ok(Some(decode_vector(&blob, self.dim)?))
            }
            None => Ok(None),
        }
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<StoreHit>> {
        if vector.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT id, track_id, vector FROM embeddings{}",
            Self::filter_sql(filter)
        );
        let mut query = sqlx::query(&sql);
        if let Some(exclude) = filter.exclude_track_id {
            query = query.bind(exclude);
        }
        for track_id in &filter.exclude_track_ids {
            query = query.bind(track_id);
        }

        let rows = query.fetch_all(&self.pool).await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let blob: Vec<u8> = row.get("vector");
            let stored = decode_vector(&blob, self.dim)?;
            hits.push(StoreHit {
                id: row.get("id"),
                track_id: row.get("track_id"),
                distance: squared_l2(vector, &stored),
            });
        }

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);

        debug!(candidates = hits.len(), limit, "Vector search complete");
        Ok(hits)
    }

    async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM embeddings")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }
}
