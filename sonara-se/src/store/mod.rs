//! Vector store contract
//!
//! Thin contract over the embedding store: insert, exact-attribute lookup,
//! nearest-neighbor search with an attribute filter, count. The store
//! adapter deserializes rows into typed records exactly once; downstream
//! code never re-derives fields from heterogeneous result objects.

use async_trait::async_trait;
use sonara_common::instruments::InstrumentKind;
use sonara_common::{Error, InstrumentFlags, Result};

pub mod sqlite;

pub use sqlite::SqliteVectorStore;

/// Sentinel stored when a submission carries no external track id.
pub const NO_TRACK_ID: i64 = -1;

/// One stored embedding record, fully typed at the store boundary.
#[derive(Debug, Clone)]
pub struct StoreRecord {
    /// Store-assigned identifier, immutable
    pub id: i64,
    /// Externally-owned track id (`NO_TRACK_ID` when absent, not unique)
    pub track_id: i64,
    pub vector: Vec<f32>,
    pub flags: InstrumentFlags,
}

/// One raw nearest-neighbor hit (store-native metric: squared L2).
#[derive(Debug, Clone, PartialEq)]
pub struct StoreHit {
    pub id: i64,
    pub track_id: i64,
    pub distance: f64,
}

/// Typed attribute predicate applied alongside vector search.
///
/// An empty `any_instruments` set means "no instrument preference" and the
/// instrument clause is omitted entirely.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Exclude one track id (self-match exclusion for track queries)
    pub exclude_track_id: Option<i64>,
    /// Exclude a set of track ids (reference exclusion for recommendations)
    pub exclude_track_ids: Vec<i64>,
    /// Require at least one of these instrument flags to be set
    pub any_instruments: Vec<InstrumentKind>,
}

impl SearchFilter {
    /// Filter that only excludes the given track id.
    pub fn excluding(track_id: i64) -> Self {
        Self {
            exclude_track_id: Some(track_id),
            ..Self::default()
        }
    }
}

/// Contract over the vector database.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert an embedding, returning the store-assigned id.
    /// Fails with `DimensionMismatch` unless the vector length equals the
    /// configured dimension.
    async fn insert(
        &self,
        vector: &[f32],
        track_id: Option<i64>,
        flags: InstrumentFlags,
    ) -> Result<i64>;

    /// Full record by internal id.
    async fn record_by_id(&self, id: i64) -> Result<Option<StoreRecord>>;

    /// Stored vector for an external track id (any one record, most
    /// recent). `None` when no record exists for that track.
    async fn vector_for_track(&self, track_id: i64) -> Result<Option<Vec<f32>>>;

    /// Nearest neighbors of `vector` under squared L2, filtered by the
    /// attribute predicate, ascending by distance, at most `limit` hits.
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<StoreHit>>;

    /// Total number of stored records.
    async fn count(&self) -> Result<i64>;
}

/// Encode a vector as a little-endian f32 BLOB.
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode a little-endian f32 BLOB, checking the expected dimension.
pub fn decode_vector(bytes: &[u8], expected_dim: usize) -> Result<Vec<f32>> {
    if bytes.len() != expected_dim * 4 {
        return Err(Error::Internal(format!(
            "stored vector blob has {} bytes, expected {}",
            bytes.len(),
            expected_dim * 4
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Squared Euclidean distance between two equal-length vectors.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum()
}
