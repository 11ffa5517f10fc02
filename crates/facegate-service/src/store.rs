//! Enrollment persistence.
//!
//! One row per enrolled identity in SQLite, accessed through
//! `tokio-rusqlite` so database work never blocks the runtime. Embedding
//! vectors are sealed (see [`crate::crypto`]) before they reach the
//! database; everything else is stored in the clear for auditability.

use crate::crypto::{CryptoError, Sealer};
use chrono::{DateTime, Utc};
use facegate_core::{DetectionSource, Embedding, FaceAnalysis, Landmarks};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS enrollments (
    identity_id   TEXT PRIMARY KEY,
    record_id     TEXT NOT NULL,
    embedding     BLOB NOT NULL,
    embedding_dim INTEGER NOT NULL,
    model_version TEXT,
    features      TEXT NOT NULL,
    metadata      TEXT,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("database: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("sealing: {0}")]
    Crypto(#[from] CryptoError),
    #[error("feature record encoding: {0}")]
    Json(#[from] serde_json::Error),
    #[error("stored record malformed: {0}")]
    Malformed(String),
}

/// Audit snapshot of the capture an enrollment was built from.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FaceFeatures {
    pub landmarks: Landmarks,
    pub quality: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub detector_confidence: f32,
    pub source: DetectionSource,
}

impl FaceFeatures {
    pub fn of(analysis: &FaceAnalysis) -> FaceFeatures {
        FaceFeatures {
            landmarks: analysis.detection.landmarks,
            quality: analysis.quality.score,
            brightness: analysis.quality.brightness,
            contrast: analysis.quality.contrast,
            detector_confidence: analysis.detection.confidence,
            source: analysis.detection.source,
        }
    }
}

/// A stored enrollment, embedding unsealed.
#[derive(Debug, Clone)]
pub struct EnrollmentRecord {
    pub identity_id: String,
    pub record_id: String,
    pub embedding: Embedding,
    pub features: FaceFeatures,
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Listing row: everything except the embedding itself.
#[derive(Serialize, Debug, Clone)]
pub struct EnrollmentSummary {
    pub identity_id: String,
    pub record_id: String,
    pub model_version: Option<String>,
    pub quality: f32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct EnrollmentStore {
    conn: tokio_rusqlite::Connection,
    sealer: Sealer,
}

impl EnrollmentStore {
    pub async fn open(db_path: &Path, sealer: Sealer) -> Result<EnrollmentStore, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = tokio_rusqlite::Connection::open(db_path).await?;
        init_schema(&conn).await?;
        tracing::info!(path = %db_path.display(), "enrollment store opened");
        Ok(EnrollmentStore { conn, sealer })
    }

    #[cfg(test)]
    pub(crate) async fn open_in_memory(sealer: Sealer) -> Result<EnrollmentStore, StoreError> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        init_schema(&conn).await?;
        Ok(EnrollmentStore { conn, sealer })
    }

    /// Insert or fully replace the enrollment for `identity_id`. The
    /// original `created_at` survives a replacement; everything else is
    /// overwritten. Returns the new record id.
    pub async fn save(
        &self,
        identity_id: &str,
        embedding: &Embedding,
        features: &FaceFeatures,
        metadata: Option<String>,
    ) -> Result<String, StoreError> {
        let record_id = uuid::Uuid::new_v4().to_string();
        let sealed = self.sealer.seal(&embedding_bytes(&embedding.values))?;
        let dim = embedding.values.len() as i64;
        let model_version = embedding.model_version.clone();
        let features_json = serde_json::to_string(features)?;
        let now = Utc::now().to_rfc3339();

        let identity = identity_id.to_string();
        let returned_id = record_id.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO enrollments
                         (identity_id, record_id, embedding, embedding_dim, model_version,
                          features, metadata, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                     ON CONFLICT(identity_id) DO UPDATE SET
                         record_id = excluded.record_id,
                         embedding = excluded.embedding,
                         embedding_dim = excluded.embedding_dim,
                         model_version = excluded.model_version,
                         features = excluded.features,
                         metadata = excluded.metadata,
                         updated_at = excluded.updated_at",
                    params![identity, record_id, sealed, dim, model_version, features_json, metadata, now],
                )?;
                Ok(())
            })
            .await?;

        tracing::info!(identity = identity_id, record = %returned_id, "enrollment saved");
        Ok(returned_id)
    }

    pub async fn load(&self, identity_id: &str) -> Result<Option<EnrollmentRecord>, StoreError> {
        let identity = identity_id.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT record_id, embedding, embedding_dim, model_version,
                                features, metadata, created_at, updated_at
                         FROM enrollments WHERE identity_id = ?1",
                        params![identity],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, Vec<u8>>(1)?,
                                row.get::<_, i64>(2)?,
                                row.get::<_, Option<String>>(3)?,
                                row.get::<_, String>(4)?,
                                row.get::<_, Option<String>>(5)?,
                                row.get::<_, String>(6)?,
                                row.get::<_, String>(7)?,
                            ))
                        },
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;

        let (record_id, sealed, dim, model_version, features_json, metadata, created, updated) =
            match row {
                Some(row) => row,
                None => return Ok(None),
            };

        let values = embedding_values(&self.sealer.open(&sealed)?)?;
        if values.len() as i64 != dim {
            return Err(StoreError::Malformed(format!(
                "embedding has {} values, recorded dimension is {dim}",
                values.len()
            )));
        }

        Ok(Some(EnrollmentRecord {
            identity_id: identity_id.to_string(),
            record_id,
            embedding: Embedding { values, model_version },
            features: serde_json::from_str(&features_json)?,
            metadata,
            created_at: parse_timestamp(&created)?,
            updated_at: parse_timestamp(&updated)?,
        }))
    }

    /// Delete an enrollment. Returns whether a row existed.
    pub async fn remove(&self, identity_id: &str) -> Result<bool, StoreError> {
        let identity = identity_id.to_string();
        let deleted = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "DELETE FROM enrollments WHERE identity_id = ?1",
                    params![identity],
                )?;
                Ok(n)
            })
            .await?;

        if deleted > 0 {
            tracing::info!(identity = identity_id, "enrollment removed");
        }
        Ok(deleted > 0)
    }

    pub async fn list(&self) -> Result<Vec<EnrollmentSummary>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT identity_id, record_id, model_version, features,
                            created_at, updated_at
                     FROM enrollments ORDER BY identity_id",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, String>(5)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut summaries = Vec::with_capacity(rows.len());
        for (identity_id, record_id, model_version, features_json, created, updated) in rows {
            let features: FaceFeatures = serde_json::from_str(&features_json)?;
            summaries.push(EnrollmentSummary {
                identity_id,
                record_id,
                model_version,
                quality: features.quality,
                created_at: parse_timestamp(&created)?,
                updated_at: parse_timestamp(&updated)?,
            });
        }
        Ok(summaries)
    }

    #[cfg(test)]
    async fn raw_embedding_blob(&self, identity_id: &str) -> Result<Vec<u8>, StoreError> {
        let identity = identity_id.to_string();
        let blob = self
            .conn
            .call(move |conn| {
                let blob = conn.query_row(
                    "SELECT embedding FROM enrollments WHERE identity_id = ?1",
                    params![identity],
                    |row| row.get::<_, Vec<u8>>(0),
                )?;
                Ok(blob)
            })
            .await?;
        Ok(blob)
    }
}

async fn init_schema(conn: &tokio_rusqlite::Connection) -> Result<(), StoreError> {
    conn.call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
    })
    .await?;
    Ok(())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StoreError::Malformed(format!("timestamp {raw:?}: {err}")))
}

/// Little-endian f32 packing for the sealed blob.
fn embedding_bytes(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn embedding_values(bytes: &[u8]) -> Result<Vec<f32>, StoreError> {
    if bytes.len() % 4 != 0 {
        return Err(StoreError::Malformed(format!(
            "embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_secret() -> PathBuf {
        std::env::temp_dir().join(format!("facegate-store-{}.key", uuid::Uuid::new_v4()))
    }

    async fn test_store() -> (EnrollmentStore, PathBuf) {
        let secret = temp_secret();
        let sealer = Sealer::from_secret_file(&secret).unwrap();
        let store = EnrollmentStore::open_in_memory(sealer).await.unwrap();
        (store, secret)
    }

    fn embedding(values: Vec<f32>) -> Embedding {
        Embedding { values, model_version: Some("w600k_r50".to_string()) }
    }

    fn features(quality: f32) -> FaceFeatures {
        FaceFeatures {
            landmarks: [(10.0, 20.0), (30.0, 20.0), (20.0, 30.0), (12.0, 40.0), (28.0, 40.0)],
            quality,
            brightness: 0.8,
            contrast: 0.6,
            detector_confidence: 0.92,
            source: DetectionSource::Model,
        }
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let (store, secret) = test_store().await;

        let stored = embedding(vec![0.1, -0.4, 0.7, 0.2]);
        store
            .save("exam-user-1", &stored, &features(0.85), Some("front camera".into()))
            .await
            .unwrap();

        let record = store.load("exam-user-1").await.unwrap().unwrap();
        assert_eq!(record.identity_id, "exam-user-1");
        assert_eq!(record.embedding.values, stored.values);
        assert_eq!(record.embedding.model_version.as_deref(), Some("w600k_r50"));
        assert_eq!(record.features, features(0.85));
        assert_eq!(record.metadata.as_deref(), Some("front camera"));
        assert!(record.updated_at >= record.created_at);
        assert!(uuid::Uuid::parse_str(&record.record_id).is_ok());

        let _ = std::fs::remove_file(&secret);
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let (store, secret) = test_store().await;
        assert!(store.load("ghost").await.unwrap().is_none());
        let _ = std::fs::remove_file(&secret);
    }

    #[tokio::test]
    async fn test_reenroll_replaces_but_keeps_created_at() {
        let (store, secret) = test_store().await;

        let first_id = store
            .save("user", &embedding(vec![1.0, 0.0]), &features(0.5), None)
            .await
            .unwrap();
        let first = store.load("user").await.unwrap().unwrap();

        let second_id = store
            .save("user", &embedding(vec![0.0, 1.0]), &features(0.9), Some("retake".into()))
            .await
            .unwrap();
        let second = store.load("user").await.unwrap().unwrap();

        assert_ne!(first_id, second_id);
        assert_eq!(second.record_id, second_id);
        assert_eq!(second.embedding.values, vec![0.0, 1.0]);
        assert_eq!(second.features.quality, 0.9);
        assert_eq!(second.metadata.as_deref(), Some("retake"));
        // Replacement, not merge, except the enrollment date
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);

        let _ = std::fs::remove_file(&secret);
    }

    #[tokio::test]
    async fn test_remove() {
        let (store, secret) = test_store().await;

        store.save("user", &embedding(vec![1.0]), &features(0.5), None).await.unwrap();
        assert!(store.remove("user").await.unwrap());
        assert!(store.load("user").await.unwrap().is_none());
        assert!(!store.remove("user").await.unwrap());

        let _ = std::fs::remove_file(&secret);
    }

    #[tokio::test]
    async fn test_list_sorted_by_identity() {
        let (store, secret) = test_store().await;

        store.save("bravo", &embedding(vec![1.0]), &features(0.7), None).await.unwrap();
        store.save("alpha", &embedding(vec![1.0]), &features(0.4), None).await.unwrap();

        let summaries = store.list().await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].identity_id, "alpha");
        assert_eq!(summaries[1].identity_id, "bravo");
        assert!((summaries[0].quality - 0.4).abs() < 1e-6);
        assert_eq!(summaries[1].model_version.as_deref(), Some("w600k_r50"));

        let _ = std::fs::remove_file(&secret);
    }

    #[tokio::test]
    async fn test_embedding_is_sealed_at_rest() {
        let (store, secret) = test_store().await;

        let stored = embedding(vec![0.25, 0.5, 0.75]);
        store.save("user", &stored, &features(0.5), None).await.unwrap();

        let blob = store.raw_embedding_blob("user").await.unwrap();
        let plain = embedding_bytes(&stored.values);
        assert_ne!(blob, plain);
        // Nonce plus ciphertext plus auth tag is strictly longer
        assert!(blob.len() > plain.len());

        let _ = std::fs::remove_file(&secret);
    }

    #[test]
    fn test_embedding_codec_roundtrip() {
        let values = vec![0.0, -1.5, 3.25, f32::MIN_POSITIVE];
        assert_eq!(embedding_values(&embedding_bytes(&values)).unwrap(), values);
    }

    #[test]
    fn test_embedding_codec_rejects_bad_length() {
        assert!(matches!(
            embedding_values(&[1, 2, 3]),
            Err(StoreError::Malformed(_))
        ));
    }
}
