//! Sample prescription storage and embedding search.

use async_trait::async_trait;
use rusqlite::params;
use uuid::Uuid;

use super::{Database, SampleStore};
use crate::error::{DatabaseError, ServiceResult};
use crate::models::{Prescription, SamplePrescription};

impl Database {
    /// Insert a sample and its embedding in one transaction
    pub fn insert_sample(&self, sample: &SamplePrescription, embedding: &[f32]) -> ServiceResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        tx.execute(
            "INSERT INTO prescriptions (id, file_id, mime_type, content) VALUES (?1, ?2, ?3, ?4)",
            params![
                sample.id.to_string(),
                sample.file_id,
                sample.mime_type,
                sample.content
            ],
        )
        .map_err(DatabaseError::Query)?;

        tx.execute(
            "INSERT INTO embeddings (prescription_id, embedding) VALUES (?1, ?2)",
            params![sample.id.to_string(), embedding_to_bytes(embedding)],
        )
        .map_err(DatabaseError::Query)?;

        tx.commit().map_err(DatabaseError::Query)?;
        Ok(())
    }

    /// Rank every stored sample by cosine similarity to `query`
    pub fn search_samples(&self, query: &[f32], limit: usize) -> ServiceResult<Vec<(SamplePrescription, f32)>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT p.id, p.file_id, p.mime_type, p.content, e.embedding
                FROM prescriptions p
                JOIN embeddings e ON p.id = e.prescription_id
                "#,
            )
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let embedding: Vec<u8> = row.get(4)?;
                Ok((
                    id,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    embedding,
                ))
            })
            .map_err(DatabaseError::Query)?;

        let mut results = Vec::new();
        for row in rows {
            let (id, file_id, mime_type, content, embedding_bytes) =
                row.map_err(DatabaseError::Query)?;

            let Ok(id) = Uuid::parse_str(&id) else {
                tracing::warn!(sample_id = %id, "Skipping sample with malformed id");
                continue;
            };

            let similarity = cosine_similarity(query, &bytes_to_embedding(&embedding_bytes));
            results.push((
                SamplePrescription {
                    id,
                    file_id,
                    mime_type,
                    content,
                },
                similarity,
            ));
        }

        // Sort by similarity (descending)
        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);

        Ok(results)
    }

    /// Number of stored samples
    pub fn sample_count(&self) -> ServiceResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM prescriptions", [], |row| row.get(0))
            .map_err(DatabaseError::Query)?;
        Ok(count as usize)
    }
}

#[async_trait]
impl SampleStore for Database {
    async fn nearest(&self, embedding: &[f32], k: usize) -> ServiceResult<Vec<SamplePrescription>> {
        Ok(self
            .search_samples(embedding, k)?
            .into_iter()
            .map(|(sample, _)| sample)
            .collect())
    }

    async fn save(
        &self,
        content_type: &str,
        locator: &str,
        document: &Prescription,
        embedding: &[f32],
    ) -> ServiceResult<SamplePrescription> {
        let content = serde_json::to_string(document).map_err(DatabaseError::Serialization)?;
        let sample = SamplePrescription::new(locator, content_type, content);
        self.insert_sample(&sample, embedding)?;
        Ok(sample)
    }
}

fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Calculate cosine similarity between two vectors
pub(super) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
