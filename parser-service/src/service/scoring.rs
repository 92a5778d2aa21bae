//! Grading parser output against validated documents.

use tracing::{info, warn};

use super::ParserService;
use crate::error::{ServiceError, ServiceResult};
use crate::models::ParserResultScore;

/// Rounding slack allowed between reported and recomputed percentages
const PERCENTAGE_TOLERANCE: f64 = 0.5;

impl ParserService {
    /// Ask the backend to grade `output_json` against `expected_json`.
    ///
    /// Both inputs must be JSON. Backend errors are returned as-is. A
    /// percentage that contradicts the point totals is recomputed from them.
    pub async fn score_result(
        &self,
        expected_json: &str,
        output_json: &str,
    ) -> ServiceResult<ParserResultScore> {
        ensure_json("expected", expected_json)?;
        ensure_json("output", output_json)?;

        let mut score = self.backend.score(expected_json, output_json).await?;
        let computed = score.computed_percentage();
        if (computed - score.overall_score_percentage).abs() > PERCENTAGE_TOLERANCE {
            warn!(
                reported = score.overall_score_percentage,
                computed, "Score percentage disagrees with point totals, using totals"
            );
            score.overall_score_percentage = computed;
        }
        info!(
            fields = score.field_scores.len(),
            percentage = score.overall_score_percentage,
            "Parser output scored"
        );
        Ok(score)
    }
}

fn ensure_json(label: &str, text: &str) -> ServiceResult<()> {
    serde_json::from_str::<serde_json::Value>(text)
        .map(|_| ())
        .map_err(|e| ServiceError::InvalidRequest {
            message: format!("{label} is not valid JSON: {e}"),
        })
}
