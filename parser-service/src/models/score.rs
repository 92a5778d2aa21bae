use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Field-by-field grade of a parser output against a validated document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ParserResultScore {
    /// Scoring details for each evaluated field
    pub field_scores: Vec<FieldScore>,
    /// Sum of points awarded across all fields. Each field earns 0.0, 0.25, 0.75 or 1.0.
    pub total_awarded_points: f64,
    /// Points available if every field were parsed perfectly, one per field
    pub total_possible_points: f64,
    /// (awarded / possible) * 100
    pub overall_score_percentage: f64,
    /// Human-readable assessment of the parser output quality
    pub summary_critique: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct FieldScore {
    /// Dot-notation path of the field (e.g. patient.first_name, medications[0].form)
    pub field_path: String,
    /// Expected value, null when absent from the expected document
    #[schemars(with = "Option<String>")]
    pub expected_value: serde_json::Value,
    /// Value produced by the parser, null when missing
    #[schemars(with = "Option<String>")]
    pub output_value: serde_json::Value,
    /// One of 0.0, 0.25, 0.75 or 1.0
    pub score: f64,
    /// Why this score was assigned
    pub reasoning: String,
}

impl ParserResultScore {
    /// Recompute the percentage from the point totals.
    ///
    /// Returns 0 when no points were possible.
    pub fn computed_percentage(&self) -> f64 {
        if self.total_possible_points <= 0.0 {
            0.0
        } else {
            self.total_awarded_points / self.total_possible_points * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_accept_any_json() {
        let score: FieldScore = serde_json::from_str(
            r#"{"field_path":"medications[0].quantity","expected_value":30,"output_value":null,"score":0.0,"reasoning":"missing"}"#,
        )
        .unwrap();
        assert_eq!(score.expected_value, serde_json::json!(30));
        assert!(score.output_value.is_null());
    }

    #[test]
    fn test_computed_percentage() {
        let score = ParserResultScore {
            total_awarded_points: 3.0,
            total_possible_points: 4.0,
            ..Default::default()
        };
        assert!((score.computed_percentage() - 75.0).abs() < f64::EPSILON);
        assert_eq!(ParserResultScore::default().computed_percentage(), 0.0);
    }
}
