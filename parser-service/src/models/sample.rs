use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A validated exemplar used as few-shot context for refinement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplePrescription {
    pub id: Uuid,
    /// Backend locator of the uploaded source document
    pub file_id: String,
    pub mime_type: String,
    /// Validated document as JSON text
    pub content: String,
}

impl SamplePrescription {
    pub fn new(file_id: impl Into<String>, mime_type: impl Into<String>, content: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_id: file_id.into(),
            mime_type: mime_type.into(),
            content,
        }
    }

    /// Parse the stored content back into a document
    #[cfg(test)]
    pub fn document(&self) -> serde_json::Result<super::Prescription> {
        serde_json::from_str(&self.content)
    }
}
