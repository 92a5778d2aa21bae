//! Ingestion of validated sample prescriptions.

use bytes::Bytes;
use tracing::{info, warn};

use super::ParserService;
use super::pipeline::resolve_content_type;
use crate::error::{ProcessingError, ServiceResult};
use crate::models::{Prescription, SamplePrescription};

impl ParserService {
    /// Upload a document, embed its validated prescription and store both
    /// as an exemplar for future refinement passes.
    ///
    /// Runs synchronously and returns the first error. The uploaded file is
    /// kept as long as the sample exists, since exemplars reference it.
    pub async fn ingest_sample(
        &self,
        file_name: &str,
        bytes: Bytes,
        document: Prescription,
    ) -> ServiceResult<SamplePrescription> {
        let content_type = resolve_content_type(file_name)?;
        if bytes.is_empty() {
            return Err(ProcessingError::Read(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "file is empty",
            ))
            .into());
        }

        let locator = self.backend.upload(file_name, &content_type, bytes).await?;

        let stored = match self.backend.embed(&document).await {
            Ok(embedding) => {
                self.samples
                    .save(&content_type, &locator, &document, &embedding)
                    .await
            }
            Err(e) => Err(e.into()),
        };

        match stored {
            Ok(sample) => {
                info!(sample_id = %sample.id, file_name, "Sample prescription stored");
                Ok(sample)
            }
            Err(e) => {
                // Nothing references the upload now.
                if let Err(delete_err) = self.backend.delete(&locator).await {
                    warn!(locator = %locator, error = %delete_err, "Failed to delete orphaned upload");
                }
                Err(e)
            }
        }
    }
}
