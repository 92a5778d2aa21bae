//! Data types exchanged with extraction backends and API callers.
//!
//! Field doc comments double as schema descriptions: they are what the
//! extraction model sees when filling the structured output.

mod prescription;
mod sample;
mod score;

pub use prescription::Prescription;
pub use sample::SamplePrescription;
pub use score::ParserResultScore;
