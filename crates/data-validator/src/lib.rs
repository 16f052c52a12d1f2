//! Data Validation and Normalization
//!
//! Maps vendor-specific device payloads onto canonical vital-sign shapes and
//! scores how far each reading can be trusted.

mod error;
mod normalizer;
mod quality;

pub use error::ValidationError;
pub use normalizer::{NormalizedSample, Normalizer};
pub use quality::{QualityAssessment, QualityAssessor, QualityConfig, SampleSource};
