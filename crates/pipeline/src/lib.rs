//! Vital-Sign Alerting Pipeline
//!
//! Wires normalization, quality scoring, threshold evaluation, recipient
//! resolution, and dispatch together. Synchronous submissions and critical
//! streamed samples are evaluated immediately; everything else goes through
//! the ingest buffer and is evaluated when its batch is flushed.

mod config;
mod pipeline;
mod stream;

pub use config::{Limits, PipelineConfig};
pub use pipeline::{DeliveryReceipt, EscalationSummary, Pipeline, SubmitReceipt};
pub use stream::{StreamGateway, StreamOutcome};

use data_validator::ValidationError;
use ingest_buffer::IngestError;
use storage::StorageError;
use thiserror::Error;
use uuid::Uuid;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid reading: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Alert {0} not found")]
    AlertNotFound(Uuid),

    #[error("User {user_id} may not access group {group_id}")]
    NotAuthorized { user_id: String, group_id: String },

    #[error("User {user_id} is not a recipient of alert {alert_id}")]
    NotRecipient { alert_id: Uuid, user_id: String },
}
