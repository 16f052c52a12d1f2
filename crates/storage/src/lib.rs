//! Storage Layer
//!
//! Persistence interfaces for readings, alerts, and family memberships, with
//! an in-memory repository and a SQLite repository.

mod repository;
mod sqlite;

pub use repository::MemoryRepository;
pub use sqlite::SqliteRepository;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;
use vitals_types::{AlertRecord, FamilyMembership, Permissions, Reading};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Record not found")]
    NotFound,
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StorageError::NotFound,
            other => StorageError::DatabaseError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}

/// Persistence for readings and alerts
#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist a single reading
    async fn append_reading(&self, reading: &Reading) -> Result<(), StorageError>;

    /// Persist a batch of readings. Re-sending a batch after a failure may
    /// store duplicates; it never loses readings.
    async fn append_readings_batch(&self, readings: &[Reading]) -> Result<(), StorageError>;

    /// Set the post-evaluation flags of a stored reading
    async fn mark_reading_processed(&self, id: Uuid, anomaly: bool) -> Result<(), StorageError>;

    async fn append_alert(&self, alert: &AlertRecord) -> Result<(), StorageError>;

    /// Merge an alert's changes into the stored record and return the result.
    ///
    /// Applied atomically with [`AlertRecord::merge`], so a writer holding a
    /// stale copy cannot undo a resolution, lower the escalation level, or
    /// move a recipient backwards. Fails with [`StorageError::NotFound`] if
    /// the alert is absent.
    async fn update_alert(&self, alert: &AlertRecord) -> Result<AlertRecord, StorageError>;

    async fn get_alert(&self, id: Uuid) -> Result<Option<AlertRecord>, StorageError>;

    /// Memberships of every family group the user belongs to, grouped by
    /// group in the order the user joined them
    async fn query_family_memberships(
        &self,
        user_id: &str,
    ) -> Result<Vec<FamilyMembership>, StorageError>;

    /// Most recent alerts of a family group, newest first
    async fn query_family_alerts(
        &self,
        group_id: &str,
        limit: usize,
    ) -> Result<Vec<AlertRecord>, StorageError>;

    /// Alerts the escalation sweep can still raise
    /// ([`AlertRecord::can_escalate`]), oldest first
    async fn escalation_candidates(&self, limit: usize) -> Result<Vec<AlertRecord>, StorageError>;
}

/// Membership and permission lookups owned by family management
#[async_trait]
pub trait FamilyDirectory: Send + Sync {
    async fn is_active_member(&self, group_id: &str, user_id: &str) -> Result<bool, StorageError>;

    /// Permissions of a member; all false for non-members
    async fn get_permissions(
        &self,
        group_id: &str,
        user_id: &str,
    ) -> Result<Permissions, StorageError>;
}
