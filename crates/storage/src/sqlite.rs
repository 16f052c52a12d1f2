//! SQLite Repository
//!
//! Records are stored as JSON bodies next to the columns queries filter on.

use crate::{FamilyDirectory, Storage, StorageError};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vitals_types::{AlertRecord, FamilyMembership, Permissions, Reading};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS readings (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        data_type TEXT NOT NULL,
        recorded_at_ms INTEGER NOT NULL,
        processed INTEGER NOT NULL DEFAULT 0,
        anomaly INTEGER NOT NULL DEFAULT 0,
        body TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_readings_user ON readings (user_id, recorded_at_ms)",
    "CREATE TABLE IF NOT EXISTS alerts (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        family_group_ref TEXT,
        is_resolved INTEGER NOT NULL DEFAULT 0,
        escalating INTEGER NOT NULL DEFAULT 0,
        created_at_ms INTEGER NOT NULL,
        body TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_alerts_group ON alerts (family_group_ref, created_at_ms)",
    "CREATE INDEX IF NOT EXISTS idx_alerts_escalating ON alerts (escalating, created_at_ms)",
    "CREATE TABLE IF NOT EXISTS family_memberships (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        group_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        is_active INTEGER NOT NULL,
        body TEXT NOT NULL
    )",
];

/// Repository backed by a SQLite database
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Open (creating if needed) the database at `url` and apply the schema
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let mut pool_options = SqlitePoolOptions::new().max_connections(5);
        if url.contains(":memory:") {
            // Each connection to `:memory:` sees its own database; keep exactly one alive
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = pool_options.connect_with(options).await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        info!("Opened SQLite repository at {}", url);
        Ok(Self { pool })
    }

    /// Register a family membership
    pub async fn add_membership(&self, membership: &FamilyMembership) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO family_memberships (group_id, user_id, is_active, body) VALUES (?, ?, ?, ?)",
        )
        .bind(&membership.group_id)
        .bind(&membership.user_ref)
        .bind(membership.is_active)
        .bind(serde_json::to_string(membership)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Stored readings for a user, oldest first
    pub async fn readings_for(&self, user_id: &str) -> Result<Vec<Reading>, StorageError> {
        let rows: Vec<(String, bool, bool)> = sqlx::query_as(
            "SELECT body, processed, anomaly FROM readings WHERE user_id = ? ORDER BY recorded_at_ms, rowid",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(body, processed, anomaly)| -> Result<Reading, StorageError> {
                let mut reading: Reading = serde_json::from_str(&body)?;
                reading.processed = processed;
                reading.anomaly = anomaly;
                Ok(reading)
            })
            .collect()
    }
}

fn decode_alerts(bodies: Vec<String>) -> Result<Vec<AlertRecord>, StorageError> {
    bodies
        .iter()
        .map(|body| serde_json::from_str(body).map_err(StorageError::from))
        .collect()
}

/// Read, merge, and write back one alert on a connection inside a transaction
async fn merge_alert(
    conn: &mut SqliteConnection,
    alert: &AlertRecord,
) -> Result<AlertRecord, StorageError> {
    let body: Option<String> = sqlx::query_scalar("SELECT body FROM alerts WHERE id = ?")
        .bind(alert.id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    let mut stored: AlertRecord = match body {
        Some(body) => serde_json::from_str(&body)?,
        None => return Err(StorageError::NotFound),
    };

    if stored.merge(alert) {
        sqlx::query("UPDATE alerts SET is_resolved = ?, escalating = ?, body = ? WHERE id = ?")
            .bind(stored.is_resolved)
            .bind(stored.can_escalate())
            .bind(serde_json::to_string(&stored)?)
            .bind(stored.id.to_string())
            .execute(&mut *conn)
            .await?;
    }
    Ok(stored)
}

const INSERT_READING: &str = "INSERT OR IGNORE INTO readings
    (id, user_id, data_type, recorded_at_ms, processed, anomaly, body)
    VALUES (?, ?, ?, ?, ?, ?, ?)";

#[async_trait]
impl Storage for SqliteRepository {
    async fn append_reading(&self, reading: &Reading) -> Result<(), StorageError> {
        sqlx::query(INSERT_READING)
            .bind(reading.id.to_string())
            .bind(&reading.user_id)
            .bind(reading.data_type.as_str())
            .bind(reading.timestamp.timestamp_millis())
            .bind(reading.processed)
            .bind(reading.anomaly)
            .bind(serde_json::to_string(reading)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_readings_batch(&self, readings: &[Reading]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        for reading in readings {
            sqlx::query(INSERT_READING)
                .bind(reading.id.to_string())
                .bind(&reading.user_id)
                .bind(reading.data_type.as_str())
                .bind(reading.timestamp.timestamp_millis())
                .bind(reading.processed)
                .bind(reading.anomaly)
                .bind(serde_json::to_string(reading)?)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        debug!("Appended batch of {} readings", readings.len());
        Ok(())
    }

    async fn mark_reading_processed(&self, id: Uuid, anomaly: bool) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE readings SET processed = 1, anomaly = ? WHERE id = ?")
            .bind(anomaly)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn append_alert(&self, alert: &AlertRecord) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO alerts (id, user_id, family_group_ref, is_resolved, escalating, created_at_ms, body)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(alert.id.to_string())
        .bind(&alert.user_id)
        .bind(alert.family_group_ref.as_deref())
        .bind(alert.is_resolved)
        .bind(alert.can_escalate())
        .bind(alert.created_at.timestamp_millis())
        .bind(serde_json::to_string(alert)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_alert(&self, alert: &AlertRecord) -> Result<AlertRecord, StorageError> {
        let mut conn = self.pool.acquire().await?;
        // Take the write lock before reading so concurrent merges serialize
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let merged = merge_alert(&mut *conn, alert).await;
        let finish = if merged.is_ok() { "COMMIT" } else { "ROLLBACK" };
        if let Err(e) = sqlx::query(finish).execute(&mut *conn).await {
            warn!("{} of alert {} failed: {}", finish, alert.id, e);
            return Err(e.into());
        }
        merged
    }

    async fn get_alert(&self, id: Uuid) -> Result<Option<AlertRecord>, StorageError> {
        let body: Option<String> = sqlx::query_scalar("SELECT body FROM alerts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        body.map(|b| serde_json::from_str(&b).map_err(StorageError::from))
            .transpose()
    }

    async fn query_family_memberships(
        &self,
        user_id: &str,
    ) -> Result<Vec<FamilyMembership>, StorageError> {
        let bodies: Vec<String> = sqlx::query_scalar(
            "SELECT m.body FROM family_memberships m
             JOIN (
                 SELECT group_id, MIN(seq) AS joined_seq FROM family_memberships
                 WHERE user_id = ? AND is_active = 1
                 GROUP BY group_id
             ) g ON m.group_id = g.group_id
             ORDER BY g.joined_seq, m.seq",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(StorageError::from))
            .collect()
    }

    async fn query_family_alerts(
        &self,
        group_id: &str,
        limit: usize,
    ) -> Result<Vec<AlertRecord>, StorageError> {
        let bodies: Vec<String> = sqlx::query_scalar(
            "SELECT body FROM alerts WHERE family_group_ref = ?
             ORDER BY created_at_ms DESC, rowid DESC LIMIT ?",
        )
        .bind(group_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        decode_alerts(bodies)
    }

    async fn escalation_candidates(&self, limit: usize) -> Result<Vec<AlertRecord>, StorageError> {
        let bodies: Vec<String> = sqlx::query_scalar(
            "SELECT body FROM alerts WHERE escalating = 1 ORDER BY created_at_ms, rowid LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        decode_alerts(bodies)
    }
}

#[async_trait]
impl FamilyDirectory for SqliteRepository {
    async fn is_active_member(&self, group_id: &str, user_id: &str) -> Result<bool, StorageError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM family_memberships WHERE group_id = ? AND user_id = ? AND is_active = 1",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn get_permissions(
        &self,
        group_id: &str,
        user_id: &str,
    ) -> Result<Permissions, StorageError> {
        let body: Option<String> = sqlx::query_scalar(
            "SELECT body FROM family_memberships
             WHERE group_id = ? AND user_id = ? AND is_active = 1
             ORDER BY seq LIMIT 1",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match body {
            Some(body) => {
                let membership: FamilyMembership = serde_json::from_str(&body)?;
                Ok(membership.permissions)
            }
            None => Ok(Permissions::default()),
        }
    }
}
