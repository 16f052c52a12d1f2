//! In-Memory Repository

use crate::{FamilyDirectory, Storage, StorageError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;
use vitals_types::{AlertRecord, FamilyMembership, Permissions, Reading};

/// Repository backed by process memory
pub struct MemoryRepository {
    /// Reading log, oldest first
    readings: Mutex<VecDeque<Reading>>,
    /// Alert records, oldest first
    alerts: Mutex<Vec<AlertRecord>>,
    /// Family memberships in insertion order
    memberships: Mutex<Vec<FamilyMembership>>,
    /// Max reading records (oldest evicted first)
    max_readings: usize,
    /// Max alert records
    max_alerts: usize,
    /// Number of upcoming batch writes to reject
    failing_batches: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StorageError> {
    mutex
        .lock()
        .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))
}

impl MemoryRepository {
    /// Create a new in-memory repository
    pub fn new() -> Self {
        info!("Creating in-memory repository");
        Self {
            readings: Mutex::new(VecDeque::with_capacity(10_000)),
            alerts: Mutex::new(Vec::with_capacity(1_000)),
            memberships: Mutex::new(Vec::new()),
            max_readings: 100_000,
            max_alerts: 10_000,
            failing_batches: AtomicUsize::new(0),
        }
    }

    /// Register a family membership
    pub fn add_membership(&self, membership: FamilyMembership) -> Result<(), StorageError> {
        lock(&self.memberships)?.push(membership);
        Ok(())
    }

    /// Reject the next `count` batch writes (fault injection)
    pub fn fail_next_batches(&self, count: usize) {
        self.failing_batches.store(count, Ordering::SeqCst);
    }

    /// All stored readings for a user, oldest first
    pub fn readings_for(&self, user_id: &str) -> Result<Vec<Reading>, StorageError> {
        Ok(lock(&self.readings)?
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    /// Get total reading count
    pub fn reading_count(&self) -> usize {
        self.readings.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Get total alert count
    pub fn alert_count(&self) -> usize {
        self.alerts.lock().map(|a| a.len()).unwrap_or(0)
    }

    fn push_reading(&self, log: &mut VecDeque<Reading>, reading: Reading) {
        // Enforce retention
        while log.len() >= self.max_readings {
            log.pop_front();
        }
        log.push_back(reading);
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryRepository {
    async fn append_reading(&self, reading: &Reading) -> Result<(), StorageError> {
        let mut log = lock(&self.readings)?;
        self.push_reading(&mut log, reading.clone());
        Ok(())
    }

    async fn append_readings_batch(&self, readings: &[Reading]) -> Result<(), StorageError> {
        let failing = self.failing_batches.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_batches.store(failing - 1, Ordering::SeqCst);
            warn!("Rejecting batch of {} readings (injected failure)", readings.len());
            return Err(StorageError::DatabaseError("injected batch failure".to_string()));
        }

        let mut log = lock(&self.readings)?;
        for reading in readings {
            self.push_reading(&mut log, reading.clone());
        }
        debug!("Appended batch of {} readings", readings.len());
        Ok(())
    }

    async fn mark_reading_processed(&self, id: Uuid, anomaly: bool) -> Result<(), StorageError> {
        let mut log = lock(&self.readings)?;
        let mut found = false;
        // Duplicates from retried batches share an id
        for reading in log.iter_mut().filter(|r| r.id == id) {
            reading.processed = true;
            reading.anomaly = anomaly;
            found = true;
        }
        if found {
            Ok(())
        } else {
            Err(StorageError::NotFound)
        }
    }

    async fn append_alert(&self, alert: &AlertRecord) -> Result<(), StorageError> {
        let mut alerts = lock(&self.alerts)?;
        if alerts.len() >= self.max_alerts {
            // Evict resolved alerts before any the sweep still watches
            let victim = alerts
                .iter()
                .position(|a| a.is_resolved)
                .or_else(|| alerts.iter().position(|a| !a.can_escalate()))
                .unwrap_or(0);
            let evicted = alerts.remove(victim);
            if evicted.can_escalate() {
                warn!("Alert retention evicted unresolved alert {}", evicted.id);
            }
        }
        alerts.push(alert.clone());
        debug!("Inserted alert {}", alert.id);
        Ok(())
    }

    async fn update_alert(&self, alert: &AlertRecord) -> Result<AlertRecord, StorageError> {
        let mut alerts = lock(&self.alerts)?;
        let stored = alerts
            .iter_mut()
            .find(|a| a.id == alert.id)
            .ok_or(StorageError::NotFound)?;
        stored.merge(alert);
        Ok(stored.clone())
    }

    async fn get_alert(&self, id: Uuid) -> Result<Option<AlertRecord>, StorageError> {
        Ok(lock(&self.alerts)?.iter().find(|a| a.id == id).cloned())
    }

    async fn query_family_memberships(
        &self,
        user_id: &str,
    ) -> Result<Vec<FamilyMembership>, StorageError> {
        let memberships = lock(&self.memberships)?;

        let mut groups: Vec<&str> = Vec::new();
        for m in memberships.iter().filter(|m| m.user_ref == user_id && m.is_active) {
            if !groups.contains(&m.group_id.as_str()) {
                groups.push(&m.group_id);
            }
        }

        Ok(groups
            .iter()
            .flat_map(|group| memberships.iter().filter(move |m| m.group_id == *group))
            .cloned()
            .collect())
    }

    async fn query_family_alerts(
        &self,
        group_id: &str,
        limit: usize,
    ) -> Result<Vec<AlertRecord>, StorageError> {
        Ok(lock(&self.alerts)?
            .iter()
            .rev()
            .filter(|a| a.family_group_ref.as_deref() == Some(group_id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn escalation_candidates(&self, limit: usize) -> Result<Vec<AlertRecord>, StorageError> {
        Ok(lock(&self.alerts)?
            .iter()
            .filter(|a| a.can_escalate())
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl FamilyDirectory for MemoryRepository {
    async fn is_active_member(&self, group_id: &str, user_id: &str) -> Result<bool, StorageError> {
        Ok(lock(&self.memberships)?
            .iter()
            .any(|m| m.group_id == group_id && m.user_ref == user_id && m.is_active))
    }

    async fn get_permissions(
        &self,
        group_id: &str,
        user_id: &str,
    ) -> Result<Permissions, StorageError> {
        Ok(lock(&self.memberships)?
            .iter()
            .find(|m| m.group_id == group_id && m.user_ref == user_id && m.is_active)
            .map(|m| m.permissions)
            .unwrap_or_default())
    }
}
