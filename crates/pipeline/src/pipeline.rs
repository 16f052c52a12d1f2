//! Evaluation and Alert Lifecycle

use crate::{PipelineConfig, PipelineError};
use alerting::{EscalationPolicy, RecipientResolver, ThresholdEvaluator};
use chrono::{DateTime, Utc};
use data_validator::{Normalizer, QualityAssessor, SampleSource, ValidationError};
use notifier::{ChannelSender, DispatchMode, Dispatcher};
use serde_json::Value;
use std::sync::Arc;
use storage::{FamilyDirectory, Storage};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vitals_types::{AlertDraft, AlertRecord, DataType, Reading};

/// Outcome of a synchronous submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub reading_id: Uuid,
    pub alerts_generated: usize,
}

/// Outcome of one escalation sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EscalationSummary {
    /// Alerts that could still escalate, examined this sweep
    pub scanned: usize,
    /// Alerts whose level went up
    pub escalated: usize,
    /// Reminder notifications accepted by a provider
    pub notified: usize,
}

/// Provider delivery callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryReceipt {
    Delivered,
    Read,
}

/// The alerting pipeline
pub struct Pipeline {
    normalizer: Normalizer,
    assessor: QualityAssessor,
    evaluator: ThresholdEvaluator,
    resolver: RecipientResolver,
    escalation: EscalationPolicy,
    dispatcher: Dispatcher,
    storage: Arc<dyn Storage>,
    family: Arc<dyn FamilyDirectory>,
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a pipeline over the given collaborators
    pub fn new(
        config: PipelineConfig,
        storage: Arc<dyn Storage>,
        family: Arc<dyn FamilyDirectory>,
        sender: Arc<dyn ChannelSender>,
    ) -> Self {
        info!("Creating alerting pipeline");
        Self {
            normalizer: Normalizer::new(),
            assessor: QualityAssessor::new(config.quality.clone()),
            evaluator: ThresholdEvaluator::new(config.thresholds.clone()),
            resolver: RecipientResolver::new(),
            escalation: EscalationPolicy::new(config.escalation.clone()),
            dispatcher: Dispatcher::new(sender),
            storage,
            family,
            config,
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn escalation_policy(&self) -> &EscalationPolicy {
        &self.escalation
    }

    /// Normalize and score a raw payload into an unpersisted reading
    pub fn prepare(
        &self,
        user_id: &str,
        device_id: &str,
        device_type: &str,
        data_type: &str,
        raw: &Value,
    ) -> Result<Reading, ValidationError> {
        let data_type = DataType::parse(data_type);
        let sample = self.normalizer.normalize(&data_type, raw)?;
        let assessment = self
            .assessor
            .assess(&sample, SampleSource::from_device_type(device_type));

        let mut reading = Reading::new(user_id, device_id, device_type, Utc::now(), sample.payload);
        reading.quality_score = assessment.score;
        reading.quality_issues = assessment.issues;
        Ok(reading)
    }

    /// Whether a reading must skip the buffer
    pub fn is_critical(&self, reading: &Reading) -> bool {
        self.evaluator.is_critical(&reading.payload)
    }

    /// Validate, persist, and evaluate one reading synchronously
    pub async fn submit_reading(
        &self,
        user_id: &str,
        device_id: &str,
        device_type: &str,
        data_type: &str,
        raw: &Value,
    ) -> Result<SubmitReceipt, PipelineError> {
        let reading = match self.prepare(user_id, device_id, device_type, data_type, raw) {
            Ok(reading) => reading,
            Err(e) => {
                warn!("Rejected {} reading from {}: {}", data_type, device_id, e);
                metrics::counter!("vitals_readings_dropped_total", "path" => "submit").increment(1);
                return Err(e.into());
            }
        };
        metrics::counter!("vitals_readings_ingested_total", "path" => "submit").increment(1);

        let reading_id = reading.id;
        let alerts_generated = self.process_reading(reading).await?;
        Ok(SubmitReceipt {
            reading_id,
            alerts_generated,
        })
    }

    /// Persist a reading and evaluate it. Returns the number of alerts raised.
    pub async fn process_reading(&self, reading: Reading) -> Result<usize, PipelineError> {
        self.storage.append_reading(&reading).await?;
        self.evaluate_stored(&reading).await
    }

    /// Evaluate readings persisted by a batch write. A failure is logged and
    /// the remaining readings are still evaluated. Returns the alerts raised.
    pub async fn evaluate_batch(&self, readings: &[Reading]) -> usize {
        let mut raised = 0;
        for reading in readings {
            match self.evaluate_stored(reading).await {
                Ok(count) => raised += count,
                Err(e) => warn!("Evaluation of buffered reading {} failed: {}", reading.id, e),
            }
        }
        debug!(
            "Evaluated batch of {} readings, {} alerts",
            readings.len(),
            raised
        );
        raised
    }

    /// Evaluate an already-persisted reading and set its flags
    async fn evaluate_stored(&self, reading: &Reading) -> Result<usize, PipelineError> {
        let raised = match self.evaluator.evaluate(reading) {
            Some(draft) => {
                self.raise_alert(draft, Some(reading.id)).await?;
                1
            }
            None => 0,
        };
        self.storage
            .mark_reading_processed(reading.id, raised > 0)
            .await?;
        Ok(raised)
    }

    /// Resolve recipients, persist the alert, and notify them.
    ///
    /// The alert is stored before dispatch; delivery failures only show up in
    /// recipient status. Delivery state is merged into the stored record, so
    /// a resolve or acknowledge that lands mid-dispatch survives.
    pub async fn raise_alert(
        &self,
        draft: AlertDraft,
        reading_ref: Option<Uuid>,
    ) -> Result<AlertRecord, PipelineError> {
        let memberships = self.storage.query_family_memberships(&draft.user_id).await?;
        let resolved = self.resolver.resolve(&memberships, draft.severity);

        let mut alert = AlertRecord::from_draft(
            draft,
            reading_ref,
            resolved.group_id,
            resolved.recipients,
            Utc::now(),
        );
        self.storage.append_alert(&alert).await?;
        metrics::counter!("vitals_alerts_generated_total", "severity" => alert.severity.as_str())
            .increment(1);
        info!(
            "Alert {} ({}, {}) for user {} with {} recipients",
            alert.id,
            alert.alert_type.as_str(),
            alert.severity.as_str(),
            alert.user_id,
            alert.recipients.len()
        );

        self.dispatcher
            .dispatch(&mut alert, DispatchMode::Initial)
            .await;
        match self.storage.update_alert(&alert).await {
            Ok(stored) => alert = stored,
            Err(e) => error!("Failed to record delivery state of alert {}: {}", alert.id, e),
        }
        Ok(alert)
    }

    async fn load_alert(&self, alert_id: Uuid) -> Result<AlertRecord, PipelineError> {
        self.storage
            .get_alert(alert_id)
            .await?
            .ok_or(PipelineError::AlertNotFound(alert_id))
    }

    /// Resolve an alert on behalf of a family member.
    ///
    /// Resolving an already-resolved alert returns it unchanged.
    pub async fn resolve_alert(
        &self,
        alert_id: Uuid,
        resolver_user_id: &str,
        notes: Option<String>,
    ) -> Result<AlertRecord, PipelineError> {
        let mut alert = self.load_alert(alert_id).await?;

        let allowed = match &alert.family_group_ref {
            Some(group_id) => {
                self.family
                    .is_active_member(group_id, resolver_user_id)
                    .await?
            }
            // No family to notify: only the monitored user owns it
            None => alert.user_id == resolver_user_id,
        };
        if !allowed {
            return Err(PipelineError::NotAuthorized {
                user_id: resolver_user_id.to_string(),
                group_id: alert.family_group_ref.clone().unwrap_or_default(),
            });
        }

        if alert.resolve(resolver_user_id, notes, Utc::now()) {
            alert = self.storage.update_alert(&alert).await?;
            info!(
                "Alert {} resolved by {}",
                alert.id,
                alert.resolved_by.as_deref().unwrap_or(resolver_user_id)
            );
        } else {
            debug!("Alert {} already resolved", alert.id);
        }
        Ok(alert)
    }

    /// Record that a recipient has acknowledged an alert
    pub async fn acknowledge_alert(
        &self,
        alert_id: Uuid,
        user_id: &str,
    ) -> Result<AlertRecord, PipelineError> {
        self.update_recipient(alert_id, user_id, |r, at| r.acknowledge(at))
            .await
    }

    /// Apply a provider delivery callback to a recipient
    pub async fn record_receipt(
        &self,
        alert_id: Uuid,
        user_id: &str,
        receipt: DeliveryReceipt,
    ) -> Result<AlertRecord, PipelineError> {
        self.update_recipient(alert_id, user_id, |r, at| match receipt {
            DeliveryReceipt::Delivered => r.mark_delivered(at),
            DeliveryReceipt::Read => r.mark_read(at),
        })
        .await
    }

    async fn update_recipient(
        &self,
        alert_id: Uuid,
        user_id: &str,
        apply: impl FnOnce(&mut vitals_types::Recipient, DateTime<Utc>) -> bool,
    ) -> Result<AlertRecord, PipelineError> {
        let mut alert = self.load_alert(alert_id).await?;
        let recipient = alert
            .recipient_mut(user_id)
            .ok_or_else(|| PipelineError::NotRecipient {
                alert_id,
                user_id: user_id.to_string(),
            })?;

        if apply(recipient, Utc::now()) {
            return Ok(self.storage.update_alert(&alert).await?);
        }
        debug!("Alert {}: status of {} unchanged", alert_id, user_id);
        Ok(alert)
    }

    /// Escalate overdue alerts and remind recipients who have not acknowledged.
    ///
    /// Only alerts that can still escalate are scanned, so settled alerts
    /// never crowd overdue ones out of the window.
    pub async fn check_escalations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<EscalationSummary, PipelineError> {
        let alerts = self
            .storage
            .escalation_candidates(self.config.limits.escalation_scan)
            .await?;
        let mut summary = EscalationSummary {
            scanned: alerts.len(),
            ..EscalationSummary::default()
        };

        for mut alert in alerts {
            if !self.escalation.escalate(&mut alert, now) {
                continue;
            }
            summary.escalated += 1;
            metrics::counter!("vitals_alerts_escalated_total", "level" => alert.escalation_level.to_string())
                .increment(1);

            let report = self
                .dispatcher
                .dispatch(&mut alert, DispatchMode::Escalation)
                .await;
            summary.notified += report.sent;

            match self.storage.update_alert(&alert).await {
                Ok(stored) if stored.is_resolved => {
                    debug!("Alert {} was resolved during its escalation", stored.id);
                }
                Ok(_) => {}
                Err(e) => error!("Failed to persist escalation of alert {}: {}", alert.id, e),
            }
        }

        if summary.escalated > 0 {
            info!(
                "Escalation sweep: {} of {} alerts escalated",
                summary.escalated, summary.scanned
            );
        }
        Ok(summary)
    }

    /// Recent alerts of a family group, newest first
    pub async fn family_alerts(
        &self,
        group_id: &str,
        requester_id: &str,
        limit: usize,
    ) -> Result<Vec<AlertRecord>, PipelineError> {
        let permissions = self.family.get_permissions(group_id, requester_id).await?;
        if !permissions.view_health_data {
            return Err(PipelineError::NotAuthorized {
                user_id: requester_id.to_string(),
                group_id: group_id.to_string(),
            });
        }

        let limit = limit.min(self.config.limits.family_feed_max);
        Ok(self.storage.query_family_alerts(group_id, limit).await?)
    }
}
